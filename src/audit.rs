use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::tenant::TenantScope;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    BookingCreated,
    BookingUpdated,
    BookingConfirmed,
    BookingCancelled,
    BookingDeleted,
    ProfessionalUpserted,
    ProfessionalRemoved,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::BookingCreated => "booking_created",
            AuditAction::BookingUpdated => "booking_updated",
            AuditAction::BookingConfirmed => "booking_confirmed",
            AuditAction::BookingCancelled => "booking_cancelled",
            AuditAction::BookingDeleted => "booking_deleted",
            AuditAction::ProfessionalUpserted => "professional_upserted",
            AuditAction::ProfessionalRemoved => "professional_removed",
        }
    }
}

/// Who changed what, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub at: DateTime<Utc>,
    pub tenant: TenantScope,
    pub actor: Option<String>,
    pub action: AuditAction,
    pub professional_id: Ulid,
    pub booking_id: Option<Ulid>,
    pub changed: Vec<&'static str>,
}

/// Fire-and-forget audit sink: every record is logged on the `audit`
/// target and broadcast to in-process subscribers.
pub struct AuditHub {
    sender: broadcast::Sender<AuditRecord>,
}

impl Default for AuditHub {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuditRecord> {
        self.sender.subscribe()
    }

    /// Never fails and never blocks the write path.
    pub fn record(&self, record: AuditRecord) {
        tracing::info!(
            target: "audit",
            client_id = record.tenant.client_id,
            company_id = record.tenant.company_id,
            actor = record.actor.as_deref().unwrap_or("-"),
            action = record.action.as_str(),
            professional_id = %record.professional_id,
            booking_id = ?record.booking_id,
            changed = ?record.changed,
            "audit"
        );
        // No subscribers is fine.
        let _ = self.sender.send(record);
    }
}
