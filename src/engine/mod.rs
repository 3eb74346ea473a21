mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{available_slots, slot_duration};
pub use error::EngineError;
pub use mutations::{BookingPatch, NewBooking};
pub use queries::BookingFilter;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::audit::{AuditAction, AuditHub, AuditRecord};
use crate::model::*;
use crate::tenant::TenantScope;
use crate::wal::Wal;

pub type SharedProfessionalState = Arc<RwLock<ProfessionalState>>;

/// Attempts to chase a booking that moved between lookup and lock.
const RESOLVE_ATTEMPTS: usize = 8;

// ── Group-commit WAL channel ─────────────────────────────

/// Requests to the WAL writer task. Each carries its own reply channel.
pub(super) enum WalCommand {
    /// Durably append one event; the reply arrives after its batch's fsync.
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    /// Replace the log with a snapshot of the current state.
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    /// Durable appends since the last compaction, for the compactor.
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the next command arrives.
/// 2. For an Append, drain every Append already queued (the batch window).
///    A non-append command ends the window and runs after the batch.
/// 3. Encode the batch, then one write + fsync.
/// 4. Reply to every sender with the batch result. A failed batch leaves
///    nothing in the log.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                if let Some(cmd) = deferred {
                    handle_non_append(&mut wal, cmd);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
    tracing::debug!(path = %wal.path().display(), "WAL writer stopped");
}

/// Flush one batch, record its size and latency, and answer its senders.
fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!(path = %wal.path().display(), "WAL flush failed: {e}");
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// Buffer every event of the batch, then one write + fsync. Any failure
/// discards the whole batch, so none of it can surface on replay.
fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            wal.discard_pending();
            return Err(e);
        }
    }
    wal.flush_sync()
}

/// Compaction, counters, or a lone append deferred from a batch window.
fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// One tenant's booking state: professionals with their bookings, the
/// WAL writer, and the booking → professional index.
pub struct Engine {
    tenant: TenantScope,
    /// Professional id → its state behind a per-professional lock.
    pub(super) state: DashMap<Ulid, SharedProfessionalState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    audit: Arc<AuditHub>,
    /// Reverse lookup: booking id → professional id.
    pub(super) booking_index: DashMap<Ulid, Ulid>,
    /// Serializes directory writes and compaction snapshots.
    pub(super) directory_lock: Mutex<()>,
}

/// Apply an event to one professional's state. The caller holds its lock.
///
/// `BookingUpdated` always drops the old copy and re-inserts only when the
/// booking now belongs to `ps`, so applying it to both sides of a move
/// leaves each consistent.
pub(super) fn apply_to_professional(
    ps: &mut ProfessionalState,
    event: &Event,
    index: &DashMap<Ulid, Ulid>,
) {
    match event {
        Event::ProfessionalUpserted { professional } => {
            ps.professional = professional.clone();
        }
        Event::BookingCreated { booking } => {
            ps.insert_booking(booking.clone());
            index.insert(booking.id, booking.professional_id);
        }
        Event::BookingUpdated { booking, .. } => {
            ps.remove_booking(booking.id);
            if booking.professional_id == ps.professional.id {
                ps.insert_booking(booking.clone());
                index.insert(booking.id, booking.professional_id);
            }
        }
        Event::BookingConfirmed { id, at, .. } => {
            if let Some(b) = ps.booking_mut(*id) {
                b.status = BookingStatus::Confirmed;
                b.confirmed = true;
                b.confirmed_at = Some(*at);
                b.updated_at = *at;
            }
        }
        Event::BookingCancelled { id, at, reason, .. } => {
            if let Some(b) = ps.booking_mut(*id) {
                b.status = BookingStatus::Cancelled;
                b.cancelled_at = Some(*at);
                b.cancellation_reason = reason.clone();
                b.updated_at = *at;
            }
        }
        Event::BookingDeleted { id, .. } => {
            ps.remove_booking(*id);
            index.remove(id);
        }
        // Removal is handled at the DashMap level.
        Event::ProfessionalRemoved { .. } => {}
    }
}

/// Professionals an event touches. A move touches two.
fn event_professionals(event: &Event) -> (Ulid, Option<Ulid>) {
    match event {
        Event::ProfessionalUpserted { professional } => (professional.id, None),
        Event::ProfessionalRemoved { id } => (*id, None),
        Event::BookingCreated { booking } => (booking.professional_id, None),
        Event::BookingUpdated { booking, previous_professional_id } => {
            let moved = (*previous_professional_id != booking.professional_id)
                .then_some(*previous_professional_id);
            (booking.professional_id, moved)
        }
        Event::BookingConfirmed { professional_id, .. }
        | Event::BookingCancelled { professional_id, .. }
        | Event::BookingDeleted { professional_id, .. } => (*professional_id, None),
    }
}

impl Engine {
    /// Replay the tenant's WAL at `wal_path`, then start its writer task.
    /// Must run inside a tokio runtime.
    pub fn new(tenant: TenantScope, wal_path: PathBuf, audit: Arc<AuditHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        // Rebuild unlocked, then publish.
        let booking_index = DashMap::new();
        let mut professionals: HashMap<Ulid, ProfessionalState> = HashMap::new();
        for event in &events {
            match event {
                Event::ProfessionalUpserted { professional } => {
                    professionals
                        .entry(professional.id)
                        .and_modify(|ps| apply_to_professional(ps, event, &booking_index))
                        .or_insert_with(|| ProfessionalState::new(professional.clone()));
                }
                Event::ProfessionalRemoved { id } => {
                    if let Some(ps) = professionals.remove(id) {
                        for b in &ps.bookings {
                            booking_index.remove(&b.id);
                        }
                    }
                }
                other => {
                    let (target, moved_from) = event_professionals(other);
                    if let Some(prev) = moved_from
                        && let Some(ps) = professionals.get_mut(&prev)
                    {
                        apply_to_professional(ps, other, &booking_index);
                    }
                    if let Some(ps) = professionals.get_mut(&target) {
                        apply_to_professional(ps, other, &booking_index);
                    }
                }
            }
        }

        let booking_count = booking_index.len();
        let state = DashMap::new();
        for (id, ps) in professionals {
            state.insert(id, Arc::new(RwLock::new(ps)));
        }
        tracing::info!(
            tenant = %tenant,
            events = events.len(),
            professionals = state.len(),
            bookings = booking_count,
            "replayed WAL"
        );

        Ok(Self {
            tenant,
            state,
            wal_tx,
            audit,
            booking_index,
            directory_lock: Mutex::new(()),
        })
    }

    /// The scope every booking of this engine belongs to.
    pub fn tenant(&self) -> TenantScope {
        self.tenant
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Persistence("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Persistence("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Persistence(e.to_string()))
    }

    /// Shared handle to a professional's state, without locking it.
    pub(super) fn get_professional_state(&self, id: &Ulid) -> Option<SharedProfessionalState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    /// Professional currently holding `booking_id`, per the index.
    pub(super) fn professional_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_index.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append, then apply. Nothing changes in memory if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        ps: &mut ProfessionalState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_professional(ps, event, &self.booking_index);
        Ok(())
    }

    /// Write-lock a professional that is still registered once the lock is
    /// held. A removal racing with the wait surfaces as `ProfessionalNotFound`.
    pub(super) async fn lock_professional(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ProfessionalState>, EngineError> {
        loop {
            let shared = self
                .get_professional_state(&id)
                .ok_or(EngineError::ProfessionalNotFound(id))?;
            let guard = shared.clone().write_owned().await;
            match self.get_professional_state(&id) {
                Some(current) if Arc::ptr_eq(&current, &shared) => return Ok(guard),
                Some(_) => continue,
                None => return Err(EngineError::ProfessionalNotFound(id)),
            }
        }
    }

    /// Lookup booking → professional, then write-lock it. Retries when the
    /// booking moved to another professional while waiting for the lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<ProfessionalState>), EngineError> {
        for _ in 0..RESOLVE_ATTEMPTS {
            let professional_id = self
                .professional_for_booking(&booking_id)
                .ok_or(EngineError::NotFound(booking_id))?;
            let guard = match self.lock_professional(professional_id).await {
                Ok(g) => g,
                Err(EngineError::ProfessionalNotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if guard.booking(booking_id).is_some() {
                return Ok((professional_id, guard));
            }
        }
        Err(EngineError::NotFound(booking_id))
    }

    /// Publish an audit record for a write that has committed.
    pub(super) fn emit_audit(
        &self,
        action: AuditAction,
        professional_id: Ulid,
        booking_id: Option<Ulid>,
        changed: Vec<&'static str>,
        actor: Option<&str>,
    ) {
        self.audit.record(AuditRecord {
            at: conflict::now(),
            tenant: self.tenant,
            actor: actor.map(str::to_owned),
            action,
            professional_id,
            booking_id,
            changed,
        });
    }
}
