use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

use crate::audit::AuditHub;
use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;

/// The `(client, company)` pair isolating one customer's data.
/// Every engine operation runs inside exactly one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantScope {
    pub client_id: u64,
    pub company_id: u64,
}

impl TenantScope {
    pub fn new(client_id: u64, company_id: u64) -> Self {
        Self { client_id, company_id }
    }

    /// WAL file stem. Both ids are integers so no sanitizing is needed.
    fn file_stem(&self) -> String {
        format!("c{}_e{}", self.client_id, self.company_id)
    }
}

impl std::fmt::Display for TenantScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client {} / company {}", self.client_id, self.company_id)
    }
}

/// Per-tenant engines. Each tenant gets its own Engine + WAL + compactor,
/// created lazily on first use.
pub struct TenantManager {
    engines: DashMap<TenantScope, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    audit: Arc<AuditHub>,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, audit: Arc<AuditHub>) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            audit,
        }
    }

    pub fn audit(&self) -> &Arc<AuditHub> {
        &self.audit
    }

    /// Get or lazily create the engine for `scope`.
    pub fn get_or_create(&self, scope: TenantScope) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(&scope) {
            return Ok(engine.value().clone());
        }
        if scope.client_id == 0 || scope.company_id == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant ids must be positive",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // One engine, and so one WAL writer, per scope.
        let wal_path = self.wal_path(scope);
        let engine = match self.engines.entry(scope) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(v) => {
                let engine = Arc::new(Engine::new(scope, wal_path, self.audit.clone())?);
                v.insert(engine.clone());
                engine
            }
        };

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        tracing::info!(%scope, "tenant engine loaded");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }

    /// Engine for `scope` if the tenant has ever written anything. Never
    /// creates a WAL file, so reads for unknown tenants leave no trace.
    pub fn get_existing(&self, scope: TenantScope) -> std::io::Result<Option<Arc<Engine>>> {
        if let Some(engine) = self.engines.get(&scope) {
            return Ok(Some(engine.value().clone()));
        }
        if scope.client_id == 0 || scope.company_id == 0 || !self.wal_path(scope).try_exists()? {
            return Ok(None);
        }
        self.get_or_create(scope).map(Some)
    }

    fn wal_path(&self, scope: TenantScope) -> PathBuf {
        self.data_dir.join(format!("{}.wal", scope.file_stem()))
    }

    pub fn tenant_count(&self) -> usize {
        self.engines.len()
    }
}
