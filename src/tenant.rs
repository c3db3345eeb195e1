use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::engine::{Engine, EngineError};
use crate::limits::*;
use crate::model::Ms;
use crate::reaper;

/// Manages per-tenant engines. Each tenant gets its own Engine + WAL +
/// background tasks. Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    /// `None` disables the reserved-hold sweeper.
    reserved_ttl: Option<Ms>,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, reserved_ttl: Option<Ms>) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            reserved_ttl,
        }
    }

    /// Get or lazily load the engine for `tenant`. A connection without a
    /// database name has no tenant.
    pub fn get_or_create(&self, tenant: Option<&str>) -> Result<Arc<Engine>, EngineError> {
        let tenant = tenant
            .filter(|t| !t.is_empty())
            .ok_or(EngineError::TenantContextMissing("database"))?;
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(EngineError::LimitExceeded("tenant name too long"));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(EngineError::LimitExceeded("too many tenants"));
        }

        // Sanitize tenant name to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(EngineError::TenantContextMissing("database"));
        }

        // Two connections may race to load the same tenant; the entry API
        // makes sure only one engine (and one WAL writer) wins.
        let entry = self.engines.entry(tenant.to_string());
        if let dashmap::mapref::entry::Entry::Occupied(existing) = &entry {
            return Ok(existing.get().clone());
        }
        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let engine = Arc::new(Engine::new(wal_path).map_err(|e| EngineError::WalError(e.to_string()))?);

        if let Some(ttl) = self.reserved_ttl {
            let reaper_engine = engine.clone();
            tokio::spawn(async move {
                reaper::run_reaper(reaper_engine, ttl).await;
            });
        }
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            reaper::run_compactor(compactor_engine, threshold).await;
        });

        entry.or_insert(engine.clone());
        info!(tenant, "tenant loaded");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}
