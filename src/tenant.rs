use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::engine::{Engine, SlotGrid};
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::tasks;

/// Manages per-academy engines. Each academy gets its own Engine + WAL +
/// compactor. Academy = the `x-academy` request header.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    grid: SlotGrid,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, grid: SlotGrid) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            grid,
        }
    }

    /// Get or lazily create an engine for the given academy.
    pub fn get_or_create(&self, academy: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(academy) {
            return Ok(engine.value().clone());
        }
        if academy.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "academy name too long",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many academies"));
        }

        // Sanitize the name to prevent path traversal
        let safe_name: String = academy
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty academy name",
            ));
        }

        // The entry holds the shard lock while the closure runs, so two
        // concurrent first requests cannot both build an Engine over the
        // same WAL file.
        let engine = self
            .engines
            .entry(academy.to_string())
            .or_try_insert_with(|| {
                let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
                let notify = Arc::new(NotifyHub::new());
                let engine = Arc::new(Engine::new(wal_path, self.grid, notify)?);

                let compactor_engine = engine.clone();
                let threshold = self.compact_threshold;
                tokio::spawn(async move {
                    tasks::run_compactor(compactor_engine, threshold).await;
                });
                Ok::<_, std::io::Error>(engine)
            })?
            .clone();

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}
