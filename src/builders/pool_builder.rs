//! Builders to construct worker pools from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use tracing::info;

use crate::config::PoolSetConfig;
use crate::core::{AppResult, WorkerPool};
use crate::util::clock::Clock;

/// Build every pool named in `cfg`, all sharing `clock`.
///
/// Pools built before a failure are shut down when the partial map is dropped.
///
/// # Errors
///
/// Fails if the configuration is invalid or a pool cannot start its threads.
pub fn build_pools(
    cfg: &PoolSetConfig,
    clock: &Arc<dyn Clock>,
) -> AppResult<HashMap<String, WorkerPool>> {
    cfg.validate()
        .map_err(|e| anyhow!("config invalid: {e}"))?;

    let mut pools = HashMap::with_capacity(cfg.pools.len());
    for (name, pool_cfg) in &cfg.pools {
        let pool = WorkerPool::with_clock(pool_cfg.clone(), Arc::clone(clock))
            .with_context(|| format!("failed to build pool `{name}`"))?;
        info!(pool = %name, pool_id = %pool.id(), "pool built from configuration");
        pools.insert(name.clone(), pool);
    }

    Ok(pools)
}

/// Parse `json` as a [`PoolSetConfig`] and build its pools on the system clock.
///
/// # Errors
///
/// Same as [`build_pools`], plus JSON parse errors.
pub fn build_pools_from_json(json: &str) -> AppResult<HashMap<String, WorkerPool>> {
    let cfg = PoolSetConfig::from_json_str(json).map_err(|e| anyhow!(e))?;
    let clock: Arc<dyn Clock> = Arc::new(crate::util::clock::SystemClock::new());
    build_pools(&cfg, &clock)
}
