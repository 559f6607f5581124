//! Tests for builder modules

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use prometheus_executors::builders::{build_pools, build_pools_from_json};
use prometheus_executors::config::{PoolPolicy, PoolSetConfig, WorkerPoolConfig};
use prometheus_executors::util::{Clock, ManualClock};

#[test]
fn test_build_pools_from_config() {
    let mut pools = HashMap::new();
    pools.insert("cpu".to_string(), WorkerPoolConfig::fixed(2));
    pools.insert("serial".to_string(), WorkerPoolConfig::single());
    let cfg = PoolSetConfig { pools };

    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
    let built = build_pools(&cfg, &clock).expect("pools build");

    assert_eq!(built.len(), 2);
    assert_eq!(built["cpu"].policy(), PoolPolicy::Fixed { workers: 2 });
    assert_eq!(built["serial"].policy(), PoolPolicy::Single);
    assert_ne!(built["cpu"].id(), built["serial"].id());

    let handle = built["cpu"]
        .submit(|| Ok::<_, anyhow::Error>(21 * 2))
        .unwrap();
    assert_eq!(handle.get_timeout(Duration::from_secs(5)).unwrap(), 42);
}

#[test]
fn test_build_pools_rejects_invalid_config() {
    let mut pools = HashMap::new();
    pools.insert("broken".to_string(), WorkerPoolConfig::fixed(0));
    let cfg = PoolSetConfig { pools };

    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
    let err = build_pools(&cfg, &clock).unwrap_err();
    assert!(err.to_string().contains("config invalid"));
}

#[test]
fn test_build_pools_from_json() {
    let built = build_pools_from_json(
        r#"{ "pools": { "io": { "policy": { "kind": "cached", "keep_alive_ms": 1000 } } } }"#,
    )
    .expect("pools build");
    let io = &built["io"];
    assert!(io.policy().is_cached());
    assert_eq!(io.stats().worker_count, 0);
}
