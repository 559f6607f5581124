//! Tests for configuration validation

use std::time::Duration;

use prometheus_executors::config::{PoolPolicy, PoolSetConfig, ShutdownPolicy, WorkerPoolConfig};

#[test]
fn test_default_config_is_fixed_per_cpu() {
    let cfg = WorkerPoolConfig::default();
    assert_eq!(
        cfg.policy,
        PoolPolicy::Fixed {
            workers: num_cpus::get()
        }
    );
    assert_eq!(cfg.thread_name_prefix, "pool-worker");
    assert_eq!(cfg.shutdown, ShutdownPolicy::default());
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_shutdown_policy_defaults() {
    let policy = ShutdownPolicy::default();
    assert!(policy.run_delayed_after_shutdown);
    assert!(!policy.continue_periodic_after_shutdown);
}

#[test]
fn test_config_invalid_workers() {
    assert!(WorkerPoolConfig::fixed(0).validate().is_err());
    assert!(WorkerPoolConfig::scheduled(0).validate().is_err());
    assert!(WorkerPoolConfig::single().validate().is_ok());
}

#[test]
fn test_config_invalid_keep_alive() {
    let cfg = WorkerPoolConfig::cached().with_keep_alive(Duration::ZERO);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_builder_setters() {
    let cfg = WorkerPoolConfig::cached()
        .with_keep_alive(Duration::from_secs(5))
        .with_thread_name_prefix("io")
        .with_thread_stack_size(512 * 1024)
        .with_shutdown_policy(ShutdownPolicy {
            run_delayed_after_shutdown: false,
            continue_periodic_after_shutdown: true,
        });
    assert_eq!(cfg.policy.keep_alive(), Some(Duration::from_secs(5)));
    assert_eq!(cfg.thread_name_prefix, "io");
    assert_eq!(cfg.thread_stack_size, 512 * 1024);
    assert!(!cfg.shutdown.run_delayed_after_shutdown);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_pool_set_from_json() {
    let json = r#"{
        "pools": {
            "io": { "policy": { "kind": "cached", "keep_alive_ms": 30000 } },
            "ticks": {
                "policy": { "kind": "scheduled", "workers": 2 },
                "thread_name_prefix": "ticker",
                "shutdown": { "continue_periodic_after_shutdown": true }
            },
            "serial": { "policy": { "kind": "single" } }
        }
    }"#;

    let cfg = PoolSetConfig::from_json_str(json).expect("valid config");
    assert_eq!(cfg.pools.len(), 3);

    let io = &cfg.pools["io"];
    assert_eq!(io.policy, PoolPolicy::Cached { keep_alive_ms: 30_000 });
    assert_eq!(io.thread_name_prefix, "pool-worker");

    let ticks = &cfg.pools["ticks"];
    assert_eq!(ticks.policy, PoolPolicy::Scheduled { workers: 2 });
    assert_eq!(ticks.thread_name_prefix, "ticker");
    assert!(ticks.shutdown.run_delayed_after_shutdown);
    assert!(ticks.shutdown.continue_periodic_after_shutdown);

    assert_eq!(cfg.pools["serial"].policy, PoolPolicy::Single);
}

#[test]
fn test_cached_keep_alive_defaults_in_json() {
    let cfg = PoolSetConfig::from_json_str(r#"{ "pools": { "c": { "policy": { "kind": "cached" } } } }"#)
        .expect("valid config");
    assert_eq!(
        cfg.pools["c"].policy.keep_alive(),
        Some(Duration::from_secs(60))
    );
}

#[test]
fn test_pool_set_rejects_empty_and_invalid() {
    let err = PoolSetConfig::from_json_str(r#"{ "pools": {} }"#).unwrap_err();
    assert!(err.contains("at least one pool"));

    let err = PoolSetConfig::from_json_str(
        r#"{ "pools": { "bad": { "policy": { "kind": "fixed", "workers": 0 } } } }"#,
    )
    .unwrap_err();
    assert!(err.contains("pool `bad` invalid"));

    let err = PoolSetConfig::from_json_str("not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}
