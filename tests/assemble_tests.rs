use std::sync::Arc;
use std::time::Duration;
use tiercache::prelude::*;
use tiercache::ListenerState;

#[test]
fn test_config_defaults() {
    let config: TierCacheConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config.mode, CacheMode::Hybrid);
    assert_eq!(config.local.max_keys, 10_000);
    assert_eq!(config.local.policy, EvictionPolicy::TinyLFU);
    assert_eq!(config.hybrid.l1_population_ttl(), Duration::from_secs(300));
    assert_eq!(config.hybrid.invalidation_channel, DEFAULT_INVALIDATION_CHANNEL);
    assert_eq!(config.redis.url(), "redis://127.0.0.1:6379/0");
}

#[test]
fn test_config_overrides() {
    let config: TierCacheConfig = serde_json::from_str(
        r#"{
            "mode": "local",
            "local": { "max_keys": 500, "policy": "random" },
            "hybrid": { "l1_population_ttl_secs": 30, "invalidation_channel": "app:l1" },
            "redis": { "host": "cache.internal", "password": "s3cret", "pool_size": 16 }
        }"#,
    )
    .unwrap();

    assert_eq!(config.mode, CacheMode::Local);
    assert_eq!(config.local.max_keys, 500);
    assert_eq!(config.local.policy, EvictionPolicy::Random);
    assert_eq!(config.hybrid.l1_population_ttl(), Duration::from_secs(30));
    assert_eq!(config.hybrid.invalidation_channel, "app:l1");
    assert_eq!(config.redis.pool_size, 16);
    assert_eq!(config.redis.sanitized().password, "******");
    assert!(!format!("{config:?}").contains("s3cret"));
}

#[tokio::test]
async fn test_assemble_each_mode() {
    let store = Arc::new(MemoryStore::new());

    for (mode, variant) in [
        (CacheMode::Local, "local"),
        (CacheMode::Remote, "remote"),
        (CacheMode::Hybrid, "hybrid"),
    ] {
        let config = TierCacheConfig {
            mode,
            ..TierCacheConfig::default()
        };
        let cache = assemble(&config, store.clone()).await.unwrap();
        assert_eq!(cache.variant(), variant);

        cache.set("k", variant.to_string(), Duration::ZERO).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), variant);
        cache.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_hybrid_assembly_starts_listener_on_configured_channel() {
    let store = Arc::new(MemoryStore::new());
    let config: TierCacheConfig =
        serde_json::from_str(r#"{ "hybrid": { "invalidation_channel": "app:l1" } }"#).unwrap();

    let cache = assemble(&config, store.clone()).await.unwrap();
    let hybrid = cache.as_hybrid().unwrap();
    assert_eq!(hybrid.invalidator_state().await, ListenerState::Running);
    assert_eq!(store.subscriber_count("app:l1"), 1);
    assert_eq!(store.subscriber_count(DEFAULT_INVALIDATION_CHANNEL), 0);

    cache.close().await.unwrap();
    assert_eq!(hybrid.invalidator_state().await, ListenerState::Stopped);
}

#[tokio::test]
async fn test_assemble_fails_when_subscription_fails() {
    let store = Arc::new(MemoryStore::new());
    store.set_offline(true);

    let outcome = assemble(&TierCacheConfig::default(), store).await;
    assert!(matches!(outcome, Err(CacheError::Upstream(_))));
}

#[tokio::test]
async fn test_build_cache_local_needs_no_server() {
    let config = TierCacheConfig {
        mode: CacheMode::Local,
        ..TierCacheConfig::default()
    };
    let cache = build_cache(&config).await.unwrap();
    assert_eq!(cache.variant(), "local");
}

#[tokio::test]
async fn test_build_cache_rejects_invalid_redis_options() {
    let mut config = TierCacheConfig::default();
    config.redis.host = String::new();

    let error = build_cache(&config).await.unwrap_err();
    assert!(error.to_string().contains("redis host cannot be empty"));
}
