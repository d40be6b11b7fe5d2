//! Integration Tests for the Cache
//!
//! Exercises the public cache surface end to end against the in-memory store,
//! plus an opt-in run against a live Redis.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use distributed_cache::connection::ConnectionManager;
use distributed_cache::store::{ExpireFault, MemoryConnector, MemoryStore};
use distributed_cache::{
    spawn_cleanup_task, Cache, CacheError, CacheOptions, ConnectionConfig,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

// == Helper Functions ==

const MINUTES_5: Option<Duration> = Some(Duration::from_secs(5 * 60));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Session {
    user: String,
}

fn connector() -> Arc<MemoryConnector> {
    Arc::new(MemoryConnector::new(Arc::new(MemoryStore::new())))
}

fn options(namespace: &str) -> CacheOptions {
    CacheOptions::new(ConnectionConfig::default(), namespace)
}

fn create_test_cache() -> (Cache, Arc<MemoryConnector>) {
    let connector = connector();
    let cache = Cache::new(options("prod.example.com"), connector.clone()).unwrap();
    (cache, connector)
}

// == Reference Scenario ==

#[tokio::test]
async fn test_session_lifecycle() {
    let (cache, connector) = create_test_cache();
    let session = Session {
        user: "alice".to_string(),
    };

    assert!(cache.set("session:42", &session, MINUTES_5, None).await.unwrap());
    assert_eq!(
        cache.get::<Session>("session:42", None).await.unwrap(),
        Some(session)
    );
    assert_eq!(
        connector.store().get("prod.example.com:session:42").unwrap(),
        Some(r#"{"user":"alice"}"#.to_string())
    );

    assert!(cache.delete("session:42").await.unwrap());
    assert!(!cache.exists("session:42").await.unwrap());
}

#[tokio::test]
async fn test_hash_scenario() {
    let (cache, _) = create_test_cache();

    let movie: String = cache
        .hash_get_or_set(
            "key1",
            "Movies",
            || async { "LordOfTheRings".to_string() },
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(movie, "LordOfTheRings");

    assert!(cache.hash_set("key2", "Albums", "example", None, None).await.unwrap());
    assert!(cache.hash_set("key3", "Persons", "test data", None, None).await.unwrap());

    assert_eq!(
        cache.hash_get::<String>("key2", "Albums", None).await.unwrap(),
        Some("example".to_string())
    );
    assert!(cache.hash_exists("key3", "Persons").await.unwrap());
    assert!(cache.hash_delete("key3", "Persons").await.unwrap());
    assert!(!cache.hash_exists("key3", "Persons").await.unwrap());
}

// == Key Topologies ==

#[tokio::test]
async fn test_hash_fields_isolated_and_key_exists() {
    let (cache, _) = create_test_cache();

    cache.hash_set("user:7", "f1", &"v1", MINUTES_5, None).await.unwrap();
    assert!(cache.exists("user:7").await.unwrap());

    cache.hash_set("user:7", "f2", &"v2", MINUTES_5, None).await.unwrap();
    assert_eq!(
        cache.hash_get::<String>("user:7", "f1", None).await.unwrap(),
        Some("v1".to_string())
    );
    assert_eq!(
        cache.hash_get::<String>("user:7", "f2", None).await.unwrap(),
        Some("v2".to_string())
    );
    assert_eq!(cache.hash_get::<String>("user:7", "f3", None).await.unwrap(), None);
}

#[tokio::test]
async fn test_namespaces_isolate_caches_on_shared_connection() {
    let connector = connector();
    let manager = Arc::new(ConnectionManager::new(
        ConnectionConfig::default(),
        connector.clone(),
    ));
    let prod = Cache::with_connection_manager(options("prod.ares.com"), manager.clone()).unwrap();
    let dev = Cache::with_connection_manager(options("dev.ares.com"), manager).unwrap();

    prod.set("k", &"prod", MINUTES_5, None).await.unwrap();
    dev.set("k", &"dev", MINUTES_5, None).await.unwrap();

    assert_eq!(prod.get::<String>("k", None).await.unwrap(), Some("prod".to_string()));
    assert_eq!(dev.get::<String>("k", None).await.unwrap(), Some("dev".to_string()));
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test]
async fn test_plain_key_holding_hash_is_a_store_error() {
    let (cache, _) = create_test_cache();

    cache.hash_set("mixed", "f", &1, MINUTES_5, None).await.unwrap();
    assert!(matches!(
        cache.get::<i32>("mixed", None).await,
        Err(CacheError::Store(_))
    ));
}

// == Expiration ==

#[tokio::test]
async fn test_value_expires() {
    let (cache, _) = create_test_cache();

    cache
        .set("short", &"lived", Some(Duration::from_millis(100)), None)
        .await
        .unwrap();
    assert!(cache.exists("short").await.unwrap());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!cache.exists("short").await.unwrap());
    assert_eq!(cache.get::<String>("short", None).await.unwrap(), None);
}

#[tokio::test]
async fn test_hash_write_refreshes_whole_key() {
    let (cache, _) = create_test_cache();

    cache
        .hash_set("h", "old", &1, Some(Duration::from_millis(150)), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    cache.hash_set("h", "new", &2, MINUTES_5, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The second write extended the key, so the first field survived its own ttl
    assert_eq!(cache.hash_get::<i32>("h", "old", None).await.unwrap(), Some(1));
}

#[tokio::test]
async fn test_sweeper_clears_expired_cache_entries() {
    let (cache, connector) = create_test_cache();
    let handle = spawn_cleanup_task(connector.store().clone(), 1);

    cache
        .set("swept", &1, Some(Duration::from_millis(100)), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1300)).await;

    assert!(connector.store().is_empty());
    handle.abort();
}

// == Connection Management ==

#[tokio::test]
async fn test_connection_is_lazy_and_reused() {
    let (cache, connector) = create_test_cache();
    assert_eq!(connector.connect_count(), 0);

    cache.set("a", &1, MINUTES_5, None).await.unwrap();
    cache.get::<i32>("a", None).await.unwrap();
    cache.exists("a").await.unwrap();

    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test]
async fn test_eager_connect() {
    let connector = connector();
    let cache = Cache::connect(options("eager.ares.com"), connector.clone())
        .await
        .unwrap();

    assert_eq!(connector.connect_count(), 1);
    assert!(cache.connection_manager().is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_connect() {
    let connector = Arc::new(
        MemoryConnector::new(Arc::new(MemoryStore::new()))
            .with_connect_delay(Duration::from_millis(50)),
    );
    let manager = Arc::new(ConnectionManager::new(
        ConnectionConfig::default(),
        connector.clone(),
    ));

    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let manager = manager.clone();
        tasks.spawn(async move { manager.connection().await.unwrap() });
    }

    let mut handles = Vec::new();
    while let Some(handle) = tasks.join_next().await {
        handles.push(handle.unwrap());
    }

    assert_eq!(connector.connect_count(), 1);
    assert_eq!(handles.len(), 16);
    assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
}

#[tokio::test]
async fn test_reconnects_after_connection_drop() {
    let (cache, connector) = create_test_cache();

    cache.set("durable", &"value", MINUTES_5, None).await.unwrap();
    connector.sever_all();

    // Same store behind a fresh connection
    assert_eq!(
        cache.get::<String>("durable", None).await.unwrap(),
        Some("value".to_string())
    );
    assert_eq!(connector.connect_count(), 2);
}

#[tokio::test]
async fn test_connect_failure_propagates_then_recovers() {
    let (cache, connector) = create_test_cache();

    connector.refuse_connections(true);
    assert!(matches!(
        cache.set("k", &1, MINUTES_5, None).await,
        Err(CacheError::Connection(_))
    ));
    assert!(matches!(
        cache.get::<i32>("k", None).await,
        Err(CacheError::Connection(_))
    ));

    connector.refuse_connections(false);
    assert!(cache.set("k", &1, MINUTES_5, None).await.unwrap());
    assert_eq!(connector.connect_count(), 3);
}

#[tokio::test]
async fn test_admin_disabled_rejects_flush() {
    let connection = ConnectionConfig {
        allow_admin: false,
        ..ConnectionConfig::default()
    };
    let cache = Cache::new(CacheOptions::new(connection, "locked.ares.com"), connector()).unwrap();

    assert!(matches!(
        cache.flush_database().await,
        Err(CacheError::AdminDisabled)
    ));
}

#[test]
fn test_construction_rejects_bad_configuration() {
    let no_endpoints = ConnectionConfig {
        host_and_ports: String::new(),
        ..ConnectionConfig::default()
    };
    assert!(matches!(
        Cache::new(CacheOptions::new(no_endpoints, "ns"), connector()),
        Err(CacheError::Configuration(_))
    ));
    assert!(matches!(
        Cache::new(options(""), connector()),
        Err(CacheError::Configuration(_))
    ));
}

// == Populate On Miss ==

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_without_lock_agree_on_a_value() {
    let (cache, _) = create_test_cache();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut tasks = JoinSet::new();
    for _ in 0..4 {
        let cache = cache.clone();
        let calls = calls.clone();
        tasks.spawn(async move {
            cache
                .get_or_set(
                    "report",
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        "built".to_string()
                    },
                    MINUTES_5,
                    None,
                )
                .await
                .unwrap()
        });
    }

    while let Some(value) = tasks.join_next().await {
        assert_eq!(value.unwrap(), "built");
    }
    let produced = calls.load(Ordering::SeqCst);
    assert!((1..=4).contains(&produced));
    assert_eq!(cache.stats().populates as usize, produced);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_populate_lock_runs_producer_once() {
    let connector = connector();
    let cache = Cache::new(
        options("locked.ares.com").with_populate_lock(Duration::from_secs(2)),
        connector.clone(),
    )
    .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut tasks = JoinSet::new();
    for _ in 0..6 {
        let cache = cache.clone();
        let calls = calls.clone();
        tasks.spawn(async move {
            cache
                .hash_get_or_set(
                    "report",
                    "daily",
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        42u32
                    },
                    MINUTES_5,
                    None,
                )
                .await
                .unwrap()
        });
    }

    while let Some(value) = tasks.join_next().await {
        assert_eq!(value.unwrap(), 42);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // Marker released after the write
    assert!(!connector
        .store()
        .exists("locked.ares.com:report:populate-lock:daily")
        .unwrap());
}

/// Builds a locked cache plus a closure-friendly call counter.
fn locked_cache(lock_ttl: Duration) -> (Cache, Arc<MemoryConnector>, Arc<AtomicUsize>) {
    let connector = connector();
    let cache = Cache::new(
        options("locked.ares.com").with_populate_lock(lock_ttl),
        connector.clone(),
    )
    .unwrap();
    (cache, connector, Arc::new(AtomicUsize::new(0)))
}

#[tokio::test]
async fn test_waiter_produces_when_holder_stores_nothing() {
    let (cache, connector, calls) = locked_cache(Duration::from_secs(5));
    let marker = "locked.ares.com:report:populate-lock";
    // Another caller holds the marker
    connector
        .store()
        .set_if_absent(marker, "1", Duration::from_secs(5))
        .unwrap();

    let started = Instant::now();
    let waiter = {
        let cache = cache.clone();
        let calls = calls.clone();
        tokio::spawn(async move {
            cache
                .get_or_set(
                    "report",
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        "fallback".to_string()
                    },
                    MINUTES_5,
                    None,
                )
                .await
        })
    };

    // The holder gives up without writing a value
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    connector.store().delete(marker).unwrap();

    assert_eq!(waiter.await.unwrap().unwrap(), "fallback");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        cache.get::<String>("report", None).await.unwrap(),
        Some("fallback".to_string())
    );
}

#[tokio::test]
async fn test_waiter_produces_after_marker_lifetime() {
    let lock_ttl = Duration::from_millis(200);
    let (cache, connector, calls) = locked_cache(lock_ttl);
    // A stuck holder whose marker outlives this cache's lock lifetime
    connector
        .store()
        .set_if_absent(
            "locked.ares.com:report:populate-lock:daily",
            "1",
            Duration::from_secs(30),
        )
        .unwrap();

    let started = Instant::now();
    let counted = calls.clone();
    let value = cache
        .hash_get_or_set(
            "report",
            "daily",
            move || async move {
                counted.fetch_add(1, Ordering::SeqCst);
                7u32
            },
            MINUTES_5,
            None,
        )
        .await
        .unwrap();

    assert_eq!(value, 7);
    assert!(started.elapsed() >= lock_ttl);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.hash_get::<u32>("report", "daily", None).await.unwrap(), Some(7));
}

#[tokio::test]
async fn test_holder_releases_marker_when_write_fails() {
    let (cache, connector, _) = locked_cache(Duration::from_secs(5));
    connector.store().set_expire_fault(Some(ExpireFault::Reject));

    let result = cache
        .hash_get_or_set("report", "daily", || async { 1u32 }, MINUTES_5, None)
        .await;

    assert!(matches!(result, Err(CacheError::Store(_))));
    assert!(!connector
        .store()
        .exists("locked.ares.com:report:populate-lock:daily")
        .unwrap());
}

// == Live Redis ==

#[tokio::test]
#[ignore = "requires a Redis server on localhost:6379"]
async fn test_redis_round_trip() {
    let cache = Cache::redis(CacheOptions::for_environment("IntegrationTest")).unwrap();
    let session = Session {
        user: "alice".to_string(),
    };

    assert!(cache.set("session:42", &session, MINUTES_5, None).await.unwrap());
    assert_eq!(
        cache.get::<Session>("session:42", None).await.unwrap(),
        Some(session)
    );
    assert!(cache.hash_set("profile", "name", "alice", MINUTES_5, None).await.unwrap());
    assert!(cache.hash_exists("profile", "name").await.unwrap());
    assert!(cache.delete("session:42").await.unwrap());
    assert!(cache.delete("profile").await.unwrap());
    assert!(!cache.exists("session:42").await.unwrap());
}
