//! Distributed Cache demo
//!
//! Connects to the configured Redis and runs a short hash-field scenario.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use distributed_cache::{Cache, CacheOptions};

/// Entry point for the demo.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load cache options from environment variables
/// 3. Connect a Redis-backed cache
/// 4. Run the hash-field scenario and log each result
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "distributed_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let options = CacheOptions::from_env().context("loading cache options")?;
    info!(
        "Configuration loaded: namespace={}, endpoints={}, cluster={}",
        options.namespace,
        options.connection.host_and_ports,
        options.connection.is_cluster
    );

    let cache = Cache::redis(options).context("building cache")?;

    for line in run_scenario(&cache).await? {
        info!("{}", line);
    }

    info!(stats = ?cache.stats(), "Scenario complete");
    Ok(())
}

async fn run_scenario(cache: &Cache) -> anyhow::Result<Vec<String>> {
    let movie: String = cache
        .hash_get_or_set(
            "key1",
            "Movies",
            || async { "LordOfTheRings".to_string() },
            None,
            None,
        )
        .await?;

    cache
        .hash_set("key2", "Albums", &load_album().await, None, None)
        .await?;
    cache
        .hash_set("key3", "Persons", "test data", None, None)
        .await?;

    let album = cache.hash_get::<String>("key2", "Albums", None).await?;
    let person_exists = cache.hash_exists("key3", "Persons").await?;
    let person_deleted = cache.hash_delete("key3", "Persons").await?;

    Ok(vec![
        format!("HashGetOrSet:{}", movie),
        format!("HashGet:{}", album.unwrap_or_default()),
        format!("HashExists:{}", person_exists),
        format!("HashDelete:{}", person_deleted),
    ])
}

async fn load_album() -> String {
    "example".to_string()
}
