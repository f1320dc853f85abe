//! lexcache host: translate stdin lines through one engine.
//!
//! Usage: `lexcache [db-path] [target-lang]` (defaults: `lexcache.db`, `en`).
//! Settings come from the store's `settings` object, then
//! `LEXCACHE_CLOUD_API_KEY`. Output keeps input order; an empty line means no
//! translation was available.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{error, info, warn};

use lexcache::{DurableStore, EngineConfig, MemoryStore, Providers, SqliteStore, TranslationEngine};

#[tokio::main]
async fn main() {
    lexcache::init_tracing();

    let mut args = std::env::args().skip(1);
    let db_path = PathBuf::from(args.next().unwrap_or_else(|| "lexcache.db".into()));
    let target = args.next().unwrap_or_else(|| "en".into());

    let store: Arc<dyn DurableStore> = match SqliteStore::open(&db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(error = %e, path = %db_path.display(), "store open failed, cache will not persist");
            Arc::new(MemoryStore::new())
        }
    };

    let config = EngineConfig::load_from_store(store.as_ref())
        .await
        .with_env_overrides();
    let providers = match Providers::http(&config) {
        Ok(providers) => providers,
        Err(e) => {
            error!(error = %e, "HTTP client init failed");
            std::process::exit(1);
        }
    };

    let (_config_tx, config_rx) = watch::channel(config);
    let engine = TranslationEngine::start(store, providers, config_rx);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut inputs = Vec::new();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => inputs.push(line),
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "stdin read failed");
                break;
            }
        }
    }
    info!(lines = inputs.len(), lang = %target, "translating");

    let outputs = join_all(inputs.iter().map(|line| engine.translate(line, &target))).await;
    for output in outputs {
        println!("{output}");
    }

    if let Some(stats) = engine.stats().await {
        info!(
            hits = stats.counters.cache_hits,
            misses = stats.counters.cache_misses,
            provider_calls = stats.counters.provider_calls,
            coalesced = stats.coalescer.coalesced_requests,
            "done"
        );
    }
    engine.shutdown().await;
}
