//! lexcache: coalescing, batching translation cache.
//! Many concurrent callers, few outbound calls, results persisted across restarts.

pub mod config;
pub mod metrics;
pub mod provider;
pub mod store;
pub mod translate;

pub use config::EngineConfig;
pub use provider::{Providers, TranslationProvider};
pub use store::{DurableStore, MemoryStore, SqliteStore};
pub use translate::{CacheKey, EngineStats, ProviderMode, TranslationEngine};

/// Install the global tracing subscriber (`RUST_LOG` wins over the default filter).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("lexcache=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .try_init();
}
