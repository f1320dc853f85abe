//! Engine configuration snapshot.
//! Read from the store's `settings` object or a JSON file; any read or parse
//! failure falls back to defaults (30-day TTL, 1000 entries, public provider).
//! Live changes reach the engine through a `tokio::sync::watch` channel.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::store::{DurableStore, StoreError};
use crate::translate::ProviderMode;

/// Store key holding the settings object.
pub const SETTINGS_KEY: &str = "settings";
/// Environment variable that overrides `cloudApiKey` when set.
pub const API_KEY_ENV: &str = "LEXCACHE_CLOUD_API_KEY";

pub const DEFAULT_MAX_PERSIST_ENTRIES: usize = 1000;
pub const DEFAULT_CACHE_TTL_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Upper bound on persisted entries (at least 1).
    pub max_persist_entries: usize,
    /// Entry lifetime in days; 0 or less disables expiry.
    #[serde(rename = "cacheTTLDays")]
    pub cache_ttl_days: i64,
    pub use_cloud_provider: bool,
    pub cloud_api_key: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_persist_entries: DEFAULT_MAX_PERSIST_ENTRIES,
            cache_ttl_days: DEFAULT_CACHE_TTL_DAYS,
            use_cloud_provider: false,
            cloud_api_key: String::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("config store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(raw)?;
        Ok(config.sanitize())
    }

    /// Load configuration from a JSON file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Like `load_from_file`, but a missing or broken file yields defaults.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load_from_file(path) {
            Ok(config) => {
                info!(path = %path.display(), "configuration loaded");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config load failed, using defaults");
                Self::default()
            }
        }
    }

    /// Read the settings object from the store, falling back to defaults.
    pub async fn load_from_store(store: &dyn DurableStore) -> Self {
        let loaded = match store.get(SETTINGS_KEY).await {
            Ok(Some(raw)) => Self::from_json(&raw),
            Ok(None) => return Self::default(),
            Err(e) => Err(ConfigError::from(e)),
        };
        loaded.unwrap_or_else(|e| {
            warn!(error = %e, "settings read failed, using defaults");
            Self::default()
        })
    }

    /// Apply `LEXCACHE_CLOUD_API_KEY` if it is set and non-empty.
    pub fn with_env_overrides(self) -> Self {
        self.with_api_key_override(std::env::var(API_KEY_ENV).ok())
    }

    pub fn with_api_key_override(mut self, key: Option<String>) -> Self {
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.cloud_api_key = key.trim().to_string();
        }
        self
    }

    pub fn sanitize(mut self) -> Self {
        if self.max_persist_entries == 0 {
            warn!("maxPersistEntries must be at least 1, clamping");
            self.max_persist_entries = 1;
        }
        self
    }

    /// Cloud only when requested and a key is present.
    pub fn provider_mode(&self) -> ProviderMode {
        if self.use_cloud_provider && !self.cloud_api_key.is_empty() {
            ProviderMode::Cloud
        } else {
            ProviderMode::Public
        }
    }
}
