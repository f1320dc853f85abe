//! Translation cache and batch-coalescing engine.
//! Cache key: provider mode | target language | source text.
//! Fast tier (LRU, in process) + durable tier (blob in the store), TTL in days.

pub mod batch;
pub mod blob;
pub mod cache;
pub mod coalesce;
pub mod engine;
pub mod persist;

use serde::Serialize;

pub use engine::{EngineStats, TranslationEngine};

/// Milliseconds in one day, the unit of the TTL setting.
pub const DAY_MS: i64 = 86_400_000;

/// Which provider family produced (or will produce) a translation.
/// Part of the cache key: cloud and public results never mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProviderMode {
    Cloud,
    Public,
}

impl ProviderMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderMode::Cloud => "cloud",
            ProviderMode::Public => "public",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "cloud" => Some(ProviderMode::Cloud),
            "public" => Some(ProviderMode::Public),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub mode: ProviderMode,
    pub target: String,
    pub text: String,
}

impl CacheKey {
    pub fn new(mode: ProviderMode, text: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            mode,
            target: target.into(),
            text: text.into(),
        }
    }

    /// Language codes never contain `|`; the engine refuses targets that do.
    pub fn is_valid_target(target: &str) -> bool {
        !target.is_empty() && !target.contains('|')
    }

    /// Serialized form used in the durable blob: `mode|target|text`.
    /// The text goes last so it may contain `|` itself; the target may not.
    pub fn encode(&self) -> String {
        format!("{}|{}|{}", self.mode, self.target, self.text)
    }

    /// Parse the serialized form. Returns None for anything malformed.
    pub fn decode(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, '|');
        let mode = ProviderMode::parse(parts.next()?)?;
        let target = parts.next()?;
        let text = parts.next()?;
        if target.is_empty() || text.is_empty() {
            return None;
        }
        Some(Self::new(mode, text, target))
    }

    /// Short blake3 digest for log fields, so source text never lands in logs.
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.mode.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(self.target.as_bytes());
        hasher.update(b"|");
        hasher.update(self.text.as_bytes());
        hasher.finalize().to_hex()[..12].to_string()
    }
}

/// A resolved translation with the time it was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub value: String,
    pub timestamp_ms: i64,
}

impl CacheEntry {
    pub fn new(value: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            value: value.into(),
            timestamp_ms,
        }
    }
}

/// Current time as Unix timestamp (milliseconds).
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_roundtrips_text_containing_separator() {
        let key = CacheKey::new(ProviderMode::Public, "a|b|c", "en");
        assert_eq!(key.encode(), "public|en|a|b|c");
        assert_eq!(CacheKey::decode(&key.encode()), Some(key));
    }

    #[test]
    fn decode_rejects_malformed_keys() {
        assert_eq!(CacheKey::decode("public|en"), None);
        assert_eq!(CacheKey::decode("mystery|en|hello"), None);
        assert_eq!(CacheKey::decode("cloud||hello"), None);
        assert_eq!(CacheKey::decode(""), None);
    }

    #[test]
    fn targets_must_be_separator_free() {
        assert!(CacheKey::is_valid_target("zh-TW"));
        assert!(!CacheKey::is_valid_target(""));
        assert!(!CacheKey::is_valid_target("en|x"));
    }

    #[test]
    fn modes_produce_distinct_keys() {
        let cloud = CacheKey::new(ProviderMode::Cloud, "hello", "fr");
        let public = CacheKey::new(ProviderMode::Public, "hello", "fr");
        assert_ne!(cloud, public);
        assert_ne!(cloud.digest(), public.digest());
        assert_eq!(cloud.digest().len(), 12);
    }
}
