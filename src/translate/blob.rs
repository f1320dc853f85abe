//! Durable cache blob codec.
//! One JSON object: `{"<mode>|<target>|<text>": {"v": "...", "t": <millis>}, ...}`.
//! Legacy values stored as a bare string (no timestamp) load as "just now".

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{CacheEntry, CacheKey};

/// Store key holding the serialized cache blob.
pub const TRANSLATION_CACHE_KEY: &str = "translation_cache";

#[derive(Debug, Deserialize)]
struct StoredEntry {
    v: String,
    t: i64,
}

/// Serialize entries into the blob format.
pub fn encode<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (&'a CacheKey, &'a CacheEntry)>,
{
    let map: serde_json::Map<String, Value> = entries
        .into_iter()
        .map(|(key, entry)| {
            (
                key.encode(),
                serde_json::json!({ "v": entry.value, "t": entry.timestamp_ms }),
            )
        })
        .collect();
    Value::Object(map).to_string()
}

/// Parse a blob. Malformed entries are skipped one by one; only a blob that is
/// not a JSON object at all is an error.
pub fn decode(raw: &str, now_ms: i64) -> Result<Vec<(CacheKey, CacheEntry)>, serde_json::Error> {
    let map: serde_json::Map<String, Value> = serde_json::from_str(raw)?;
    let mut out = Vec::with_capacity(map.len());
    let mut skipped = 0usize;

    for (raw_key, raw_value) in map {
        let Some(key) = CacheKey::decode(&raw_key) else {
            skipped += 1;
            continue;
        };
        let entry = match raw_value {
            Value::String(v) => CacheEntry::new(v, now_ms),
            other => match serde_json::from_value::<StoredEntry>(other) {
                Ok(stored) => CacheEntry::new(stored.v, stored.t),
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            },
        };
        if entry.value.is_empty() {
            skipped += 1;
            continue;
        }
        out.push((key, entry));
    }

    if skipped > 0 {
        debug!(skipped, loaded = out.len(), "skipped malformed cache blob entries");
    }
    Ok(out)
}
