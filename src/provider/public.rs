//! Public (keyless) translation endpoint.
//! One GET per batch with `sl=auto` and one `q` per source text.
//!
//! Reply shapes:
//! - single input: `[[["seg1","src1",..],["seg2","src2",..]], null, "he", ..]`
//! - batched input: one element per input, each either its own segment list
//!   `[["seg1",..],["seg2",..]]` or a nested single-input reply whose first
//!   element is the segment list.
//!
//! A translation is the concatenation of its own segments, in order.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{ProviderError, TranslationProvider};
use crate::translate::ProviderMode;

pub const PUBLIC_ENDPOINT: &str = "https://translate.googleapis.com/translate_a/single";

pub struct PublicProvider {
    http: reqwest::Client,
    endpoint: String,
}

impl PublicProvider {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_endpoint(http, PUBLIC_ENDPOINT)
    }

    pub fn with_endpoint(http: reqwest::Client, endpoint: &str) -> Self {
        Self {
            http,
            endpoint: endpoint.to_string(),
        }
    }
}

/// Query pairs in wire order, one `q` per text.
pub fn build_query<'a>(texts: &'a [String], target: &'a str) -> Vec<(&'a str, &'a str)> {
    let mut query = vec![("client", "gtx"), ("sl", "auto"), ("tl", target), ("dt", "t")];
    query.extend(texts.iter().map(|t| ("q", t.as_str())));
    query
}

/// Parse a reply for `expected` inputs.
pub fn parse_response(body: &str, expected: usize) -> Result<Vec<String>, ProviderError> {
    let root: Value = serde_json::from_str(body)?;
    let top = root
        .as_array()
        .ok_or_else(|| ProviderError::Malformed("reply is not an array".into()))?;

    if expected == 1 {
        return Ok(vec![item_translation(&root)?]);
    }

    if top.len() < expected {
        return Err(ProviderError::Malformed(format!(
            "expected {expected} items, got {}",
            top.len()
        )));
    }
    top.iter().take(expected).map(item_translation).collect()
}

/// Join the segments belonging to one input.
fn item_translation(item: &Value) -> Result<String, ProviderError> {
    let outer = item
        .as_array()
        .ok_or_else(|| ProviderError::Malformed("item is not an array".into()))?;
    let first = outer
        .first()
        .ok_or_else(|| ProviderError::Malformed("empty item".into()))?;

    // A segment starts with a string; a segment list starts with a segment.
    let segments = match first.as_array().and_then(|a| a.first()) {
        Some(Value::Array(_)) => first.as_array().map(Vec::as_slice).unwrap_or_default(),
        _ => outer.as_slice(),
    };

    let mut text = String::new();
    for segment in segments {
        let Some(parts) = segment.as_array() else {
            return Err(ProviderError::Malformed("segment is not an array".into()));
        };
        // Trailing transliteration segments carry null in slot 0.
        if let Some(Value::String(piece)) = parts.first() {
            text.push_str(piece);
        }
    }
    Ok(text)
}

#[async_trait]
impl TranslationProvider for PublicProvider {
    fn mode(&self) -> ProviderMode {
        ProviderMode::Public
    }

    async fn translate_batch(
        &self,
        texts: &[String],
        target: &str,
    ) -> Result<Vec<String>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .http
            .get(&self.endpoint)
            .query(&build_query(texts, target))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let translations = parse_response(&body, texts.len())?;
        debug!(lang = target, count = translations.len(), "public batch translated");
        Ok(translations)
    }
}
