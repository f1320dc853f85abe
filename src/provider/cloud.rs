//! Cloud translation API (keyed).
//! One GET per batch: `key`, one `q` per source text, `target`, `format=text`.
//! Reply: `{"data":{"translations":[{"translatedText":"..."}, ...]}}`.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;

use super::{ProviderError, TranslationProvider};
use crate::config::EngineConfig;
use crate::translate::ProviderMode;

pub const CLOUD_ENDPOINT: &str = "https://translation.googleapis.com/language/translate/v2";

pub struct CloudProvider {
    http: reqwest::Client,
    endpoint: String,
    api_key: RwLock<String>,
}

impl CloudProvider {
    pub fn new(http: reqwest::Client, api_key: &str) -> Self {
        Self::with_endpoint(http, api_key, CLOUD_ENDPOINT)
    }

    pub fn with_endpoint(http: reqwest::Client, api_key: &str, endpoint: &str) -> Self {
        Self {
            http,
            endpoint: endpoint.to_string(),
            api_key: RwLock::new(api_key.to_string()),
        }
    }
}

/// Query pairs in wire order, one `q` per text.
pub fn build_query<'a>(
    api_key: &'a str,
    texts: &'a [String],
    target: &'a str,
) -> Vec<(&'a str, &'a str)> {
    let mut query = Vec::with_capacity(texts.len() + 3);
    query.push(("key", api_key));
    query.extend(texts.iter().map(|t| ("q", t.as_str())));
    query.push(("target", target));
    query.push(("format", "text"));
    query
}

#[derive(Deserialize)]
struct CloudResponse {
    data: CloudData,
}

#[derive(Deserialize)]
struct CloudData {
    translations: Vec<CloudTranslation>,
}

#[derive(Deserialize)]
struct CloudTranslation {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

/// Parse the reply body into translated strings, in request order.
pub fn parse_response(body: &str) -> Result<Vec<String>, ProviderError> {
    let parsed: CloudResponse = serde_json::from_str(body)?;
    Ok(parsed
        .data
        .translations
        .into_iter()
        .map(|t| t.translated_text)
        .collect())
}

#[async_trait]
impl TranslationProvider for CloudProvider {
    fn mode(&self) -> ProviderMode {
        ProviderMode::Cloud
    }

    async fn translate_batch(
        &self,
        texts: &[String],
        target: &str,
    ) -> Result<Vec<String>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let api_key = self.api_key.read().clone();
        if api_key.is_empty() {
            return Err(ProviderError::MissingApiKey);
        }

        let response = self
            .http
            .get(&self.endpoint)
            .query(&build_query(&api_key, texts, target))
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

        let translations = parse_response(&body)?;
        debug!(lang = target, count = translations.len(), "cloud batch translated");
        Ok(translations)
    }

    fn configure(&self, config: &EngineConfig) {
        *self.api_key.write() = config.cloud_api_key.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::test_http;

    #[test]
    fn query_repeats_q_per_text() {
        let texts = vec!["uno".to_string(), "dos".to_string()];
        let query = build_query("secret", &texts, "en");
        assert_eq!(
            query,
            vec![
                ("key", "secret"),
                ("q", "uno"),
                ("q", "dos"),
                ("target", "en"),
                ("format", "text"),
            ]
        );
    }

    #[test]
    fn parses_translations_in_order() {
        let body = r#"{"data":{"translations":[
            {"translatedText":"one","detectedSourceLanguage":"es"},
            {"translatedText":"two","detectedSourceLanguage":"es"}
        ]}}"#;
        assert_eq!(parse_response(body).unwrap(), vec!["one", "two"]);
    }

    #[test]
    fn error_payload_is_malformed() {
        let body = r#"{"error":{"code":400,"message":"API key not valid"}}"#;
        assert!(matches!(parse_response(body), Err(ProviderError::Malformed(_))));
    }

    #[tokio::test]
    async fn missing_key_fails_without_network() {
        let provider = CloudProvider::new(reqwest::Client::new(), "");
        let result = provider.translate_batch(&["hola".to_string()], "en").await;
        assert!(matches!(result, Err(ProviderError::MissingApiKey)));
    }

    #[tokio::test]
    async fn batch_goes_out_as_one_request_with_repeated_q() {
        let body = r#"{"data":{"translations":[{"translatedText":"one"},{"translatedText":"two"}]}}"#;
        let (url, server) = test_http::serve_once(200, body).await;
        let provider = CloudProvider::with_endpoint(reqwest::Client::new(), "secret", &url);

        let texts = vec!["uno".to_string(), "dos".to_string()];
        let result = provider.translate_batch(&texts, "en").await.unwrap();
        assert_eq!(result, vec!["one", "two"]);

        let request_line = server.await.unwrap();
        assert!(request_line.starts_with("GET /translate?"));
        assert!(request_line.contains("key=secret&q=uno&q=dos&target=en&format=text"));
    }

    #[tokio::test]
    async fn error_status_is_a_failure() {
        let (url, server) = test_http::serve_once(500, r#"{"error":"boom"}"#).await;
        let provider = CloudProvider::with_endpoint(reqwest::Client::new(), "secret", &url);

        let result = provider.translate_batch(&["hola".to_string()], "en").await;
        assert!(matches!(result, Err(ProviderError::Status { status: 500, .. })));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn configure_updates_key() {
        let provider = CloudProvider::new(reqwest::Client::new(), "");
        provider.configure(&EngineConfig {
            cloud_api_key: "fresh".into(),
            ..EngineConfig::default()
        });
        assert_eq!(*provider.api_key.read(), "fresh");
    }
}
