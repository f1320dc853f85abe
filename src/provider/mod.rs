//! Translation provider adapters.
//! Each adapter turns an ordered batch of source strings into one HTTP call and
//! parses the reply back into a parallel list. The engine only ever sees a list
//! of the right length or an empty list.

pub mod cloud;
pub mod public;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::config::EngineConfig;
use crate::translate::ProviderMode;

pub use cloud::CloudProvider;
pub use public::PublicProvider;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("cloud provider needs an API key")]
    MissingApiKey,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        ProviderError::Malformed(e.to_string())
    }
}

/// Translator backend (one per provider mode).
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    fn mode(&self) -> ProviderMode;

    /// Translate `texts` into `target`. On success the result has one entry per input.
    async fn translate_batch(
        &self,
        texts: &[String],
        target: &str,
    ) -> Result<Vec<String>, ProviderError>;

    /// Pick up configuration changes (API key and the like).
    fn configure(&self, _config: &EngineConfig) {}
}

/// Run one provider call and collapse every failure, including a result list
/// of the wrong length, into an empty list.
pub async fn translate_or_empty(
    provider: &dyn TranslationProvider,
    texts: &[String],
    target: &str,
) -> Vec<String> {
    match provider.translate_batch(texts, target).await {
        Ok(results) if results.len() == texts.len() => results,
        Ok(results) => {
            warn!(
                provider = %provider.mode(),
                lang = target,
                expected = texts.len(),
                got = results.len(),
                "provider returned a short result list"
            );
            Vec::new()
        }
        Err(e) => {
            warn!(provider = %provider.mode(), lang = target, error = %e, "provider call failed");
            Vec::new()
        }
    }
}

/// Build the shared HTTP client: pooled connections, 30s request timeout.
pub fn http_client() -> Result<reqwest::Client, ProviderError> {
    Ok(reqwest::Client::builder()
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(90))
        .timeout(Duration::from_secs(30))
        .build()?)
}

/// Both provider variants; the active one is chosen per request from config.
#[derive(Clone)]
pub struct Providers {
    cloud: Arc<dyn TranslationProvider>,
    public: Arc<dyn TranslationProvider>,
}

impl Providers {
    pub fn new(cloud: Arc<dyn TranslationProvider>, public: Arc<dyn TranslationProvider>) -> Self {
        Self { cloud, public }
    }

    /// Real HTTP providers sharing one client.
    pub fn http(config: &EngineConfig) -> Result<Self, ProviderError> {
        let client = http_client()?;
        Ok(Self::new(
            Arc::new(CloudProvider::new(client.clone(), &config.cloud_api_key)),
            Arc::new(PublicProvider::new(client)),
        ))
    }

    pub fn for_mode(&self, mode: ProviderMode) -> Arc<dyn TranslationProvider> {
        match mode {
            ProviderMode::Cloud => Arc::clone(&self.cloud),
            ProviderMode::Public => Arc::clone(&self.public),
        }
    }

    pub fn configure(&self, config: &EngineConfig) {
        if config.use_cloud_provider && config.cloud_api_key.is_empty() {
            warn!("cloud provider requested without an API key, using public provider");
        }
        self.cloud.configure(config);
        self.public.configure(config);
    }
}

/// One-shot local HTTP server for exercising the adapters end to end.
#[cfg(test)]
pub(crate) mod test_http {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answer a single request with `status` and `body`. Returns the endpoint
    /// URL and a handle resolving to the request line that was received.
    pub async fn serve_once(status: u16, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/translate", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let response = format!(
                "HTTP/1.1 {status} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;

            String::from_utf8_lossy(&request)
                .lines()
                .next()
                .unwrap_or_default()
                .to_string()
        });
        (url, handle)
    }
}
