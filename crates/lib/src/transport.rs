//! Messaging-substrate client: request/response JSON to services addressed by key.
//!
//! Handlers, channels, the AI responder, and the store are all remote services
//! reached through the substrate. The production transport is HTTP (`POST
//! {base}/svc/{key}`); the traits keep the router independent of it.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:9090";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("substrate request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("substrate service error: {0}")]
    Api(String),
}

/// An open request/response connection to one service key on the substrate.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send a payload and wait for the response. `None` is the empty/negative
    /// signal (no value in the response body).
    async fn request(&self, payload: Value) -> Result<Option<Value>, TransportError>;
}

/// Opens connections to services by key.
pub trait Transport: Send + Sync {
    fn open(&self, key: &str) -> Arc<dyn Connection>;
}

/// HTTP substrate transport: each key maps to `POST {base}/svc/{key}`.
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }
}

impl Transport for HttpTransport {
    fn open(&self, key: &str) -> Arc<dyn Connection> {
        Arc::new(HttpConnection {
            url: format!("{}/svc/{}", self.base_url, key),
            client: self.client.clone(),
        })
    }
}

struct HttpConnection {
    url: String,
    client: reqwest::Client,
}

#[async_trait]
impl Connection for HttpConnection {
    async fn request(&self, payload: Value) -> Result<Option<Value>, TransportError> {
        let res = self.client.post(&self.url).json(&payload).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(TransportError::Api(format!("{} {}", status, body)));
        }
        // 204 and empty bodies are the negative signal.
        let text = res.text().await?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let body: Value = serde_json::from_str(trimmed)
            .map_err(|e| TransportError::Api(format!("invalid response JSON: {}", e)))?;
        if body.is_null() {
            Ok(None)
        } else {
            Ok(Some(body))
        }
    }
}
