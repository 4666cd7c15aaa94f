//! AI fallback client: the default responder when no skill claims a message.
//!
//! Owner messages get the full response path; everyone else is answered from
//! the knowledge base only.

use crate::transport::{Connection, TransportError};
use serde_json::json;
use std::sync::Arc;

/// Client for the substrate AI service.
pub struct AiClient {
    connection: Arc<dyn Connection>,
}

impl AiClient {
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self { connection }
    }

    /// Full response path (owner messages).
    pub async fn response(&self, text: &str) -> Result<Option<String>, TransportError> {
        self.ask("get-response", text).await
    }

    /// Knowledge-base-only path (non-owner messages).
    pub async fn kb_response(&self, text: &str) -> Result<Option<String>, TransportError> {
        self.ask("get-kb-response", text).await
    }

    /// An empty or absent response means the AI has no answer.
    async fn ask(&self, operation: &str, text: &str) -> Result<Option<String>, TransportError> {
        let response = self
            .connection
            .request(json!({ "type": operation, "msg": text }))
            .await?;
        Ok(response
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .filter(|s| !s.is_empty()))
    }
}
