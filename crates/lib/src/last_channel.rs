//! Last-channel persistence: remember where to send unsolicited replies.
//!
//! The record is written to the external store after every valid owner
//! message and loaded once at startup. Losing it degrades
//! reply-on-last-channel and nothing else, so writes are best-effort.

use crate::transport::{Connection, TransportError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Fixed store key for the record.
const LAST_REQ_CHANNEL: &str = "LAST_REQ_CHANNEL";

/// Where the owner last talked to us: channel id and conversation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastRequestRecord {
    #[serde(rename = "chan")]
    pub channel: String,
    #[serde(rename = "ctx")]
    pub context: String,
}

/// Glue to the external key-value store service.
#[derive(Clone)]
pub struct LastChannelStore {
    connection: Arc<dyn Connection>,
}

impl LastChannelStore {
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self { connection }
    }

    /// Write the record in a spawned task; a failure is logged and never
    /// blocks routing.
    pub fn save_in_background(&self, record: LastRequestRecord) {
        let store = self.clone();
        tokio::spawn(async move {
            if let Err(e) = store.save(&record).await {
                log::warn!("saving last request channel failed: {}", e);
            }
        });
    }

    async fn save(&self, record: &LastRequestRecord) -> Result<(), TransportError> {
        let val = serde_json::to_string(record)
            .map_err(|e| TransportError::Api(format!("encoding record: {}", e)))?;
        self.connection
            .request(json!({ "type": "put", "key": LAST_REQ_CHANNEL, "val": val }))
            .await?;
        Ok(())
    }

    /// Read the persisted record. Absent or malformed yields None; a fresh
    /// store is the normal first-run state.
    pub async fn load(&self) -> Option<LastRequestRecord> {
        let response = match self
            .connection
            .request(json!({ "type": "get", "key": LAST_REQ_CHANNEL }))
            .await
        {
            Ok(r) => r,
            Err(e) => {
                log::warn!("loading last request channel failed: {}", e);
                return None;
            }
        };
        let parsed = match response? {
            Value::String(s) => serde_json::from_str(&s),
            other => serde_json::from_value(other),
        };
        match parsed {
            Ok(record) => Some(record),
            Err(e) => {
                log::debug!("stored last request channel is malformed: {}", e);
                None
            }
        }
    }
}
