//! Channel output map: cached outbound connections and reply delivery.
//!
//! Channel ids are low-cardinality and long-lived, so a connection is opened
//! on first use and kept for the process lifetime (no eviction).

use crate::transport::{Connection, Transport, TransportError};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Structured reply delivered to a channel connection.
#[derive(Debug, Clone, Serialize)]
struct OutboundReply<'a> {
    #[serde(rename = "type")]
    typ: &'static str,
    #[serde(rename = "ctx")]
    context: &'a str,
    #[serde(rename = "msg", skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(rename = "addl", skip_serializing_if = "Option::is_none")]
    extra: Option<&'a Value>,
}

/// Lazily-built map of channel id to outbound connection.
pub struct ChannelMap {
    transport: Arc<dyn Transport>,
    connections: RwLock<HashMap<String, Arc<dyn Connection>>>,
}

impl ChannelMap {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached connection for a channel, opening it on first use.
    pub async fn resolve(&self, channel_id: &str) -> Arc<dyn Connection> {
        if let Some(conn) = self.connections.read().await.get(channel_id) {
            return conn.clone();
        }
        let conn = self.transport.open(channel_id);
        self.connections
            .write()
            .await
            .entry(channel_id.to_string())
            .or_insert(conn)
            .clone()
    }

    /// Deliver a reply on the originating channel. A failure here is a lost
    /// user-visible reply and is always surfaced to the caller.
    pub async fn send_reply(
        &self,
        text: Option<&str>,
        extra: Option<&Value>,
        channel: &str,
        context: &str,
    ) -> Result<(), TransportError> {
        let conn = self.resolve(channel).await;
        let reply = OutboundReply {
            typ: "reply",
            context,
            text,
            extra,
        };
        let payload = serde_json::to_value(&reply)
            .map_err(|e| TransportError::Api(format!("encoding reply: {}", e)))?;
        conn.request(payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct NullConnection;

    #[async_trait]
    impl Connection for NullConnection {
        async fn request(&self, _payload: Value) -> Result<Option<Value>, TransportError> {
            Ok(None)
        }
    }

    struct CountingTransport {
        opened: Mutex<Vec<String>>,
    }

    impl Transport for CountingTransport {
        fn open(&self, key: &str) -> Arc<dyn Connection> {
            self.opened.lock().expect("lock").push(key.to_string());
            Arc::new(NullConnection)
        }
    }

    #[tokio::test]
    async fn resolve_opens_each_channel_once() {
        let transport = Arc::new(CountingTransport {
            opened: Mutex::new(Vec::new()),
        });
        let map = ChannelMap::new(transport.clone());

        let first = map.resolve("telegram").await;
        let second = map.resolve("telegram").await;
        map.resolve("matrix").await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*transport.opened.lock().expect("lock"), vec!["telegram", "matrix"]);
    }

    #[test]
    fn reply_wire_format_omits_absent_fields() {
        let reply = OutboundReply {
            typ: "reply",
            context: "ctx-1",
            text: Some("hello"),
            extra: None,
        };
        let json = serde_json::to_string(&reply).expect("encode reply");
        assert_eq!(json, r#"{"type":"reply","ctx":"ctx-1","msg":"hello"}"#);
    }
}
