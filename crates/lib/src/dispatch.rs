//! Dispatch router: decide which responder answers one inbound message.
//!
//! Owner messages go to the handler that last engaged (sticky), else through
//! the registry in registration order, else to the AI responder; whatever is
//! left gets the canonical did-not-understand reply. All state lives on the
//! router instance so independent routers can exist side by side.

use crate::ai::AiClient;
use crate::channels::ChannelMap;
use crate::config::Config;
use crate::last_channel::{LastChannelStore, LastRequestRecord};
use crate::registry::{self, HandlerRegistration, HandlerRegistry, HelpEntry};
use crate::transport::{Transport, TransportError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Reserved command answered by the router itself.
const HELP_COMMAND: &str = "/help";

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Missing or malformed required fields. Reported to the caller, never retried.
    #[error("{0}")]
    Validation(String),
    /// Transport failure on a probe path that must surface: the sticky probe
    /// or the terminal AI fallback. Scan probes log and continue instead.
    #[error("probe failed: {0}")]
    Probe(#[source] TransportError),
    /// A reply could not be delivered. Always surfaced; a lost reply is the
    /// system's primary observable failure mode.
    #[error("reply delivery failed: {0}")]
    Delivery(#[source] TransportError),
    /// reply-on-last-channel with no recorded channel.
    #[error("no last channel found to reply on")]
    NoLastChannel,
}

/// Inbound user message (or pass-through reply) as received on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundRequest {
    #[serde(rename = "chan", skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(rename = "ctx", skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(rename = "msg", skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "addl", skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

/// register-msg-handler parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterParams {
    #[serde(rename = "mskey", default)]
    pub key: Option<String>,
    #[serde(rename = "mstype", default)]
    pub message_type: Option<String>,
    #[serde(rename = "mshelp", default)]
    pub help: Vec<HelpEntry>,
}

/// How a handler answers a probe: it claims the message or it does not, and a
/// claim may carry an immediate reply.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeReply {
    #[serde(default)]
    pub handling: bool,
    #[serde(default)]
    pub reply: Option<String>,
}

/// Absent or null means not handling; any other payload is a claim, with the
/// object form carrying the explicit flag and optional reply.
fn parse_probe_reply(response: Option<Value>) -> ProbeReply {
    match response {
        None => ProbeReply::default(),
        Some(v) => serde_json::from_value(v).unwrap_or(ProbeReply {
            handling: true,
            reply: None,
        }),
    }
}

/// Empty on the wire: absent, null, empty string, or empty array.
fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        _ => false,
    }
}

/// Validate the addressing fields; errors name the missing field.
fn require_address(req: &InboundRequest) -> Result<LastRequestRecord, DispatchError> {
    let channel = req
        .channel
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| DispatchError::Validation("request missing channel".to_string()))?;
    let context = req
        .context
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| DispatchError::Validation("request missing context".to_string()))?;
    Ok(LastRequestRecord {
        channel: channel.to_string(),
        context: context.to_string(),
    })
}

/// The dispatch router: owns the handler registry, the sticky-handler
/// pointer, the channel output map, and the last-channel record.
pub struct DispatchRouter {
    transport: Arc<dyn Transport>,
    registry: RwLock<HandlerRegistry>,
    /// Index of the registration that last claimed a message. Never cleared;
    /// indexes stay valid because registrations are never removed.
    current: RwLock<Option<usize>>,
    channels: ChannelMap,
    ai: AiClient,
    store: LastChannelStore,
    last_request: RwLock<Option<LastRequestRecord>>,
}

impl DispatchRouter {
    pub fn new(transport: Arc<dyn Transport>, config: &Config) -> Self {
        let ai = AiClient::new(transport.open(&config.substrate.ai_key));
        let store = LastChannelStore::new(transport.open(&config.substrate.store_key));
        Self {
            channels: ChannelMap::new(transport.clone()),
            transport,
            registry: RwLock::new(HandlerRegistry::new()),
            current: RwLock::new(None),
            ai,
            store,
            last_request: RwLock::new(None),
        }
    }

    /// Load the persisted last-channel record into memory. Absent or
    /// malformed leaves it unset.
    pub async fn load_last_channel(&self) {
        if let Some(record) = self.store.load().await {
            *self.last_request.write().await = Some(record);
        }
    }

    /// Register a skill handler: key, probe event type, and help entries.
    /// Help validation is all-or-nothing; a rejected registration adds
    /// nothing to the registry or the help index.
    pub async fn register(&self, params: RegisterParams) -> Result<(), DispatchError> {
        let key = params
            .key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                DispatchError::Validation(
                    "mskey and mstype needed to register msg handler".to_string(),
                )
            })?;
        let message_type = params
            .message_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                DispatchError::Validation(
                    "mskey and mstype needed to register msg handler".to_string(),
                )
            })?;
        if !registry::validate_help(&params.help) {
            return Err(DispatchError::Validation(format!(
                "{}: help command and text (mshelp) needed to register msg handler",
                key
            )));
        }
        let registration = HandlerRegistration {
            key: key.to_string(),
            message_type: message_type.to_string(),
            connection: self.transport.open(key),
        };
        self.registry.write().await.add(registration, params.help);
        log::info!("registered msg handler {}", key);
        Ok(())
    }

    /// Route one owner message: record the channel, then help, sticky
    /// handler, registry scan, AI fallback, canonical reply — in that order.
    pub async fn handle_message(&self, req: &InboundRequest) -> Result<(), DispatchError> {
        let record = require_address(req)?;
        // The in-memory copy is refreshed before any handler is consulted;
        // the durable write must never block routing.
        *self.last_request.write().await = Some(record.clone());
        self.store.save_in_background(record.clone());

        let text = match req.text.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => return Ok(()),
        };
        if text == HELP_COMMAND {
            let help = self.registry.read().await.help_text();
            return self.send_reply(Some(&help), None, &record).await;
        }
        if self.route(req, text, &record).await? {
            return Ok(());
        }
        let fallback = format!("I'm sorry - I did not understand: {}", text);
        self.send_reply(Some(&fallback), None, &record).await
    }

    /// Non-owner senders get knowledge-base answers only: no skills, no
    /// stickiness, no last-channel tracking.
    pub async fn handle_not_owner_message(
        &self,
        req: &InboundRequest,
    ) -> Result<(), DispatchError> {
        let record = require_address(req)?;
        let text = req.text.as_deref().unwrap_or("");
        match self.ai.kb_response(text).await.map_err(DispatchError::Probe)? {
            Some(answer) => self.send_reply(Some(&answer), None, &record).await,
            None => {
                let fallback = format!("I'm sorry - I did not understand: {}", text);
                self.send_reply(Some(&fallback), None, &record).await
            }
        }
    }

    /// Pass-through delivery for a ready-made reply; no-op when there is
    /// nothing to send.
    pub async fn handle_reply(&self, req: &InboundRequest) -> Result<(), DispatchError> {
        let record = require_address(req)?;
        let text = req.text.as_deref().filter(|t| !t.is_empty());
        if text.is_none() && is_empty(req.extra.as_ref()) {
            return Ok(());
        }
        self.send_reply(text, req.extra.as_ref(), &record).await
    }

    /// Deliver on the channel of the most recent owner message.
    pub async fn reply_on_last_channel(
        &self,
        text: Option<&str>,
        extra: Option<&Value>,
    ) -> Result<(), DispatchError> {
        let record = self
            .last_request
            .read()
            .await
            .clone()
            .ok_or(DispatchError::NoLastChannel)?;
        self.send_reply(text, extra, &record).await
    }

    /// Run the routing algorithm. Returns true when some responder claimed
    /// the message.
    async fn route(
        &self,
        req: &InboundRequest,
        text: &str,
        record: &LastRequestRecord,
    ) -> Result<bool, DispatchError> {
        // Sticky handler first: the conversation continues with whoever
        // engaged last. A transport failure here surfaces to the caller.
        let sticky = {
            let current = self.current.read().await;
            match *current {
                Some(ndx) => self.registry.read().await.get(ndx).cloned(),
                None => None,
            }
        };
        if let Some(reg) = sticky {
            let probe = self.probe(&reg, req).await.map_err(DispatchError::Probe)?;
            if probe.handling {
                if let Some(reply) = probe.reply.as_deref() {
                    self.send_reply(Some(reply), None, record).await?;
                }
                return Ok(true);
            }
        }

        // Scan in registration order, strictly sequentially: first claim
        // wins. A failing probe must not block the handlers after it.
        let handlers: Vec<HandlerRegistration> =
            self.registry.read().await.handlers().to_vec();
        for (ndx, reg) in handlers.iter().enumerate() {
            match self.probe(reg, req).await {
                Err(e) => log::warn!("probe of handler {} failed: {}", reg.key, e),
                Ok(probe) if probe.handling => {
                    *self.current.write().await = Some(ndx);
                    if let Some(reply) = probe.reply.as_deref() {
                        self.send_reply(Some(reply), None, record).await?;
                    }
                    return Ok(true);
                }
                Ok(_) => {}
            }
        }

        // No skill claimed it; ask the AI responder.
        match self.ai.response(text).await.map_err(DispatchError::Probe)? {
            Some(answer) => {
                self.send_reply(Some(&answer), None, record).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Ask one handler whether it takes this message: the original message
    /// fields plus the handler's declared event type.
    async fn probe(
        &self,
        reg: &HandlerRegistration,
        req: &InboundRequest,
    ) -> Result<ProbeReply, TransportError> {
        let mut payload = match serde_json::to_value(req) {
            Ok(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        payload.insert(
            "type".to_string(),
            Value::String(reg.message_type.clone()),
        );
        let response = reg.connection.request(Value::Object(payload)).await?;
        Ok(parse_probe_reply(response))
    }

    async fn send_reply(
        &self,
        text: Option<&str>,
        extra: Option<&Value>,
        record: &LastRequestRecord,
    ) -> Result<(), DispatchError> {
        self.channels
            .send_reply(text, extra, &record.channel, &record.context)
            .await
            .map_err(DispatchError::Delivery)
    }
}
