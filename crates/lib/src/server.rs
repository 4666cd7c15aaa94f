//! Control surface: HTTP endpoint for inbound substrate control events.
//!
//! One port serves a health check (`GET /`) and the event endpoint
//! (`POST /event`). Events are discriminated by `type` and dispatched to the
//! router; no event failure is fatal to the process.

use crate::config::{self, Config};
use crate::dispatch::{DispatchError, DispatchRouter, InboundRequest, RegisterParams};
use crate::transport::HttpTransport;
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const PROTOCOL_VERSION: u32 = 1;

/// One control event from the substrate, discriminated by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlEvent {
    RegisterMsgHandler(RegisterParams),
    Message(InboundRequest),
    NotOwnerMessage(InboundRequest),
    Reply(InboundRequest),
    ReplyOnLastChannel(ReplyParams),
}

/// reply-on-last-channel parameters (no addressing; the router supplies it).
#[derive(Debug, Clone, Deserialize)]
pub struct ReplyParams {
    #[serde(rename = "msg", default)]
    pub text: Option<String>,
    #[serde(rename = "addl", default)]
    pub extra: Option<Value>,
}

/// Shared state for the control surface.
#[derive(Clone)]
pub struct ServerState {
    pub router: Arc<DispatchRouter>,
    pub port: u16,
}

async fn health(State(state): State<ServerState>) -> Json<Value> {
    Json(json!({
        "runtime": "running",
        "protocol": PROTOCOL_VERSION,
        "port": state.port,
    }))
}

fn error_status(err: &DispatchError) -> StatusCode {
    match err {
        DispatchError::Validation(_) => StatusCode::BAD_REQUEST,
        DispatchError::NoLastChannel => StatusCode::NOT_FOUND,
        DispatchError::Probe(_) | DispatchError::Delivery(_) => StatusCode::BAD_GATEWAY,
    }
}

async fn handle_event(
    State(state): State<ServerState>,
    Json(event): Json<ControlEvent>,
) -> (StatusCode, Json<Value>) {
    let result = match event {
        ControlEvent::RegisterMsgHandler(params) => state.router.register(params).await,
        ControlEvent::Message(req) => state.router.handle_message(&req).await,
        ControlEvent::NotOwnerMessage(req) => state.router.handle_not_owner_message(&req).await,
        ControlEvent::Reply(req) => state.router.handle_reply(&req).await,
        ControlEvent::ReplyOnLastChannel(params) => {
            state
                .router
                .reply_on_last_channel(params.text.as_deref(), params.extra.as_ref())
                .await
        }
    };
    match result {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))),
        Err(e) => {
            log::debug!("control event failed: {}", e);
            (
                error_status(&e),
                Json(json!({ "ok": false, "error": e.to_string() })),
            )
        }
    }
}

/// Run the control surface; binds to config.server.bind:config.server.port.
/// Loads the persisted last-channel record first (its absence or failure is
/// tolerated), then blocks until shutdown (Ctrl+C or SIGTERM).
pub async fn run_server(config: Config) -> Result<()> {
    let bind = config.server.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) {
        log::warn!("binding control surface to non-loopback address {}", bind);
    }

    let transport = Arc::new(HttpTransport::new(config::resolve_substrate_url(&config)));
    let router = Arc::new(DispatchRouter::new(transport, &config));
    router.load_last_channel().await;

    let state = ServerState {
        router,
        port: config.server.port,
    };
    let app = Router::new()
        .route("/", get(health))
        .route("/event", post(handle_event))
        .with_state(state);

    let bind_addr = format!("{}:{}", bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("control surface listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("control surface exited")?;
    log::info!("control surface stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_events_decode_by_type_tag() {
        let event: ControlEvent = serde_json::from_str(
            r#"{"type":"message","chan":"telegram","ctx":"c1","msg":"hi"}"#,
        )
        .expect("decode message event");
        match event {
            ControlEvent::Message(req) => {
                assert_eq!(req.channel.as_deref(), Some("telegram"));
                assert_eq!(req.text.as_deref(), Some("hi"));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let event: ControlEvent = serde_json::from_str(
            r#"{"type":"register-msg-handler","mskey":"weather","mstype":"msg","mshelp":[{"cmd":"/weather","txt":"show weather"}]}"#,
        )
        .expect("decode register event");
        match event {
            ControlEvent::RegisterMsgHandler(params) => {
                assert_eq!(params.key.as_deref(), Some("weather"));
                assert_eq!(params.help.len(), 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let event: ControlEvent =
            serde_json::from_str(r#"{"type":"reply-on-last-channel","msg":"hello again"}"#)
                .expect("decode reply-on-last-channel event");
        match event {
            ControlEvent::ReplyOnLastChannel(params) => {
                assert_eq!(params.text.as_deref(), Some("hello again"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
