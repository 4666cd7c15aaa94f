//! Integration test: start the control surface on a free port, check health,
//! and exercise the event endpoint's validation path. No substrate services
//! are required; the startup load of the last-channel record is expected to
//! fail quietly.

use lib::config::Config;
use lib::server;
use std::time::Duration;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

async fn start_server() -> (u16, tokio::task::JoinHandle<()>) {
    let port = free_port();
    let mut config = Config::default();
    config.server.port = port;
    config.server.bind = "127.0.0.1".to_string();

    let handle = tokio::spawn(async move {
        let _ = server::run_server(config).await;
    });
    (port, handle)
}

async fn wait_until_healthy(client: &reqwest::Client, port: u16) -> serde_json::Value {
    let url = format!("http://127.0.0.1:{}/", port);
    let mut last_err = None;
    for _ in 0..100 {
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                return resp.json().await.expect("parse health JSON");
            }
            Ok(_) => {}
            Err(e) => last_err = Some(e),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!(
        "GET {} did not return 200 within 5s; last error: {:?}",
        url, last_err
    );
}

#[tokio::test]
async fn health_reports_running() {
    let (port, handle) = start_server().await;
    let client = reqwest::Client::new();

    let json = wait_until_healthy(&client, port).await;
    assert_eq!(json.get("runtime").and_then(|v| v.as_str()), Some("running"));
    assert_eq!(json.get("protocol").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(json.get("port").and_then(|v| v.as_u64()), Some(port as u64));

    handle.abort();
}

#[tokio::test]
async fn message_without_channel_is_rejected_with_400() {
    let (port, handle) = start_server().await;
    let client = reqwest::Client::new();
    wait_until_healthy(&client, port).await;

    let url = format!("http://127.0.0.1:{}/event", port);
    let resp = client
        .post(&url)
        .json(&serde_json::json!({ "type": "message", "ctx": "c1", "msg": "hi" }))
        .send()
        .await
        .expect("post event");
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json().await.expect("parse error JSON");
    assert_eq!(body.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        body.get("error").and_then(|v| v.as_str()),
        Some("request missing channel")
    );

    handle.abort();
}

#[tokio::test]
async fn reply_on_last_channel_is_404_on_a_fresh_process() {
    let (port, handle) = start_server().await;
    let client = reqwest::Client::new();
    wait_until_healthy(&client, port).await;

    let url = format!("http://127.0.0.1:{}/event", port);
    let resp = client
        .post(&url)
        .json(&serde_json::json!({ "type": "reply-on-last-channel", "msg": "anyone?" }))
        .send()
        .await
        .expect("post event");
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    handle.abort();
}
