//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.relay/config.json`) and
//! environment. Kept minimal: control-surface bind/port and the substrate
//! service addresses the router depends on.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Control-surface server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Messaging-substrate settings (base URL, well-known service keys).
    #[serde(default)]
    pub substrate: SubstrateConfig,
}

/// Control-surface bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port for the control-event endpoint (default 16161).
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_server_bind")]
    pub bind: String,
}

fn default_server_port() -> u16 {
    16161
}

fn default_server_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            bind: default_server_bind(),
        }
    }
}

/// Substrate addressing: where the bridge lives and which keys the router's
/// external collaborators answer on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstrateConfig {
    /// Base URL of the substrate HTTP bridge. Overridden by RELAY_SUBSTRATE_URL env.
    pub base_url: Option<String>,

    /// Service key of the AI responder.
    #[serde(default = "default_ai_key")]
    pub ai_key: String,

    /// Service key of the key-value store.
    #[serde(default = "default_store_key")]
    pub store_key: String,
}

fn default_ai_key() -> String {
    "ai-svc".to_string()
}

fn default_store_key() -> String {
    "store-svc".to_string()
}

impl Default for SubstrateConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            ai_key: default_ai_key(),
            store_key: default_store_key(),
        }
    }
}

/// Resolve the substrate base URL: env RELAY_SUBSTRATE_URL overrides config.
pub fn resolve_substrate_url(config: &Config) -> Option<String> {
    std::env::var("RELAY_SUBSTRATE_URL")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            config
                .substrate
                .base_url
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("RELAY_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".relay").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the default path (or RELAY_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
