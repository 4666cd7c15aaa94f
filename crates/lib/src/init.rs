//! Initialize the configuration directory: create ~/.relay and a default config.

use crate::config::Config;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Create the config directory and a default config file if they do not
/// exist. The default file spells out the server and substrate sections so
/// the service keys and base URL are visible for editing.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config =
            serde_json::to_string_pretty(&Config::default()).context("encoding default config")?;
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    Ok(config_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_writes_a_loadable_default_config() {
        let dir = std::env::temp_dir().join(format!("relay-init-test-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let config_path = dir.join("config.json");

        init_config_dir(&config_path).expect("init config dir");
        let (config, _) =
            crate::config::load_config(Some(config_path.clone())).expect("load written config");
        assert_eq!(config.server.port, 16161);
        assert_eq!(config.substrate.store_key, "store-svc");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
