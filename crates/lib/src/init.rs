//! Initialize the configuration directory: create ~/.evcam and a default config.json.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{self, Config};

/// Fail unless DingTalk credentials are resolvable (config or env).
pub fn require_credentials(config_path: &Path, config: &Config) -> Result<()> {
    if config::resolve_client_id(config).is_none() || config::resolve_client_secret(config).is_none() {
        anyhow::bail!(
            "dingtalk credentials not configured; set dingtalk.clientId/clientSecret in {} \
             or DINGTALK_CLIENT_ID/DINGTALK_CLIENT_SECRET (run `evcam init` to create the file)",
            config_path.display()
        );
    }
    Ok(())
}

/// Create the config directory and write the default config if the file does not exist.
/// Returns the config directory.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = serde_json::to_string_pretty(&Config::default())
            .context("serializing default config")?;
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    } else {
        log::debug!("config already exists at {}, skipping", config_path.display());
    }

    Ok(config_dir.to_path_buf())
}
