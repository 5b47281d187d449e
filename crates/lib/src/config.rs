//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.evcam/config.json`) and environment.
//! Every section is optional; missing keys fall back to the defaults below.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// DingTalk app credentials and API endpoints.
    #[serde(default)]
    pub dingtalk: DingTalkConfig,

    /// Push stream connection settings.
    #[serde(default)]
    pub stream: StreamConfig,

    /// Reply worker pool settings.
    #[serde(default)]
    pub replies: ReplyConfig,

    /// External recorder program invoked for record commands.
    #[serde(default)]
    pub recorder: RecorderConfig,
}

/// DingTalk robot app settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DingTalkConfig {
    /// App key. Overridden by DINGTALK_CLIENT_ID env.
    pub client_id: Option<String>,
    /// App secret. Overridden by DINGTALK_CLIENT_SECRET env.
    pub client_secret: Option<String>,
    /// Optional group-chat webhook; group replies use it instead of the group message API.
    pub webhook_url: Option<String>,
    /// Override for https://api.dingtalk.com.
    pub api_base_url: Option<String>,
    /// Override for https://oapi.dingtalk.com.
    pub oapi_base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    /// Fixed delay before every reconnect attempt (default 5000).
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Websocket ping interval; a missing pong by the next tick drops the connection (default 30).
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Websocket handshake timeout (default 30).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyConfig {
    /// Concurrent reply senders (default 2).
    #[serde(default = "default_reply_workers")]
    pub workers: usize,
    /// Pending replies beyond this are dropped with a warning (default 32).
    #[serde(default = "default_reply_queue_capacity")]
    pub queue_capacity: usize,
}

/// Recorder hook: `program args...`, no shell. Args and `output` may use `{duration}`,
/// `{conversationId}`, `{conversationType}`, `{senderId}` and `{timestamp}`; args may
/// also use `{output}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderConfig {
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// File the program writes; sent back to the conversation once it exits successfully.
    #[serde(default)]
    pub output: Option<String>,
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_reply_workers() -> usize {
    2
}

fn default_reply_queue_capacity() -> usize {
    32
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl StreamConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            workers: default_reply_workers(),
            queue_capacity: default_reply_queue_capacity(),
        }
    }
}

fn env_or(var: &str, configured: Option<&String>) -> Option<String> {
    std::env::var(var)
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
            configured
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve the DingTalk app key: env DINGTALK_CLIENT_ID overrides config.
pub fn resolve_client_id(config: &Config) -> Option<String> {
    env_or("DINGTALK_CLIENT_ID", config.dingtalk.client_id.as_ref())
}

/// Resolve the DingTalk app secret: env DINGTALK_CLIENT_SECRET overrides config.
pub fn resolve_client_secret(config: &Config) -> Option<String> {
    env_or("DINGTALK_CLIENT_SECRET", config.dingtalk.client_secret.as_ref())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("EVCAM_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".evcam").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, EVCAM_CONFIG_PATH, or the default. Missing file => default config.
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
