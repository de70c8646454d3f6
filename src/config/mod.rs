//! Configuration loaded from `config.toml`.
//!
//! Resolution order: explicit `--config` path → `HOOKLINE_CONFIG` env →
//! `<user config dir>/hookline/config.toml`. A missing file yields defaults so
//! the gateway can run against a loopback-only setup out of the box.

use anyhow::{Context, Result};
use directories::BaseDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Env var that overrides the configured callback secret. Keeps the shared
/// secret out of config files on shared hosts.
pub const CALLBACK_SECRET_ENV: &str = "HOOKLINE_CALLBACK_SECRET";
/// Env var pointing at an alternate config file.
pub const CONFIG_PATH_ENV: &str = "HOOKLINE_CONFIG";

/// Top-level Hookline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Path the config was loaded from - computed, not serialized.
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Gateway bind address and portal users (`[gateway]`).
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Outbound webhook and callback settings (`[webhook]`).
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Persistence settings (`[storage]`).
    #[serde(default)]
    pub storage: StorageConfig,

    /// Client polling loop settings (`[poll]`).
    #[serde(default)]
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GatewayConfig {
    /// Bind host. Default: `127.0.0.1`.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port. Also the port probed by the local callback fallback. Default: `3001`.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Portal users allowed to use the authenticated chat API (`[[gateway.users]]`).
    #[serde(default)]
    pub users: Vec<PortalUser>,
}

/// One portal user: a bearer token and the identity it resolves to.
///
/// This stands in for the identity/approval/session layer — the reconciliation
/// core only needs a caller identity and an email out of it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PortalUser {
    pub token: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WebhookConfig {
    /// Fixed external automation endpoint messages are POSTed to.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Explicit callback URL override. Takes precedence over `public_base_url`.
    #[serde(default)]
    pub callback_url: Option<String>,
    /// Public base URL of this instance; the fixed callback path is appended.
    #[serde(default)]
    pub public_base_url: Option<String>,
    /// Shared secret the provider must echo on callbacks. Overridden by
    /// `HOOKLINE_CALLBACK_SECRET`.
    #[serde(default)]
    pub callback_secret: Option<String>,
    /// Health probe timeout in seconds. Default: `5`.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Outbound send timeout in seconds. Default: `30`.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// Tunnel hostname suffixes that require handshake headers the provider
    /// cannot send. Sends to these are rejected outright.
    #[serde(default = "default_blocked_tunnel_hosts")]
    pub blocked_tunnel_hosts: Vec<String>,
    /// Tunnel hostname suffixes that 403 agent-origin requests while still
    /// passing provider-origin traffic. A 403 from these triggers the local
    /// loopback fallback probe.
    #[serde(default = "default_relay_tunnel_hosts")]
    pub relay_tunnel_hosts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StorageConfig {
    /// SQLite database path. Default: `<user data dir>/hookline/portal.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PollConfig {
    /// Fixed re-fetch cadence in seconds. No backoff, no jitter. Default: `4`.
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
    /// Attempt budget before the poll gives up regardless of outcome. Default: `45`.
    #[serde(default = "default_poll_max_attempts")]
    pub max_attempts: u32,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_send_timeout_secs() -> u64 {
    30
}

fn default_blocked_tunnel_hosts() -> Vec<String> {
    vec!["loca.lt".to_string(), "serveo.net".to_string()]
}

fn default_relay_tunnel_hosts() -> Vec<String> {
    vec!["trycloudflare.com".to_string(), "ngrok-free.app".to_string()]
}

fn default_poll_interval_secs() -> u64 {
    4
}

fn default_poll_max_attempts() -> u32 {
    45
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            users: Vec::new(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            callback_url: None,
            public_base_url: None,
            callback_secret: None,
            probe_timeout_secs: default_probe_timeout_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            blocked_tunnel_hosts: default_blocked_tunnel_hosts(),
            relay_tunnel_hosts: default_relay_tunnel_hosts(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: None }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
            max_attempts: default_poll_max_attempts(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            gateway: GatewayConfig::default(),
            webhook: WebhookConfig::default(),
            storage: StorageConfig::default(),
            poll: PollConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration, falling back to defaults when no file exists.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = match explicit_path {
            Some(p) => p.to_path_buf(),
            None => match std::env::var(CONFIG_PATH_ENV) {
                Ok(p) if !p.trim().is_empty() => PathBuf::from(p),
                _ => Self::default_config_path()?,
            },
        };

        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str::<Config>(&raw)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Config::default()
        };

        config.config_path = path;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var(CALLBACK_SECRET_ENV) {
            let secret = secret.trim().to_string();
            if !secret.is_empty() {
                self.webhook.callback_secret = Some(secret);
            }
        }
    }

    fn default_config_path() -> Result<PathBuf> {
        let base = BaseDirs::new().context("Could not determine home directory")?;
        Ok(base.config_dir().join("hookline").join("config.toml"))
    }

    /// Resolved SQLite database path.
    pub fn db_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.storage.path {
            return Ok(path.clone());
        }
        let base = BaseDirs::new().context("Could not determine home directory")?;
        Ok(base.data_dir().join("hookline").join("portal.db"))
    }
}
