//! Keepsake configuration: `~/.keepsake/config.toml`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{KeepsakeError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KeepsakeConfig {
    /// SQLite database path. Defaults to `~/.keepsake/keepsake.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Scheduler tick and dispatch tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between scheduler ticks.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Concurrent per-user dispatches within one tick.
    #[serde(default = "default_concurrency")]
    pub dispatch_concurrency: usize,
    /// Users examined per tick; the rest wait for the next tick.
    #[serde(default = "default_batch_size")]
    pub max_batch_size: usize,
    /// Transport attempts per dispatch before giving up for this tick.
    #[serde(default = "default_send_attempts")]
    pub send_attempts: u32,
    /// Base backoff between transport attempts, doubled each retry.
    #[serde(default = "default_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Hard ceiling on one user's dispatch work within a tick.
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_secs: u64,
}

fn default_tick_interval() -> u64 { 60 }
fn default_concurrency() -> usize { 8 }
fn default_batch_size() -> usize { 200 }
fn default_send_attempts() -> u32 { 3 }
fn default_backoff_ms() -> u64 { 500 }
fn default_dispatch_timeout() -> u64 { 15 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            dispatch_concurrency: default_concurrency(),
            max_batch_size: default_batch_size(),
            send_attempts: default_send_attempts(),
            retry_backoff_ms: default_backoff_ms(),
            dispatch_timeout_secs: default_dispatch_timeout(),
        }
    }
}

/// SMS provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Provider message endpoint, e.g. "https://api.example-sms.com/v1/messages".
    #[serde(default)]
    pub base_url: String,
    /// Sender number in E.164 form.
    #[serde(default)]
    pub from_number: String,
    /// Bearer token for the provider API.
    #[serde(default)]
    pub api_token: String,
    /// Per-request timeout.
    #[serde(default = "default_transport_timeout")]
    pub timeout_secs: u64,
}

fn default_transport_timeout() -> u64 { 5 }

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            from_number: String::new(),
            api_token: String::new(),
            timeout_secs: default_transport_timeout(),
        }
    }
}

/// HTTP gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String { "127.0.0.1:8710".into() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

impl KeepsakeConfig {
    /// Keepsake home directory, `~/.keepsake`.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".keepsake")
    }

    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Resolved database path.
    pub fn db_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| Self::home_dir().join("keepsake.db"))
    }

    /// Load from the default path, falling back to defaults when no
    /// config file exists yet.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| KeepsakeError::ConfigNotFound(format!("{}: {e}", path.display())))?;
        toml::from_str(&raw).map_err(|e| KeepsakeError::Config(format!("parse error: {e}")))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)
            .map_err(|e| KeepsakeError::Config(format!("serialize error: {e}")))?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}
