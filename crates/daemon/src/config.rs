// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI surface and the JSON daemon configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::dpa::params::RfMode;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Command line of the daemon.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "iqrfgd", version, about = "IQRF gateway daemon")]
pub struct Cli {
    /// Path to the daemon configuration file.
    #[arg(
        long,
        default_value = "/etc/iqrf-gateway-daemon.json",
        env = "IQRFGD_CONFIGURATION"
    )]
    pub configuration: PathBuf,

    /// Path to the PID file.
    #[arg(
        long,
        default_value = "/var/run/iqrf-gateway-daemon.pid",
        env = "IQRFGD_PIDFILE"
    )]
    pub pidfile: PathBuf,

    /// Log output format.
    #[arg(long, value_enum, default_value = "plain", env = "IQRFGD_LOG_FORMAT")]
    pub log_format: LogFormat,
}

/// What the engine does with queued transactions while the channel is down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnChannelDown {
    /// Queued submissions wait for the channel to recover.
    #[default]
    Hold,
    /// Queued submissions fail immediately with `network-down`.
    Fail,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DaemonConfig {
    /// Instance identifier echoed in verbose responses.
    pub instance_id: String,
    pub channel: ChannelConfig,
    pub engine: EngineConfig,
    pub transports: TransportsConfig,
    pub database: DatabaseConfig,
    /// Directory of per-mType request/response JSON schemas.
    pub schema_dir: Option<PathBuf>,
    /// API handler pool size; 0 selects the available parallelism.
    pub api_workers: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            instance_id: "iqrfgd2-1".to_owned(),
            channel: ChannelConfig::default(),
            engine: EngineConfig::default(),
            transports: TransportsConfig::default(),
            database: DatabaseConfig::default(),
            schema_dir: None,
            api_workers: 0,
        }
    }
}

impl DaemonConfig {
    /// Load the JSON configuration file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn api_worker_count(&self) -> usize {
        if self.api_workers > 0 {
            self.api_workers
        } else {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelConfig {
    /// Serial interface of the coordinator module.
    pub interface: String,
    pub baud_rate: u32,
    /// Write attempts while the device reports busy.
    pub busy_retries: u32,
    pub busy_backoff_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            interface: "/dev/ttyACM0".to_owned(),
            baud_rate: 57_600,
            busy_retries: 4,
            busy_backoff_ms: 100,
        }
    }
}

impl ChannelConfig {
    pub fn busy_backoff(&self) -> Duration {
        Duration::from_millis(self.busy_backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Confirmation-phase default timeout when the caller gives none.
    pub default_timeout_ms: u64,
    /// Admission queue depth; submitters suspend when full.
    pub queue_capacity: usize,
    pub on_channel_down: OnChannelDown,
    pub rf_mode: RfMode,
    /// Read coordinator identity and device maps at startup.
    pub bootstrap: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 500,
            queue_capacity: 32,
            on_channel_down: OnChannelDown::Hold,
            rf_mode: RfMode::Std,
            bootstrap: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportsConfig {
    pub websocket: Option<WsConfig>,
    pub udp: Option<UdpConfig>,
    /// Per-transport outbound queue depth.
    pub queue_capacity: usize,
}

impl Default for TransportsConfig {
    fn default() -> Self {
        Self { websocket: None, udp: None, queue_capacity: 64 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WsConfig {
    pub host: String,
    pub port: u16,
    /// Require an API token on WebSocket connect.
    pub auth_required: bool,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_owned(), port: 1338, auth_required: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UdpConfig {
    pub bind: String,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:55000".to_owned() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("/var/cache/iqrf-gateway-daemon/iqrfgd.db") }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
