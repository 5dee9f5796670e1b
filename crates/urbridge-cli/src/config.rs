//! Configuration vault – reads/writes `~/.urbridge/config.toml`.
//!
//! Every field has a default, so a missing file or a partial file is fine.
//! `URBRIDGE_*` environment variables override the file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use urbridge_hal::LinkConfig;
use urbridge_runtime::MonitorConfig;
use urbridge_types::{BridgeError, StateField};

/// Highest cycle rate a controller's real-time interface offers.
pub const MAX_FREQUENCY_HZ: f64 = 500.0;

/// Persisted bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Controller hostname or IP.
    pub robot_host: String,
    pub robot_port: u16,
    /// Output/input recipe file handed to the controller link.
    pub recipe_file: String,
    /// Port for HTTP and WebSocket clients.
    pub http_port: u16,
    /// Controller cycle rate requested from the link.
    pub frequency_hz: f64,
    /// Fields the state monitor diffs and publishes.
    pub monitored_fields: Vec<StateField>,
    /// Per-subscriber queue depth before a slow client is dropped.
    pub subscriber_queue: usize,
    pub ws_send_timeout_ms: u64,
    pub command_timeout_ms: u64,
    /// Telemetry silence before `/health` reports the feed as stale.
    pub stale_after_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let link = LinkConfig::default();
        Self {
            robot_host: link.host,
            robot_port: link.port,
            recipe_file: link.recipe_file,
            http_port: 8000,
            frequency_hz: 125.0,
            monitored_fields: StateField::ALL.to_vec(),
            subscriber_queue: 64,
            ws_send_timeout_ms: 2_000,
            command_timeout_ms: 2_000,
            stale_after_ms: 2_000,
        }
    }
}

impl Config {
    /// Reject values the bridge cannot run with.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if !(self.frequency_hz > 0.0 && self.frequency_hz <= MAX_FREQUENCY_HZ) {
            return Err(BridgeError::Config(format!(
                "frequency_hz must be in (0, {MAX_FREQUENCY_HZ}], got {}",
                self.frequency_hz
            )));
        }
        if self.monitored_fields.is_empty() {
            return Err(BridgeError::Config("monitored_fields must not be empty".into()));
        }
        if self.subscriber_queue == 0 {
            return Err(BridgeError::Config("subscriber_queue must be at least 1".into()));
        }
        if self.robot_host.trim().is_empty() {
            return Err(BridgeError::Config("robot_host must not be empty".into()));
        }
        Ok(())
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            host: self.robot_host.clone(),
            port: self.robot_port,
            recipe_file: self.recipe_file.clone(),
            frequency_hz: self.frequency_hz,
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        let mut fields = self.monitored_fields.clone();
        fields.sort();
        fields.dedup();
        MonitorConfig {
            link: self.link_config(),
            fields,
            subscriber_queue: self.subscriber_queue,
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            stale_after: Duration::from_millis(self.stale_after_ms),
        }
    }

    pub fn ws_send_timeout(&self) -> Duration {
        Duration::from_millis(self.ws_send_timeout_ms)
    }
}

/// Return the path to `~/.urbridge/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".urbridge").join("config.toml")
}

/// Load, override from the environment, and validate.  A missing file
/// yields the defaults.
pub fn resolve(path: &Path) -> Result<Config, BridgeError> {
    let mut cfg = load_from(path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// `None` if the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| BridgeError::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| BridgeError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `URBRIDGE_*` overrides.
///
/// | Variable | Config field |
/// |---|---|
/// | `URBRIDGE_ROBOT_HOST` | `robot_host` |
/// | `URBRIDGE_ROBOT_PORT` | `robot_port` |
/// | `URBRIDGE_HTTP_PORT` | `http_port` |
///
/// Unparseable ports are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("URBRIDGE_ROBOT_HOST") {
        cfg.robot_host = v;
    }
    if let Ok(v) = std::env::var("URBRIDGE_ROBOT_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.robot_port = port;
    }
    if let Ok(v) = std::env::var("URBRIDGE_HTTP_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.http_port = port;
    }
}

/// Write `cfg` to `path`, creating the parent directory.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), BridgeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| BridgeError::Config(format!("failed to create {}: {e}", parent.display())))?;
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| BridgeError::Serialization(e.to_string()))?;
    fs::write(path, raw)
        .map_err(|e| BridgeError::Config(format!("failed to write {}: {e}", path.display())))
}
