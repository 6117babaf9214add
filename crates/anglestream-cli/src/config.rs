//! Configuration file – reads/writes `~/.anglestream/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anglestream_types::{DEFAULT_HOST, DEFAULT_PORT, StreamError};
use serde::{Deserialize, Serialize};

/// Joints driven by the demo producer; also the default key set.
pub const DEMO_JOINTS: [&str; 7] = [
    "right_shoulder",
    "left_shoulder",
    "spine1",
    "right_hip",
    "left_hip",
    "right_knee",
    "left_knee",
];

/// Persisted server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address the server binds to.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Milliseconds between two lines sent to the same client.
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,

    /// Joint keys in wire order.
    #[serde(default = "default_joint_keys")]
    pub joint_keys: Vec<String>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_send_interval_ms() -> u64 {
    50
}
fn default_joint_keys() -> Vec<String> {
    DEMO_JOINTS.iter().map(|k| k.to_string()).collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            send_interval_ms: default_send_interval_ms(),
            joint_keys: default_joint_keys(),
        }
    }
}

/// Return the path to `~/.anglestream/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".anglestream").join("config.toml")
}

/// Load the config from `path` (defaults when the file is absent), then apply
/// environment overrides.
pub fn load(path: &Path) -> Result<Config, StreamError> {
    let mut cfg = load_from(path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config file as written. Returns `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, StreamError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        StreamError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| StreamError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `ANGLESTREAM_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ANGLESTREAM_HOST` | `host` |
/// | `ANGLESTREAM_PORT` | `port` |
/// | `ANGLESTREAM_INTERVAL_MS` | `send_interval_ms` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ANGLESTREAM_HOST") {
        cfg.host = v;
    }
    if let Ok(v) = std::env::var("ANGLESTREAM_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.port = port;
    }
    if let Ok(v) = std::env::var("ANGLESTREAM_INTERVAL_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.send_interval_ms = ms;
    }
}

/// Write `cfg` to `path`, creating the parent directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), StreamError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            StreamError::Config(format!("failed to create {}: {e}", parent.display()))
        })?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| StreamError::Config(format!("failed to serialize config: {e}")))?;
    fs::write(path, raw).map_err(|e| {
        StreamError::Config(format!("failed to write config at {}: {e}", path.display()))
    })
}
