//! TOML-based configuration persistence for the handheld application.
//!
//! Reads and writes [`AppConfig`] to the platform-appropriate config file:
//! - Linux:    `~/.config/padlink/config.toml`
//! - macOS:    `~/Library/Application Support/PadLink/config.toml`
//! - Windows:  `%APPDATA%\PadLink\config.toml`
//!
//! Every field carries a `#[serde(default = ...)]`, so a first run (no file)
//! and an upgrade from an older file missing newer fields both produce a
//! usable config.  The two fields that matter most operationally are the
//! persisted transport mode — the connection manager restores it at startup
//! — and the trigger policy, which resolves the analog-versus-digital
//! trigger conflict on the 6-axis layout.

use std::path::PathBuf;

use padlink_core::discovery::{DATA_PORT, DISCOVERY_PORT};
use padlink_core::TriggerPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::application::connection_manager::TransportMode;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub pad: PadConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

/// General device identity and logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PadConfig {
    /// Name shown to hosts during pairing and discovery.
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Stable identity of this installation, generated on first run.
    #[serde(default = "Uuid::new_v4")]
    pub instance_id: Uuid,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Transport selection and report-encoding policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TransportConfig {
    /// The transport restored at startup and after mode switches.
    #[serde(default)]
    pub mode: TransportMode,
    /// Precedence between analog trigger axes and the legacy digital
    /// trigger bits on the 6-axis layout.
    #[serde(default)]
    pub trigger_policy: TriggerPolicy,
}

/// UDP port settings for the network transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// Port discovery broadcasts are sent to.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Server port for the handshake and report datagrams.
    #[serde(default = "default_data_port")]
    pub data_port: u16,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_device_name() -> String {
    "PadLink".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_discovery_port() -> u16 {
    DISCOVERY_PORT
}
fn default_data_port() -> u16 {
    DATA_PORT
}

impl Default for PadConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            instance_id: Uuid::new_v4(),
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            data_port: default_data_port(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot
/// be determined from the environment.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .ok_or(ConfigError::NoPlatformConfigDir)
        .map(|dir| dir.join("config.toml"))
}

/// Loads [`AppConfig`] from disk, returning defaults if the file does not
/// yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not
/// found", and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let path = config_file_path()?;
    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Persists `config` to disk, creating the config directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    let path = config_file_path()?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })
}

/// Resolves the platform config base directory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("PadLink"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("padlink"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("PadLink")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_uses_udp_mode_and_analog_policy() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.transport.mode, TransportMode::Udp);
        assert_eq!(cfg.transport.trigger_policy, TriggerPolicy::PreferAnalog);
    }

    #[test]
    fn test_default_config_uses_wire_ports() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.network.discovery_port, 2242);
        assert_eq!(cfg.network.data_port, 2243);
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let mut cfg = AppConfig::default();
        cfg.pad.device_name = "couch-pad".to_string();
        cfg.transport.mode = TransportMode::Ble;
        cfg.transport.trigger_policy = TriggerPolicy::PreferDigital;
        cfg.network.data_port = 9999;

        let text = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: AppConfig = toml::from_str(&text).expect("deserialize");

        assert_eq!(restored, cfg);
    }

    #[test]
    fn test_empty_toml_yields_full_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg.pad.device_name, "PadLink");
        assert_eq!(cfg.pad.log_level, "info");
        assert_eq!(cfg.transport.mode, TransportMode::Udp);
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let text = r#"
[transport]
mode = "classic"
"#;
        let cfg: AppConfig = toml::from_str(text).expect("deserialize partial");
        assert_eq!(cfg.transport.mode, TransportMode::Classic);
        assert_eq!(cfg.transport.trigger_policy, TriggerPolicy::PreferAnalog);
        assert_eq!(cfg.network.discovery_port, 2242);
    }

    #[test]
    fn test_mode_strings_match_the_documented_values() {
        for (text, mode) in [
            ("classic", TransportMode::Classic),
            ("ble", TransportMode::Ble),
            ("udp", TransportMode::Udp),
        ] {
            let cfg: AppConfig =
                toml::from_str(&format!("[transport]\nmode = \"{text}\"\n")).unwrap();
            assert_eq!(cfg.transport.mode, mode);
        }
    }

    #[test]
    fn test_invalid_toml_returns_parse_error() {
        let result: Result<AppConfig, _> = toml::from_str("[[[ not valid");
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_load_round_trip_via_temp_dir() {
        let dir = std::env::temp_dir().join(format!("padlink_test_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let mut cfg = AppConfig::default();
        cfg.transport.mode = TransportMode::Classic;
        cfg.pad.log_level = "debug".to_string();

        let content = toml::to_string_pretty(&cfg).unwrap();
        std::fs::write(&path, &content).unwrap();
        let loaded: AppConfig = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

        assert_eq!(loaded.transport.mode, TransportMode::Classic);
        assert_eq!(loaded.pad.log_level, "debug");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_instance_id_survives_round_trip() {
        let cfg = AppConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let restored: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(restored.pad.instance_id, cfg.pad.instance_id);
    }
}
