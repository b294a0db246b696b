//! TOML-based configuration persistence for the server.
//!
//! Read from `~/.config/padlink-server/config.toml` (or the platform
//! equivalent); every field defaults, so running without a config file gives
//! the stock ports, the stock advertised name, and the stock virtual-device
//! identity.

use std::path::PathBuf;

use padlink_core::discovery::{DATA_PORT, DISCOVERY_PORT};
use padlink_core::uhid::{DeviceIdentity, BUS_USB};
use serde::{Deserialize, Serialize};
use thiserror::Error;

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
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: GeneralConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub device: DeviceConfig,
}

/// Advertised name and logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// Name sent in discovery replies and broadcasts.
    #[serde(default = "default_advertised_name")]
    pub device_name: String,
    /// `tracing` log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// UDP port settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// Port for discovery requests and self-broadcasts.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Port for the descriptor handshake and report datagrams.
    #[serde(default = "default_data_port")]
    pub data_port: u16,
}

/// Identity embedded in the kernel device-creation command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    #[serde(default = "default_device_name")]
    pub name: String,
    #[serde(default = "default_phys")]
    pub phys: String,
    #[serde(default = "default_uniq")]
    pub uniq: String,
    #[serde(default = "default_bus")]
    pub bus: u16,
    #[serde(default = "default_vendor")]
    pub vendor: u32,
    #[serde(default)]
    pub product: u32,
    #[serde(default = "default_version")]
    pub version: u32,
}

impl From<&DeviceConfig> for DeviceIdentity {
    fn from(cfg: &DeviceConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            phys: cfg.phys.clone(),
            uniq: cfg.uniq.clone(),
            bus: cfg.bus,
            vendor: cfg.vendor,
            product: cfg.product,
            version: cfg.version,
            country: 0,
        }
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_advertised_name() -> String {
    "PadLink-UDP".to_string()
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
fn default_device_name() -> String {
    DeviceIdentity::default().name
}
fn default_phys() -> String {
    DeviceIdentity::default().phys
}
fn default_uniq() -> String {
    DeviceIdentity::default().uniq
}
fn default_bus() -> u16 {
    BUS_USB
}
fn default_vendor() -> u32 {
    DeviceIdentity::default().vendor
}
fn default_version() -> u32 {
    DeviceIdentity::default().version
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            device_name: default_advertised_name(),
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

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            phys: default_phys(),
            uniq: default_uniq(),
            bus: default_bus(),
            vendor: default_vendor(),
            product: 0,
            version: default_version(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads the server config, returning defaults when no file exists.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not
/// found", and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<ServerConfig, ConfigError> {
    let path = config_file_path()?;
    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot
/// be determined from the environment.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .ok_or(ConfigError::NoPlatformConfigDir)?;
    Ok(base.join("padlink-server").join("config.toml"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_the_wire_contract() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.network.discovery_port, 2242);
        assert_eq!(cfg.network.data_port, 2243);
        assert_eq!(cfg.server.device_name, "PadLink-UDP");
    }

    #[test]
    fn test_default_device_identity_matches_core_defaults() {
        let cfg = ServerConfig::default();
        let identity = DeviceIdentity::from(&cfg.device);
        assert_eq!(identity, DeviceIdentity::default());
    }

    #[test]
    fn test_empty_toml_yields_defaults() {
        let cfg: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides_selected_fields() {
        let cfg: ServerConfig = toml::from_str(
            r#"
[server]
device_name = "living-room"

[device]
vendor = 4660
"#,
        )
        .unwrap();
        assert_eq!(cfg.server.device_name, "living-room");
        assert_eq!(cfg.device.vendor, 0x1234);
        assert_eq!(cfg.network.data_port, 2243, "untouched fields default");
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let mut cfg = ServerConfig::default();
        cfg.network.discovery_port = 4242;
        cfg.device.product = 7;
        let text = toml::to_string_pretty(&cfg).unwrap();
        let restored: ServerConfig = toml::from_str(&text).unwrap();
        assert_eq!(restored, cfg);
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let result: Result<ServerConfig, _> = toml::from_str("not [ valid toml");
        assert!(result.is_err());
    }
}
