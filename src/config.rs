//! YAML configuration loading and validation.
//!
//! The file is deserialized into raw structs with serde defaults, then a
//! validation pass produces the fully-populated [`Configuration`] handed to
//! the rest of the process. Nothing downstream ever sees a partially
//! defaulted value.

use serde::Deserialize;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_DELAY_SECS: u64 = 15;

#[derive(Debug)]
pub enum ConfigError {
    /// File access or YAML parse failure.
    Load(config::ConfigError),
    NoDevices,
    /// Device entry at the given position is missing its `sysid`.
    MissingSysId(usize),
    /// Device entry at the given position is missing its `url`.
    MissingUrl(usize),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Load(e) => write!(f, "{}", e),
            ConfigError::NoDevices => write!(f, "there are no devices to monitor"),
            ConfigError::MissingSysId(i) => write!(f, "device config at {} position is missing sysid", i),
            ConfigError::MissingUrl(i) => write!(f, "device config at {} position is missing url", i),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Load(e) => Some(e),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(value: config::ConfigError) -> Self {
        ConfigError::Load(value)
    }
}

/// Per-metric enable/disable flags for one device. Every flag defaults to
/// enabled; a device entry only needs to name the ones it turns off.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_true")]
    pub connected: bool,
    #[serde(default = "default_true")]
    pub water_temperature: bool,
    #[serde(default = "default_true")]
    pub external_temperature: bool,
    #[serde(default = "default_true")]
    pub heating_mode: bool,
    #[serde(default = "default_true")]
    pub eco_mode: bool,
    #[serde(default = "default_true")]
    pub room_connected: bool,
    #[serde(default = "default_true")]
    pub temperature: bool,
    #[serde(default = "default_true")]
    pub dew_temperature: bool,
    #[serde(default = "default_true")]
    pub relay: bool,
    #[serde(default = "default_true")]
    pub humidity: bool,
    #[serde(default = "default_true")]
    pub target_temperature: bool,
    #[serde(default = "default_true")]
    pub http_client_latency: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        ReportConfig {
            connected: true,
            water_temperature: true,
            external_temperature: true,
            heating_mode: true,
            eco_mode: true,
            room_connected: true,
            temperature: true,
            dew_temperature: true,
            relay: true,
            humidity: true,
            target_temperature: true,
            http_client_latency: true,
        }
    }
}

/// Validated process configuration.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub port: u16,
    pub devices: Vec<DeviceConfig>,
}

/// Validated per-device configuration.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub url: String,
    pub sys_id: String,
    pub password: String,
    pub delay: Duration,
    pub report: ReportConfig,
}

// File shape before validation.
#[derive(Debug, Deserialize)]
struct RawConfiguration {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    devices: Vec<RawDevice>,
}

#[derive(Debug, Deserialize)]
struct RawDevice {
    #[serde(default)]
    url: String,
    #[serde(default)]
    sysid: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default = "default_delay")]
    delay: u64,
    #[serde(default)]
    report: ReportConfig,
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_delay() -> u64 {
    DEFAULT_DELAY_SECS
}

/// Reads and validates the configuration file.
pub fn read_config(path: &Path) -> Result<Configuration, ConfigError> {
    let raw: RawConfiguration = config::Config::builder()
        .add_source(config::File::new(&path.to_string_lossy(), config::FileFormat::Yaml))
        .build()?
        .try_deserialize()?;
    validate(raw)
}

fn validate(raw: RawConfiguration) -> Result<Configuration, ConfigError> {
    if raw.devices.is_empty() {
        return Err(ConfigError::NoDevices);
    }
    let mut devices = Vec::with_capacity(raw.devices.len());
    for (i, device) in raw.devices.into_iter().enumerate() {
        if device.sysid.is_empty() {
            return Err(ConfigError::MissingSysId(i));
        }
        if device.url.is_empty() {
            return Err(ConfigError::MissingUrl(i));
        }
        let password = match device.password {
            Some(password) if !password.is_empty() => password,
            _ => device.sysid.clone(),
        };
        devices.push(DeviceConfig {
            url: device.url,
            sys_id: device.sysid,
            password,
            delay: Duration::from_secs(device.delay),
            report: device.report,
        });
    }
    Ok(Configuration {
        port: raw.port,
        devices,
    })
}
