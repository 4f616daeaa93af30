//! Configuration for Plotlink
//!
//! Supports JSON and TOML files. Every section has defaults, so a file only
//! needs the keys it wants to change; in practice that is the device ids.
//!
//! Sections:
//! - Device identity (USB vendor/product ids)
//! - Link parameters (baud rate, line delimiter)
//! - Channel tuning (window, timeouts, retry delay)
//! - Response classification tokens
//! - Startup commands sent once the link first comes up

use crate::error::{ConfigError, SettingsError, SettingsResult};
use plotlink_communication::{ChannelConfig, ClassifierConfig, LinkSettings};
use plotlink_core::constants::{
    DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_EVENT_BUFFER, DEFAULT_IDLE_POLL_INTERVAL_MS,
    DEFAULT_RETRY_DELAY_MS, DEFAULT_SETUP_TIMEOUT_MS, DEFAULT_WINDOW_SIZE,
};
use plotlink_core::data::parse_usb_id;
use plotlink_core::DeviceIdentity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `device.vendor_id`
pub const VENDOR_ID_ENV: &str = "VENDOR_ID";

/// Environment variable overriding `device.product_id`
pub const PRODUCT_ID_ENV: &str = "PRODUCT_ID";

/// File name used under the platform config directory
pub const CONFIG_FILE_NAME: &str = "plotlink.toml";

/// Target device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// USB vendor id, hexadecimal
    pub vendor_id: String,
    /// USB product id, hexadecimal
    pub product_id: String,
}

impl DeviceSettings {
    /// Identity to connect to, if both ids are set
    pub fn identity(&self) -> Option<DeviceIdentity> {
        let vendor = self.vendor_id.trim();
        let product = self.product_id.trim();
        if vendor.is_empty() || product.is_empty() {
            return None;
        }
        Some(DeviceIdentity::new(vendor, product))
    }
}

/// Flow control and reconnection tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Maximum number of unacknowledged commands
    pub window_size: usize,
    /// Per-command reply timeout in milliseconds
    pub command_timeout_ms: u64,
    /// Open handshake timeout in milliseconds
    pub setup_timeout_ms: u64,
    /// Pause between connection attempts in milliseconds
    pub retry_delay_ms: u64,
    /// `wait_until_idle` poll period in milliseconds
    pub idle_poll_interval_ms: u64,
    /// Event broadcast capacity
    pub event_buffer: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            setup_timeout_ms: DEFAULT_SETUP_TIMEOUT_MS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            idle_poll_interval_ms: DEFAULT_IDLE_POLL_INTERVAL_MS,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// Commands sent once after the first successful connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupSettings {
    pub commands: Vec<String>,
}

impl Default for StartupSettings {
    fn default() -> Self {
        Self {
            commands: vec!["G28".to_string()],
        }
    }
}

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Target device
    pub device: DeviceSettings,
    /// Port parameters
    pub link: LinkSettings,
    /// Flow control and reconnection tuning
    pub channel: ChannelSettings,
    /// Response classification
    pub classifier: ClassifierConfig,
    /// Startup commands
    pub startup: StartupSettings,
}

enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> Result<Format, ConfigError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        other => Err(ConfigError::UnsupportedFormat(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config file location
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("plotlink").join(CONFIG_FILE_NAME))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory("no platform config directory".to_string())
            })
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = format_of(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::LoadError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(config)
    }

    /// Load from `path`, or from the default location
    ///
    /// An explicit path must exist. A missing file at the default location
    /// yields the defaults.
    pub fn load_or_default(path: Option<&Path>) -> SettingsResult<Self> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }

        match Self::default_path() {
            Ok(path) if path.exists() => Self::load_from_file(&path),
            Ok(_) | Err(_) => {
                tracing::debug!("No settings file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content).map_err(|e| SettingsError::SaveError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok(())
    }

    /// Check values the channel cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |key: &str, value: u64| {
            if value == 0 {
                Err(ConfigError::ValueOutOfRange {
                    key: key.to_string(),
                    value: value.to_string(),
                })
            } else {
                Ok(())
            }
        };

        positive("channel.window_size", self.channel.window_size as u64)?;
        positive("channel.command_timeout_ms", self.channel.command_timeout_ms)?;
        positive("channel.setup_timeout_ms", self.channel.setup_timeout_ms)?;
        positive("channel.idle_poll_interval_ms", self.channel.idle_poll_interval_ms)?;
        positive("channel.event_buffer", self.channel.event_buffer as u64)?;
        positive("link.baud_rate", u64::from(self.link.baud_rate))?;
        positive("link.write_timeout_ms", self.link.write_timeout_ms)?;
        positive("link.max_line_bytes", self.link.max_line_bytes as u64)?;

        if self.link.line_delimiter.is_empty() {
            return Err(ConfigError::ValueOutOfRange {
                key: "link.line_delimiter".to_string(),
                value: String::new(),
            });
        }

        for (key, value) in [
            ("device.vendor_id", &self.device.vendor_id),
            ("device.product_id", &self.device.product_id),
        ] {
            if !value.trim().is_empty() && parse_usb_id(value).is_none() {
                return Err(ConfigError::InvalidDeviceId {
                    key: key.to_string(),
                    value: value.clone(),
                });
            }
        }

        Ok(())
    }

    /// Apply `VENDOR_ID` / `PRODUCT_ID` from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply device id overrides from any lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(vendor) = lookup(VENDOR_ID_ENV).filter(|v| !v.trim().is_empty()) {
            self.device.vendor_id = vendor;
        }
        if let Some(product) = lookup(PRODUCT_ID_ENV).filter(|v| !v.trim().is_empty()) {
            self.device.product_id = product;
        }
    }

    /// Device identity, or the first missing key
    pub fn identity(&self) -> Result<DeviceIdentity, ConfigError> {
        if self.device.vendor_id.trim().is_empty() {
            return Err(ConfigError::MissingKey("device.vendor_id".to_string()));
        }
        self.device
            .identity()
            .ok_or_else(|| ConfigError::MissingKey("device.product_id".to_string()))
    }

    /// Channel parameters derived from this config
    pub fn to_channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            window_size: self.channel.window_size,
            command_timeout: Duration::from_millis(self.channel.command_timeout_ms),
            setup_timeout: Duration::from_millis(self.channel.setup_timeout_ms),
            retry_delay: Duration::from_millis(self.channel.retry_delay_ms),
            idle_poll_interval: Duration::from_millis(self.channel.idle_poll_interval_ms),
            link: self.link.clone(),
            classifier: self.classifier.clone(),
            event_buffer: self.channel.event_buffer,
        }
    }
}
