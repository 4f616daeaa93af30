//! Plotlink Settings Crate
//!
//! Loads, validates, and saves the bridge configuration.

pub mod config;
pub mod error;

pub use config::{
    ChannelSettings, Config, DeviceSettings, StartupSettings, CONFIG_FILE_NAME, PRODUCT_ID_ENV,
    VENDOR_ID_ENV,
};
pub use error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
