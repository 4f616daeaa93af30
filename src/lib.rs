//! # Plotlink
//!
//! Serial command bridge for pen plotters and small CNC machines that
//! speak line-based G-code and acknowledge each line with `ok`.
//!
//! ## Architecture
//!
//! Plotlink is organized as a workspace:
//!
//! 1. **plotlink-core** - Device identity, status, events, error types
//! 2. **plotlink-communication** - Serial backend, reconnection loop,
//!    flow-controlled command channel, response classification
//! 3. **plotlink-settings** - TOML/JSON configuration
//! 4. **plotlink** - This crate: logging setup, the stdin bridge, and
//!    the binary
//!
//! ## Features
//!
//! - **Discovery**: finds the device by USB vendor/product id
//! - **Supervision**: reconnects forever at a fixed delay
//! - **Flow control**: at most four unacknowledged commands on the wire
//! - **Timeouts**: a command with no reply fails after ten seconds

pub mod bridge;

pub use plotlink_communication::{
    ChannelConfig, CommandChannel, LinkBackend, ResponseKind, SerialBackend, SerialPortInfo,
};
pub use plotlink_core::{
    ChannelEvent, ChannelStatus, CommandError, ConnectionError, ConnectionState, DeviceIdentity,
};
pub use plotlink_settings::Config;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Output on stderr, keeping stdout for command results
/// - RUST_LOG environment variable support, `info` when unset or invalid
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_names(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
