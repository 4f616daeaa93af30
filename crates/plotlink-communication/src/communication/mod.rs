//! Link abstraction and the layers built on it
//!
//! A link is a physical serial connection seen as three things: a writer
//! for outbound bytes, a stream of [`LinkEvent`]s for everything inbound,
//! and a backend that knows how to enumerate and open ports.

pub mod buffered;
pub mod channel;
pub mod connection;
pub mod serial;

use async_trait::async_trait;
use plotlink_core::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_LINE_DELIMITER, DEFAULT_MAX_LINE_BYTES, DEFAULT_REOPEN_DELAY_MS,
    DEFAULT_WRITE_TIMEOUT_MS,
};
use plotlink_core::ConnectionError;
use serde::{Deserialize, Serialize};
use std::io;
use tokio::sync::mpsc;

use self::serial::SerialPortInfo;

/// Capacity of the per-link inbound event channel
pub const LINK_EVENT_BUFFER: usize = 256;

/// Everything a link can report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The port confirmed the open
    Opened,
    /// One inbound line, delimiter removed
    Line(String),
    /// The port reported an error
    Error(String),
    /// The port closed
    Closed,
}

/// Port parameters applied on open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Line speed
    pub baud_rate: u32,
    /// Inbound line delimiter
    pub line_delimiter: String,
    /// Limit on one blocking write; the channel task waits at most this long
    pub write_timeout_ms: u64,
    /// Partial inbound lines longer than this are discarded
    pub max_line_bytes: usize,
    /// Pause after a fault before the port is opened again
    pub reopen_delay_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            line_delimiter: DEFAULT_LINE_DELIMITER.to_string(),
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            reopen_delay_ms: DEFAULT_REOPEN_DELAY_MS,
        }
    }
}

/// Outbound half of an open link
pub trait LinkWriter: Send {
    /// Write all bytes to the port
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Port path
    fn port_name(&self) -> &str;
}

/// A link that has been opened but not necessarily confirmed
///
/// The event receiver exists before the open is issued, so an early
/// `Opened` or `Error` is never lost.
pub struct OpenedLink {
    /// Port path
    pub port: String,
    /// Outbound half
    pub writer: Box<dyn LinkWriter>,
    /// Inbound events
    pub events: mpsc::Receiver<LinkEvent>,
}

impl std::fmt::Debug for OpenedLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedLink")
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

/// Port enumeration and opening
#[async_trait]
pub trait LinkBackend: Send + Sync {
    /// List the ports currently visible to the OS
    async fn list_ports(&self) -> Result<Vec<SerialPortInfo>, ConnectionError>;

    /// Open a port in manual-open mode
    ///
    /// The returned link reports `Opened`, `Error`, or `Closed` on its event
    /// channel; the caller decides how long to wait for the confirmation.
    async fn open(
        &self,
        port: &SerialPortInfo,
        settings: &LinkSettings,
    ) -> Result<OpenedLink, ConnectionError>;
}
