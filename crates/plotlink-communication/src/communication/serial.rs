//! Serial port backend
//!
//! Production [`LinkBackend`] built on the `serialport` crate.
//!
//! Supports:
//! - Port enumeration with USB vendor/product ids
//! - Opening at a configured baud rate (8N1, no flow control)
//! - A reader thread that splits inbound bytes into lines
//! - Blocking writes of outbound command bytes

use super::{LinkBackend, LinkEvent, LinkSettings, LinkWriter, OpenedLink, LINK_EVENT_BUFFER};
use async_trait::async_trait;
use plotlink_core::constants::DEFAULT_MAX_LINE_BYTES;
use plotlink_core::{ConnectionError, DeviceIdentity};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Read timeout for the reader thread; bounds how long it takes to notice
/// that the link was dropped.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// Serial number if available
    pub serial_number: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            serial_number: None,
            vid: None,
            pid: None,
        }
    }

    /// Set manufacturer
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set serial number
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    /// Set USB IDs
    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }

    /// Whether this port belongs to the given device
    pub fn matches(&self, identity: &DeviceIdentity) -> bool {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => identity.matches_usb(vid, pid),
            _ => false,
        }
    }
}

/// Pick the first port belonging to the device
pub fn find_port<'a>(
    ports: &'a [SerialPortInfo],
    identity: &DeviceIdentity,
) -> Option<&'a SerialPortInfo> {
    ports.iter().find(|port| port.matches(identity))
}

/// List available serial ports on the system
pub fn list_ports() -> Result<Vec<SerialPortInfo>, ConnectionError> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        ConnectionError::Enumeration {
            reason: e.to_string(),
        }
    })?;

    Ok(ports
        .iter()
        .map(|port| {
            let info = SerialPortInfo::new(&port.port_name, get_port_description(port));

            match &port.port_type {
                serialport::SerialPortType::UsbPort(usb_info) => {
                    let mut info = info.with_usb_ids(usb_info.vid, usb_info.pid);
                    if let Some(ref mfg) = usb_info.manufacturer {
                        info = info.with_manufacturer(mfg);
                    }
                    if let Some(ref serial) = usb_info.serial_number {
                        info = info.with_serial_number(serial);
                    }
                    info
                }
                _ => info,
            }
        })
        .collect())
}

/// Get a user-friendly description for a port
fn get_port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb_info) => {
            format!(
                "USB {} {}",
                usb_info.manufacturer.as_deref().unwrap_or("Device"),
                usb_info.product.as_deref().unwrap_or("Serial Port")
            )
        }
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Splits an inbound byte stream into trimmed, non-empty lines
///
/// Each byte is searched once; a partial line that grows past the limit is
/// discarded so a device that never sends the delimiter cannot exhaust
/// memory.
#[derive(Debug, Clone)]
pub struct LineSplitter {
    delimiter: Vec<u8>,
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known not to contain a delimiter start
    scanned: usize,
    max_pending: usize,
}

impl LineSplitter {
    /// Create a splitter; an empty delimiter falls back to `\n`
    pub fn new(delimiter: &str) -> Self {
        Self::with_limit(delimiter, DEFAULT_MAX_LINE_BYTES)
    }

    /// Create a splitter that drops partial lines longer than `max_pending`
    pub fn with_limit(delimiter: &str, max_pending: usize) -> Self {
        let delimiter = if delimiter.is_empty() {
            b"\n".to_vec()
        } else {
            delimiter.as_bytes().to_vec()
        };
        Self {
            delimiter,
            buffer: Vec::new(),
            scanned: 0,
            max_pending: max_pending.max(1),
        }
    }

    /// Feed bytes, returning every line completed by them
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(data);

        let width = self.delimiter.len();
        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buffer[from..]
            .windows(width)
            .position(|w| w == self.delimiter.as_slice())
        {
            let end = from + offset;
            let line = String::from_utf8_lossy(&self.buffer[start..end])
                .trim()
                .to_string();
            if !line.is_empty() {
                lines.push(line);
            }
            start = end + width;
            from = start;
        }
        self.buffer.drain(..start);
        // A delimiter may straddle the next push
        self.scanned = self.buffer.len().saturating_sub(width - 1);

        if self.buffer.len() > self.max_pending {
            tracing::warn!(
                "Discarding {} inbound bytes without a line delimiter",
                self.buffer.len()
            );
            self.buffer.clear();
            self.scanned = 0;
        }
        lines
    }

    /// Bytes received since the last complete line
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Outbound half of a real serial port
pub struct SerialLinkWriter {
    port: Box<dyn serialport::SerialPort>,
    name: String,
    stop: Arc<AtomicBool>,
}

impl LinkWriter for SerialLinkWriter {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)
    }

    fn port_name(&self) -> &str {
        &self.name
    }
}

impl Drop for SerialLinkWriter {
    fn drop(&mut self) {
        // Reader thread exits on its next read timeout.
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// [`LinkBackend`] backed by the OS serial ports
#[derive(Debug, Clone, Default)]
pub struct SerialBackend;

impl SerialBackend {
    /// Create a new backend
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LinkBackend for SerialBackend {
    async fn list_ports(&self) -> Result<Vec<SerialPortInfo>, ConnectionError> {
        tokio::task::spawn_blocking(list_ports)
            .await
            .map_err(|e| ConnectionError::Enumeration {
                reason: e.to_string(),
            })?
    }

    async fn open(
        &self,
        port: &SerialPortInfo,
        settings: &LinkSettings,
    ) -> Result<OpenedLink, ConnectionError> {
        let path = port.port_name.clone();
        let settings = settings.clone();
        let task_path = path.clone();

        tokio::task::spawn_blocking(move || open_port(&task_path, &settings))
            .await
            .map_err(|e| ConnectionError::FailedToOpen {
                port: path,
                reason: e.to_string(),
            })?
    }
}

fn open_port(path: &str, settings: &LinkSettings) -> Result<OpenedLink, ConnectionError> {
    let (events_tx, events_rx) = mpsc::channel(LINK_EVENT_BUFFER);
    let failed = |reason: String| ConnectionError::FailedToOpen {
        port: path.to_string(),
        reason,
    };

    let mut port = serialport::new(path, settings.baud_rate)
        .timeout(READ_TIMEOUT)
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(serialport::Parity::None)
        .flow_control(serialport::FlowControl::None)
        .open()
        .map_err(|e| {
            tracing::warn!("Failed to open serial port {}: {}", path, e);
            failed(e.to_string())
        })?;

    let reader = port.try_clone().map_err(|e| failed(e.to_string()))?;
    // The reader keeps the short poll timeout; writes get their own bound.
    port.set_timeout(Duration::from_millis(settings.write_timeout_ms))
        .map_err(|e| failed(e.to_string()))?;
    let stop = Arc::new(AtomicBool::new(false));

    // The port is open once serialport returns; confirm before any data.
    events_tx
        .try_send(LinkEvent::Opened)
        .map_err(|e| failed(e.to_string()))?;

    let splitter = LineSplitter::with_limit(&settings.line_delimiter, settings.max_line_bytes);
    let reader_stop = stop.clone();
    std::thread::Builder::new()
        .name(format!("plotlink-rx {}", path))
        .spawn(move || read_loop(reader, splitter, events_tx, reader_stop))
        .map_err(|e| failed(e.to_string()))?;

    tracing::debug!("Opened {} at {} baud", path, settings.baud_rate);

    Ok(OpenedLink {
        port: path.to_string(),
        writer: Box::new(SerialLinkWriter {
            port,
            name: path.to_string(),
            stop,
        }),
        events: events_rx,
    })
}

fn read_loop(
    mut port: Box<dyn serialport::SerialPort>,
    mut splitter: LineSplitter,
    events: mpsc::Sender<LinkEvent>,
    stop: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 512];

    while !stop.load(Ordering::Relaxed) && !events.is_closed() {
        match port.read(&mut buf) {
            Ok(0) => {
                let _ = events.blocking_send(LinkEvent::Closed);
                return;
            }
            Ok(n) => {
                for line in splitter.push(&buf[..n]) {
                    if events.blocking_send(LinkEvent::Line(line)).is_err() {
                        return;
                    }
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => {}
            Err(e) => {
                let _ = events.blocking_send(LinkEvent::Error(e.to_string()));
                let _ = events.blocking_send(LinkEvent::Closed);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_splitter_handles_partial_lines() {
        let mut splitter = LineSplitter::new("\n");
        assert!(splitter.push(b"o").is_empty());
        assert_eq!(splitter.push(b"k\nerror:2"), vec!["ok".to_string()]);
        assert_eq!(splitter.pending(), 7);
        assert_eq!(splitter.push(b"\n"), vec!["error:2".to_string()]);
    }

    #[test]
    fn test_line_splitter_crlf() {
        let mut splitter = LineSplitter::new("\r\n");
        assert_eq!(
            splitter.push(b"ok\r\n\r\nGrbl 1.1h\r\n"),
            vec!["ok".to_string(), "Grbl 1.1h".to_string()]
        );
    }

    #[test]
    fn test_line_splitter_lf_with_stray_cr() {
        let mut splitter = LineSplitter::new("");
        assert_eq!(splitter.push(b"ok\r\n"), vec!["ok".to_string()]);
    }

    #[test]
    fn test_line_splitter_delimiter_split_across_reads() {
        let mut splitter = LineSplitter::new("\r\n");
        assert!(splitter.push(b"ok\r").is_empty());
        assert_eq!(splitter.push(b"\nerror:1\r"), vec!["ok".to_string()]);
        assert_eq!(splitter.push(b"\n"), vec!["error:1".to_string()]);
        assert_eq!(splitter.pending(), 0);
    }

    #[test]
    fn test_line_splitter_drops_runaway_partial_line() {
        let mut splitter = LineSplitter::new("\n");
        let noise = vec![b'x'; DEFAULT_MAX_LINE_BYTES + 904];
        assert!(splitter.push(&noise).is_empty());
        assert_eq!(splitter.pending(), 0);
        assert_eq!(splitter.push(b"ok\n"), vec!["ok".to_string()]);
    }

    #[test]
    fn test_line_splitter_keeps_lines_before_overflow() {
        let mut splitter = LineSplitter::with_limit("\n", 8);
        assert_eq!(
            splitter.push(b"ok\n0123456789abcdef"),
            vec!["ok".to_string()]
        );
        assert_eq!(splitter.pending(), 0);
        for _ in 0..4 {
            assert!(splitter.push(b"abc").is_empty());
        }
        assert_eq!(splitter.pending(), 3);
    }

    #[test]
    fn test_port_matching() {
        let ports = vec![
            SerialPortInfo::new("/dev/ttyS0", "Serial Port"),
            SerialPortInfo::new("/dev/ttyUSB0", "USB FTDI").with_usb_ids(0x0403, 0x6001),
            SerialPortInfo::new("/dev/ttyUSB1", "USB CH340").with_usb_ids(0x1a86, 0x7523),
        ];
        let identity = DeviceIdentity::new("1a86", "7523");
        let found = find_port(&ports, &identity).unwrap();
        assert_eq!(found.port_name, "/dev/ttyUSB1");

        let missing = DeviceIdentity::new("2341", "0043");
        assert!(find_port(&ports, &missing).is_none());
    }
}
