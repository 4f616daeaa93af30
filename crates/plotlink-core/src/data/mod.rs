//! Data models for the serial channel
//!
//! - Device identity used to pick a port out of the enumerated set
//! - Connection state machine states
//! - Status snapshots published to observers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Vendor/product pair identifying the target device
///
/// Both halves are kept as the strings the operator configured. Matching
/// against USB ids is case-insensitive and tolerates a `0x` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// USB vendor id, hexadecimal (e.g. `"1a86"`)
    pub vendor_id: String,
    /// USB product id, hexadecimal (e.g. `"7523"`)
    pub product_id: String,
}

impl DeviceIdentity {
    /// Create a new identity
    pub fn new(vendor_id: impl Into<String>, product_id: impl Into<String>) -> Self {
        Self {
            vendor_id: vendor_id.into(),
            product_id: product_id.into(),
        }
    }

    /// Check whether a port's USB ids belong to this device
    pub fn matches_usb(&self, vid: u16, pid: u16) -> bool {
        parse_usb_id(&self.vendor_id) == Some(vid) && parse_usb_id(&self.product_id) == Some(pid)
    }

    /// Both halves parse as 16-bit hexadecimal ids
    pub fn is_well_formed(&self) -> bool {
        parse_usb_id(&self.vendor_id).is_some() && parse_usb_id(&self.product_id).is_some()
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.vendor_id, self.product_id)
    }
}

/// Parse a hexadecimal USB id, with or without `0x`
pub fn parse_usb_id(raw: &str) -> Option<u16> {
    let raw = raw.trim();
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    if digits.is_empty() {
        return None;
    }
    u16::from_str_radix(digits, 16).ok()
}

/// Connection state of the serial link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// `initialize` has not been called yet
    #[default]
    Disconnected,
    /// Scanning, opening, or waiting out the retry delay
    Connecting,
    /// Link open; commands are accepted
    Ready,
    /// Link reported an error or closed; pending commands are being failed
    Faulting,
}

impl ConnectionState {
    /// Commands are accepted only in this state
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Ready => write!(f, "Ready"),
            Self::Faulting => write!(f, "Faulting"),
        }
    }
}

/// Point-in-time view of the channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    /// Current connection state
    pub state: ConnectionState,
    /// Commands waiting for a window slot
    pub queued: usize,
    /// Commands transmitted but not yet answered
    pub in_flight: usize,
    /// Failed connection attempts since the last successful open
    pub connect_attempts: u32,
    /// Path of the open port, if any
    pub port: Option<String>,
}

impl ChannelStatus {
    /// Link open and accepting commands
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// Queued or in-flight commands remain
    pub fn is_busy(&self) -> bool {
        self.queued > 0 || self.in_flight > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_usb_id() {
        assert_eq!(parse_usb_id("1a86"), Some(0x1a86));
        assert_eq!(parse_usb_id("0x1A86"), Some(0x1a86));
        assert_eq!(parse_usb_id(" 0403 "), Some(0x0403));
        assert_eq!(parse_usb_id("0x"), None);
        assert_eq!(parse_usb_id("xyz"), None);
        assert_eq!(parse_usb_id("123456"), None);
    }

    #[test]
    fn test_identity_matching() {
        let id = DeviceIdentity::new("1A86", "0x7523");
        assert!(id.matches_usb(0x1a86, 0x7523));
        assert!(!id.matches_usb(0x1a86, 0x7522));
        assert!(!id.matches_usb(0x0403, 0x7523));
        assert_eq!(id.to_string(), "1A86:0x7523");
    }

    #[test]
    fn test_malformed_identity_never_matches() {
        let id = DeviceIdentity::new("plotter", "7523");
        assert!(!id.is_well_formed());
        assert!(!id.matches_usb(0, 0x7523));
    }

    #[test]
    fn test_status_flags() {
        let mut status = ChannelStatus::default();
        assert!(!status.is_ready());
        assert!(!status.is_busy());

        status.state = ConnectionState::Ready;
        status.in_flight = 1;
        assert!(status.is_ready());
        assert!(status.is_busy());
    }

    #[test]
    fn test_status_serializes_for_observers() {
        let status = ChannelStatus {
            state: ConnectionState::Ready,
            queued: 2,
            in_flight: 4,
            connect_attempts: 0,
            port: Some("/dev/ttyUSB0".to_string()),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "ready");
        assert_eq!(json["in_flight"], 4);
        assert_eq!(json["port"], "/dev/ttyUSB0");
    }
}
