//! # Plotlink Core
//!
//! Core types shared by the Plotlink crates: device identity, connection
//! state, channel status snapshots, lifecycle events, and the error types
//! used at every layer.

pub mod constants;
pub mod core;
pub mod data;
pub mod error;

pub use self::core::event::{ChannelEvent, EventDispatcher};

pub use data::{ChannelStatus, ConnectionState, DeviceIdentity};

pub use error::{CommandError, ConnectionError, Error, Result};
