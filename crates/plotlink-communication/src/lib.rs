//! # Plotlink Communication
//!
//! Serial link supervision and flow-controlled command streaming.
//!
//! - [`communication::serial`]: port enumeration and the `serialport` backend
//! - [`communication::connection`]: discovery and the reconnection loop
//! - [`communication::buffered`]: queue, in-flight window, and deadlines
//! - [`communication::channel`]: the single-owner task and its handle
//! - [`protocol`]: command normalization and response classification

pub mod communication;
pub mod protocol;

pub use communication::{
    buffered::{FlowConfig, FlowController, SubmissionId},
    channel::{ChannelConfig, CommandChannel, PendingSubmission},
    connection::{ConnectionConfig, ConnectionManager},
    serial::{find_port, list_ports, LineSplitter, SerialBackend, SerialPortInfo},
    LinkBackend, LinkEvent, LinkSettings, LinkWriter, OpenedLink,
};

pub use protocol::{
    classify, parse_lines, ClassifierConfig, Command, ResponseKind, ResponseParser, TieBreak,
};
