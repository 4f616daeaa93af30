//! Error handling for Plotlink
//!
//! Errors are split by layer:
//! - Connection errors (discovery, open handshake, link faults)
//! - Command errors (delivered to the caller that submitted a command)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Connection error type
///
/// Raised while discovering, opening, or supervising the serial link.
/// Most of these are absorbed by the reconnection loop and only show up
/// in logs and lifecycle events.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// No enumerated port matches the configured identity
    #[error("No serial port matches device {identity}")]
    DeviceNotFound {
        /// The identity that was searched for, as `vid:pid`.
        identity: String,
    },

    /// The port did not confirm the open in time
    #[error("Port setup timed out after {timeout_ms}ms")]
    SetupTimeout {
        /// The setup timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The port reported an error or closed during the open handshake
    #[error("Port setup failed on {port}: {reason}")]
    SetupFailed {
        /// The port path.
        port: String,
        /// What the port reported.
        reason: String,
    },

    /// The operating system refused to open the port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The port path.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Port enumeration itself failed
    #[error("Failed to enumerate serial ports: {reason}")]
    Enumeration {
        /// The reason enumeration failed.
        reason: String,
    },

    /// `initialize` was called while a connection loop is running
    #[error("Connection already in progress")]
    AlreadyConnecting,

    /// `initialize` was called on a channel that is already ready
    #[error("Channel already connected")]
    AlreadyConnected,

    /// The channel task is gone
    #[error("Command channel has shut down")]
    ChannelClosed,
}

/// Command error type
///
/// Delivered to the caller that submitted the command. Cloneable because
/// a single link fault fans out to every pending command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Submission attempted while the link is not ready
    #[error("Serial link not ready")]
    NotReady,

    /// The device answered with an error line
    #[error("Device rejected '{command}': {response}")]
    Protocol {
        /// The command that was rejected.
        command: String,
        /// The raw response line.
        response: String,
    },

    /// No reply arrived before the deadline
    #[error("Command '{command}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The command that timed out.
        command: String,
        /// The per-command timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The queue was cleared before the command completed
    #[error("Command '{command}' was cleared before completion")]
    Cleared {
        /// The command that was cleared.
        command: String,
    },

    /// The link failed while the command was queued or in flight
    #[error("Link fault while '{command}' was pending: {reason}")]
    LinkFault {
        /// The command that was pending.
        command: String,
        /// What the link reported.
        reason: String,
    },

    /// A submitted line cannot be sent as a single command
    #[error("Invalid command {line:?}: {reason}")]
    InvalidCommand {
        /// The offending raw line.
        line: String,
        /// Why the line was refused.
        reason: String,
    },

    /// The channel task is gone
    #[error("Command channel has shut down")]
    ChannelClosed,
}

impl CommandError {
    /// The command text this error refers to, if any
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::Protocol { command, .. }
            | Self::Timeout { command, .. }
            | Self::Cleared { command }
            | Self::LinkFault { command, .. } => Some(command),
            Self::InvalidCommand { line, .. } => Some(line),
            Self::NotReady | Self::ChannelClosed => None,
        }
    }
}

/// Main error type for Plotlink
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Command error
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Command(CommandError::Timeout { .. })
                | Error::Connection(ConnectionError::SetupTimeout { .. })
        )
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a command error
    pub fn is_command_error(&self) -> bool {
        matches!(self, Error::Command(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
