//! Protocol and timing defaults.

/// Maximum number of unacknowledged commands on the wire.
pub const DEFAULT_WINDOW_SIZE: usize = 4;

/// How long the open handshake may take before the attempt is abandoned.
pub const DEFAULT_SETUP_TIMEOUT_MS: u64 = 5_000;

/// Fixed pause between connection attempts.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;

/// How long a transmitted command may wait for its reply.
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 10_000;

/// Poll period used by `wait_until_idle`.
pub const DEFAULT_IDLE_POLL_INTERVAL_MS: u64 = 100;

/// Serial line speed used by the production backend.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Inbound line delimiter. Some firmware builds terminate with `\r\n`.
pub const DEFAULT_LINE_DELIMITER: &str = "\n";

/// Upper bound on a blocking port write.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 1_000;

/// Longest inbound line kept while waiting for a delimiter.
pub const DEFAULT_MAX_LINE_BYTES: usize = 4_096;

/// Pause after a link fault before the port is opened again.
///
/// Covers the reader thread's read poll so the old handle is released.
pub const DEFAULT_REOPEN_DELAY_MS: u64 = 100;

/// Capacity of the lifecycle event broadcast channel.
pub const DEFAULT_EVENT_BUFFER: usize = 100;

/// Terminator appended to every outbound command.
pub const COMMAND_TERMINATOR: char = '\n';

/// Everything from this character onward is a comment.
pub const COMMENT_MARKER: char = ';';
