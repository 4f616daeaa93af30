//! Outbound command lines
//!
//! Raw caller input is normalized before it reaches the queue: everything
//! from the first `;` is a comment, surrounding whitespace is trimmed, and
//! lines that end up empty are dropped.

use plotlink_core::constants::{COMMAND_TERMINATOR, COMMENT_MARKER};
use plotlink_core::CommandError;
use std::fmt;

/// A single normalized command line
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command(String);

impl Command {
    /// Normalize a raw line
    ///
    /// Returns `Ok(None)` when nothing is left after comment removal and
    /// trimming. A line that still spans several lines after trimming is
    /// refused rather than split.
    pub fn parse(raw: &str) -> Result<Option<Self>, CommandError> {
        let code = match raw.find(COMMENT_MARKER) {
            Some(idx) => &raw[..idx],
            None => raw,
        };
        let code = code.trim();

        if code.is_empty() {
            return Ok(None);
        }

        if code.contains(['\n', '\r']) {
            return Err(CommandError::InvalidCommand {
                line: raw.to_string(),
                reason: "embedded line break".to_string(),
            });
        }

        Ok(Some(Self(code.to_string())))
    }

    /// The command text without terminator
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bytes as they go on the wire
    pub fn to_wire(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.0.len() + 1);
        bytes.extend_from_slice(self.0.as_bytes());
        bytes.push(COMMAND_TERMINATOR as u8);
        bytes
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Command {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize a batch of raw lines, keeping order and dropping empties
///
/// Fails as a whole if any line is invalid, so a batch is never half
/// enqueued.
pub fn parse_lines<I, S>(lines: I) -> Result<Vec<Command>, CommandError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut commands = Vec::new();
    for line in lines {
        if let Some(command) = Command::parse(line.as_ref())? {
            commands.push(command);
        }
    }
    Ok(commands)
}
