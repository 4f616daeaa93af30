//! Windowed command streaming with acknowledgment tracking
//!
//! Keeps at most `window_size` commands unacknowledged on the wire. Each
//! response line answers the oldest in-flight command, which frees a slot
//! for the next queued one.
//!
//! # Features
//! - FIFO command queue
//! - Fixed in-flight window
//! - Per-command deadlines
//! - Per-submission completion (one reply once every command of a batch
//!   is settled)
//! - Bulk failure for clear and link faults
//!
//! The controller performs no I/O of its own beyond writing through the
//! [`LinkWriter`] it is handed, and it is driven by a single owner.

use super::LinkWriter;
use crate::protocol::Command;
use plotlink_core::constants::{DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_WINDOW_SIZE};
use plotlink_core::{ChannelEvent, CommandError, EventDispatcher};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

/// Reply handle for a submission: number of acknowledged commands, or the
/// first failure among them.
pub type Completion = oneshot::Sender<Result<usize, CommandError>>;

/// Identifies one `submit` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubmissionId(Uuid);

impl SubmissionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sub({})", &self.0.to_string()[..8])
    }
}

/// Configuration for windowed streaming
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowConfig {
    /// Maximum number of unacknowledged commands
    pub window_size: usize,
    /// How long a transmitted command may wait for its reply
    pub command_timeout: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
        }
    }
}

#[derive(Debug)]
struct QueuedCommand {
    command: Command,
    submission: SubmissionId,
}

#[derive(Debug)]
struct InFlightCommand {
    command: Command,
    submission: SubmissionId,
    deadline: Instant,
}

#[derive(Debug)]
struct Submission {
    remaining: usize,
    acknowledged: usize,
    first_error: Option<CommandError>,
    reply: Option<Completion>,
}

/// Queue plus in-flight window
pub struct FlowController {
    config: FlowConfig,
    queue: VecDeque<QueuedCommand>,
    in_flight: VecDeque<InFlightCommand>,
    submissions: HashMap<SubmissionId, Submission>,
    events: EventDispatcher,
}

impl FlowController {
    /// Create a new controller; a zero window is raised to one
    pub fn new(config: FlowConfig, events: EventDispatcher) -> Self {
        let config = FlowConfig {
            window_size: config.window_size.max(1),
            ..config
        };
        Self {
            config,
            queue: VecDeque::new(),
            in_flight: VecDeque::new(),
            submissions: HashMap::new(),
            events,
        }
    }

    /// Queue a batch of commands under one completion
    ///
    /// An empty batch is answered immediately.
    pub fn enqueue(&mut self, commands: Vec<Command>, reply: Completion) -> Option<SubmissionId> {
        if commands.is_empty() {
            let _ = reply.send(Ok(0));
            return None;
        }

        let id = SubmissionId::new();
        tracing::debug!("{} queued {} command(s)", id, commands.len());

        self.submissions.insert(
            id,
            Submission {
                remaining: commands.len(),
                acknowledged: 0,
                first_error: None,
                reply: Some(reply),
            },
        );
        self.queue.extend(commands.into_iter().map(|command| QueuedCommand {
            command,
            submission: id,
        }));
        Some(id)
    }

    /// Move queued commands onto the wire while the window has room
    ///
    /// Returns how many were transmitted. On a write failure the command
    /// goes back to the head of the queue and the error is returned; the
    /// caller treats it as a link fault.
    pub fn drain(&mut self, writer: &mut dyn LinkWriter) -> io::Result<usize> {
        let mut sent = 0;

        while self.window_available() > 0 {
            let Some(next) = self.queue.pop_front() else {
                break;
            };

            if let Err(e) = writer.write_all(&next.command.to_wire()) {
                tracing::error!("Failed to send command '{}': {}", next.command, e);
                self.queue.push_front(next);
                return Err(e);
            }

            tracing::debug!("-> {}", next.command);
            self.in_flight.push_back(InFlightCommand {
                command: next.command,
                submission: next.submission,
                deadline: Instant::now() + self.config.command_timeout,
            });
            sent += 1;
        }

        Ok(sent)
    }

    /// Resolve the oldest in-flight command as acknowledged
    ///
    /// Returns false if nothing was in flight.
    pub fn handle_acknowledgment(&mut self) -> bool {
        match self.in_flight.pop_front() {
            Some(done) => {
                self.settle(done.submission, Ok(()));
                true
            }
            None => false,
        }
    }

    /// Fail the oldest in-flight command with the device's error line
    ///
    /// Returns false if nothing was in flight.
    pub fn handle_error(&mut self, response: &str) -> bool {
        match self.in_flight.pop_front() {
            Some(failed) => {
                let err = CommandError::Protocol {
                    command: failed.command.to_string(),
                    response: response.to_string(),
                };
                self.settle(failed.submission, Err(err));
                true
            }
            None => false,
        }
    }

    /// Fail every in-flight command whose deadline has passed
    ///
    /// Expired commands are removed wherever they sit in the window.
    pub fn expire(&mut self, now: Instant) -> usize {
        let timeout_ms = self.config.command_timeout.as_millis() as u64;
        let mut expired = Vec::new();

        self.in_flight.retain(|cmd| {
            if cmd.deadline <= now {
                expired.push((cmd.command.to_string(), cmd.submission));
                false
            } else {
                true
            }
        });

        let count = expired.len();
        for (command, submission) in expired {
            tracing::warn!("Command '{}' timed out after {}ms", command, timeout_ms);
            self.settle(
                submission,
                Err(CommandError::Timeout {
                    command,
                    timeout_ms,
                }),
            );
        }
        count
    }

    /// Earliest in-flight deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.in_flight.iter().map(|cmd| cmd.deadline).min()
    }

    /// Drop everything, failing each command with `Cleared`
    ///
    /// Returns how many commands were discarded.
    pub fn clear_queue(&mut self) -> usize {
        self.fail_all(|command| CommandError::Cleared {
            command: command.to_string(),
        })
    }

    /// Drop everything after the link failed
    pub fn fail_link(&mut self, reason: &str) -> usize {
        self.fail_all(|command| CommandError::LinkFault {
            command: command.to_string(),
            reason: reason.to_string(),
        })
    }

    /// Drop everything, failing each command with the error built for it
    pub fn fail_all<F>(&mut self, make_error: F) -> usize
    where
        F: Fn(&Command) -> CommandError,
    {
        let in_flight = std::mem::take(&mut self.in_flight);
        let queue = std::mem::take(&mut self.queue);
        let count = in_flight.len() + queue.len();

        let pending = in_flight
            .into_iter()
            .map(|c| (c.command, c.submission))
            .chain(queue.into_iter().map(|c| (c.command, c.submission)));

        for (command, submission) in pending {
            self.settle(submission, Err(make_error(&command)));
        }

        count
    }

    /// Get the number of queued commands
    pub fn queued_commands_count(&self) -> usize {
        self.queue.len()
    }

    /// Get the number of in-flight commands
    pub fn active_commands_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Free window slots
    pub fn window_available(&self) -> usize {
        self.config.window_size.saturating_sub(self.in_flight.len())
    }

    /// Queued or in-flight commands remain
    pub fn is_busy(&self) -> bool {
        !self.queue.is_empty() || !self.in_flight.is_empty()
    }

    fn settle(&mut self, id: SubmissionId, outcome: Result<(), CommandError>) {
        let Some(submission) = self.submissions.get_mut(&id) else {
            tracing::warn!("{} settled after completion", id);
            return;
        };

        submission.remaining = submission.remaining.saturating_sub(1);
        match outcome {
            Ok(()) => submission.acknowledged += 1,
            Err(err) => {
                self.events.publish(ChannelEvent::CommandFailed {
                    command: err.command().unwrap_or_default().to_string(),
                    reason: err.to_string(),
                });
                submission.first_error.get_or_insert(err);
            }
        }

        if submission.remaining > 0 {
            return;
        }

        if let Some(done) = self.submissions.remove(&id) {
            let result = match done.first_error {
                Some(err) => Err(err),
                None => Ok(done.acknowledged),
            };
            if let Some(reply) = done.reply {
                if reply.send(result).is_err() {
                    tracing::debug!("{} completed but the caller went away", id);
                }
            }
        }
    }
}

impl fmt::Debug for FlowController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowController")
            .field("config", &self.config)
            .field("queued", &self.queue.len())
            .field("in_flight", &self.in_flight.len())
            .field("submissions", &self.submissions.len())
            .finish()
    }
}
