//! Event system for the serial channel
//!
//! Provides:
//! - Event types for link lifecycle and inbound data
//! - Event dispatcher for publishing events to subscribers
//!
//! Events are observation-only. Flow control never depends on whether
//! anyone is listening.

use tokio::sync::broadcast;

/// Channel event types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Link opened and ready on the given port
    Ready(String),
    /// Inbound line, trimmed
    Data(String),
    /// Link reported an error
    Error(String),
    /// Link closed
    Closed,
    /// A connection attempt failed and will be retried
    ConnectAttemptFailed {
        /// Attempt number since the loop (re)started, 1-based.
        attempt: u32,
        /// Why the attempt failed.
        reason: String,
    },
    /// A command was rejected, timed out, or was flushed
    CommandFailed {
        /// The command text.
        command: String,
        /// Human-readable reason.
        reason: String,
    },
}

impl std::fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelEvent::Ready(port) => write!(f, "Ready on {}", port),
            ChannelEvent::Data(line) => write!(f, "Data: {}", line),
            ChannelEvent::Error(msg) => write!(f, "Error: {}", msg),
            ChannelEvent::Closed => write!(f, "Closed"),
            ChannelEvent::ConnectAttemptFailed { attempt, reason } => {
                write!(f, "Connection attempt {} failed: {}", attempt, reason)
            }
            ChannelEvent::CommandFailed { command, reason } => {
                write!(f, "Command '{}' failed: {}", command, reason)
            }
        }
    }
}

/// Event dispatcher for publishing events to subscribers
#[derive(Clone)]
pub struct EventDispatcher {
    /// Broadcast sender channel for channel events.
    tx: broadcast::Sender<ChannelEvent>,
}

impl EventDispatcher {
    /// Create a new event dispatcher
    ///
    /// # Arguments
    /// * `buffer_size` - Size of the broadcast buffer (default 100)
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size.max(1));
        Self { tx }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers
    ///
    /// Returns the number of subscribers that received it. Having no
    /// subscribers is not an error.
    pub fn publish(&self, event: ChannelEvent) -> usize {
        match self.tx.send(event) {
            Ok(count) => count,
            Err(broadcast::error::SendError(event)) => {
                tracing::trace!("No subscribers for event: {}", event);
                0
            }
        }
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_EVENT_BUFFER)
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let dispatcher = EventDispatcher::default();
        assert_eq!(dispatcher.publish(ChannelEvent::Closed), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let dispatcher = EventDispatcher::new(8);
        let mut rx = dispatcher.subscribe();
        assert_eq!(dispatcher.subscriber_count(), 1);

        dispatcher.publish(ChannelEvent::Data("ok".to_string()));
        dispatcher.publish(ChannelEvent::Closed);

        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::Data("ok".to_string()));
        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::Closed);
    }

    #[test]
    fn test_event_display() {
        let event = ChannelEvent::ConnectAttemptFailed {
            attempt: 3,
            reason: "Port not found".to_string(),
        };
        assert_eq!(event.to_string(), "Connection attempt 3 failed: Port not found");
        assert_eq!(
            ChannelEvent::Ready("/dev/ttyACM0".to_string()).to_string(),
            "Ready on /dev/ttyACM0"
        );
    }
}
