//! Supervised command channel
//!
//! [`CommandChannel`] is a cheap, cloneable handle. All state (connection
//! state, the open link, the queue, and the in-flight window) lives in one
//! task that processes requests, link events, dial reports, and command
//! deadlines one at a time.
//!
//! State machine:
//!
//! ```text
//! Disconnected --initialize--> Connecting --link opened--> Ready
//!      Ready --error/close/write failure--> Faulting --> Connecting
//! ```
//!
//! Entering `Faulting` fails every queued and in-flight command with
//! `LinkFault`; callers only ever see readiness flap and their commands
//! fail.

use super::buffered::{Completion, FlowConfig, FlowController};
use super::connection::{ConnectionConfig, ConnectionManager};
use super::{LinkBackend, LinkEvent, LinkSettings, LinkWriter, OpenedLink};
use crate::protocol::{parse_lines, ClassifierConfig, Command, ResponseKind, ResponseParser};
use plotlink_core::constants::{
    DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_EVENT_BUFFER, DEFAULT_IDLE_POLL_INTERVAL_MS,
    DEFAULT_RETRY_DELAY_MS, DEFAULT_SETUP_TIMEOUT_MS, DEFAULT_WINDOW_SIZE,
};
use plotlink_core::{
    ChannelEvent, ChannelStatus, CommandError, ConnectionError, ConnectionState, DeviceIdentity,
    EventDispatcher,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

const REQUEST_BUFFER: usize = 64;

/// Everything the channel needs to know
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Maximum number of unacknowledged commands
    pub window_size: usize,
    /// How long a transmitted command may wait for its reply
    pub command_timeout: Duration,
    /// Limit on the open handshake
    pub setup_timeout: Duration,
    /// Fixed pause between connection attempts
    pub retry_delay: Duration,
    /// Poll period for `wait_until_idle`
    pub idle_poll_interval: Duration,
    /// Port parameters
    pub link: LinkSettings,
    /// Response classification
    pub classifier: ClassifierConfig,
    /// Capacity of the event broadcast channel
    pub event_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
            setup_timeout: Duration::from_millis(DEFAULT_SETUP_TIMEOUT_MS),
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            idle_poll_interval: Duration::from_millis(DEFAULT_IDLE_POLL_INTERVAL_MS),
            link: LinkSettings::default(),
            classifier: ClassifierConfig::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl ChannelConfig {
    fn flow(&self) -> FlowConfig {
        FlowConfig {
            window_size: self.window_size,
            command_timeout: self.command_timeout,
        }
    }

    fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            setup_timeout: self.setup_timeout,
            retry_delay: self.retry_delay,
            link: self.link.clone(),
        }
    }
}

enum Request {
    Initialize {
        identity: DeviceIdentity,
        reply: oneshot::Sender<Result<(), ConnectionError>>,
    },
    Submit {
        commands: Vec<Command>,
        reply: Completion,
    },
    Clear {
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

enum DialReport {
    AttemptFailed(u32),
    Connected(OpenedLink),
}

/// Handle to a running command channel
#[derive(Clone)]
pub struct CommandChannel {
    requests: mpsc::Sender<Request>,
    status: watch::Receiver<ChannelStatus>,
    events: EventDispatcher,
    idle_poll_interval: Duration,
    window_size: usize,
}

/// A submission the channel has accepted but not yet settled
#[derive(Debug)]
pub struct PendingSubmission {
    outcome: oneshot::Receiver<Result<usize, CommandError>>,
}

impl PendingSubmission {
    /// Wait until every command of the submission is settled
    pub async fn wait(self) -> Result<usize, CommandError> {
        self.outcome
            .await
            .map_err(|_| CommandError::ChannelClosed)?
    }
}

impl CommandChannel {
    /// Start the channel task
    ///
    /// Must be called from within a tokio runtime. The channel stays
    /// `Disconnected` until [`initialize`](Self::initialize) is called.
    pub fn spawn(backend: Arc<dyn LinkBackend>, config: ChannelConfig) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_BUFFER);
        let (status_tx, status_rx) = watch::channel(ChannelStatus::default());
        let (dial_tx, dial_rx) = mpsc::unbounded_channel();
        let events = EventDispatcher::new(config.event_buffer);
        let idle_poll_interval = config.idle_poll_interval;
        let window_size = config.window_size.max(1);

        let task = ChannelTask {
            flow: FlowController::new(config.flow(), events.clone()),
            parser: ResponseParser::with_config(&config.classifier),
            backend,
            config,
            events: events.clone(),
            status: status_tx,
            state: ConnectionState::Disconnected,
            identity: None,
            writer: None,
            link_events: None,
            port: None,
            connect_attempts: 0,
            dial: None,
            dial_tx,
            dial_rx,
            pending_init: Vec::new(),
        };
        tokio::spawn(task.run(requests_rx));

        Self {
            requests: requests_tx,
            status: status_rx,
            events,
            idle_poll_interval,
            window_size,
        }
    }

    /// Connect to the device and wait until the link is ready
    ///
    /// Retries forever; only returns an error for misuse (a second call
    /// while connecting or connected) or if the channel has shut down.
    pub async fn initialize(&self, identity: DeviceIdentity) -> Result<(), ConnectionError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Initialize { identity, reply })
            .await
            .map_err(|_| ConnectionError::ChannelClosed)?;
        rx.await.map_err(|_| ConnectionError::ChannelClosed)?
    }

    /// Queue lines and wait until every one of them is settled
    ///
    /// Comments and whitespace are stripped and empty lines dropped.
    /// Returns how many commands were acknowledged, or the first failure.
    pub async fn submit<I, S>(&self, lines: I) -> Result<usize, CommandError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.enqueue(lines).await?.wait().await
    }

    /// Queue lines without waiting for them to settle
    ///
    /// Returns once the channel has taken the submission. Submissions are
    /// transmitted in the order they are enqueued.
    pub async fn enqueue<I, S>(&self, lines: I) -> Result<PendingSubmission, CommandError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !self.is_ready() {
            return Err(CommandError::NotReady);
        }
        let commands = parse_lines(lines)?;

        let (reply, outcome) = oneshot::channel();
        self.requests
            .send(Request::Submit { commands, reply })
            .await
            .map_err(|_| CommandError::ChannelClosed)?;
        Ok(PendingSubmission { outcome })
    }

    /// Queue a single line and wait for it to settle
    pub async fn submit_one(&self, line: &str) -> Result<(), CommandError> {
        self.submit([line]).await.map(|_| ())
    }

    /// Fail every queued and in-flight command with `Cleared`
    ///
    /// The link stays open. Returns how many commands were discarded.
    pub async fn clear(&self) -> Result<usize, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Clear { reply })
            .await
            .map_err(|_| CommandError::ChannelClosed)?;
        rx.await.map_err(|_| CommandError::ChannelClosed)
    }

    /// Poll until no command is queued or in flight
    pub async fn wait_until_idle(&self) {
        let period = self.idle_poll_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if !self.is_busy() {
                return;
            }
        }
    }

    /// Wait for the link to become ready
    pub async fn wait_until_ready(&self) -> Result<(), ConnectionError> {
        let mut status = self.status.clone();
        status
            .wait_for(|s| s.is_ready())
            .await
            .map(|_| ())
            .map_err(|_| ConnectionError::ChannelClosed)
    }

    /// Maximum number of unacknowledged commands
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Link open and accepting commands
    pub fn is_ready(&self) -> bool {
        self.status.borrow().is_ready()
    }

    /// Queued or in-flight commands remain
    pub fn is_busy(&self) -> bool {
        self.status.borrow().is_busy()
    }

    /// Current status snapshot
    pub fn status(&self) -> ChannelStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to lifecycle and data events
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// Stop the channel task
    ///
    /// Pending commands fail with `ChannelClosed`.
    pub async fn shutdown(&self) {
        let _ = self.requests.send(Request::Shutdown).await;
    }
}

impl std::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("status", &*self.status.borrow())
            .finish()
    }
}

struct ChannelTask {
    backend: Arc<dyn LinkBackend>,
    config: ChannelConfig,
    events: EventDispatcher,
    status: watch::Sender<ChannelStatus>,
    state: ConnectionState,
    identity: Option<DeviceIdentity>,
    writer: Option<Box<dyn LinkWriter>>,
    link_events: Option<mpsc::Receiver<LinkEvent>>,
    port: Option<String>,
    connect_attempts: u32,
    flow: FlowController,
    parser: ResponseParser,
    dial: Option<JoinHandle<()>>,
    dial_tx: mpsc::UnboundedSender<DialReport>,
    dial_rx: mpsc::UnboundedReceiver<DialReport>,
    pending_init: Vec<oneshot::Sender<Result<(), ConnectionError>>>,
}

impl ChannelTask {
    async fn run(mut self, mut requests: mpsc::Receiver<Request>) {
        loop {
            let deadline = self.flow.next_deadline();

            tokio::select! {
                request = requests.recv() => match request {
                    Some(Request::Shutdown) | None => break,
                    Some(request) => self.handle_request(request),
                },
                Some(report) = self.dial_rx.recv() => self.handle_dial(report),
                event = next_link_event(&mut self.link_events) => self.handle_link_event(event),
                _ = sleep_until(deadline) => self.handle_deadlines(),
            }

            self.publish_status();
        }

        self.stop();
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Initialize { identity, reply } => match self.state {
                ConnectionState::Disconnected => {
                    tracing::info!("Initializing serial link for device {}", identity);
                    if !identity.is_well_formed() {
                        tracing::warn!(
                            "Device id {} is not hexadecimal; no USB port can match it",
                            identity
                        );
                    }
                    self.identity = Some(identity);
                    self.pending_init.push(reply);
                    self.start_dialing(Duration::ZERO);
                }
                ConnectionState::Connecting | ConnectionState::Faulting => {
                    let _ = reply.send(Err(ConnectionError::AlreadyConnecting));
                }
                ConnectionState::Ready => {
                    let _ = reply.send(Err(ConnectionError::AlreadyConnected));
                }
            },
            Request::Submit { commands, reply } => {
                if !self.state.is_ready() {
                    let _ = reply.send(Err(CommandError::NotReady));
                    return;
                }
                self.flow.enqueue(commands, reply);
                self.pump();
            }
            Request::Clear { reply } => {
                let cleared = self.flow.clear_queue();
                if cleared > 0 {
                    tracing::info!("Cleared {} pending command(s)", cleared);
                }
                self.publish_status();
                let _ = reply.send(cleared);
            }
            Request::Shutdown => {}
        }
    }

    fn handle_dial(&mut self, report: DialReport) {
        match report {
            DialReport::AttemptFailed(attempt) => self.connect_attempts = attempt,
            DialReport::Connected(link) => {
                let OpenedLink {
                    port,
                    writer,
                    events,
                } = link;

                self.dial = None;
                self.writer = Some(writer);
                self.link_events = Some(events);
                self.port = Some(port.clone());
                self.connect_attempts = 0;
                self.state = ConnectionState::Ready;
                self.publish_status();

                tracing::info!("Serial link ready on {}", port);
                self.events.publish(ChannelEvent::Ready(port));

                for reply in self.pending_init.drain(..) {
                    let _ = reply.send(Ok(()));
                }
                self.pump();
            }
        }
    }

    fn handle_link_event(&mut self, event: Option<LinkEvent>) {
        match event {
            Some(LinkEvent::Line(raw)) => {
                let line = raw.trim();
                if line.is_empty() {
                    return;
                }
                tracing::debug!("<- {}", line);
                self.events.publish(ChannelEvent::Data(line.to_string()));

                let kind = self.parser.parse(line);
                if !kind.consumes_command() {
                    return;
                }
                let matched = match kind {
                    ResponseKind::Acknowledgement => self.flow.handle_acknowledgment(),
                    ResponseKind::Error => self.flow.handle_error(line),
                    ResponseKind::Informational => false,
                };
                if !matched {
                    tracing::warn!("Dropping '{}' ({}): nothing in flight", line, kind);
                }
                self.pump();
            }
            Some(LinkEvent::Error(reason)) => {
                self.events.publish(ChannelEvent::Error(reason.clone()));
                self.fault(&reason);
            }
            Some(LinkEvent::Closed) | None => {
                self.events.publish(ChannelEvent::Closed);
                self.fault("port closed");
            }
            Some(LinkEvent::Opened) => tracing::debug!("Duplicate open confirmation ignored"),
        }
    }

    fn handle_deadlines(&mut self) {
        if self.flow.expire(Instant::now()) > 0 {
            self.pump();
        }
    }

    /// Transmit whatever the window allows
    fn pump(&mut self) {
        if !self.state.is_ready() {
            return;
        }
        let Some(writer) = self.writer.as_mut() else {
            return;
        };

        if let Err(e) = self.flow.drain(&mut **writer) {
            let reason = format!("write failed on {}: {}", writer.port_name(), e);
            self.events.publish(ChannelEvent::Error(reason.clone()));
            self.fault(&reason);
        }
    }

    fn fault(&mut self, reason: &str) {
        tracing::error!("Serial link fault: {}", reason);
        self.state = ConnectionState::Faulting;
        self.writer = None;
        self.link_events = None;
        self.port = None;
        self.publish_status();

        let failed = self.flow.fail_link(reason);
        if failed > 0 {
            tracing::warn!("Failed {} pending command(s) after link fault", failed);
        }

        // The dropped link's reader may still hold the port briefly
        self.start_dialing(Duration::from_millis(self.config.link.reopen_delay_ms));
    }

    fn start_dialing(&mut self, delay: Duration) {
        let Some(identity) = self.identity.clone() else {
            return;
        };

        self.state = ConnectionState::Connecting;
        self.connect_attempts = 0;
        self.publish_status();

        let manager = ConnectionManager::new(
            self.backend.clone(),
            identity,
            self.config.connection(),
            self.events.clone(),
        );
        let reports = self.dial_tx.clone();

        if let Some(previous) = self.dial.take() {
            previous.abort();
        }
        self.dial = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let link = manager
                .connect(|attempt, _| {
                    let _ = reports.send(DialReport::AttemptFailed(attempt));
                })
                .await;
            let _ = reports.send(DialReport::Connected(link));
        }));
    }

    fn publish_status(&self) {
        self.status.send_replace(ChannelStatus {
            state: self.state,
            queued: self.flow.queued_commands_count(),
            in_flight: self.flow.active_commands_count(),
            connect_attempts: self.connect_attempts,
            port: self.port.clone(),
        });
    }

    fn stop(&mut self) {
        tracing::info!("Command channel shutting down");
        if let Some(dial) = self.dial.take() {
            dial.abort();
        }
        self.flow.fail_all(|_| CommandError::ChannelClosed);
        for reply in self.pending_init.drain(..) {
            let _ = reply.send(Err(ConnectionError::ChannelClosed));
        }
        self.writer = None;
        self.link_events = None;
        self.port = None;
        self.state = ConnectionState::Disconnected;
        self.publish_status();
    }
}

async fn next_link_event(events: &mut Option<mpsc::Receiver<LinkEvent>>) -> Option<LinkEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
