//! Link discovery and the reconnection loop
//!
//! One attempt is: enumerate ports, pick the one matching the device
//! identity, open it, then wait for the first of `Opened`, `Error`,
//! `Closed`, or the setup timeout. [`ConnectionManager::connect`] repeats
//! attempts at a fixed delay until one succeeds; it never gives up.

use super::serial::{find_port, SerialPortInfo};
use super::{LinkBackend, LinkEvent, LinkSettings, OpenedLink};
use plotlink_core::constants::{DEFAULT_RETRY_DELAY_MS, DEFAULT_SETUP_TIMEOUT_MS};
use plotlink_core::{ChannelEvent, ConnectionError, DeviceIdentity, EventDispatcher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Timing and port parameters for connection attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Limit on the open handshake
    pub setup_timeout: Duration,
    /// Fixed pause between failed attempts
    pub retry_delay: Duration,
    /// Parameters applied when opening
    pub link: LinkSettings,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            setup_timeout: Duration::from_millis(DEFAULT_SETUP_TIMEOUT_MS),
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            link: LinkSettings::default(),
        }
    }
}

/// Finds and opens the device's port
#[derive(Clone)]
pub struct ConnectionManager {
    backend: Arc<dyn LinkBackend>,
    identity: DeviceIdentity,
    config: ConnectionConfig,
    events: EventDispatcher,
}

impl ConnectionManager {
    /// Create a manager for one device
    pub fn new(
        backend: Arc<dyn LinkBackend>,
        identity: DeviceIdentity,
        config: ConnectionConfig,
        events: EventDispatcher,
    ) -> Self {
        Self {
            backend,
            identity,
            config,
            events,
        }
    }

    /// Enumerate ports and pick the device's
    pub async fn find_port(&self) -> Result<SerialPortInfo, ConnectionError> {
        let ports = self.backend.list_ports().await?;
        find_port(&ports, &self.identity)
            .cloned()
            .ok_or_else(|| ConnectionError::DeviceNotFound {
                identity: self.identity.to_string(),
            })
    }

    /// Make a single connection attempt
    pub async fn try_connect(&self) -> Result<OpenedLink, ConnectionError> {
        let port = self.find_port().await?;
        tracing::debug!("Opening {} ({})", port.port_name, port.description);

        let link = self.backend.open(&port, &self.config.link).await?;
        self.await_open(link).await
    }

    /// Retry until the device is open
    ///
    /// `on_failure` sees every failed attempt with its 1-based number.
    pub async fn connect<F>(&self, mut on_failure: F) -> OpenedLink
    where
        F: FnMut(u32, &ConnectionError),
    {
        let mut attempt: u32 = 0;

        loop {
            match self.try_connect().await {
                Ok(link) => {
                    tracing::info!(
                        "Serial port {} initialized after {} failed attempt(s)",
                        link.port,
                        attempt
                    );
                    return link;
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    tracing::warn!("Connection attempt {} failed: {}", attempt, e);
                    self.events.publish(ChannelEvent::ConnectAttemptFailed {
                        attempt,
                        reason: e.to_string(),
                    });
                    on_failure(attempt, &e);
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    async fn await_open(&self, mut link: OpenedLink) -> Result<OpenedLink, ConnectionError> {
        let timeout = self.config.setup_timeout;

        match tokio::time::timeout(timeout, wait_for_open(&link.port, &mut link.events)).await {
            Ok(Ok(())) => Ok(link),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ConnectionError::SetupTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

async fn wait_for_open(
    port: &str,
    events: &mut mpsc::Receiver<LinkEvent>,
) -> Result<(), ConnectionError> {
    loop {
        match events.recv().await {
            Some(LinkEvent::Opened) => return Ok(()),
            Some(LinkEvent::Error(reason)) => {
                return Err(ConnectionError::SetupFailed {
                    port: port.to_string(),
                    reason,
                })
            }
            Some(LinkEvent::Closed) | None => {
                return Err(ConnectionError::SetupFailed {
                    port: port.to_string(),
                    reason: "port closed during setup".to_string(),
                })
            }
            Some(LinkEvent::Line(line)) => {
                tracing::debug!("Ignoring '{}' received before open", line);
            }
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("identity", &self.identity)
            .field("config", &self.config)
            .finish()
    }
}
