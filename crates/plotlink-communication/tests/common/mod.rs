//! Scripted in-memory link backend shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use plotlink_communication::{
    LinkBackend, LinkEvent, LinkSettings, LinkWriter, OpenedLink, SerialPortInfo,
};
use plotlink_core::{ConnectionError, DeviceIdentity};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const PORT: &str = "/dev/ttyUSB0";

pub fn identity() -> DeviceIdentity {
    DeviceIdentity::new("1a86", "7523")
}

/// How the next `open` call behaves
#[derive(Debug, Clone)]
pub enum OpenBehavior {
    /// Confirm the open immediately
    Confirm,
    /// Report an error instead of confirming
    ReportError(String),
    /// Close before confirming
    CloseDuringSetup,
    /// Never answer, so the setup timeout fires
    Silent,
    /// Refuse to open at all
    Refuse,
}

#[derive(Default)]
struct Script {
    device_present: bool,
    missing_scans: u32,
    list_calls: u32,
    opens: u32,
    open_plan: VecDeque<OpenBehavior>,
    device: Option<mpsc::Sender<LinkEvent>>,
    writes: Vec<String>,
    fail_writes: bool,
}

#[derive(Clone)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                device_present: true,
                ..Default::default()
            })),
        }
    }

    pub fn shared(&self) -> Arc<dyn LinkBackend> {
        Arc::new(self.clone())
    }

    /// The next `count` scans will not see the device
    pub fn fail_scans(&self, count: u32) {
        self.script.lock().missing_scans = count;
    }

    pub fn hide_device(&self) {
        self.script.lock().device_present = false;
    }

    pub fn show_device(&self) {
        self.script.lock().device_present = true;
    }

    pub fn plan_open(&self, behavior: OpenBehavior) {
        self.script.lock().open_plan.push_back(behavior);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.script.lock().fail_writes = fail;
    }

    pub fn list_calls(&self) -> u32 {
        self.script.lock().list_calls
    }

    pub fn opens(&self) -> u32 {
        self.script.lock().opens
    }

    /// Every write so far, terminator included
    pub fn writes(&self) -> Vec<String> {
        self.script.lock().writes.clone()
    }

    /// Device sends a line
    pub async fn reply(&self, line: &str) {
        self.emit(LinkEvent::Line(line.to_string())).await;
    }

    /// Device side closes the port
    pub async fn close_link(&self) {
        self.emit(LinkEvent::Closed).await;
    }

    /// Port reports an I/O error
    pub async fn link_error(&self, reason: &str) {
        self.emit(LinkEvent::Error(reason.to_string())).await;
    }

    async fn emit(&self, event: LinkEvent) {
        let device = self.script.lock().device.clone();
        if let Some(device) = device {
            let _ = device.send(event).await;
        }
        settle().await;
    }
}

struct ScriptedWriter {
    script: Arc<Mutex<Script>>,
}

impl LinkWriter for ScriptedWriter {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut script = self.script.lock();
        if script.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        script.writes.push(String::from_utf8_lossy(data).to_string());
        Ok(())
    }

    fn port_name(&self) -> &str {
        PORT
    }
}

#[async_trait]
impl LinkBackend for ScriptedBackend {
    async fn list_ports(&self) -> Result<Vec<SerialPortInfo>, ConnectionError> {
        let mut script = self.script.lock();
        script.list_calls += 1;

        let mut ports = vec![SerialPortInfo::new("/dev/ttyS0", "Serial Port")];
        if script.missing_scans > 0 {
            script.missing_scans -= 1;
        } else if script.device_present {
            ports.push(SerialPortInfo::new(PORT, "USB CH340").with_usb_ids(0x1a86, 0x7523));
        }
        Ok(ports)
    }

    async fn open(
        &self,
        port: &SerialPortInfo,
        _settings: &LinkSettings,
    ) -> Result<OpenedLink, ConnectionError> {
        let mut script = self.script.lock();
        script.opens += 1;

        let behavior = script
            .open_plan
            .pop_front()
            .unwrap_or(OpenBehavior::Confirm);
        let (tx, rx) = mpsc::channel(64);

        match behavior {
            OpenBehavior::Refuse => {
                return Err(ConnectionError::FailedToOpen {
                    port: port.port_name.clone(),
                    reason: "permission denied".to_string(),
                })
            }
            OpenBehavior::Confirm => tx.try_send(LinkEvent::Opened).unwrap(),
            OpenBehavior::ReportError(reason) => tx.try_send(LinkEvent::Error(reason)).unwrap(),
            OpenBehavior::CloseDuringSetup => tx.try_send(LinkEvent::Closed).unwrap(),
            OpenBehavior::Silent => {}
        }
        script.device = Some(tx);

        Ok(OpenedLink {
            port: port.port_name.clone(),
            writer: Box::new(ScriptedWriter {
                script: self.script.clone(),
            }),
            events: rx,
        })
    }
}

/// Let every spawned task run until it blocks
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
