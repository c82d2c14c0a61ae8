//! In-memory scale ports for tests and the CLI `--simulate` mode.
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::protocol::{Weight, RESPONSE_LEN, STX};
use super::{PortConnector, Result, SerialError, SerialPortIO, READ_WEIGHT_COMMAND};

/// How a mock port reacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    /// Answers every read command with a valid frame for this weight.
    Scale(Weight),
    /// Answers every read command with these raw bytes.
    Raw(Vec<u8>),
    /// Answers with a valid frame that arrives one byte per poll, like a
    /// native UART at line speed.
    Trickle(Weight),
    /// Accepts commands but never answers.
    Silent,
    /// Opens, but every write fails.
    BrokenWrite,
    /// Cannot be opened; writes on links that are already open fail.
    Unplugged,
}

#[derive(Debug)]
struct MockPort {
    behavior: MockBehavior,
    opens: usize,
    open_handles: usize,
    commands: Vec<Vec<u8>>,
    unsolicited: Vec<u8>,
    read_error: Option<String>,
}

#[derive(Debug, Default)]
struct MockBus {
    ports: BTreeMap<String, MockPort>,
    enumeration_error: Option<String>,
}

/// Scripted [`PortConnector`] whose ports live in memory.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    bus: Arc<Mutex<MockBus>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(self, port_name: &str, behavior: MockBehavior) -> Self {
        self.set_behavior(port_name, behavior);
        self
    }

    /// Add a port or change how an existing one behaves.
    pub fn set_behavior(&self, port_name: &str, behavior: MockBehavior) {
        let mut bus = self.bus();
        match bus.ports.get_mut(port_name) {
            Some(port) => port.behavior = behavior,
            None => {
                bus.ports.insert(
                    port_name.to_string(),
                    MockPort {
                        behavior,
                        opens: 0,
                        open_handles: 0,
                        commands: Vec::new(),
                        unsolicited: Vec::new(),
                        read_error: None,
                    },
                );
            }
        }
    }

    /// Bytes the device sends on its own; the open link receives them on
    /// its next poll.
    pub fn push_unsolicited(&self, port_name: &str, bytes: &[u8]) {
        if let Some(port) = self.bus().ports.get_mut(port_name) {
            port.unsolicited.extend_from_slice(bytes);
        }
    }

    /// Make the next receive on `port_name` fail with an I/O error.
    pub fn fail_next_read(&self, port_name: &str, message: &str) {
        if let Some(port) = self.bus().ports.get_mut(port_name) {
            port.read_error = Some(message.to_string());
        }
    }

    pub fn fail_enumeration(&self, message: &str) {
        self.bus().enumeration_error = Some(message.to_string());
    }

    /// Number of successful opens of `port_name`.
    pub fn open_count(&self, port_name: &str) -> usize {
        self.bus().ports.get(port_name).map_or(0, |p| p.opens)
    }

    /// Links to `port_name` that have not been dropped yet.
    pub fn open_handles(&self, port_name: &str) -> usize {
        self.bus().ports.get(port_name).map_or(0, |p| p.open_handles)
    }

    pub fn total_open_handles(&self) -> usize {
        self.bus().ports.values().map(|p| p.open_handles).sum()
    }

    /// Every command written to `port_name`, oldest first.
    pub fn commands(&self, port_name: &str) -> Vec<Vec<u8>> {
        self.bus()
            .ports
            .get(port_name)
            .map(|p| p.commands.clone())
            .unwrap_or_default()
    }

    fn bus(&self) -> MutexGuard<'_, MockBus> {
        self.bus.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PortConnector for MockConnector {
    fn open(&self, port_name: &str) -> Result<Box<dyn SerialPortIO>> {
        let mut bus = self.bus();
        let port = bus
            .ports
            .get_mut(port_name)
            .ok_or_else(|| SerialError::ConnectionFailed(format!("{}: no such port", port_name)))?;
        if port.behavior == MockBehavior::Unplugged {
            return Err(SerialError::ConnectionFailed(format!("{}: device not present", port_name)));
        }
        port.opens += 1;
        port.open_handles += 1;

        Ok(Box::new(MockLink {
            port_name: port_name.to_string(),
            bus: self.bus.clone(),
            inbox: VecDeque::new(),
        }))
    }

    fn available_ports(&self) -> Result<Vec<String>> {
        let bus = self.bus();
        if let Some(message) = &bus.enumeration_error {
            return Err(SerialError::PortEnumeration(message.clone()));
        }
        Ok(bus.ports.keys().cloned().collect())
    }
}

struct MockLink {
    port_name: String,
    bus: Arc<Mutex<MockBus>>,
    /// Replies, one chunk per poll.
    inbox: VecDeque<Vec<u8>>,
}

#[async_trait]
impl SerialPortIO for MockLink {
    async fn send_data(&mut self, data: &[u8]) -> Result<()> {
        let mut bus = self.bus.lock().unwrap_or_else(|e| e.into_inner());
        let port = bus
            .ports
            .get_mut(&self.port_name)
            .ok_or(SerialError::NotConnected)?;

        match &port.behavior {
            MockBehavior::BrokenWrite | MockBehavior::Unplugged => {
                return Err(SerialError::WriteFailed(format!(
                    "{}: device disconnected",
                    self.port_name
                )));
            }
            MockBehavior::Scale(weight) if data == READ_WEIGHT_COMMAND => {
                self.inbox.push_back(response_frame(*weight).to_vec());
            }
            MockBehavior::Raw(bytes) if data == READ_WEIGHT_COMMAND => {
                self.inbox.push_back(bytes.clone());
            }
            MockBehavior::Trickle(weight) if data == READ_WEIGHT_COMMAND => {
                self.inbox
                    .extend(response_frame(*weight).iter().map(|b| vec![*b]));
            }
            _ => {}
        }
        port.commands.push(data.to_vec());
        Ok(())
    }

    async fn read_available(&mut self) -> Result<Vec<u8>> {
        let mut bus = self.bus.lock().unwrap_or_else(|e| e.into_inner());
        let port = bus
            .ports
            .get_mut(&self.port_name)
            .ok_or(SerialError::NotConnected)?;

        if let Some(message) = port.read_error.take() {
            return Err(SerialError::IoError(io::Error::new(io::ErrorKind::Other, message)));
        }
        match self.inbox.pop_front() {
            Some(chunk) => Ok(chunk),
            None => Ok(std::mem::take(&mut port.unsolicited)),
        }
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        let mut bus = self.bus.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(port) = bus.ports.get_mut(&self.port_name) {
            port.open_handles = port.open_handles.saturating_sub(1);
        }
    }
}

/// Build the frame a scale sends for `weight`. Weights outside
/// 0.00..=999.99 are clamped to the five-digit field.
pub fn response_frame(weight: Weight) -> [u8; RESPONSE_LEN] {
    let hundredths = weight.hundredths().clamp(0, 99_999);
    let digits = format!("{:05}", hundredths);
    let mut frame = [STX, 0x20, 0, 0, 0, 0, 0, 0x0D, 0x0A];
    frame[2..7].copy_from_slice(digits.as_bytes());
    frame
}
