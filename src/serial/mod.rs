pub mod interface;
pub mod mock;
pub mod protocol;
pub mod session;

pub use interface::{SerialLink, SystemPorts};
pub use protocol::{decode_frame, FrameError, ReadOutcome, Weight};
pub use session::{ScaleSession, SessionMetrics};

use std::time::Duration;

use async_trait::async_trait;

/// Line speed of the scale (no parity, 8 data bits, 1 stop bit).
pub const BAUD_RATE: u32 = 9600;

/// Command frame asking the scale for the current weight.
pub const READ_WEIGHT_COMMAND: [u8; 2] = [0x05, 0x12];

/// How long a read waits for the scale to answer.
pub const READ_TIMEOUT: Duration = Duration::from_millis(300);

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Port enumeration failed: {0}")]
    PortEnumeration(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;

/// Byte-level access to one open serial connection.
#[async_trait]
pub trait SerialPortIO: Send {
    /// Write the whole buffer and flush it to the device.
    async fn send_data(&mut self, data: &[u8]) -> Result<()>;

    /// Drain every byte currently buffered by the OS. Returns an empty
    /// vector when nothing has arrived.
    async fn read_available(&mut self) -> Result<Vec<u8>>;
}

/// Opens connections and lists the ports visible to the OS.
pub trait PortConnector: Send + Sync {
    fn open(&self, port_name: &str) -> Result<Box<dyn SerialPortIO>>;

    fn available_ports(&self) -> Result<Vec<String>>;
}
