use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use async_trait::async_trait;
use serialport::{DataBits, Parity, SerialPort, StopBits};

use super::{PortConnector, Result, SerialError, SerialPortIO, BAUD_RATE};

/// Blocking timeout of the underlying handle. Reads only happen once
/// bytes are known to be buffered, so this rarely comes into play.
const PORT_TIMEOUT: Duration = Duration::from_millis(50);

/// An open OS serial port configured for the scale.
pub struct SerialLink {
    port_name: String,
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    /// Open `port_name` at 9600 baud, no parity, 8 data bits
    pub fn open(port_name: &str) -> Result<Self> {
        let port = serialport::new(port_name, BAUD_RATE)
            .parity(Parity::None)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .timeout(PORT_TIMEOUT)
            .open()
            .map_err(|e| SerialError::ConnectionFailed(e.to_string()))?;

        log::info!("Opened serial port {}", port_name);
        Ok(Self {
            port_name: port_name.to_string(),
            port,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        log::info!("Closing serial port {}", self.port_name);
    }
}

#[async_trait]
impl SerialPortIO for SerialLink {
    async fn send_data(&mut self, data: &[u8]) -> Result<()> {
        self.port
            .write_all(data)
            .map_err(|e| SerialError::WriteFailed(e.to_string()))?;
        self.port
            .flush()
            .map_err(|e| SerialError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    async fn read_available(&mut self) -> Result<Vec<u8>> {
        let pending = self.port.bytes_to_read()? as usize;
        if pending == 0 {
            return Ok(Vec::new());
        }

        let mut buffer = vec![0u8; pending];
        match self.port.read(&mut buffer) {
            Ok(bytes_read) => {
                buffer.truncate(bytes_read);
                Ok(buffer)
            }
            Err(ref e) if e.kind() == ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(SerialError::IoError(e)),
        }
    }
}

/// Connector backed by the real serial ports of this machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortConnector for SystemPorts {
    fn open(&self, port_name: &str) -> Result<Box<dyn SerialPortIO>> {
        Ok(Box::new(SerialLink::open(port_name)?))
    }

    fn available_ports(&self) -> Result<Vec<String>> {
        let ports = serialport::available_ports()
            .map_err(|e| SerialError::PortEnumeration(e.to_string()))?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }
}
