//! Serial port transport for the dongle's USB virtual COM port.
//!
//! The KV4P-HT enumerates as a CP210x or CH340 USB-UART bridge and talks
//! 8N1 without flow control, by default at 115200 baud. The bridge's DTR
//! and RTS lines are wired to the ESP32's EN and IO0 pins, which is how
//! [`Transport::set_dtr`] and [`Transport::set_rts`] reset the board.
//!
//! # Example
//!
//! ```no_run
//! use kv4p_transport::SerialTransport;
//! use kv4p_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> kv4p_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB0", 115_200).await?;
//!
//! // STOP
//! transport.send(&[0xDE, 0xAD, 0xBE, 0xEF, 0x05, 0x00, 0x00]).await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_millis(100)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use kv4p_core::error::{Error, Result};
use kv4p_core::transport::Transport;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};

/// Default dongle baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial port transport for the dongle.
pub struct SerialTransport {
    port: Option<SerialStream>,
    port_name: String,
}

impl SerialTransport {
    /// Open `port` (e.g. `/dev/ttyUSB0`, `COM3`) at `baud_rate`, 8N1.
    ///
    /// DTR and RTS are left deasserted so opening the port does not hold
    /// the ESP32 in reset.
    pub async fn open(port: &str, baud_rate: u32) -> Result<Self> {
        tracing::debug!(port = %port, baud_rate, "Opening serial port");

        let mut stream = tokio_serial::new(port, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                tracing::error!(port = %port, error = %e, "Failed to open serial port");
                Error::Transport(format!("failed to open serial port {port}: {e}"))
            })?;

        if let Err(e) = stream.write_data_terminal_ready(false) {
            tracing::warn!(port = %port, error = %e, "Failed to deassert DTR");
        }
        if let Err(e) = stream.write_request_to_send(false) {
            tracing::warn!(port = %port, error = %e, "Failed to deassert RTS");
        }

        tracing::info!(port = %port, baud_rate, "Serial port opened");

        Ok(Self {
            port: Some(stream),
            port_name: port.to_string(),
        })
    }

    /// Name the port was opened with.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn stream(&mut self) -> Result<&mut SerialStream> {
        self.port.as_mut().ok_or(Error::NotConnected)
    }
}

fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::UnexpectedEof => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let name = self.port_name.clone();
        let port = self.stream()?;

        tracing::trace!(port = %name, bytes = data.len(), data = ?data, "Sending data");

        port.write_all(data).await.map_err(|e| {
            tracing::error!(port = %name, error = %e, "Failed to send data");
            map_io_error(e)
        })?;
        port.flush().await.map_err(|e| {
            tracing::error!(port = %name, error = %e, "Failed to flush serial port");
            map_io_error(e)
        })?;
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let name = self.port_name.clone();
        let port = self.stream()?;

        match tokio::time::timeout(timeout, port.read(buf)).await {
            // A zero-length read on a serial device means it went away.
            Ok(Ok(0)) => {
                tracing::warn!(port = %name, "Serial port returned EOF");
                Err(Error::ConnectionLost)
            }
            Ok(Ok(n)) => {
                tracing::trace!(port = %name, bytes = n, data = ?&buf[..n], "Received data");
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(port = %name, error = %e, "Failed to receive data");
                Err(map_io_error(e))
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.flush().await {
                tracing::warn!(port = %self.port_name, error = %e, "Flush before close failed");
            }
            tracing::info!(port = %self.port_name, "Serial port closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    async fn set_dtr(&mut self, on: bool) -> Result<()> {
        let name = self.port_name.clone();
        let port = self.stream()?;
        tracing::trace!(port = %name, on, "DTR");
        port.write_data_terminal_ready(on)
            .map_err(|e| Error::Transport(format!("failed to set DTR on {name}: {e}")))
    }

    async fn set_rts(&mut self, on: bool) -> Result<()> {
        let name = self.port_name.clone();
        let port = self.stream()?;
        tracing::trace!(port = %name, on, "RTS");
        port.write_request_to_send(on)
            .map_err(|e| Error::Transport(format!("failed to set RTS on {name}: {e}")))
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if self.port.is_some() {
            tracing::debug!(port = %self.port_name, "SerialTransport dropped, closing port");
        }
    }
}
