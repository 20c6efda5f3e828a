//! Transport trait for dongle communication.
//!
//! The [`Transport`] trait abstracts over the physical link to the dongle.
//! The protocol engine in `kv4p-protocol` operates on a `Transport` rather
//! than directly on a serial port, so the same code drives real hardware
//! (`SerialTransport` in `kv4p-transport`) and the scripted `MockTransport`
//! from `kv4p-test-harness`.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{Error, Result};

/// Serial control line used for the hardware reset sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlLine {
    /// Data Terminal Ready.
    Dtr,
    /// Request To Send.
    Rts,
}

/// Asynchronous byte-level transport to the dongle.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the dongle.
    ///
    /// Implementations should not return until all bytes have been handed
    /// to the underlying device and flushed.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the dongle into the provided buffer.
    ///
    /// Returns the number of bytes read. Waits up to `timeout` for data and
    /// returns [`Error::Timeout`] if nothing arrives.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After `close()`, `send()` and `receive()` return
    /// [`Error::NotConnected`].
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;

    /// Drive the DTR control line.
    async fn set_dtr(&mut self, _on: bool) -> Result<()> {
        Err(Error::Unsupported("DTR control".into()))
    }

    /// Drive the RTS control line.
    async fn set_rts(&mut self, _on: bool) -> Result<()> {
        Err(Error::Unsupported("RTS control".into()))
    }

    /// Drive either control line.
    async fn set_line(&mut self, line: ControlLine, on: bool) -> Result<()> {
        match line {
            ControlLine::Dtr => self.set_dtr(on).await,
            ControlLine::Rts => self.set_rts(on).await,
        }
    }
}
