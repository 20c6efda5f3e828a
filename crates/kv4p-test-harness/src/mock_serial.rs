//! Mock serial transport for deterministic testing of the protocol engine.
//!
//! [`MockTransport`] implements the [`Transport`] trait over an in-memory
//! byte queue. Unlike a strict request/response script, the dongle talks
//! whenever it likes, so the mock works on rules instead:
//!
//! - [`respond_to`](MockTransport::respond_to) queues bytes whenever a frame
//!   with a given command code is sent,
//! - [`on_reset`](MockTransport::on_reset) queues bytes when the DTR/RTS
//!   reset pulse completes,
//! - [`inject`](MockTransport::inject) queues bytes immediately.
//!
//! The transport is usually moved into a session, so all state lives behind
//! a shared handle. Call [`handle`](MockTransport::handle) before handing
//! the mock over to keep a way to inspect sent frames and inject traffic.
//!
//! # Example
//!
//! ```
//! use kv4p_test_harness::MockTransport;
//!
//! let mock = MockTransport::new();
//! let handle = mock.handle();
//! // Answer every CONFIG command (0x06) with a VERSION frame.
//! handle.respond_to(0x06, &[0xDE, 0xAD, 0xBE, 0xEF, 0x08, 0x08, 0x00,
//!                           0x05, 0x00, 0x4F, 0x02, 0x00, 0x04, 0x00, 0x00]);
//! assert!(handle.sent_frames().is_empty());
//! ```

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use kv4p_core::error::{Error, Result};
use kv4p_core::transport::{ControlLine, Transport};

/// Frame preamble used to pick the command byte out of sent data.
const SYNC: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

#[derive(Debug, Default)]
struct MockState {
    /// Bytes waiting to be returned by `receive()`.
    rx: VecDeque<u8>,
    /// Per-command auto responses.
    responses: HashMap<u8, Vec<u8>>,
    /// Bytes queued each time the reset pulse completes.
    reset_response: Option<Vec<u8>>,
    /// Log of all `send()` calls.
    sent_log: Vec<Vec<u8>>,
    /// Log of all control line changes.
    line_log: Vec<(ControlLine, bool)>,
    dtr: bool,
    rts: bool,
    connected: bool,
    fail_sends: bool,
}

/// A mock [`Transport`] for testing the protocol engine without hardware.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state with no traffic.
    pub fn new() -> Self {
        MockTransport {
            state: Arc::new(Mutex::new(MockState {
                connected: true,
                ..MockState::default()
            })),
        }
    }

    /// Another handle onto the same mock, for use after the transport has
    /// been boxed and moved into a session.
    pub fn handle(&self) -> MockTransport {
        self.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue bytes to be returned by subsequent `receive()` calls.
    pub fn inject(&self, bytes: &[u8]) {
        self.lock().rx.extend(bytes.iter().copied());
    }

    /// Queue `response` every time a frame with command code `cmd` is sent.
    ///
    /// Replaces any earlier rule for the same command.
    pub fn respond_to(&self, cmd: u8, response: &[u8]) {
        self.lock().responses.insert(cmd, response.to_vec());
    }

    /// Queue `response` every time the DTR/RTS reset pulse completes
    /// (DTR falling after having been raised).
    pub fn on_reset(&self, response: &[u8]) {
        self.lock().reset_response = Some(response.to_vec());
    }

    /// Every `send()` call so far, in order.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.lock().sent_log.clone()
    }

    /// Command codes of every framed `send()` so far, in order.
    pub fn sent_commands(&self) -> Vec<u8> {
        self.lock()
            .sent_log
            .iter()
            .filter_map(|f| command_of(f))
            .collect()
    }

    /// Payloads of every sent frame with command code `cmd`.
    pub fn sent_payloads(&self, cmd: u8) -> Vec<Vec<u8>> {
        self.lock()
            .sent_log
            .iter()
            .filter(|f| command_of(f) == Some(cmd))
            .map(|f| f.get(7..).unwrap_or_default().to_vec())
            .collect()
    }

    /// Forget everything sent so far.
    pub fn clear_sent(&self) {
        self.lock().sent_log.clear();
    }

    /// Every control line change so far, in order.
    pub fn line_changes(&self) -> Vec<(ControlLine, bool)> {
        self.lock().line_log.clone()
    }

    /// Number of bytes still waiting to be received.
    pub fn pending_rx(&self) -> usize {
        self.lock().rx.len()
    }

    /// Set the connected state.
    ///
    /// When `false`, `send()` and `receive()` return
    /// [`Error::NotConnected`], which looks like an unplugged dongle.
    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    /// Make every subsequent `send()` fail with a transport error.
    pub fn set_fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn command_of(frame: &[u8]) -> Option<u8> {
    if frame.len() >= 7 && frame[..4] == SYNC {
        Some(frame[4])
    } else {
        None
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        if state.fail_sends {
            return Err(Error::Transport("mock write failure".into()));
        }

        state.sent_log.push(data.to_vec());

        if let Some(cmd) = command_of(data) {
            if let Some(response) = state.responses.get(&cmd).cloned() {
                state.rx.extend(response);
            }
        }
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        if state.rx.is_empty() {
            return Err(Error::Timeout);
        }
        let n = state.rx.len().min(buf.len());
        for (dst, src) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.connected = false;
        state.rx.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn set_dtr(&mut self, on: bool) -> Result<()> {
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        state.line_log.push((ControlLine::Dtr, on));
        let falling = state.dtr && !on;
        state.dtr = on;
        if falling {
            if let Some(response) = state.reset_response.clone() {
                state.rx.extend(response);
            }
        }
        Ok(())
    }

    async fn set_rts(&mut self, on: bool) -> Result<()> {
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        state.line_log.push((ControlLine::Rts, on));
        state.rts = on;
        Ok(())
    }
}
