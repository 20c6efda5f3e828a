//! IO task: the single owner of the transport.
//!
//! This module defines the request protocol between [`DeviceSession`]
//! methods and the IO task, plus the task loop itself. The IO task owns the
//! transport, the [`FrameDecoder`] and the [`Dispatcher`], so received bytes
//! are decoded and dispatched strictly in arrival order.
//!
//! Outgoing frames wait in an outbox until the flow-control window has room.
//! Each received `WINDOW_UPDATE` (or `VERSION`) re-runs the outbox. If the
//! dongle grants no credit for `credit_cooldown`, the head frame is sent
//! anyway and the window goes negative; this repeats at most once per
//! cooldown until credit returns.
//!
//! [`DeviceSession`]: crate::session::DeviceSession

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use kv4p_core::error::{Error, Result};
use kv4p_core::events::RadioEvent;
use kv4p_core::transport::{ControlLine, Transport};

use crate::dispatch::Dispatcher;
use crate::frame::{Frame, FrameDecoder};
use crate::state::SessionState;

/// Pause after an empty read before polling the transport again.
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Read buffer size.
const READ_CHUNK: usize = 1024;

/// Configuration for the IO task.
#[derive(Debug, Clone)]
pub(crate) struct IoConfig {
    /// Timeout handed to each `Transport::receive` call.
    pub read_timeout: Duration,
    /// How long the head of the outbox may wait for credit before it is
    /// sent regardless.
    pub credit_cooldown: Duration,
}

/// A request sent from session methods to the IO task.
pub(crate) enum Request {
    /// Queue a frame; the reply fires once it has been written.
    Send {
        frame: Frame,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Drive a serial control line.
    SetLine {
        line: ControlLine,
        on: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Graceful shutdown; returns the transport.
    Shutdown {
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
}

/// Handle to the IO task. Stored inside `DeviceSession`.
pub(crate) struct SessionIo {
    cmd_tx: mpsc::Sender<Request>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionIo {
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> Request,
    ) -> Result<T> {
        if self.cancel.is_cancelled() {
            return Err(Error::NotConnected);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| Error::NotConnected)?;

        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::NotConnected),
            reply = reply_rx => reply.unwrap_or(Err(Error::NotConnected)),
        }
    }

    /// Queue a frame and wait until it has been written to the transport.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        self.request(|reply| Request::Send { frame, reply }).await
    }

    /// Drive a serial control line.
    pub async fn set_line(&self, line: ControlLine, on: bool) -> Result<()> {
        self.request(|reply| Request::SetLine { line, on, reply })
            .await
    }

    /// Stop the IO task and recover the transport.
    ///
    /// Further requests fail with [`Error::NotConnected`].
    pub async fn shutdown(&self) -> Result<Box<dyn Transport>> {
        let task = self.task.lock().await.take();
        let Some(task) = task else {
            return Err(Error::NotConnected);
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self
            .cmd_tx
            .send(Request::Shutdown { reply: reply_tx })
            .await
            .is_ok();
        let transport = if sent { reply_rx.await.ok() } else { None };

        self.cancel.cancel();
        let _ = task.await;
        transport.ok_or(Error::NotConnected)
    }
}

impl Drop for SessionIo {
    fn drop(&mut self) {
        self.cancel.cancel();
        // The task may be stuck in a read that ignores cancellation.
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// Spawn the IO task. Returns the handle for sending requests.
pub(crate) fn spawn_io_task(
    transport: Box<dyn Transport>,
    config: IoConfig,
    dispatcher: Dispatcher,
    state: Arc<Mutex<SessionState>>,
    event_tx: broadcast::Sender<RadioEvent>,
) -> SessionIo {
    let (cmd_tx, cmd_rx) = mpsc::channel::<Request>(32);
    let cancel = CancellationToken::new();

    let task = tokio::spawn(io_loop(
        transport,
        config,
        dispatcher,
        state,
        event_tx,
        cmd_rx,
        cancel.clone(),
    ));

    SessionIo {
        cmd_tx,
        cancel,
        task: Mutex::new(Some(task)),
    }
}

struct Pending {
    bytes: Vec<u8>,
    reply: oneshot::Sender<Result<()>>,
}

/// Frames waiting for credit, and when the head started waiting.
struct Outbox {
    queue: VecDeque<Pending>,
    blocked_since: Option<Instant>,
}

impl Outbox {
    fn new() -> Self {
        Outbox {
            queue: VecDeque::new(),
            blocked_since: None,
        }
    }

    /// Fail every queued frame.
    fn fail_all(&mut self, make_err: impl Fn() -> Error) {
        for pending in self.queue.drain(..) {
            let _ = pending.reply.send(Err(make_err()));
        }
        self.blocked_since = None;
    }
}

/// Write one queued frame. A transport error is returned to both the
/// requester and the caller.
async fn write_pending(transport: &mut dyn Transport, pending: Pending) -> Result<()> {
    match transport.send(&pending.bytes).await {
        Ok(()) => {
            let _ = pending.reply.send(Ok(()));
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to write frame");
            let _ = pending.reply.send(Err(Error::ConnectionLost));
            Err(e)
        }
    }
}

/// Write queued frames while the window has room.
async fn flush(
    transport: &mut dyn Transport,
    outbox: &mut Outbox,
    state: &Mutex<SessionState>,
) -> Result<()> {
    while let Some(head) = outbox.queue.front() {
        let len = head.bytes.len();
        let fits = {
            let mut state = state.lock().await;
            if state.window.can_send(len) {
                state.window.consume(len);
                true
            } else {
                false
            }
        };
        if !fits {
            if outbox.blocked_since.is_none() {
                debug!(queued = outbox.queue.len(), len, "Waiting for window credit");
                outbox.blocked_since = Some(Instant::now());
            }
            return Ok(());
        }
        if let Some(pending) = outbox.queue.pop_front() {
            write_pending(transport, pending).await?;
        }
    }
    outbox.blocked_since = None;
    Ok(())
}

/// Send the head frame without credit, then resume normal flushing.
async fn force_head(
    transport: &mut dyn Transport,
    outbox: &mut Outbox,
    state: &Mutex<SessionState>,
    cooldown: Duration,
) -> Result<()> {
    outbox.blocked_since = None;
    let Some(pending) = outbox.queue.pop_front() else {
        return Ok(());
    };
    let credit = {
        let mut state = state.lock().await;
        state.window.consume(pending.bytes.len());
        state.window.credit()
    };
    tracing::warn!(
        waited_ms = cooldown.as_millis() as u64,
        credit,
        "No window credit, sending anyway"
    );
    write_pending(transport, pending).await?;
    flush(transport, outbox, state).await
}

/// Why the loop ended.
enum Exit {
    Cancelled,
    Shutdown(oneshot::Sender<Box<dyn Transport>>),
    TransportFailed,
}

/// The main IO loop. Runs as a spawned Tokio task.
///
/// Uses `tokio::select! { biased; }` to prioritize:
/// 1. Cancellation
/// 2. Request intake
/// 3. Credit cooldown expiry
/// 4. Reading from the dongle
async fn io_loop(
    mut transport: Box<dyn Transport>,
    config: IoConfig,
    mut dispatcher: Dispatcher,
    state: Arc<Mutex<SessionState>>,
    event_tx: broadcast::Sender<RadioEvent>,
    mut cmd_rx: mpsc::Receiver<Request>,
    cancel: CancellationToken,
) {
    let mut decoder = FrameDecoder::new();
    let mut outbox = Outbox::new();
    let mut buf = vec![0u8; READ_CHUNK];

    state.lock().await.connected = true;
    let _ = event_tx.send(RadioEvent::Connected);

    let exit = loop {
        let cooldown_at = outbox.blocked_since.map(|t| t + config.credit_cooldown);

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("IO task cancelled");
                break Exit::Cancelled;
            }

            req = cmd_rx.recv() => {
                match req {
                    Some(Request::Send { frame, reply }) => {
                        let bytes = match frame.encode() {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                let _ = reply.send(Err(e));
                                continue;
                            }
                        };
                        tracing::trace!(code = frame.code, len = bytes.len(), "Queueing frame");
                        outbox.queue.push_back(Pending { bytes, reply });
                        if flush(&mut *transport, &mut outbox, &state).await.is_err() {
                            break Exit::TransportFailed;
                        }
                    }
                    Some(Request::SetLine { line, on, reply }) => {
                        let _ = reply.send(transport.set_line(line, on).await);
                    }
                    Some(Request::Shutdown { reply }) => {
                        debug!("IO task shutdown requested");
                        break Exit::Shutdown(reply);
                    }
                    None => {
                        debug!("all request senders dropped, exiting IO task");
                        break Exit::Cancelled;
                    }
                }
            }

            _ = async {
                match cooldown_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            }, if cooldown_at.is_some() => {
                if force_head(&mut *transport, &mut outbox, &state, config.credit_cooldown)
                    .await
                    .is_err()
                {
                    break Exit::TransportFailed;
                }
            }

            result = async {
                let result = transport.receive(&mut buf, config.read_timeout).await;
                if matches!(result, Err(Error::Timeout) | Ok(0)) {
                    // Yield briefly so requests and cancellation get a turn.
                    tokio::time::sleep(IDLE_BACKOFF).await;
                }
                result
            } => {
                match result {
                    Ok(n) if n > 0 => {
                        for frame in decoder.feed(&buf[..n]) {
                            dispatcher.dispatch(&frame).await;
                        }
                        if !outbox.queue.is_empty()
                            && flush(&mut *transport, &mut outbox, &state).await.is_err()
                        {
                            break Exit::TransportFailed;
                        }
                    }
                    Ok(_) | Err(Error::Timeout) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "Transport read failed");
                        break Exit::TransportFailed;
                    }
                }
            }
        }
    };

    state.lock().await.connected = false;
    // Wake anything still waiting on the session.
    cancel.cancel();

    match exit {
        Exit::Shutdown(reply) => {
            // Give whatever credit allows one last chance to go out.
            let _ = flush(&mut *transport, &mut outbox, &state).await;
            outbox.fail_all(|| Error::NotConnected);
            let _ = reply.send(transport);
        }
        Exit::Cancelled => {
            outbox.fail_all(|| Error::NotConnected);
            if let Err(e) = transport.close().await {
                tracing::warn!(error = %e, "Error closing transport");
            }
        }
        Exit::TransportFailed => {
            outbox.fail_all(|| Error::ConnectionLost);
            tracing::warn!("Dongle disconnected");
        }
    }

    let _ = event_tx.send(RadioEvent::Disconnected);
    debug!(
        skipped = decoder.skipped_total(),
        decoded = dispatcher.audio().decoded_frames(),
        "IO task exited"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioPipeline;
    use crate::commands::*;
    use crate::dispatch::Callbacks;
    use kv4p_core::AudioRingBuffer;
    use kv4p_test_harness::MockTransport;

    struct Harness {
        io: SessionIo,
        mock: MockTransport,
        state: Arc<Mutex<SessionState>>,
        events: broadcast::Receiver<RadioEvent>,
    }

    fn harness(cooldown: Duration) -> Harness {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let state = Arc::new(Mutex::new(SessionState::default()));
        let (event_tx, events) = broadcast::channel(64);
        let dispatcher = Dispatcher::new(
            state.clone(),
            event_tx.clone(),
            Callbacks::default(),
            AudioPipeline::new(None, AudioRingBuffer::new(), false),
        );
        let config = IoConfig {
            read_timeout: Duration::from_millis(20),
            credit_cooldown: cooldown,
        };
        let io = spawn_io_task(Box::new(mock), config, dispatcher, state.clone(), event_tx);
        Harness {
            io,
            mock: handle,
            state,
            events,
        }
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test]
    async fn send_writes_encoded_frame() {
        let h = harness(Duration::from_secs(1));
        h.io.send(cmd_config(kv4p_core::Band::Uhf)).await.unwrap();

        assert_eq!(h.mock.sent_frames(), vec![vec![
            0xDE, 0xAD, 0xBE, 0xEF, 0x06, 0x01, 0x00, 0x05
        ]]);
        assert_eq!(h.state.lock().await.window.credit(), 1024 - 8);
        let _ = h.io.shutdown().await;
    }

    #[tokio::test]
    async fn received_frames_are_dispatched() {
        let mut h = harness(Duration::from_secs(1));
        assert_eq!(h.events.recv().await.unwrap(), RadioEvent::Connected);

        h.mock.inject(&[0xDE, 0xAD, 0xBE, 0xEF, RESP_HELLO, 0x00, 0x00]);
        assert_eq!(h.events.recv().await.unwrap(), RadioEvent::Hello);
        assert!(h.state.lock().await.hello_received);
        let _ = h.io.shutdown().await;
    }

    #[tokio::test]
    async fn frame_split_across_reads() {
        let mut h = harness(Duration::from_secs(1));
        h.mock.inject(&[0xDE, 0xAD]);
        tokio::time::sleep(Duration::from_millis(30)).await;
        h.mock.inject(&[0xBE, 0xEF, RESP_SMETER_REPORT, 0x01]);
        tokio::time::sleep(Duration::from_millis(30)).await;
        h.mock.inject(&[0x00, 0xFF]);

        loop {
            if let RadioEvent::SMeter { raw, s_units } = h.events.recv().await.unwrap() {
                assert_eq!(raw, 0xFF);
                assert_eq!(s_units, 9);
                break;
            }
        }
        let _ = h.io.shutdown().await;
    }

    #[tokio::test]
    async fn set_line_reaches_transport() {
        let h = harness(Duration::from_secs(1));
        h.io.set_line(ControlLine::Dtr, true).await.unwrap();
        h.io.set_line(ControlLine::Rts, false).await.unwrap();
        assert_eq!(h.mock.line_changes(), vec![
            (ControlLine::Dtr, true),
            (ControlLine::Rts, false)
        ]);
        let _ = h.io.shutdown().await;
    }

    #[tokio::test]
    async fn blocked_frame_waits_for_window_update() {
        let h = harness(Duration::from_secs(30));
        h.state.lock().await.window.reset(10);

        // 8 bytes fits, the second 8 does not.
        h.io.send(cmd_config(kv4p_core::Band::Vhf)).await.unwrap();
        let io = Arc::new(h.io);
        let io2 = io.clone();
        let pending = tokio::spawn(async move { io2.send(cmd_config(kv4p_core::Band::Uhf)).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.mock.sent_frames().len(), 1);
        assert!(!pending.is_finished());

        // Credit arrives: the queued frame goes out.
        h.mock.inject(&[0xDE, 0xAD, 0xBE, 0xEF, RESP_WINDOW_UPDATE, 0x04, 0x00, 0x00, 0x04, 0x00, 0x00]);
        pending.await.unwrap().unwrap();
        assert_eq!(h.mock.sent_frames().len(), 2);
        assert_eq!(h.state.lock().await.window.credit(), 10 - 8 + 1024 - 8);
        let _ = io.shutdown().await;
    }

    #[tokio::test]
    async fn blocked_frame_forced_after_cooldown() {
        let h = harness(Duration::from_millis(100));
        h.state.lock().await.window.reset(0);

        let start = Instant::now();
        h.io.send(cmd_stop()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(h.mock.sent_commands(), vec![CMD_STOP]);
        assert_eq!(h.state.lock().await.window.credit(), -7);

        // A later update brings the window back.
        h.mock.inject(&[0xDE, 0xAD, 0xBE, 0xEF, RESP_WINDOW_UPDATE, 0x04, 0x00, 0x00, 0x01, 0x00, 0x00]);
        let state = h.state.clone();
        let mut credit = 0;
        for _ in 0..100 {
            credit = state.lock().await.window.credit();
            if credit > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(credit, 256 - 7);
        let _ = h.io.shutdown().await;
    }

    #[tokio::test]
    async fn forced_sends_are_throttled() {
        let h = harness(Duration::from_millis(80));
        h.state.lock().await.window.reset(0);

        let io = Arc::new(h.io);
        let mut tasks = Vec::new();
        for _ in 0..3 {
            let io = io.clone();
            tasks.push(tokio::spawn(async move { io.send(cmd_stop()).await }));
        }
        let start = Instant::now();
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        // One frame per cooldown.
        assert!(start.elapsed() >= Duration::from_millis(240));
        assert_eq!(h.mock.sent_commands(), vec![CMD_STOP; 3]);
        let _ = io.shutdown().await;
    }

    #[tokio::test]
    async fn transport_failure_disconnects() {
        let mut h = harness(Duration::from_secs(1));
        assert_eq!(h.events.recv().await.unwrap(), RadioEvent::Connected);

        h.mock.set_connected(false);
        assert_eq!(h.events.recv().await.unwrap(), RadioEvent::Disconnected);

        let io = &h.io;
        wait_for(|| io.is_cancelled()).await;
        assert!(!h.state.lock().await.connected);
        assert!(matches!(h.io.send(cmd_stop()).await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn write_failure_fails_request() {
        let h = harness(Duration::from_secs(1));
        h.mock.set_fail_sends(true);
        assert!(matches!(
            h.io.send(cmd_stop()).await,
            Err(Error::ConnectionLost)
        ));
    }

    #[tokio::test]
    async fn shutdown_returns_transport_and_rejects_sends() {
        let h = harness(Duration::from_secs(1));
        let transport = h.io.shutdown().await.unwrap();
        assert!(transport.is_connected());
        assert!(!h.state.lock().await.connected);

        assert!(matches!(h.io.send(cmd_stop()).await, Err(Error::NotConnected)));
        assert!(matches!(
            h.io.set_line(ControlLine::Dtr, true).await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(h.io.shutdown().await, Err(Error::NotConnected)));
    }
}
