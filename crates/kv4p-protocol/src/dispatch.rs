//! Frame dispatcher: applies each received frame to session state.
//!
//! The dispatcher runs on the IO task, so frames are handled one at a time
//! in arrival order. For every frame it may:
//!
//! - update [`SessionState`] under its mutex,
//! - broadcast a [`RadioEvent`],
//! - invoke one of the user callbacks.
//!
//! Callbacks run after the state lock is released, inline on the IO task.
//! A slow callback delays reading from the dongle, so keep them short.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};

use kv4p_core::{RadioEvent, s_units_from_raw};

use crate::audio::AudioPipeline;
use crate::commands::{self, *};
use crate::frame::Frame;
use crate::state::SessionState;

/// Called with each S-unit reading.
pub type SMeterCallback = Arc<dyn Fn(u8) + Send + Sync>;
/// Called with each block of decoded RX audio.
pub type AudioCallback = Arc<dyn Fn(&[i16]) + Send + Sync>;
/// Called when the physical PTT button changes (`true` = pressed).
pub type PttCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// User callbacks invoked by the dispatcher.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_smeter: Option<SMeterCallback>,
    pub on_audio: Option<AudioCallback>,
    pub on_ptt: Option<PttCallback>,
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_smeter", &self.on_smeter.is_some())
            .field("on_audio", &self.on_audio.is_some())
            .field("on_ptt", &self.on_ptt.is_some())
            .finish()
    }
}

pub struct Dispatcher {
    state: Arc<Mutex<SessionState>>,
    event_tx: broadcast::Sender<RadioEvent>,
    callbacks: Callbacks,
    audio: AudioPipeline,
}

impl Dispatcher {
    pub fn new(
        state: Arc<Mutex<SessionState>>,
        event_tx: broadcast::Sender<RadioEvent>,
        callbacks: Callbacks,
        audio: AudioPipeline,
    ) -> Self {
        Dispatcher {
            state,
            event_tx,
            callbacks,
            audio,
        }
    }

    fn emit(&self, event: RadioEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    /// Handle one frame.
    pub async fn dispatch(&mut self, frame: &Frame) {
        let payload = frame.payload.as_ref();
        match frame.code {
            RESP_DEBUG_INFO | RESP_DEBUG_ERROR | RESP_DEBUG_WARNING | RESP_DEBUG_DEBUG
            | RESP_DEBUG_TRACE => log_device_text(frame.code, payload),

            RESP_HELLO => {
                let first = {
                    let mut state = self.state.lock().await;
                    !std::mem::replace(&mut state.hello_received, true)
                };
                if first {
                    tracing::info!("Dongle says hello");
                } else {
                    tracing::debug!("Repeated HELLO");
                }
                self.emit(RadioEvent::Hello);
            }

            RESP_VERSION => match commands::parse_version(payload) {
                Ok(version) => {
                    {
                        let mut state = self.state.lock().await;
                        state.version = version;
                        state.window.reset(version.window_size);
                    }
                    tracing::info!(
                        version = version.version,
                        radio_status = %char::from(version.radio_status).escape_default(),
                        hardware = version.hardware_version,
                        window = version.window_size,
                        "Firmware version"
                    );
                    self.emit(RadioEvent::Version(version));
                }
                Err(e) => malformed(frame.code, &e),
            },

            RESP_WINDOW_UPDATE => match commands::parse_window_update(payload) {
                Ok(delta) => {
                    let credit = {
                        let mut state = self.state.lock().await;
                        state.window.replenish(delta);
                        state.window.credit()
                    };
                    tracing::trace!(delta, credit, "Window update");
                    self.emit(RadioEvent::WindowUpdate { delta, credit });
                }
                Err(e) => malformed(frame.code, &e),
            },

            RESP_SMETER_REPORT => match commands::parse_smeter(payload) {
                Ok(raw) => {
                    let s_units = s_units_from_raw(raw);
                    self.state.lock().await.record_s_meter(s_units);
                    tracing::trace!(raw, s_units, "S-meter");
                    self.emit(RadioEvent::SMeter { raw, s_units });
                    if let Some(cb) = &self.callbacks.on_smeter {
                        cb(s_units);
                    }
                }
                Err(e) => malformed(frame.code, &e),
            },

            RESP_PHYS_PTT_DOWN | RESP_PHYS_PTT_UP => {
                let down = frame.code == RESP_PHYS_PTT_DOWN;
                tracing::info!(down, "Physical PTT");
                self.emit(RadioEvent::PhysicalPtt { down });
                if let Some(cb) = &self.callbacks.on_ptt {
                    cb(down);
                }
            }

            RESP_RX_AUDIO => {
                if let Some(samples) = self.audio.process(payload) {
                    if let Some(cb) = &self.callbacks.on_audio {
                        cb(samples);
                    }
                }
            }

            other => {
                tracing::warn!(
                    code = %format!("0x{other:02X}"),
                    bytes = payload.len(),
                    "Unknown response code"
                );
            }
        }
    }

    pub fn audio(&self) -> &AudioPipeline {
        &self.audio
    }
}

fn malformed(code: u8, err: &kv4p_core::Error) {
    tracing::warn!(
        frame = commands::response_name(code),
        error = %err,
        "Dropping malformed frame"
    );
}

/// Re-emit the dongle's own log text at the matching level.
fn log_device_text(code: u8, payload: &[u8]) {
    let text = String::from_utf8_lossy(payload);
    let text = text.trim_end();
    match code {
        RESP_DEBUG_ERROR => tracing::error!(target: "kv4p::device", "{text}"),
        RESP_DEBUG_WARNING => tracing::warn!(target: "kv4p::device", "{text}"),
        RESP_DEBUG_INFO => tracing::info!(target: "kv4p::device", "{text}"),
        RESP_DEBUG_DEBUG => tracing::debug!(target: "kv4p::device", "{text}"),
        _ => tracing::trace!(target: "kv4p::device", "{text}"),
    }
}
