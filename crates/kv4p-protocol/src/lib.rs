//! KV4P dongle protocol engine.
//!
//! This crate implements the framed binary protocol spoken by KV4P-HT
//! radio dongles over their USB serial port. It provides:
//!
//! - **Frame codec** ([`frame`]) -- encode frames and decode the incoming
//!   byte stream with a resynchronizing state machine.
//! - **Command builders** ([`commands`]) -- construct outgoing commands and
//!   parse the fixed-layout response payloads.
//! - **Flow control** ([`window`]) -- the credit window that limits how many
//!   bytes may be in flight towards the dongle.
//! - **Dispatcher** ([`dispatch`]) -- applies received frames to
//!   [`SessionState`], broadcasts events and invokes callbacks.
//! - **Audio pipeline** ([`audio`]) -- decodes RX audio into the ring buffer
//!   read by the playback sink.
//! - **DeviceSession** ([`session`]) -- handshake, configuration and scan
//!   sequences on top of a [`Transport`](kv4p_core::Transport).
//! - **SessionBuilder** ([`builder`]) -- fluent builder for constructing
//!   `DeviceSession` instances.
//!
//! # Example
//!
//! ```
//! use kv4p_protocol::commands::{RESP_HELLO, cmd_stop};
//! use kv4p_protocol::frame::FrameDecoder;
//!
//! let stop = cmd_stop().encode().unwrap();
//! assert_eq!(stop, vec![0xDE, 0xAD, 0xBE, 0xEF, 0x05, 0x00, 0x00]);
//!
//! let mut decoder = FrameDecoder::new();
//! let frames = decoder.feed(&[0xDE, 0xAD, 0xBE, 0xEF, RESP_HELLO, 0x00, 0x00]);
//! assert_eq!(frames.len(), 1);
//! assert_eq!(frames[0].code, RESP_HELLO);
//! ```

pub mod audio;
pub mod builder;
pub mod commands;
pub mod dispatch;
pub mod frame;
pub(crate) mod io;
#[cfg(feature = "opus")]
pub mod opus;
pub mod session;
pub mod state;
pub mod window;

pub use builder::SessionBuilder;
pub use frame::{Frame, FrameDecoder, encode_frame};
pub use session::{DeviceSession, RadioConfig, SCAN_SQUELCH};
pub use state::SessionState;
pub use window::FlowWindow;

#[cfg(feature = "opus")]
pub use opus::OpusDecoder;
