//! kv4p-core: Core traits, types, and error definitions for kv4p.
//!
//! This crate holds the transport-agnostic pieces of the KV4P-HT dongle
//! stack: the byte-level [`Transport`] seam, band limits, tuning types,
//! the S-meter conversion, and the RX audio buffer. The protocol engine in
//! `kv4p-protocol` and the serial backend in `kv4p-transport` both build on
//! these types.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel with DTR/RTS control
//! - [`RadioEvent`] -- asynchronous dongle notifications
//! - [`AudioRingBuffer`] / [`AudioDecoder`] -- RX audio path
//! - [`Error`] / [`Result`] -- error handling

pub mod audio;
pub mod band;
pub mod error;
pub mod events;
pub mod helpers;
pub mod transport;
pub mod types;

pub use audio::{
    AudioDecoder, AudioRingBuffer, CHANNELS, MAX_BUFFERED_SAMPLES, MAX_FRAME_SAMPLES, SAMPLE_RATE,
};
pub use band::{
    Band, ParseBandError, UHF_MAX_MHZ, UHF_MIN_MHZ, VHF_MAX_MHZ, VHF_MIN_MHZ, clamp_frequency,
};
pub use error::{Error, Result};
pub use events::RadioEvent;
pub use helpers::{format_freq_mhz, s_units_from_raw, squelch_from_percent};
pub use transport::{ControlLine, Transport};
pub use types::*;
