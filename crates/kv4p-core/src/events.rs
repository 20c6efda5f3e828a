//! Asynchronous dongle event types.
//!
//! Events are emitted by the frame dispatcher through a
//! `tokio::sync::broadcast` channel as frames arrive. They complement the
//! synchronous callbacks registered on the session builder: callbacks run
//! inline on the reader task, events are for any number of async observers.

use crate::types::DeviceVersion;

/// An event emitted when the dongle reports something.
///
/// Events are delivered on a best-effort basis through a bounded broadcast
/// channel; slow consumers may miss events under heavy load.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    /// The dongle announced itself after boot or reset.
    Hello,

    /// The dongle reported its firmware version and window size.
    Version(DeviceVersion),

    /// Flow-control credit was replenished.
    WindowUpdate {
        /// Bytes added to the send window.
        delta: u32,
        /// Credit after the update (may have been negative before).
        credit: i64,
    },

    /// S-meter report.
    SMeter {
        /// Raw reading, 0–255.
        raw: u8,
        /// Converted S-unit, 1–9.
        s_units: u8,
    },

    /// The physical push-to-talk button on the dongle changed state.
    PhysicalPtt {
        /// `true` when pressed.
        down: bool,
    },

    /// The reader task started.
    Connected,

    /// The transport failed or the session shut down.
    Disconnected,
}
