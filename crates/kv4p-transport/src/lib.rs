//! Transport implementations for kv4p.
//!
//! This crate provides the concrete pieces that touch the host system:
//!
//! - [`SerialTransport`]: the dongle's USB virtual COM port, implementing
//!   [`Transport`](kv4p_core::Transport) including DTR/RTS control
//! - [`discovery`]: finding the dongle by its USB-UART bridge IDs
//! - `audio` (feature `audio`): cpal playback of the RX audio ring buffer
//!
//! # Example
//!
//! ```no_run
//! use kv4p_transport::{SerialTransport, discovery};
//!
//! # async fn example() -> kv4p_core::Result<()> {
//! if let Some(port) = discovery::find_dongle_port()? {
//!     let transport = SerialTransport::open(&port.port_name, 115_200).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod discovery;
pub mod serial;

#[cfg(feature = "audio")]
pub mod audio;

pub use discovery::{DonglePort, KNOWN_DEVICES, find_dongle_port, is_known_device};
pub use serial::{DEFAULT_BAUD_RATE, SerialTransport};

#[cfg(feature = "audio")]
pub use audio::{AudioPlayback, OutputDeviceInfo, list_output_devices};
