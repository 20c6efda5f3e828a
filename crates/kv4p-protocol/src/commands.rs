//! Command builders and response payload parsers.
//!
//! Builders produce [`Frame`]s for the host-to-dongle commands; parsers turn
//! the fixed-layout response payloads into typed values. Everything here is
//! pure. Sending, flow control and state updates live in the IO task and the
//! dispatcher.

use bytes::{BufMut, BytesMut};
use kv4p_core::{Band, DeviceVersion, Error, Filters, GroupConfig, Result};

use crate::frame::Frame;

// ---------------------------------------------------------------
// Host to dongle command codes
// ---------------------------------------------------------------

pub const CMD_PTT_DOWN: u8 = 0x01;
pub const CMD_PTT_UP: u8 = 0x02;
/// Tune: bandwidth, frequencies, squelch and tones.
pub const CMD_GROUP: u8 = 0x03;
pub const CMD_FILTERS: u8 = 0x04;
/// Stop any RX/TX activity.
pub const CMD_STOP: u8 = 0x05;
/// Select the VHF or UHF module.
pub const CMD_CONFIG: u8 = 0x06;
pub const CMD_TX_AUDIO: u8 = 0x07;
/// Grant the dongle send credit.
pub const CMD_WINDOW_UPDATE: u8 = 0x08;

// ---------------------------------------------------------------
// Dongle to host response codes
// ---------------------------------------------------------------

pub const RESP_DEBUG_INFO: u8 = 0x01;
pub const RESP_DEBUG_ERROR: u8 = 0x02;
pub const RESP_DEBUG_WARNING: u8 = 0x03;
pub const RESP_DEBUG_DEBUG: u8 = 0x04;
pub const RESP_DEBUG_TRACE: u8 = 0x05;
pub const RESP_HELLO: u8 = 0x06;
pub const RESP_RX_AUDIO: u8 = 0x07;
pub const RESP_VERSION: u8 = 0x08;
pub const RESP_WINDOW_UPDATE: u8 = 0x09;
pub const RESP_PHYS_PTT_DOWN: u8 = 0x44;
pub const RESP_PHYS_PTT_UP: u8 = 0x55;
pub const RESP_SMETER_REPORT: u8 = 0x53;

/// `GROUP` payload length.
pub const GROUP_PAYLOAD_LEN: usize = 12;
/// `VERSION` payload length.
pub const VERSION_PAYLOAD_LEN: usize = 8;
/// `WINDOW_UPDATE` payload length.
pub const WINDOW_UPDATE_PAYLOAD_LEN: usize = 4;
/// `SMETER_REPORT` payload length.
pub const SMETER_PAYLOAD_LEN: usize = 1;

/// Human-readable name of a response code, for logs.
pub fn response_name(code: u8) -> &'static str {
    match code {
        RESP_DEBUG_INFO => "DEBUG_INFO",
        RESP_DEBUG_ERROR => "DEBUG_ERROR",
        RESP_DEBUG_WARNING => "DEBUG_WARNING",
        RESP_DEBUG_DEBUG => "DEBUG_DEBUG",
        RESP_DEBUG_TRACE => "DEBUG_TRACE",
        RESP_HELLO => "HELLO",
        RESP_RX_AUDIO => "RX_AUDIO",
        RESP_VERSION => "VERSION",
        RESP_WINDOW_UPDATE => "WINDOW_UPDATE",
        RESP_PHYS_PTT_DOWN => "PHYS_PTT_DOWN",
        RESP_PHYS_PTT_UP => "PHYS_PTT_UP",
        RESP_SMETER_REPORT => "SMETER_REPORT",
        _ => "UNKNOWN",
    }
}

// ---------------------------------------------------------------
// Builders
// ---------------------------------------------------------------

/// `STOP`.
pub fn cmd_stop() -> Frame {
    Frame::new(CMD_STOP, bytes::Bytes::new())
}

/// `CONFIG` selecting the module for `band`.
pub fn cmd_config(band: Band) -> Frame {
    Frame::new(CMD_CONFIG, vec![band.mode_byte()])
}

/// `FILTERS` with the bitmask for `filters`.
pub fn cmd_filters(filters: Filters) -> Frame {
    Frame::new(CMD_FILTERS, vec![filters.bits()])
}

/// `PTT_DOWN` or `PTT_UP`.
pub fn cmd_ptt(down: bool) -> Frame {
    let code = if down { CMD_PTT_DOWN } else { CMD_PTT_UP };
    Frame::new(code, bytes::Bytes::new())
}

/// `GROUP` carrying `group`.
pub fn cmd_group(group: &GroupConfig) -> Frame {
    Frame::new(CMD_GROUP, encode_group_payload(group).to_vec())
}

/// Encode the 12-byte `GROUP` payload.
///
/// Layout: bandwidth `u8`, TX MHz `f32` LE, RX MHz `f32` LE, TX tone `u8`,
/// squelch `u8`, RX tone `u8`.
///
/// # Example
///
/// ```
/// use kv4p_core::{Bandwidth, GroupConfig};
/// use kv4p_protocol::commands::encode_group_payload;
///
/// let g = GroupConfig::simplex(Bandwidth::Wide, 162.55, 4);
/// assert_eq!(
///     encode_group_payload(&g),
///     [0x01, 0xCD, 0x8C, 0x22, 0x43, 0xCD, 0x8C, 0x22, 0x43, 0x00, 0x04, 0x00]
/// );
/// ```
pub fn encode_group_payload(group: &GroupConfig) -> [u8; GROUP_PAYLOAD_LEN] {
    let mut buf = BytesMut::with_capacity(GROUP_PAYLOAD_LEN);
    buf.put_u8(group.bandwidth.wire_byte());
    buf.put_f32_le(group.tx_mhz);
    buf.put_f32_le(group.rx_mhz);
    buf.put_u8(group.tx_tone);
    buf.put_u8(group.squelch);
    buf.put_u8(group.rx_tone);

    let mut out = [0u8; GROUP_PAYLOAD_LEN];
    out.copy_from_slice(&buf);
    out
}

// ---------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------

fn check_len(name: &str, payload: &[u8], expected: usize) -> Result<()> {
    if payload.len() != expected {
        return Err(Error::Protocol(format!(
            "{name} payload is {} bytes, expected {expected}",
            payload.len()
        )));
    }
    Ok(())
}

/// Parse a `VERSION` payload.
///
/// ```
/// use kv4p_protocol::commands::parse_version;
///
/// let v = parse_version(&[0x05, 0x00, 0x4F, 0x02, 0x00, 0x04, 0x00, 0x00]).unwrap();
/// assert_eq!(v.version, 5);
/// assert_eq!(v.window_size, 1024);
/// ```
pub fn parse_version(payload: &[u8]) -> Result<DeviceVersion> {
    check_len("VERSION", payload, VERSION_PAYLOAD_LEN)?;
    Ok(DeviceVersion {
        version: u16::from_le_bytes([payload[0], payload[1]]),
        radio_status: payload[2],
        hardware_version: payload[3],
        window_size: u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]),
    })
}

/// Parse a `WINDOW_UPDATE` payload into its credit delta.
pub fn parse_window_update(payload: &[u8]) -> Result<u32> {
    check_len("WINDOW_UPDATE", payload, WINDOW_UPDATE_PAYLOAD_LEN)?;
    Ok(u32::from_le_bytes([
        payload[0], payload[1], payload[2], payload[3],
    ]))
}

/// Parse an `SMETER_REPORT` payload into its raw reading.
pub fn parse_smeter(payload: &[u8]) -> Result<u8> {
    check_len("SMETER_REPORT", payload, SMETER_PAYLOAD_LEN)?;
    Ok(payload[0])
}
