//! USB serial port discovery for the dongle.
//!
//! The KV4P-HT does not carry its own USB identity; it shows up as the
//! USB-UART bridge soldered to the board. Discovery therefore lists the
//! system's serial ports and picks the first one whose vendor/product ID
//! belongs to a known bridge chip.
//!
//! # Usage
//!
//! ```no_run
//! use kv4p_transport::discovery;
//!
//! # fn example() -> kv4p_core::Result<()> {
//! match discovery::find_dongle_port()? {
//!     Some(port) => println!("dongle on {}", port.port_name),
//!     None => println!("no dongle attached"),
//! }
//! # Ok(())
//! # }
//! ```

use kv4p_core::error::{Error, Result};
use tokio_serial::SerialPortType;

/// USB vendor/product IDs of the bridge chips used on KV4P boards.
pub const KNOWN_DEVICES: &[(u16, u16)] = &[
    // Silicon Labs CP210x
    (0x10C4, 0xEA60),
    // WCH CH340
    (0x1A86, 0x7523),
];

/// A serial port that looks like a KV4P dongle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DonglePort {
    /// OS port name (e.g. `/dev/ttyUSB0`, `COM3`).
    pub port_name: String,
    pub vid: u16,
    pub pid: u16,
    /// USB product string, if the bridge reports one.
    pub product: Option<String>,
    /// USB serial number, if the bridge reports one.
    pub serial_number: Option<String>,
}

/// Returns `true` if `vid:pid` is a bridge chip used on KV4P boards.
pub fn is_known_device(vid: u16, pid: u16) -> bool {
    KNOWN_DEVICES.iter().any(|&(v, p)| v == vid && p == pid)
}

/// List every attached serial port that matches a known bridge chip.
pub fn list_dongle_ports() -> Result<Vec<DonglePort>> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| Error::Transport(format!("failed to enumerate serial ports: {e}")))?;

    let found: Vec<DonglePort> = ports
        .into_iter()
        .filter_map(|p| match p.port_type {
            SerialPortType::UsbPort(info) if is_known_device(info.vid, info.pid) => {
                Some(DonglePort {
                    port_name: p.port_name,
                    vid: info.vid,
                    pid: info.pid,
                    product: info.product,
                    serial_number: info.serial_number,
                })
            }
            _ => None,
        })
        .collect();

    tracing::debug!(count = found.len(), "Serial port scan complete");
    Ok(found)
}

/// First attached dongle, if any.
pub fn find_dongle_port() -> Result<Option<DonglePort>> {
    let port = list_dongle_ports()?.into_iter().next();
    if let Some(p) = &port {
        tracing::info!(
            port = %p.port_name,
            vid = %format!("{:04X}", p.vid),
            pid = %format!("{:04X}", p.pid),
            "Found KV4P dongle"
        );
    }
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_bridges() {
        assert!(is_known_device(0x10C4, 0xEA60));
        assert!(is_known_device(0x1A86, 0x7523));
    }

    #[test]
    fn unknown_bridges() {
        // FTDI FT232R
        assert!(!is_known_device(0x0403, 0x6001));
        // Right vendor, wrong product.
        assert!(!is_known_device(0x10C4, 0x0001));
    }
}
