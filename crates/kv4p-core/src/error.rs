//! Error types for kv4p.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport failures, protocol anomalies
//! that must reach the caller, and codec failures are all captured here.

/// The error type for all kv4p operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port open/read/write failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (unresponsive device, unexpected frame).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for the dongle.
    #[error("timeout waiting for response")]
    Timeout,

    /// The operation is not supported by this transport.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// An invalid parameter was passed to a command builder.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The session is shut down or was never connected.
    #[error("not connected")]
    NotConnected,

    /// The connection to the dongle was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// The audio codec rejected a compressed frame.
    #[error("codec error: {0}")]
    Codec(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_transport() {
        let e = Error::Transport("port busy".into());
        assert_eq!(e.to_string(), "transport error: port busy");
    }

    #[test]
    fn error_display_protocol() {
        let e = Error::Protocol("device unresponsive".into());
        assert_eq!(e.to_string(), "protocol error: device unresponsive");
    }

    #[test]
    fn error_display_codec() {
        let e = Error::Codec("corrupted stream".into());
        assert_eq!(e.to_string(), "codec error: corrupted stream");
    }

    #[test]
    fn error_display_not_connected() {
        assert_eq!(Error::NotConnected.to_string(), "not connected");
        assert_eq!(Error::ConnectionLost.to_string(), "connection lost");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
