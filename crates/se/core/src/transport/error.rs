//! Error types specific to the physical transport

use thiserror::Error;

/// Transport error type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Bus did not answer in time
    #[error("Operation timed out")]
    Timeout,

    /// Connection error
    #[error("Failed to connect to device")]
    Connection,

    /// Transmission error
    #[error("Failed to transmit data")]
    Transmission,

    /// Device error
    #[error("Device error")]
    Device,

    /// Buffer too small
    #[error("Buffer too small")]
    BufferTooSmall,

    /// Driver error (with code)
    #[error("Driver error code: {0}")]
    Driver(i32),

    /// Other error with message
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Create a new driver error
    pub const fn driver(code: i32) -> Self {
        Self::Driver(code)
    }

    /// Create a general other error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other(message.into())
    }

    /// Reason byte used in packed error codes
    pub const fn reason(&self) -> u8 {
        match self {
            Self::Timeout => 0x01,
            Self::Connection => 0x02,
            Self::Transmission => 0x03,
            Self::Device => 0x04,
            Self::BufferTooSmall => 0x05,
            Self::Driver(_) => 0x06,
            Self::Other(_) => 0xff,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Self::Timeout,
            std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe => Self::Connection,
            std::io::ErrorKind::UnexpectedEof => Self::Transmission,
            _ => error.raw_os_error().map_or_else(|| Self::Other(error.to_string()), Self::Driver),
        }
    }
}
