//! Core types for talking to a secure element over a layered protocol stack
//!
//! This crate provides the pieces every layer of the stack shares:
//!
//! - packed error codes and the [`Error`] type
//! - CRC and LRC checksums
//! - APDU command and response encoding
//! - a pluggable [`Logger`](logger::Logger)
//! - the [`ProtocolLayer`] abstraction and [`ProtocolStack`]
//! - physical drivers and the [`DriverLayer`] at the bottom of every stack
//!
//! Block transport and secure channel layers live in their own crates and
//! build on these types.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod command;
pub mod config;
pub mod crc;
pub mod error;
pub mod layer;
pub mod logger;
pub mod response;
pub mod transport;

pub use command::{Command, LE_ANY, LE_ANY_EXTENDED};
pub use config::DriverConfig;
pub use error::{Error, ErrorCode, ErrorKind, Result};
pub use layer::{ApduTransceive, ProtocolLayer, ProtocolStack};
pub use logger::{LogHandle, LogLevel, Logger, SharedLogger};
pub use response::{Response, status::StatusWord};
pub use transport::{DriverContext, DriverLayer, PhysicalDriver, TransportError};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        ApduTransceive, Bytes, BytesMut, Command, DriverConfig, DriverLayer, Error, ErrorKind, LogLevel, Logger,
        PhysicalDriver, ProtocolLayer, ProtocolStack, Response, Result, SharedLogger, StatusWord,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexports() {
        let cmd = Command::new(0x00, 0xA4, 0x04, 0x00);
        assert_eq!((cmd.cla, cmd.ins, cmd.p1, cmd.p2), (0x00, 0xA4, 0x04, 0x00));

        let resp = Response::success(Bytes::from_static(&[0x01, 0x02, 0x03]));
        assert!(resp.is_success());
        assert_eq!(resp.payload().as_ref(), &[0x01, 0x02, 0x03]);
        assert_eq!(resp.status(), StatusWord::new(0x90, 0x00));
    }
}
