//! GlobalPlatform T=1' block transport
//!
//! [`T1Prime`] is a [`ProtocolLayer`](nexum_se_core::ProtocolLayer) that
//! splits commands into I blocks, handles the supervisory exchanges of the
//! secure element (waiting time extension, IFS changes, aborts) and recovers
//! from transmission errors with R blocks and resynchronization.
//!
//! ```no_run
//! use nexum_se_core::prelude::*;
//! use nexum_se_t1prime::T1Prime;
//!
//! fn select<D: PhysicalDriver + 'static>(driver: D) -> Result<Response> {
//!     let mut stack = ProtocolStack::new(T1Prime::new(DriverLayer::new(driver, &DriverConfig::default())));
//!     stack.activate()?;
//!     stack.transceive_apdu(&Command::new_with_le(0x00, 0xA4, 0x04, 0x00, 0x100))
//! }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod block;
pub mod cip;
pub mod config;
pub mod ifs;
pub mod protocol;

pub use block::{Block, Pcb, RType, SType};
pub use cip::{Cip, Dllp, PhysicalLayer};
pub use config::T1PrimeConfig;
pub use protocol::{LinkState, T1Prime};

/// Function identifiers used in T=1' error codes
pub mod function {
    /// [`Block::validate_crc`](crate::Block::validate_crc)
    pub const VALIDATE_CRC: u8 = 0x50;
    /// [`Block::decode`](crate::Block::decode)
    pub const BLOCK_DECODE: u8 = 0x60;
    /// [`Block::encode`](crate::Block::encode)
    pub const BLOCK_ENCODE: u8 = 0x70;
    /// [`Cip::decode`](crate::Cip::decode)
    pub const CIP_DECODE: u8 = 0x30;
    /// [`Cip::validate`](crate::Cip::validate)
    pub const CIP_VALIDATE: u8 = 0x31;
    /// [`Dllp::decode`](crate::Dllp::decode)
    pub const DLLP_DECODE: u8 = 0x32;
    /// Physical layer parameter decoding
    pub const PLP_DECODE: u8 = 0x33;
    /// [`ifs::decode`](crate::ifs::decode)
    pub const IFS_DECODE: u8 = 0x34;
    /// [`ifs::encode`](crate::ifs::encode)
    pub const IFS_ENCODE: u8 = 0x35;
}

/// Prelude module containing commonly used types
pub mod prelude {
    pub use crate::{Block, LinkState, Pcb, RType, SType, T1Prime, T1PrimeConfig};
}
