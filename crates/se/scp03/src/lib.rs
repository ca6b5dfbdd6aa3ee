//! GlobalPlatform SCP03 secure channel
//!
//! This crate provides:
//!
//! - the NIST SP 800-108 counter mode KDF with AES-CMAC ([`kdf`])
//! - session key, cryptogram and ICV calculation ([`crypto`])
//! - the [`Scp03`] protocol layer, which authenticates against the secure
//!   element and then protects every APDU passing through it
//!
//! ```no_run
//! use nexum_se_core::prelude::*;
//! use nexum_se_scp03::{Scp03, SecurityLevel, StaticKeys};
//! use nexum_se_t1prime::T1Prime;
//!
//! fn get_data<D: PhysicalDriver + 'static>(driver: D, keys: &StaticKeys) -> Result<Response> {
//!     let mut scp = Scp03::new(T1Prime::new(DriverLayer::new(driver, &DriverConfig::default())));
//!     scp.activate()?;
//!     scp.open(keys, SecurityLevel::full())?;
//!     scp.transceive_apdu(&Command::new_with_le(0x80, 0xCA, 0x00, 0x66, 0x100))
//! }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod channel;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod kdf;
pub mod level;
pub mod session;

pub use channel::Scp03;
pub use config::Scp03Config;
pub use level::SecurityLevel;
pub use session::{InitializeUpdateResponse, KeyInformation, SessionKeys, StaticKeys, logical_channel_cla};

/// Function identifiers used in SCP03 error codes
pub mod function {
    /// Layer and key set up
    pub const INITIALIZE: u8 = 0x01;
    /// [`Scp03::initialize_update`](crate::Scp03::initialize_update)
    pub const INITIALIZE_UPDATE: u8 = 0x02;
    /// [`Scp03::external_authenticate`](crate::Scp03::external_authenticate)
    pub const EXTERNAL_AUTHENTICATE: u8 = 0x03;
    /// [`Scp03::begin_rmac_session`](crate::Scp03::begin_rmac_session)
    pub const BEGIN_RMAC: u8 = 0x04;
    /// [`Scp03::end_rmac_session`](crate::Scp03::end_rmac_session)
    pub const END_RMAC: u8 = 0x05;
    /// [`kdf`](crate::kdf) functions
    pub const KDF: u8 = 0x10;
}

/// Prelude module containing commonly used types
pub mod prelude {
    pub use crate::{Scp03, Scp03Config, SecurityLevel, SessionKeys, StaticKeys};
}
