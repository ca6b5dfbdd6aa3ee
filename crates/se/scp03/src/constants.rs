//! Constants of the SCP03 protocol

/// Length of the host and card challenges
pub const CHALLENGE_LEN: usize = 8;

/// Length of the card and host cryptograms
pub const CRYPTOGRAM_LEN: usize = 8;

/// Length of a full AES-CMAC and of the chaining value
pub const CMAC_LEN: usize = 16;

/// Length of the truncated MAC appended to commands and responses
pub const MAC_LEN: usize = 8;

/// Highest logical channel that can be encoded in a class byte
pub const MAX_LOGICAL_CHANNEL: u8 = 19;

/// Data derivation constants (GPC 2.3 Amendment D, 6.2.1)
pub mod derivation {
    /// Card cryptogram
    pub const CARD_CRYPTOGRAM: u8 = 0x00;
    /// Host cryptogram
    pub const HOST_CRYPTOGRAM: u8 = 0x01;
    /// Session encryption key
    pub const S_ENC: u8 = 0x04;
    /// Session command MAC key
    pub const S_MAC: u8 = 0x06;
    /// Session response MAC key
    pub const S_RMAC: u8 = 0x07;
}

/// Instruction bytes
pub mod ins {
    /// INITIALIZE UPDATE
    pub const INITIALIZE_UPDATE: u8 = 0x50;
    /// EXTERNAL AUTHENTICATE
    pub const EXTERNAL_AUTHENTICATE: u8 = 0x82;
    /// BEGIN R-MAC SESSION
    pub const BEGIN_RMAC_SESSION: u8 = 0x7A;
    /// END R-MAC SESSION
    pub const END_RMAC_SESSION: u8 = 0x78;
}

/// GlobalPlatform proprietary class byte
pub const CLA_GP: u8 = 0x80;

/// Bit of the SCP parameter signalling pseudo-random card challenges
pub const SCP_PARAMETER_PSEUDO_RANDOM_CHALLENGE: u8 = 0x10;
