//! Status word trailer of APDU responses

use std::fmt;

use tracing::Level;

/// Status Word (SW1-SW2) from an APDU response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatusWord {
    /// First status byte (SW1)
    pub sw1: u8,
    /// Second status byte (SW2)
    pub sw2: u8,
}

impl StatusWord {
    /// Success (90 00)
    pub const SUCCESS: Self = Self::new(0x90, 0x00);

    /// Authentication of host cryptogram failed (63 00)
    pub const AUTHENTICATION_FAILED: Self = Self::new(0x63, 0x00);

    /// Referenced data not found (6A 88)
    pub const REFERENCED_DATA_NOT_FOUND: Self = Self::new(0x6A, 0x88);

    /// Create a new status word
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Create from a u16 value (SW1 | SW2)
    pub const fn from_u16(status: u16) -> Self {
        Self {
            sw1: (status >> 8) as u8,
            sw2: status as u8,
        }
    }

    /// Convert to a u16 value (SW1 | SW2)
    pub const fn to_u16(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Check if this status word indicates success (90 00)
    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Check if this status word is a warning (62 XX or 63 XX)
    ///
    /// Warnings still carry a response MAC under SCP03.
    pub const fn is_warning(&self) -> bool {
        self.sw1 == 0x62 || self.sw1 == 0x63
    }

    /// Check if this status word indicates referenced data not found (6A 88)
    pub const fn is_referenced_data_not_found(&self) -> bool {
        self.sw1 == 0x6A && self.sw2 == 0x88
    }

    /// Check if this status word indicates authentication of the host cryptogram failed (63 00)
    pub const fn is_authentication_failed(&self) -> bool {
        self.sw1 == 0x63 && self.sw2 == 0x00
    }

    /// GlobalPlatform general error reason for this status word
    ///
    /// Returns 0xff when the status word is not one of the general error
    /// conditions.
    pub const fn general_error_reason(&self) -> u8 {
        match self.to_u16() {
            0x6400 => 0x88,
            0x6700 => 0x89,
            0x6881 => 0x8A,
            0x6982 => 0x8B,
            0x6985 => 0x8C,
            0x6A86 => 0x8D,
            0x6D00 => 0x8E,
            0x6E00 => 0x8F,
            _ => 0xFF,
        }
    }

    /// Get the appropriate tracing level for this status word
    pub const fn tracing_level(&self) -> Level {
        if self.is_success() {
            Level::DEBUG
        } else if self.is_warning() {
            Level::INFO
        } else {
            Level::WARN
        }
    }

    /// Get a description of this status word
    pub const fn description(&self) -> &'static str {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) => "Success",
            (0x61, _) => "More data available",
            (0x62, 0x00) => "No information given",
            (0x63, 0x00) => "Authentication of host cryptogram failed",
            (0x63, n) if (n & 0xF0) == 0xC0 => "Counter value",
            (0x64, 0x00) => "No specific diagnosis",
            (0x65, 0x81) => "Memory failure",
            (0x67, 0x00) => "Wrong length in Lc",
            (0x68, 0x81) => "Logical channel not supported or not active",
            (0x68, 0x82) => "Secure messaging not supported",
            (0x69, 0x82) => "Security status not satisfied",
            (0x69, 0x85) => "Conditions of use not satisfied",
            (0x6A, 0x80) => "Incorrect parameters in the data field",
            (0x6A, 0x86) => "Incorrect parameters P1-P2",
            (0x6A, 0x88) => "Referenced data not found",
            (0x6D, 0x00) => "Instruction code not supported or invalid",
            (0x6E, 0x00) => "Class not supported",
            (0x6F, 0x00) => "No precise diagnosis",
            _ => "Unknown status word",
        }
    }
}

impl From<(u8, u8)> for StatusWord {
    fn from(tuple: (u8, u8)) -> Self {
        Self::new(tuple.0, tuple.1)
    }
}

impl From<u16> for StatusWord {
    fn from(status: u16) -> Self {
        Self::from_u16(status)
    }
}

impl From<StatusWord> for u16 {
    fn from(status: StatusWord) -> Self {
        status.to_u16()
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} {:02X}", self.sw1, self.sw2)
    }
}

/// Common status words
pub mod common {
    use super::StatusWord;

    /// Success (90 00)
    pub const SUCCESS: StatusWord = StatusWord::SUCCESS;

    /// Authentication of host cryptogram failed (63 00)
    pub const AUTHENTICATION_FAILED: StatusWord = StatusWord::AUTHENTICATION_FAILED;

    /// Wrong length (67 00)
    pub const WRONG_LENGTH: StatusWord = StatusWord::new(0x67, 0x00);

    /// Security condition not satisfied (69 82)
    pub const SECURITY_CONDITION_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x82);

    /// Conditions of use not satisfied (69 85)
    pub const CONDITIONS_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x85);

    /// Incorrect parameters P1-P2 (6A 86)
    pub const INCORRECT_P1P2: StatusWord = StatusWord::new(0x6A, 0x86);

    /// Referenced data not found (6A 88)
    pub const REFERENCED_DATA_NOT_FOUND: StatusWord = StatusWord::REFERENCED_DATA_NOT_FOUND;

    /// Invalid instruction (6D 00)
    pub const INVALID_INSTRUCTION: StatusWord = StatusWord::new(0x6D, 0x00);

    /// Class not supported (6E 00)
    pub const CLASS_NOT_SUPPORTED: StatusWord = StatusWord::new(0x6E, 0x00);
}
