//! SCP03 security levels

use std::{fmt, ops::BitOr};

/// Security level bitmask as carried in P1 of EXTERNAL AUTHENTICATE
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SecurityLevel(u8);

impl SecurityLevel {
    /// Command MAC
    pub const C_MAC: u8 = 0x01;
    /// Command data decryption by the card
    pub const C_DEC: u8 = 0x02;
    /// Response MAC
    pub const R_MAC: u8 = 0x10;
    /// Response data encryption by the card
    pub const R_ENC: u8 = 0x20;
    /// Bits SCP03 defines
    pub const MASK: u8 = 0x33;

    /// Wrap a raw level byte
    pub const fn new(bits: u8) -> Self {
        Self(bits)
    }

    /// No secure messaging
    pub const fn none() -> Self {
        Self(0)
    }

    /// Command MAC only
    pub const fn c_mac() -> Self {
        Self(Self::C_MAC)
    }

    /// Command MAC and command encryption
    pub const fn c_enc() -> Self {
        Self(Self::C_MAC | Self::C_DEC)
    }

    /// Response MAC
    pub const fn r_mac() -> Self {
        Self(Self::R_MAC)
    }

    /// Response MAC and response encryption
    pub const fn r_enc() -> Self {
        Self(Self::R_MAC | Self::R_ENC)
    }

    /// Every protection in both directions
    pub const fn full() -> Self {
        Self(Self::MASK)
    }

    /// Raw level byte
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Level with undefined bits cleared
    pub const fn sanitized(&self) -> Self {
        Self(self.0 & Self::MASK)
    }

    /// Command protection part
    pub const fn command(&self) -> Self {
        Self(self.0 & 0x03)
    }

    /// Response protection part
    pub const fn response(&self) -> Self {
        Self(self.0 & 0x30)
    }

    /// Whether commands carry a MAC
    pub const fn has_c_mac(&self) -> bool {
        self.0 & Self::C_MAC != 0
    }

    /// Whether command data is encrypted
    pub const fn has_c_dec(&self) -> bool {
        self.0 & Self::C_DEC != 0
    }

    /// Whether responses carry a MAC
    pub const fn has_r_mac(&self) -> bool {
        self.0 & Self::R_MAC != 0
    }

    /// Whether response data is encrypted
    pub const fn has_r_enc(&self) -> bool {
        self.0 & Self::R_ENC != 0
    }

    /// Whether no protection is active
    pub const fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl From<u8> for SecurityLevel {
    fn from(bits: u8) -> Self {
        Self(bits)
    }
}

impl From<SecurityLevel> for u8 {
    fn from(level: SecurityLevel) -> Self {
        level.0
    }
}

impl BitOr for SecurityLevel {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return write!(f, "none");
        }

        let names = [
            (Self::C_MAC, "C-MAC"),
            (Self::C_DEC, "C-DEC"),
            (Self::R_MAC, "R-MAC"),
            (Self::R_ENC, "R-ENC"),
        ];
        let active: Vec<_> = names.iter().filter(|(bit, _)| self.0 & bit != 0).map(|(_, name)| *name).collect();
        write!(f, "{}", active.join("|"))?;

        if self.0 & !Self::MASK != 0 {
            write!(f, " (0x{:02x})", self.0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        assert_eq!(SecurityLevel::c_enc().bits(), 0x03);
        assert_eq!(SecurityLevel::r_enc().bits(), 0x30);
        assert_eq!(SecurityLevel::full(), SecurityLevel::c_enc() | SecurityLevel::r_enc());
        assert_eq!((SecurityLevel::c_mac() | SecurityLevel::r_mac()).bits(), 0x11);
    }

    #[test]
    fn test_predicates() {
        let level = SecurityLevel::new(0x13);
        assert!(level.has_c_mac());
        assert!(level.has_c_dec());
        assert!(level.has_r_mac());
        assert!(!level.has_r_enc());
        assert_eq!(level.command().bits(), 0x03);
        assert_eq!(level.response().bits(), 0x10);
        assert!(SecurityLevel::none().is_none());
    }

    #[test]
    fn test_sanitized() {
        assert_eq!(SecurityLevel::new(0xff).sanitized(), SecurityLevel::full());
        assert_eq!(SecurityLevel::new(0x44).sanitized(), SecurityLevel::none());
    }

    #[test]
    fn test_display() {
        assert_eq!(SecurityLevel::none().to_string(), "none");
        assert_eq!(SecurityLevel::full().to_string(), "C-MAC|C-DEC|R-MAC|R-ENC");
        assert_eq!(SecurityLevel::new(0x81).to_string(), "C-MAC (0x81)");
    }
}
