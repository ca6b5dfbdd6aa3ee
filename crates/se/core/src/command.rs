//! APDU command definitions
//!
//! Commands are encoded according to ISO/IEC 7816-3 with support for both the
//! short and the extended length forms.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, ErrorKind, Result, function, module};

/// Expected length type for APDU commands
pub type ExpectedLength = u32;

/// Le requesting up to 256 bytes, encoded as `00` in the short form
pub const LE_ANY: ExpectedLength = 0x100;

/// Le requesting up to 65536 bytes, encoded as `00 00` in the extended form
pub const LE_ANY_EXTENDED: ExpectedLength = 0x10000;

/// Largest data field of an extended length command
pub const MAX_EXTENDED_LC: usize = 0xffff;

/// Generic APDU command structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (optional)
    pub data: Option<Bytes>,
    /// Expected length (optional)
    pub le: Option<ExpectedLength>,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self { cla, ins, p1, p2, data: None, le: None }
    }

    /// Create a new command with expected response length (Le)
    pub const fn new_with_le(cla: u8, ins: u8, p1: u8, p2: u8, le: ExpectedLength) -> Self {
        Self { cla, ins, p1, p2, data: None, le: Some(le) }
    }

    /// Create a new command with data payload
    pub fn new_with_data<T: Into<Bytes>>(cla: u8, ins: u8, p1: u8, p2: u8, data: T) -> Self {
        Self { cla, ins, p1, p2, data: Some(data.into()), le: None }
    }

    /// Create a new command with both data and expected length
    pub fn new_with_data_and_le<T: Into<Bytes>>(
        cla: u8,
        ins: u8,
        p1: u8,
        p2: u8,
        data: T,
        le: ExpectedLength,
    ) -> Self {
        Self { cla, ins, p1, p2, data: Some(data.into()), le: Some(le) }
    }

    /// Set the data field
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the expected length field
    pub const fn with_le(mut self, le: ExpectedLength) -> Self {
        self.le = Some(le);
        self
    }

    /// Command data, empty when absent
    pub fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }

    /// Whether the extended length form is needed to encode this command
    pub fn is_extended(&self) -> bool {
        self.data().len() > 0xff || self.le.is_some_and(|le| le > LE_ANY)
    }

    /// Calculate length of serialized command
    pub fn command_length(&self) -> usize {
        let lc = self.data().len();
        let extended = self.is_extended();
        let mut length = 4;

        if lc > 0 {
            length += if extended { 3 } else { 1 } + lc;
        }
        if self.le.is_some() {
            length += match (extended, lc > 0) {
                (false, _) => 1,
                (true, true) => 2,
                (true, false) => 3,
            };
        }

        length
    }

    /// Convert to raw APDU bytes
    pub fn to_bytes(&self) -> Result<Bytes> {
        let data = self.data();
        if data.len() > MAX_EXTENDED_LC {
            return Err(Self::encode_error());
        }
        if let Some(le) = self.le
            && !(1..=LE_ANY_EXTENDED).contains(&le)
        {
            return Err(Self::encode_error());
        }

        let extended = self.is_extended();
        let mut buffer = BytesMut::with_capacity(self.command_length());

        // Header: CLA, INS, P1, P2
        buffer.put_u8(self.cla);
        buffer.put_u8(self.ins);
        buffer.put_u8(self.p1);
        buffer.put_u8(self.p2);

        if !data.is_empty() {
            if extended {
                buffer.put_u8(0x00);
                buffer.put_u16(data.len() as u16);
            } else {
                buffer.put_u8(data.len() as u8);
            }
            buffer.put_slice(data);
        }

        if let Some(le) = self.le {
            if extended {
                if data.is_empty() {
                    buffer.put_u8(0x00);
                }
                // 0x10000 wraps to 00 00
                buffer.put_u16(le as u16);
            } else {
                buffer.put_u8(le as u8);
            }
        }

        Ok(buffer.freeze())
    }

    /// Parse a command from raw bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let decode_error = |kind| Error::new(module::APDU, function::APDU_DECODE, kind);

        let [cla, ins, p1, p2, rest @ ..] = data else {
            return Err(decode_error(ErrorKind::TooLittleData));
        };
        let mut command = Self::new(*cla, *ins, *p1, *p2);

        match rest {
            // Case 1
            [] => return Ok(command),
            // Case 2S
            [le] => {
                command.le = Some(short_le(*le));
                return Ok(command);
            }
            // Case 2E
            [0x00, hi, lo] => {
                command.le = Some(extended_le(*hi, *lo));
                return Ok(command);
            }
            _ => {}
        }

        let (lc, extended, body) = match rest {
            [0x00, hi, lo, body @ ..] => (u16::from_be_bytes([*hi, *lo]) as usize, true, body),
            [0x00, ..] => return Err(decode_error(ErrorKind::LcMismatch)),
            [lc, body @ ..] => (*lc as usize, false, body),
            [] => return Err(decode_error(ErrorKind::ProgrammingError)),
        };
        if lc == 0 {
            return Err(decode_error(ErrorKind::LcMismatch));
        }
        if body.len() < lc {
            return Err(decode_error(ErrorKind::TooLittleData));
        }

        let (payload, trailer) = body.split_at(lc);
        command.data = Some(Bytes::copy_from_slice(payload));
        command.le = match (trailer, extended) {
            ([], _) => None,
            ([le], false) => Some(short_le(*le)),
            ([hi, lo], true) => Some(extended_le(*hi, *lo)),
            ([_], true) | ([_, _], false) => return Err(decode_error(ErrorKind::ExtendedLengthMismatch)),
            _ => return Err(decode_error(ErrorKind::LcMismatch)),
        };

        Ok(command)
    }

    fn encode_error() -> Error {
        Error::new(module::APDU, function::APDU_ENCODE, ErrorKind::IllegalArgument)
    }
}

const fn short_le(le: u8) -> ExpectedLength {
    if le == 0 { LE_ANY } else { le as ExpectedLength }
}

const fn extended_le(hi: u8, lo: u8) -> ExpectedLength {
    match u16::from_be_bytes([hi, lo]) {
        0 => LE_ANY_EXTENDED,
        le => le as ExpectedLength,
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CLA={:02X} INS={:02X} P1={:02X} P2={:02X}",
            self.cla, self.ins, self.p1, self.p2
        )?;
        if let Some(data) = &self.data {
            write!(f, " Lc={} DATA={}", data.len(), hex::encode(data))?;
        }
        if let Some(le) = self.le {
            write!(f, " Le={le}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_command_serialization() {
        let data = Bytes::from_static(&[0xA0, 0x00, 0x00, 0x01, 0x51, 0x00]);
        let cmd = Command::new_with_data_and_le(0x00, 0xA4, 0x04, 0x00, data, LE_ANY);
        assert_eq!(cmd.to_bytes().unwrap().as_ref(), hex!("00A4040006A0000001510000"));
        assert!(!cmd.is_extended());
    }

    #[test]
    fn test_command_length() {
        let cmd1 = Command::new(0x00, 0xB0, 0x00, 0x00);
        assert_eq!(cmd1.command_length(), 4);

        let cmd2 = Command::new_with_le(0x00, 0xB0, 0x00, 0x00, 0xFF);
        assert_eq!(cmd2.command_length(), 5);

        let data = Bytes::from_static(&[0x01, 0x02, 0x03]);
        let cmd3 = Command::new_with_data(0x00, 0xD6, 0x00, 0x00, data.clone());
        assert_eq!(cmd3.command_length(), 8);

        let cmd4 = Command::new_with_data_and_le(0x00, 0xD6, 0x00, 0x00, data, 0xFF);
        assert_eq!(cmd4.command_length(), 9);

        let cmd5 = Command::new_with_le(0x00, 0xB0, 0x00, 0x00, 0x1234);
        assert_eq!(cmd5.command_length(), 7);
        assert_eq!(cmd5.to_bytes().unwrap().len(), 7);
    }

    #[test]
    fn test_extended_encoding() {
        // Case 2E
        let cmd = Command::new_with_le(0x00, 0xB0, 0x00, 0x00, LE_ANY_EXTENDED);
        assert_eq!(cmd.to_bytes().unwrap().as_ref(), hex!("00B00000000000"));

        // Case 4E forced by Le
        let cmd = Command::new_with_data_and_le(0x80, 0xCA, 0x00, 0x00, hex!("0102").to_vec(), 0x0101);
        assert_eq!(cmd.to_bytes().unwrap().as_ref(), hex!("80CA000000000201020101"));

        // Case 3E forced by Lc
        let cmd = Command::new_with_data(0x00, 0xD6, 0x00, 0x00, vec![0xAB; 0x100]);
        let bytes = cmd.to_bytes().unwrap();
        assert_eq!(&bytes[..7], hex!("00D60000000100"));
        assert_eq!(bytes.len(), 7 + 0x100);
        assert_eq!(Command::from_bytes(&bytes).unwrap(), cmd);
    }

    #[test]
    fn test_encode_rejects_invalid_lengths() {
        let cmd = Command::new_with_le(0x00, 0xB0, 0x00, 0x00, 0);
        assert_eq!(cmd.to_bytes().unwrap_err().kind(), &ErrorKind::IllegalArgument);

        let cmd = Command::new_with_le(0x00, 0xB0, 0x00, 0x00, LE_ANY_EXTENDED + 1);
        assert_eq!(cmd.to_bytes().unwrap_err().code().decompose(), (0x10, 0x02, 0xfd));

        let cmd = Command::new_with_data(0x00, 0xD6, 0x00, 0x00, vec![0; MAX_EXTENDED_LC + 1]);
        assert!(cmd.to_bytes().is_err());
    }

    #[test]
    fn test_command_from_bytes() {
        // Case 1
        let cmd = Command::from_bytes(&hex!("00A40400")).unwrap();
        assert_eq!((cmd.cla, cmd.ins, cmd.p1, cmd.p2), (0x00, 0xA4, 0x04, 0x00));
        assert!(cmd.data.is_none());
        assert!(cmd.le.is_none());

        // Case 3S
        let cmd = Command::from_bytes(&hex!("00A4040003010203")).unwrap();
        assert_eq!(cmd.data(), hex!("010203"));
        assert!(cmd.le.is_none());

        // Case 4S
        let cmd = Command::from_bytes(&hex!("00A4040003010203FF")).unwrap();
        assert_eq!(cmd.data(), hex!("010203"));
        assert_eq!(cmd.le, Some(0xFF));

        // Case 2S, 00 means 256
        assert_eq!(Command::from_bytes(&hex!("00B00000FF")).unwrap().le, Some(0xFF));
        assert_eq!(Command::from_bytes(&hex!("00B0000000")).unwrap().le, Some(LE_ANY));

        // Case 2E
        assert_eq!(Command::from_bytes(&hex!("00B00000001234")).unwrap().le, Some(0x1234));
        assert_eq!(Command::from_bytes(&hex!("00B00000000000")).unwrap().le, Some(LE_ANY_EXTENDED));

        // Case 4E
        let cmd = Command::from_bytes(&hex!("00B0000000000201020000")).unwrap();
        assert_eq!(cmd.data(), hex!("0102"));
        assert_eq!(cmd.le, Some(LE_ANY_EXTENDED));
    }

    #[test]
    fn test_decode_errors() {
        let kind = |data: &[u8]| Command::from_bytes(data).unwrap_err().kind().clone();

        assert_eq!(kind(&hex!("00A404")), ErrorKind::TooLittleData);
        assert_eq!(kind(&hex!("00A4040005010203")), ErrorKind::TooLittleData);
        assert_eq!(kind(&hex!("00A404000000")), ErrorKind::LcMismatch);
        assert_eq!(kind(&hex!("00A404000201020304FF")), ErrorKind::LcMismatch);
        assert_eq!(kind(&hex!("00A40400020102FFFF")), ErrorKind::ExtendedLengthMismatch);
        assert_eq!(kind(&hex!("00A4040000000201020F")), ErrorKind::ExtendedLengthMismatch);
    }

    #[test]
    fn test_round_trip() {
        let commands = [
            Command::new(0x80, 0x50, 0x00, 0x00),
            Command::new_with_le(0x00, 0xB0, 0x00, 0x00, LE_ANY),
            Command::new_with_data(0x84, 0x82, 0x33, 0x00, hex!("0102030405060708").to_vec()),
            Command::new_with_data_and_le(0x80, 0x50, 0x00, 0x00, hex!("9070605040302010").to_vec(), LE_ANY),
            Command::new_with_data_and_le(0x00, 0xCA, 0x00, 0x00, vec![0x5A; 300], 0x2000),
        ];
        for cmd in commands {
            let bytes = cmd.to_bytes().unwrap();
            assert_eq!(bytes.len(), cmd.command_length());
            assert_eq!(Command::from_bytes(&bytes).unwrap(), cmd, "{cmd}");
        }
    }

    #[test]
    fn test_display() {
        let cmd = Command::new_with_data_and_le(0x80, 0x50, 0x00, 0x00, hex!("0102").to_vec(), LE_ANY);
        assert_eq!(cmd.to_string(), "CLA=80 INS=50 P1=00 P2=00 Lc=2 DATA=0102 Le=256");
    }
}
