//! T=1' block framing
//!
//! ```text
//! NAD(1) PCB(1) LEN(2) INF(LEN) CRC(2)
//! ```
//!
//! LEN and CRC are big endian. The CRC is CRC-16/X.25 over everything before it.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use derive_more::Display;
use nexum_se_core::{
    Error, ErrorKind, Result,
    crc::crc16_ccitt_x25,
    error::module,
};

use crate::function;

/// Node address used by the host when talking to the secure element
pub const NAD_HOST_TO_SE: u8 = 0x21;

/// Node address used by the secure element when answering the host
pub const NAD_SE_TO_HOST: u8 = 0x12;

/// NAD, PCB and LEN
pub const PROLOGUE_LEN: usize = 4;

/// CRC
pub const EPILOGUE_LEN: usize = 2;

/// Shortest valid frame (empty information field)
pub const MIN_BLOCK_LEN: usize = PROLOGUE_LEN + EPILOGUE_LEN;

/// Type of an R block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[repr(u8)]
pub enum RType {
    /// Error free acknowledgement
    #[display("ACK")]
    Ack = 0x00,
    /// CRC error in the last received block
    #[display("CRC")]
    Crc = 0x01,
    /// Any other error
    #[display("ERROR")]
    Other = 0x02,
}

/// Type of an S block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[repr(u8)]
pub enum SType {
    /// Resynchronization
    #[display("RESYNCH")]
    Resynch = 0x00,
    /// Information field size negotiation
    #[display("IFS")]
    Ifs = 0x01,
    /// Abort chaining
    #[display("ABORT")]
    Abort = 0x02,
    /// Waiting time extension
    #[display("WTX")]
    Wtx = 0x03,
    /// Communication interface parameters
    #[display("CIP")]
    Cip = 0x04,
    /// End of APDU session
    #[display("RELEASE")]
    Release = 0x06,
    /// Secure element warm reset
    #[display("SWR")]
    Swr = 0x0f,
}

impl SType {
    /// Map the low five PCB bits to a known S block type
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x00 => Some(Self::Resynch),
            0x01 => Some(Self::Ifs),
            0x02 => Some(Self::Abort),
            0x03 => Some(Self::Wtx),
            0x04 => Some(Self::Cip),
            0x06 => Some(Self::Release),
            0x0f => Some(Self::Swr),
            _ => None,
        }
    }
}

/// Protocol control byte
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pcb(pub u8);

impl Pcb {
    /// I block with send sequence number `ns` and the more data bit
    pub const fn i_block(ns: u8, more: bool) -> Self {
        Self(((ns & 0x01) << 6) | if more { 0x20 } else { 0x00 })
    }

    /// R block acknowledging with receive sequence number `nr`
    pub const fn r_block(nr: u8, kind: RType) -> Self {
        Self(0x80 | ((nr & 0x01) << 4) | kind as u8)
    }

    /// S block request
    pub const fn s_request(kind: SType) -> Self {
        Self(0xC0 | kind as u8)
    }

    /// S block response
    pub const fn s_response(kind: SType) -> Self {
        Self(0xE0 | kind as u8)
    }

    /// Information block
    pub const fn is_i(&self) -> bool {
        self.0 & 0x80 == 0
    }

    /// Receive ready block
    pub const fn is_r(&self) -> bool {
        self.0 & 0xC0 == 0x80
    }

    /// Supervisory block
    pub const fn is_s(&self) -> bool {
        self.0 & 0xC0 == 0xC0
    }

    /// Send sequence number of an I block
    pub const fn ns(&self) -> u8 {
        (self.0 >> 6) & 0x01
    }

    /// Whether an I block is followed by further chained blocks
    pub const fn has_more(&self) -> bool {
        self.0 & 0x20 != 0
    }

    /// Receive sequence number of an R block
    pub const fn nr(&self) -> u8 {
        (self.0 >> 4) & 0x01
    }

    /// Error type bits of an R block
    pub const fn r_type(&self) -> u8 {
        self.0 & 0x0f
    }

    /// Whether an S block is a request
    pub const fn is_request(&self) -> bool {
        self.0 & 0x20 == 0
    }

    /// Type of an S block
    pub const fn s_type(&self) -> Option<SType> {
        SType::from_bits(self.0 & 0x1f)
    }

    /// Whether this is an S request of the given type
    pub const fn is_s_request(&self, kind: SType) -> bool {
        self.0 == Self::s_request(kind).0
    }

    /// Whether this is an S response of the given type
    pub const fn is_s_response(&self, kind: SType) -> bool {
        self.0 == Self::s_response(kind).0
    }
}

impl fmt::Debug for Pcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pcb({:#04x} {self})", self.0)
    }
}

impl fmt::Display for Pcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_i() {
            write!(f, "I({}, {})", self.ns(), u8::from(self.has_more()))
        } else if self.is_r() {
            match self.r_type() {
                0x00 => write!(f, "R({}, ACK)", self.nr()),
                0x01 => write!(f, "R({}, CRC)", self.nr()),
                _ => write!(f, "R({}, ERROR)", self.nr()),
            }
        } else {
            let direction = if self.is_request() { "request" } else { "response" };
            match self.s_type() {
                Some(kind) => write!(f, "S({kind} {direction})"),
                None => write!(f, "S({:#04x} {direction})", self.0 & 0x1f),
            }
        }
    }
}

/// A decoded T=1' block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Node address
    pub nad: u8,
    /// Protocol control byte
    pub pcb: Pcb,
    /// Information field
    pub information: Bytes,
}

impl Block {
    /// Create a block addressed from the host to the secure element
    pub fn new(pcb: Pcb, information: impl Into<Bytes>) -> Self {
        Self { nad: NAD_HOST_TO_SE, pcb, information: information.into() }
    }

    /// I block
    pub fn i(ns: u8, more: bool, information: impl Into<Bytes>) -> Self {
        Self::new(Pcb::i_block(ns, more), information)
    }

    /// R block without information field
    pub fn r(nr: u8, kind: RType) -> Self {
        Self::new(Pcb::r_block(nr, kind), Bytes::new())
    }

    /// S request
    pub fn s_request(kind: SType, information: impl Into<Bytes>) -> Self {
        Self::new(Pcb::s_request(kind), information)
    }

    /// S response
    pub fn s_response(kind: SType, information: impl Into<Bytes>) -> Self {
        Self::new(Pcb::s_response(kind), information)
    }

    /// Use a different node address
    pub const fn with_nad(mut self, nad: u8) -> Self {
        self.nad = nad;
        self
    }

    /// Checksum over NAD, PCB, LEN and INF
    pub fn crc(&self) -> u16 {
        let mut prologue = [self.nad, self.pcb.0, 0, 0];
        prologue[2..].copy_from_slice(&(self.information.len() as u16).to_be_bytes());
        let mut covered = Vec::with_capacity(PROLOGUE_LEN + self.information.len());
        covered.extend_from_slice(&prologue);
        covered.extend_from_slice(&self.information);
        crc16_ccitt_x25(&covered)
    }

    /// Encode to wire format
    pub fn encode(&self) -> Result<Bytes> {
        let Ok(len) = u16::try_from(self.information.len()) else {
            return Err(Error::new(module::T1PRIME, function::BLOCK_ENCODE, ErrorKind::IllegalArgument));
        };

        let mut buffer = BytesMut::with_capacity(MIN_BLOCK_LEN + self.information.len());
        buffer.put_u8(self.nad);
        buffer.put_u8(self.pcb.0);
        buffer.put_u16(len);
        buffer.put_slice(&self.information);
        buffer.put_u16(crc16_ccitt_x25(&buffer));
        Ok(buffer.freeze())
    }

    /// Decode from wire format
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_BLOCK_LEN {
            return Err(Error::new(module::T1PRIME, function::BLOCK_DECODE, ErrorKind::TooLittleData));
        }

        let len = u16::from_be_bytes([data[2], data[3]]) as usize;
        if data.len() != MIN_BLOCK_LEN + len {
            return Err(Error::new(module::T1PRIME, function::BLOCK_DECODE, ErrorKind::InformationSizeMismatch));
        }

        let block = Self {
            nad: data[0],
            pcb: Pcb(data[1]),
            information: Bytes::copy_from_slice(&data[PROLOGUE_LEN..PROLOGUE_LEN + len]),
        };
        let expected = u16::from_be_bytes([data[PROLOGUE_LEN + len], data[PROLOGUE_LEN + len + 1]]);
        block
            .validate_crc(expected)
            .map_err(|e| Error::new(module::T1PRIME, function::BLOCK_DECODE, e.kind().clone()))?;

        Ok(block)
    }

    /// Check the block against a received checksum
    pub fn validate_crc(&self, expected: u16) -> Result<()> {
        if self.crc() != expected {
            return Err(Error::new(module::T1PRIME, function::VALIDATE_CRC, ErrorKind::InvalidCrc));
        }
        Ok(())
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x} {} [{}]", self.nad, self.pcb, hex::encode(&self.information))
    }
}
