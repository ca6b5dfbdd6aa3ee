//! Communication interface parameters returned by S(CIP)
//!
//! ```text
//! version(1) iin_len(1) iin plid(1) plp_len(1) plp dllp_len(1) dllp hb_len(1) hb
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use nexum_se_core::{Error, ErrorKind, Result, error::module};

use crate::function;

/// Physical layer identifier of SPI
pub const PLID_SPI: u8 = 0x01;

/// Physical layer identifier of I2C
pub const PLID_I2C: u8 = 0x02;

const SPI_PLP_LEN: usize = 12;
const I2C_PLP_LEN: usize = 8;
const DLLP_LEN: usize = 4;

/// Communication interface parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cip {
    /// Protocol version
    pub version: u8,
    /// Issuer identification number
    pub iin: Bytes,
    /// Physical layer identifier
    pub plid: u8,
    /// Physical layer parameters
    pub plp: Bytes,
    /// Data-link layer parameters
    pub dllp: Bytes,
    /// Historical bytes
    pub historical_bytes: Bytes,
}

/// Split a length prefixed field off `data`, requiring `trailing` more bytes after it
fn take_field<'a>(data: &mut &'a [u8], trailing: usize) -> Result<&'a [u8]> {
    let too_little = || Error::new(module::T1PRIME, function::CIP_DECODE, ErrorKind::TooLittleData);
    let (&len, rest) = data.split_first().ok_or_else(too_little)?;
    let len = len as usize;
    if rest.len() < len + trailing {
        return Err(too_little());
    }
    let (field, rest) = rest.split_at(len);
    *data = rest;
    Ok(field)
}

impl Cip {
    /// Decode and validate
    pub fn decode(data: &[u8]) -> Result<Self> {
        let too_little = || Error::new(module::T1PRIME, function::CIP_DECODE, ErrorKind::TooLittleData);
        let (&version, mut rest) = data.split_first().ok_or_else(too_little)?;

        // plid, plp_len, dllp_len and hb_len follow
        let iin = take_field(&mut rest, 4)?;
        let (&plid, mut rest) = rest.split_first().ok_or_else(too_little)?;
        let plp = take_field(&mut rest, 2)?;
        let dllp = take_field(&mut rest, 1)?;

        let (&hb_len, historical_bytes) = rest.split_first().ok_or_else(too_little)?;
        if historical_bytes.len() != hb_len as usize {
            return Err(Error::new(module::T1PRIME, function::CIP_DECODE, ErrorKind::InvalidLength));
        }

        let cip = Self {
            version,
            iin: Bytes::copy_from_slice(iin),
            plid,
            plp: Bytes::copy_from_slice(plp),
            dllp: Bytes::copy_from_slice(dllp),
            historical_bytes: Bytes::copy_from_slice(historical_bytes),
        };
        cip.validate()?;
        Ok(cip)
    }

    /// Check field lengths and the physical layer identifier
    pub fn validate(&self) -> Result<()> {
        let error = |kind| Error::new(module::T1PRIME, function::CIP_VALIDATE, kind);

        if !(3..=4).contains(&self.iin.len()) {
            return Err(error(ErrorKind::InvalidLength));
        }
        let min_plp = match self.plid {
            PLID_SPI => SPI_PLP_LEN,
            PLID_I2C => I2C_PLP_LEN,
            _ => return Err(error(ErrorKind::InvalidPlid)),
        };
        if self.plp.len() < min_plp || self.dllp.len() < DLLP_LEN {
            return Err(error(ErrorKind::TooLittleData));
        }
        Ok(())
    }

    /// Encode to wire format
    pub fn encode(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(
            5 + self.iin.len() + self.plp.len() + self.dllp.len() + self.historical_bytes.len(),
        );
        buffer.put_u8(self.version);
        for (i, field) in [&self.iin, &self.plp, &self.dllp, &self.historical_bytes].into_iter().enumerate() {
            if i == 1 {
                buffer.put_u8(self.plid);
            }
            buffer.put_u8(field.len() as u8);
            buffer.put_slice(field);
        }
        buffer.freeze()
    }

    /// Data-link layer parameters
    pub fn data_link_parameters(&self) -> Result<Dllp> {
        Dllp::decode(&self.dllp)
    }

    /// Physical layer parameters matching the identifier
    pub fn physical_layer(&self) -> Result<PhysicalLayer> {
        match self.plid {
            PLID_SPI => SpiPlp::decode(&self.plp).map(PhysicalLayer::Spi),
            PLID_I2C => I2cPlp::decode(&self.plp).map(PhysicalLayer::I2c),
            _ => Err(Error::new(module::T1PRIME, function::CIP_VALIDATE, ErrorKind::InvalidPlid)),
        }
    }
}

/// Data-link layer parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dllp {
    /// Block waiting time in ms
    pub bwt: u16,
    /// Initial information field size of the secure element
    pub ifsc: u16,
}

impl Dllp {
    /// Decode from at least four bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        match data {
            [b0, b1, i0, i1, ..] => {
                Ok(Self { bwt: u16::from_be_bytes([*b0, *b1]), ifsc: u16::from_be_bytes([*i0, *i1]) })
            }
            _ => Err(Error::new(module::T1PRIME, function::DLLP_DECODE, ErrorKind::TooLittleData)),
        }
    }
}

/// I2C physical layer parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct I2cPlp {
    /// Reserved
    pub configuration: u8,
    /// Power wake-up time in ms
    pub pwt: u8,
    /// Maximum clock frequency in kHz
    pub mcf: u16,
    /// Power saving timeout in ms
    pub pst: u8,
    /// Minimum polling time in multiples of 100 µs
    pub mpot: u8,
    /// Read/write guard time in µs
    pub rwgt: u16,
}

impl I2cPlp {
    /// Decode from at least eight bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        match data {
            [configuration, pwt, m0, m1, pst, mpot, r0, r1, ..] => Ok(Self {
                configuration: *configuration,
                pwt: *pwt,
                mcf: u16::from_be_bytes([*m0, *m1]),
                pst: *pst,
                mpot: *mpot,
                rwgt: u16::from_be_bytes([*r0, *r1]),
            }),
            _ => Err(Error::new(module::T1PRIME, function::PLP_DECODE, ErrorKind::TooLittleData)),
        }
    }
}

/// SPI physical layer parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpiPlp {
    /// Reserved
    pub configuration: u8,
    /// Power wake-up time in ms
    pub pwt: u8,
    /// Maximum clock frequency in kHz
    pub mcf: u16,
    /// Power saving timeout in ms
    pub pst: u8,
    /// Minimum polling time in multiples of 100 µs
    pub mpot: u8,
    /// Secure element guard time in µs
    pub segt: u16,
    /// Maximum secure element access length
    pub seal: u16,
    /// Wake-up time
    pub wut: u16,
}

impl SpiPlp {
    /// Decode from at least twelve bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        match data {
            [configuration, pwt, m0, m1, pst, mpot, g0, g1, s0, s1, w0, w1, ..] => Ok(Self {
                configuration: *configuration,
                pwt: *pwt,
                mcf: u16::from_be_bytes([*m0, *m1]),
                pst: *pst,
                mpot: *mpot,
                segt: u16::from_be_bytes([*g0, *g1]),
                seal: u16::from_be_bytes([*s0, *s1]),
                wut: u16::from_be_bytes([*w0, *w1]),
            }),
            _ => Err(Error::new(module::T1PRIME, function::PLP_DECODE, ErrorKind::TooLittleData)),
        }
    }
}

/// Decoded physical layer parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalLayer {
    /// SPI bus
    Spi(SpiPlp),
    /// I2C bus
    I2c(I2cPlp),
}

impl PhysicalLayer {
    /// Maximum clock frequency in kHz
    pub const fn mcf(&self) -> u16 {
        match self {
            Self::Spi(plp) => plp.mcf,
            Self::I2c(plp) => plp.mcf,
        }
    }

    /// Minimum polling time in multiples of 100 µs
    pub const fn mpot(&self) -> u8 {
        match self {
            Self::Spi(plp) => plp.mpot,
            Self::I2c(plp) => plp.mpot,
        }
    }
}
