//! Information field size encoding used by S(IFS) blocks

use bytes::Bytes;
use nexum_se_core::{Error, ErrorKind, Result, error::module};

use crate::function;

/// Largest information field size allowed by T=1'
pub const MAX_IFS: usize = 0xff9;

/// Encode an information field size: one byte up to 0xfe, two bytes above
pub fn encode(ifs: usize) -> Result<Bytes> {
    match ifs {
        1..=0xfe => Ok(Bytes::copy_from_slice(&[ifs as u8])),
        0xff..=MAX_IFS => Ok(Bytes::copy_from_slice(&(ifs as u16).to_be_bytes())),
        _ => Err(Error::new(module::T1PRIME, function::IFS_ENCODE, ErrorKind::IllegalArgument)),
    }
}

/// Decode an information field size from one or two bytes
pub fn decode(data: &[u8]) -> Result<usize> {
    let ifs = match data {
        [ifs] => *ifs as usize,
        [hi, lo] => u16::from_be_bytes([*hi, *lo]) as usize,
        _ => return Err(Error::new(module::T1PRIME, function::IFS_DECODE, ErrorKind::IllegalArgument)),
    };
    if ifs > MAX_IFS {
        return Err(Error::new(module::T1PRIME, function::IFS_DECODE, ErrorKind::IllegalArgument));
    }
    Ok(ifs)
}
