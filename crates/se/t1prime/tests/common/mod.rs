//! Frame builders for scripting the secure element side of a T=1' link

#![allow(dead_code, unreachable_pub)]

use std::time::Duration;

use nexum_se_core::{Bytes, DriverConfig, DriverLayer, transport::mock::MockDriver};
use nexum_se_t1prime::{
    Block, RType, SType, T1Prime, T1PrimeConfig,
    block::NAD_SE_TO_HOST,
};

/// Frame as sent by the host
pub fn host(block: Block) -> Bytes {
    block.encode().unwrap()
}

/// Frame as sent by the secure element
pub fn se(block: Block) -> Bytes {
    block.with_nad(NAD_SE_TO_HOST).encode().unwrap()
}

/// Frame as sent by the secure element, with a corrupted checksum
pub fn se_corrupted(block: Block) -> Bytes {
    let mut frame = se(block).to_vec();
    if let Some(last) = frame.last_mut() {
        *last ^= 0xff;
    }
    frame.into()
}

pub fn i(ns: u8, more: bool, information: &[u8]) -> Block {
    Block::i(ns, more, Bytes::copy_from_slice(information))
}

pub fn r_ack(nr: u8) -> Block {
    Block::r(nr, RType::Ack)
}

pub fn r_crc(nr: u8) -> Block {
    Block::r(nr, RType::Crc)
}

pub fn s_request(kind: SType, information: &[u8]) -> Block {
    Block::s_request(kind, Bytes::copy_from_slice(information))
}

pub fn s_response(kind: SType, information: &[u8]) -> Block {
    Block::s_response(kind, Bytes::copy_from_slice(information))
}

/// Link parameters with short timings so failing exchanges finish quickly
pub fn fast_config() -> T1PrimeConfig {
    T1PrimeConfig::default().with_bwt(Duration::from_millis(1))
}

/// T=1' layer on top of `mock`
pub fn link(mock: &MockDriver, config: T1PrimeConfig) -> T1Prime {
    T1Prime::with_config(DriverLayer::new(mock.clone(), &DriverConfig::default()), config)
}
