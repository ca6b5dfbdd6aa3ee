//! Subcommand implementations, each rendering its result as text

use std::fmt::Write as _;

use clap::ValueEnum;
use derive_more::Deref;
use hex::FromHex;
use nexum_se_core::{
    Command, Result,
    crc::{crc16_ccitt_x25, crc16_mcrf4xx, crc16_t1gd, lrc8},
};
use nexum_se_scp03::{
    SessionKeys, StaticKeys,
    crypto::{card_cryptogram, host_cryptogram},
    function,
};
use nexum_se_t1prime::{Block, Cip, PhysicalLayer};
use tracing::debug;

/// Bytes given on the command line in hex
#[derive(Debug, Clone, PartialEq, Eq, Deref)]
pub(crate) struct HexBytes(Vec<u8>);

/// An 8 byte SCP03 challenge
pub(crate) type Challenge = [u8; 8];

fn normalize(input: &str) -> String {
    let input: String = input.chars().filter(|c| !c.is_whitespace() && *c != ':').collect();
    input.strip_prefix("0x").map(str::to_owned).unwrap_or(input)
}

/// Parse hex, ignoring whitespace, colons and a `0x` prefix
pub(crate) fn parse_hex(input: &str) -> std::result::Result<HexBytes, hex::FromHexError> {
    hex::decode(normalize(input)).map(HexBytes)
}

pub(crate) fn parse_challenge(input: &str) -> std::result::Result<Challenge, hex::FromHexError> {
    Challenge::from_hex(normalize(input))
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub(crate) enum CrcVariant {
    /// CRC-16 CCITT X.25, the T=1' block checksum
    X25,
    /// CRC-16 MCRF4xx
    Mcrf4xx,
    /// CRC-16 of the G+D T=1 flavour
    T1gd,
    /// 8 bit LRC
    Lrc,
}

pub(crate) fn crc(variant: CrcVariant, data: &[u8]) -> String {
    match variant {
        CrcVariant::X25 => format!("{:04x}", crc16_ccitt_x25(data)),
        CrcVariant::Mcrf4xx => format!("{:04x}", crc16_mcrf4xx(data)),
        CrcVariant::T1gd => format!("{:04x}", crc16_t1gd(data)),
        CrcVariant::Lrc => format!("{:02x}", lrc8(data)),
    }
}

pub(crate) fn derive_session_keys(
    enc: &[u8],
    mac: &[u8],
    host_challenge: &Challenge,
    card_challenge: &Challenge,
) -> Result<String> {
    let static_keys = StaticKeys::new(enc, mac, mac)?;
    let keys = SessionKeys::derive(&static_keys, host_challenge, card_challenge)?;
    let card = card_cryptogram(keys.mac(), host_challenge, card_challenge, function::EXTERNAL_AUTHENTICATE)?;
    let host = host_cryptogram(keys.mac(), host_challenge, card_challenge, function::EXTERNAL_AUTHENTICATE)?;

    Ok(format!(
        "S-ENC:           {}\nS-MAC:           {}\nS-RMAC:          {}\ncard cryptogram: {}\nhost cryptogram: {}",
        hex::encode(keys.enc()),
        hex::encode(keys.mac()),
        hex::encode(keys.rmac()),
        hex::encode(card),
        hex::encode(host),
    ))
}

pub(crate) fn decode_block(frame: &[u8]) -> Result<String> {
    let block = Block::decode(frame)?;
    debug!(%block, "decoded block");

    let mut out = String::new();
    let _ = writeln!(out, "NAD: {:02x}", block.nad);
    let _ = writeln!(out, "PCB: {:02x} {}", block.pcb.0, block.pcb);
    let _ = writeln!(out, "LEN: {}", block.information.len());
    if !block.information.is_empty() {
        let _ = writeln!(out, "INF: {}", hex::encode(&block.information));
    }
    if block.pcb.is_i()
        && !block.pcb.has_more()
        && let Ok(command) = Command::from_bytes(&block.information)
    {
        let _ = writeln!(out, "APDU: {command}");
    }
    let _ = write!(out, "CRC: {:04x}", block.crc());
    Ok(out)
}

pub(crate) fn decode_cip(data: &[u8]) -> Result<String> {
    let cip = Cip::decode(data)?;
    let dllp = cip.data_link_parameters()?;

    let mut out = String::new();
    let _ = writeln!(out, "version: {}", cip.version);
    let _ = writeln!(out, "IIN: {}", hex::encode(&cip.iin));
    match cip.physical_layer()? {
        PhysicalLayer::I2c(plp) => {
            let _ = writeln!(out, "physical layer: I2C");
            let _ = writeln!(out, "  PWT: {} ms", plp.pwt);
            let _ = writeln!(out, "  MCF: {} kHz", plp.mcf);
            let _ = writeln!(out, "  PST: {} ms", plp.pst);
            let _ = writeln!(out, "  MPOT: {} x 100 us", plp.mpot);
            let _ = writeln!(out, "  RWGT: {} us", plp.rwgt);
        }
        PhysicalLayer::Spi(plp) => {
            let _ = writeln!(out, "physical layer: SPI");
            let _ = writeln!(out, "  PWT: {} ms", plp.pwt);
            let _ = writeln!(out, "  MCF: {} kHz", plp.mcf);
            let _ = writeln!(out, "  PST: {} ms", plp.pst);
            let _ = writeln!(out, "  MPOT: {} x 100 us", plp.mpot);
            let _ = writeln!(out, "  SEGT: {} us", plp.segt);
            let _ = writeln!(out, "  SEAL: {}", plp.seal);
            let _ = writeln!(out, "  WUT: {}", plp.wut);
        }
    }
    let _ = writeln!(out, "BWT: {} ms", dllp.bwt);
    let _ = writeln!(out, "IFSC: {}", dllp.ifsc);
    let _ = write!(out, "historical bytes: {}", hex::encode(&cip.historical_bytes));
    Ok(out)
}

pub(crate) fn decode_apdu(apdu: &[u8]) -> Result<String> {
    let command = Command::from_bytes(apdu)?;
    let case = if command.is_extended() { "extended" } else { "short" };
    Ok(format!("{command} ({case})"))
}
