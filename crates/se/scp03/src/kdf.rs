//! NIST SP 800-108 key derivation in counter mode
//!
//! Every PRF call MACs `before ‖ counter ‖ after`, the counter being a
//! big-endian integer starting at one. SCP03 instantiates this with AES-CMAC
//! and a one byte counter, see [`scp03_derive`].

use aes::{Aes128, Aes192, Aes256};
use cipher::KeyInit;
use cmac::{Cmac, Mac};
use nexum_se_core::{Error, ErrorKind, Result, error::module};

use crate::function;

fn illegal_argument() -> Error {
    Error::new(module::SCP03, function::KDF, ErrorKind::IllegalArgument)
}

/// Derive `out.len()` bytes of keying material with the PRF `M`
///
/// # Arguments
///
/// * `key` - Key derivation key
/// * `counter_len` - Width of the counter in bytes (1 to 4)
/// * `before_counter` - Fixed input data preceding the counter
/// * `after_counter` - Fixed input data following the counter
/// * `out` - Buffer receiving the derived bytes
pub fn counter_kdf<M>(
    key: &[u8],
    counter_len: usize,
    before_counter: &[u8],
    after_counter: &[u8],
    out: &mut [u8],
) -> Result<()>
where
    M: Mac + KeyInit + Clone,
{
    if !(1..=4).contains(&counter_len) {
        return Err(illegal_argument());
    }

    let prf = <M as KeyInit>::new_from_slice(key).map_err(|_| illegal_argument())?;
    let block_len = M::output_size();

    let max_counter = (1u64 << (8 * counter_len)) - 1;
    if out.len().div_ceil(block_len) as u64 > max_counter {
        return Err(illegal_argument());
    }

    for (i, chunk) in out.chunks_mut(block_len).enumerate() {
        let counter = (i as u64 + 1).to_be_bytes();

        let mut mac = prf.clone();
        mac.update(before_counter);
        mac.update(&counter[counter.len() - counter_len..]);
        mac.update(after_counter);

        let block = mac.finalize().into_bytes();
        chunk.copy_from_slice(&block[..chunk.len()]);
    }

    Ok(())
}

/// [`counter_kdf`] with AES-128-CMAC
pub fn aes128_cmac_kdf(
    key: &[u8],
    counter_len: usize,
    before_counter: &[u8],
    after_counter: &[u8],
    out: &mut [u8],
) -> Result<()> {
    counter_kdf::<Cmac<Aes128>>(key, counter_len, before_counter, after_counter, out)
}

/// [`counter_kdf`] with AES-192-CMAC
pub fn aes192_cmac_kdf(
    key: &[u8],
    counter_len: usize,
    before_counter: &[u8],
    after_counter: &[u8],
    out: &mut [u8],
) -> Result<()> {
    counter_kdf::<Cmac<Aes192>>(key, counter_len, before_counter, after_counter, out)
}

/// [`counter_kdf`] with AES-256-CMAC
pub fn aes256_cmac_kdf(
    key: &[u8],
    counter_len: usize,
    before_counter: &[u8],
    after_counter: &[u8],
    out: &mut [u8],
) -> Result<()> {
    counter_kdf::<Cmac<Aes256>>(key, counter_len, before_counter, after_counter, out)
}

/// [`counter_kdf`] with the AES-CMAC variant matching the key length
pub fn aes_cmac_kdf(
    key: &[u8],
    counter_len: usize,
    before_counter: &[u8],
    after_counter: &[u8],
    out: &mut [u8],
) -> Result<()> {
    match key.len() {
        16 => aes128_cmac_kdf(key, counter_len, before_counter, after_counter, out),
        24 => aes192_cmac_kdf(key, counter_len, before_counter, after_counter, out),
        32 => aes256_cmac_kdf(key, counter_len, before_counter, after_counter, out),
        _ => Err(illegal_argument()),
    }
}

/// Fixed input data preceding the counter in SCP03 derivations
///
/// Eleven zero bytes, the derivation constant, a zero separator and the
/// output length in bits.
pub(crate) fn scp03_label(constant: u8, out_len: usize) -> Result<[u8; 15]> {
    let bits = u16::try_from(out_len * 8).map_err(|_| illegal_argument())?;

    let mut label = [0u8; 15];
    label[11] = constant;
    label[13..].copy_from_slice(&bits.to_be_bytes());
    Ok(label)
}

/// SCP03 data derivation (GPC 2.3 Amendment D, 6.2.1)
///
/// # Arguments
///
/// * `key` - AES key of 16, 24 or 32 bytes
/// * `constant` - One of the [`derivation`](crate::constants::derivation) constants
/// * `context` - Usually host challenge followed by card challenge
/// * `out_len` - Number of bytes to derive
///
/// # Returns
///
/// The derived bytes
pub fn scp03_derive(key: &[u8], constant: u8, context: &[u8], out_len: usize) -> Result<Vec<u8>> {
    let label = scp03_label(constant, out_len)?;
    let mut out = vec![0u8; out_len];
    aes_cmac_kdf(key, 1, &label, context, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::constants::derivation;

    const CONTEXT: [u8; 16] = hex!("9070605040302010 8070605040302010");

    #[test]
    fn test_session_key_vectors() {
        let key = [0u8; 32];

        assert_eq!(
            scp03_derive(&key, derivation::S_ENC, &CONTEXT, 32).unwrap(),
            hex!("8f964fc6a2e100d9ca1c777cdceae46b9a80b973d5189daac98af808705adb68")
        );
        assert_eq!(
            scp03_derive(&key, derivation::S_MAC, &CONTEXT, 32).unwrap(),
            hex!("178e1d920add820349b96c167d9088e3087ff28b7b8fbf8e30c7eff4174c33f6")
        );
        assert_eq!(
            scp03_derive(&key, derivation::S_RMAC, &CONTEXT, 32).unwrap(),
            hex!("b648fead12470be0b6e65a9eb2a8cf7acf6bd3a43f612b5774e4d76cf528916b")
        );
    }

    #[test]
    fn test_cryptogram_vectors() {
        let s_mac = hex!("178e1d920add820349b96c167d9088e3087ff28b7b8fbf8e30c7eff4174c33f6");

        assert_eq!(
            scp03_derive(&s_mac, derivation::CARD_CRYPTOGRAM, &CONTEXT, 8).unwrap(),
            hex!("033c9e8742307af4")
        );
        assert_eq!(
            scp03_derive(&s_mac, derivation::HOST_CRYPTOGRAM, &CONTEXT, 8).unwrap(),
            hex!("7ba27c4a0aee45cc")
        );
    }

    #[test]
    fn test_label_layout() {
        assert_eq!(scp03_label(0x06, 32).unwrap(), hex!("0000000000000000000000 06 00 0100"));
        assert_eq!(scp03_label(0x00, 8).unwrap(), hex!("0000000000000000000000 00 00 0040"));
    }

    #[test]
    fn test_output_is_prefix_of_longer_output() {
        let key = [0x11u8; 16];
        let mut short = [0u8; 20];
        let mut long = [0u8; 48];

        aes128_cmac_kdf(&key, 2, b"before", b"after", &mut short).unwrap();
        aes128_cmac_kdf(&key, 2, b"before", b"after", &mut long).unwrap();
        assert_eq!(short, long[..20]);
    }

    #[test]
    fn test_counter_width_matters() {
        let key = [0x22u8; 24];
        let mut one = [0u8; 16];
        let mut four = [0u8; 16];

        aes192_cmac_kdf(&key, 1, &[], &[], &mut one).unwrap();
        aes192_cmac_kdf(&key, 4, &[], &[], &mut four).unwrap();
        assert_ne!(one, four);
    }

    #[test]
    fn test_invalid_arguments() {
        let mut out = [0u8; 16];

        let err = aes_cmac_kdf(&[0u8; 20], 1, &[], &[], &mut out).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::IllegalArgument);
        assert_eq!(err.code().module(), module::SCP03);
        assert_eq!(err.code().function(), function::KDF);

        assert!(aes_cmac_kdf(&[0u8; 16], 0, &[], &[], &mut out).is_err());
        assert!(aes_cmac_kdf(&[0u8; 16], 5, &[], &[], &mut out).is_err());

        // 256 blocks do not fit in a one byte counter
        let mut large = vec![0u8; 256 * 16];
        assert!(aes_cmac_kdf(&[0u8; 16], 1, &[], &[], &mut large).is_err());
        assert!(aes_cmac_kdf(&[0u8; 16], 2, &[], &[], &mut large).is_ok());
    }
}
