//! Cryptographic operations for the SCP03 protocol
//!
//! This module provides the AES primitives SCP03 builds on: CMAC over
//! concatenated inputs, counter based ICVs, CBC encryption with ISO/IEC
//! 9797-1 method 2 padding and the card and host cryptograms.

use aes::{Aes128, Aes192, Aes256};
use cipher::{
    BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit, block_padding::Iso7816,
    generic_array::GenericArray,
};
use cmac::{Cmac, Mac};
use nexum_se_core::{Error, ErrorKind, Result, error::module};

use crate::{
    constants::{CHALLENGE_LEN, CMAC_LEN, CRYPTOGRAM_LEN, derivation},
    kdf::{scp03_derive, scp03_label},
};

/// Host challenge sent with INITIALIZE UPDATE
pub type HostChallenge = [u8; CHALLENGE_LEN];
/// Card challenge returned by INITIALIZE UPDATE
pub type CardChallenge = [u8; CHALLENGE_LEN];
/// Card or host cryptogram
pub type Cryptogram = [u8; CRYPTOGRAM_LEN];
/// Full CMAC, also used as chaining value
pub type ChainingValue = [u8; CMAC_LEN];

fn error(function: u8, kind: ErrorKind) -> Error {
    Error::new(module::SCP03, function, kind)
}

/// Run `$body` with `$cipher` bound to the AES variant matching the key length
macro_rules! with_aes {
    ($key:expr, $function:expr, |$cipher:ident| $body:expr) => {
        match $key.len() {
            16 => {
                type $cipher = Aes128;
                $body
            }
            24 => {
                type $cipher = Aes192;
                $body
            }
            32 => {
                type $cipher = Aes256;
                $body
            }
            _ => Err(error($function, ErrorKind::IllegalArgument)),
        }
    };
}

/// AES-CMAC over the concatenation of `parts`
///
/// # Arguments
///
/// * `key` - AES key of 16, 24 or 32 bytes
/// * `parts` - Message pieces, MACed in order
/// * `function` - Function identifier used for errors
pub fn aes_cmac(key: &[u8], parts: &[&[u8]], function: u8) -> Result<ChainingValue> {
    with_aes!(key, function, |C| {
        let mut mac = <Cmac<C> as KeyInit>::new_from_slice(key)
            .map_err(|_| error(function, ErrorKind::IllegalArgument))?;
        for part in parts {
            mac.update(part);
        }
        Ok(mac.finalize().into_bytes().into())
    })
}

/// Compare the leftmost bytes of an AES-CMAC with `tag` in constant time
pub fn verify_aes_cmac(key: &[u8], parts: &[&[u8]], tag: &[u8], function: u8) -> Result<bool> {
    with_aes!(key, function, |C| {
        let mut mac = <Cmac<C> as KeyInit>::new_from_slice(key)
            .map_err(|_| error(function, ErrorKind::IllegalArgument))?;
        for part in parts {
            mac.update(part);
        }
        Ok(mac.verify_truncated_left(tag).is_ok())
    })
}

/// Encrypt a single block with AES in ECB mode
fn encrypt_block(key: &[u8], block: [u8; 16], function: u8) -> Result<[u8; 16]> {
    with_aes!(key, function, |C| {
        let cipher = C::new_from_slice(key).map_err(|_| error(function, ErrorKind::IllegalArgument))?;
        let mut block = GenericArray::from(block);
        cipher.encrypt_block(&mut block);
        Ok(block.into())
    })
}

/// ICV for command data encryption
///
/// The sequence counter is right aligned in a zero block and encrypted with
/// S-ENC.
pub fn command_icv(enc_key: &[u8], counter: u32, function: u8) -> Result<[u8; 16]> {
    let mut block = [0u8; 16];
    block[13..].copy_from_slice(&counter.to_be_bytes()[1..]);
    encrypt_block(enc_key, block, function)
}

/// ICV for response data decryption
///
/// Same as [`command_icv`] with the first byte of the block set to `0x80`.
pub fn response_icv(enc_key: &[u8], counter: u32, function: u8) -> Result<[u8; 16]> {
    let mut block = [0u8; 16];
    block[0] = 0x80;
    block[13..].copy_from_slice(&counter.to_be_bytes()[1..]);
    encrypt_block(enc_key, block, function)
}

/// Pad `data` with `80 00..` and encrypt it with AES-CBC
pub fn encrypt_cbc(key: &[u8], icv: &[u8; 16], data: &[u8], function: u8) -> Result<Vec<u8>> {
    with_aes!(key, function, |C| {
        let encryptor = cbc::Encryptor::<C>::new_from_slices(key, icv)
            .map_err(|_| error(function, ErrorKind::IllegalArgument))?;
        Ok(encryptor.encrypt_padded_vec_mut::<Iso7816>(data))
    })
}

/// Decrypt AES-CBC data and strip its `80 00..` padding
///
/// Ciphertext that is not block aligned or lacks the padding marker fails
/// with [`ErrorKind::AuthenticationFailed`].
pub fn decrypt_cbc(key: &[u8], icv: &[u8; 16], data: &[u8], function: u8) -> Result<Vec<u8>> {
    with_aes!(key, function, |C| {
        let decryptor = cbc::Decryptor::<C>::new_from_slices(key, icv)
            .map_err(|_| error(function, ErrorKind::IllegalArgument))?;
        decryptor
            .decrypt_padded_vec_mut::<Iso7816>(data)
            .map_err(|_| error(function, ErrorKind::AuthenticationFailed))
    })
}

fn challenge_context(host_challenge: &HostChallenge, card_challenge: &CardChallenge) -> [u8; 16] {
    let mut context = [0u8; 16];
    context[..CHALLENGE_LEN].copy_from_slice(host_challenge);
    context[CHALLENGE_LEN..].copy_from_slice(card_challenge);
    context
}

fn cryptogram(
    mac_key: &[u8],
    constant: u8,
    host_challenge: &HostChallenge,
    card_challenge: &CardChallenge,
    function: u8,
) -> Result<Cryptogram> {
    let context = challenge_context(host_challenge, card_challenge);
    let derived = scp03_derive(mac_key, constant, &context, CRYPTOGRAM_LEN)
        .map_err(|e| error(function, e.kind().clone()))?;

    let mut cryptogram = Cryptogram::default();
    cryptogram.copy_from_slice(&derived);
    Ok(cryptogram)
}

/// Calculate the card cryptogram with S-MAC
pub fn card_cryptogram(
    mac_key: &[u8],
    host_challenge: &HostChallenge,
    card_challenge: &CardChallenge,
    function: u8,
) -> Result<Cryptogram> {
    cryptogram(mac_key, derivation::CARD_CRYPTOGRAM, host_challenge, card_challenge, function)
}

/// Calculate the host cryptogram with S-MAC
pub fn host_cryptogram(
    mac_key: &[u8],
    host_challenge: &HostChallenge,
    card_challenge: &CardChallenge,
    function: u8,
) -> Result<Cryptogram> {
    cryptogram(mac_key, derivation::HOST_CRYPTOGRAM, host_challenge, card_challenge, function)
}

/// Check the cryptogram returned by the card in constant time
///
/// A cryptogram is the leftmost part of a single CMAC block, so the received
/// value is checked against that block directly.
pub fn verify_card_cryptogram(
    mac_key: &[u8],
    host_challenge: &HostChallenge,
    card_challenge: &CardChallenge,
    received: &Cryptogram,
    function: u8,
) -> Result<bool> {
    let label = scp03_label(derivation::CARD_CRYPTOGRAM, CRYPTOGRAM_LEN)?;
    let context = challenge_context(host_challenge, card_challenge);
    verify_aes_cmac(mac_key, &[&label[..], &[0x01u8][..], &context[..]], received, function)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    const HOST_CHALLENGE: HostChallenge = hex!("9070605040302010");
    const CARD_CHALLENGE: CardChallenge = hex!("8070605040302010");
    const S_MAC: [u8; 32] = hex!("178e1d920add820349b96c167d9088e3087ff28b7b8fbf8e30c7eff4174c33f6");

    #[test]
    fn test_cryptograms() {
        assert_eq!(
            card_cryptogram(&S_MAC, &HOST_CHALLENGE, &CARD_CHALLENGE, 0).unwrap(),
            hex!("033c9e8742307af4")
        );
        assert_eq!(
            host_cryptogram(&S_MAC, &HOST_CHALLENGE, &CARD_CHALLENGE, 0).unwrap(),
            hex!("7ba27c4a0aee45cc")
        );
    }

    #[test]
    fn test_verify_card_cryptogram() {
        assert!(
            verify_card_cryptogram(&S_MAC, &HOST_CHALLENGE, &CARD_CHALLENGE, &hex!("033c9e8742307af4"), 0)
                .unwrap()
        );
        assert!(
            !verify_card_cryptogram(&S_MAC, &HOST_CHALLENGE, &CARD_CHALLENGE, &hex!("033c9e8742307af5"), 0)
                .unwrap()
        );
    }

    #[test]
    fn test_cmac_parts_are_concatenated() {
        let key = [0x42u8; 16];
        assert_eq!(aes_cmac(&key, &[&b"abc"[..], &b"def"[..]], 0).unwrap(), aes_cmac(&key, &[&b"abcdef"[..]], 0).unwrap());
    }

    #[test]
    fn test_cmac_rfc4493() {
        let key = hex!("2b7e151628aed2a6abf7158809cf4f3c");
        assert_eq!(aes_cmac(&key, &[], 0).unwrap(), hex!("bb1d6929e95937287fa37d129b756746"));
        assert_eq!(
            aes_cmac(&key, &[&hex!("6bc1bee22e409f96e93d7e117393172a")[..]], 0).unwrap(),
            hex!("070a16b46b4d4144f79bdd9dd04a287c")
        );
    }

    #[test]
    fn test_icv_layout() {
        let key = [0u8; 16];
        assert_ne!(command_icv(&key, 1, 0).unwrap(), response_icv(&key, 1, 0).unwrap());
        assert_ne!(command_icv(&key, 1, 0).unwrap(), command_icv(&key, 2, 0).unwrap());
        // only the low 24 bits of the counter are used
        assert_eq!(command_icv(&key, 0x0100_0001, 0).unwrap(), command_icv(&key, 1, 0).unwrap());
    }

    #[test]
    fn test_cbc_padding() {
        let key = [0x24u8; 32];
        let icv = [0x5au8; 16];

        let block_aligned = encrypt_cbc(&key, &icv, &[0u8; 16], 0).unwrap();
        assert_eq!(block_aligned.len(), 32);

        let short = encrypt_cbc(&key, &icv, &hex!("01 02 03"), 0).unwrap();
        assert_eq!(short.len(), 16);
        assert_eq!(decrypt_cbc(&key, &icv, &short, 0).unwrap(), hex!("01 02 03"));
    }

    #[test]
    fn test_decrypt_rejects_bad_padding() {
        let key = [0x24u8; 16];
        let icv = [0u8; 16];

        // raw encryption of a block without a padding marker
        let mut raw = cbc::Encryptor::<Aes128>::new_from_slices(&key, &icv).unwrap();
        let mut block = GenericArray::from([0u8; 16]);
        raw.encrypt_block_mut(&mut block);

        let err = decrypt_cbc(&key, &icv, &block, 0x12).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::AuthenticationFailed);
        assert_eq!(err.code().function(), 0x12);

        let err = decrypt_cbc(&key, &icv, &[0u8; 15], 0x12).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::AuthenticationFailed);
    }

    #[test]
    fn test_invalid_key_length() {
        let err = aes_cmac(&[0u8; 15], &[], 0x11).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::IllegalArgument);
        assert_eq!(err.code().module(), module::SCP03);
        assert!(encrypt_cbc(&[0u8; 17], &[0u8; 16], &[], 0).is_err());
    }
}
