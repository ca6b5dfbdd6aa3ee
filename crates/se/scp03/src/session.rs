//! Key material and handshake data of an SCP03 session

use std::fmt;

use nexum_se_core::{Error, ErrorKind, Result, error::module};
use zeroize::Zeroize;

use crate::{
    constants::{CHALLENGE_LEN, CRYPTOGRAM_LEN, MAX_LOGICAL_CHANNEL, SCP_PARAMETER_PSEUDO_RANDOM_CHALLENGE, derivation},
    crypto::{CardChallenge, Cryptogram, HostChallenge},
    function,
    kdf::scp03_derive,
};

fn check_key(key: &[u8], function: u8) -> Result<()> {
    match key.len() {
        16 | 24 | 32 => Ok(()),
        _ => Err(Error::new(module::SCP03, function, ErrorKind::IllegalArgument)),
    }
}

/// Static key set shared with the secure element
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct StaticKeys {
    /// Encryption key
    enc: Vec<u8>,
    /// MAC key
    mac: Vec<u8>,
    /// Data encryption key
    dek: Vec<u8>,
}

impl StaticKeys {
    /// Create a key set, each key being 16, 24 or 32 bytes long
    pub fn new(enc: impl Into<Vec<u8>>, mac: impl Into<Vec<u8>>, dek: impl Into<Vec<u8>>) -> Result<Self> {
        let keys = Self { enc: enc.into(), mac: mac.into(), dek: dek.into() };
        check_key(&keys.enc, function::EXTERNAL_AUTHENTICATE)?;
        check_key(&keys.mac, function::EXTERNAL_AUTHENTICATE)?;
        check_key(&keys.dek, function::EXTERNAL_AUTHENTICATE)?;
        Ok(keys)
    }

    /// Create a key set where all keys are the same
    pub fn from_single_key(key: &[u8]) -> Result<Self> {
        Self::new(key, key, key)
    }

    /// Get the encryption key
    pub fn enc(&self) -> &[u8] {
        &self.enc
    }

    /// Get the MAC key
    pub fn mac(&self) -> &[u8] {
        &self.mac
    }

    /// Get the data encryption key
    pub fn dek(&self) -> &[u8] {
        &self.dek
    }
}

impl fmt::Debug for StaticKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticKeys").field("len", &self.enc.len()).finish_non_exhaustive()
    }
}

/// Session keys derived from the static keys and both challenges
#[derive(Clone, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct SessionKeys {
    /// S-ENC
    enc: Vec<u8>,
    /// S-MAC
    mac: Vec<u8>,
    /// S-RMAC
    rmac: Vec<u8>,
}

impl SessionKeys {
    /// Derive the session keys of a new session
    ///
    /// Each session key has the length of the static key it is derived
    /// from.
    pub fn derive(
        static_keys: &StaticKeys,
        host_challenge: &HostChallenge,
        card_challenge: &CardChallenge,
    ) -> Result<Self> {
        let mut context = [0u8; 2 * CHALLENGE_LEN];
        context[..CHALLENGE_LEN].copy_from_slice(host_challenge);
        context[CHALLENGE_LEN..].copy_from_slice(card_challenge);

        Ok(Self {
            enc: scp03_derive(static_keys.enc(), derivation::S_ENC, &context, static_keys.enc().len())?,
            mac: scp03_derive(static_keys.mac(), derivation::S_MAC, &context, static_keys.mac().len())?,
            rmac: scp03_derive(static_keys.mac(), derivation::S_RMAC, &context, static_keys.mac().len())?,
        })
    }

    /// Create session keys from known values
    pub fn from_keys(enc: impl Into<Vec<u8>>, mac: impl Into<Vec<u8>>, rmac: impl Into<Vec<u8>>) -> Result<Self> {
        let keys = Self { enc: enc.into(), mac: mac.into(), rmac: rmac.into() };
        check_key(&keys.enc, function::INITIALIZE)?;
        check_key(&keys.mac, function::INITIALIZE)?;
        check_key(&keys.rmac, function::INITIALIZE)?;
        Ok(keys)
    }

    /// S-ENC
    pub fn enc(&self) -> &[u8] {
        &self.enc
    }

    /// S-MAC
    pub fn mac(&self) -> &[u8] {
        &self.mac
    }

    /// S-RMAC
    pub fn rmac(&self) -> &[u8] {
        &self.rmac
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys").field("len", &self.enc.len()).finish_non_exhaustive()
    }
}

/// Key information returned by INITIALIZE UPDATE
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KeyInformation {
    /// Key version number of the selected key set
    pub version: u8,
    /// Secure channel protocol identifier, `0x03`
    pub scp_id: u8,
    /// The "i" parameter
    pub scp_parameter: u8,
}

impl KeyInformation {
    /// Whether the card challenge is derived from a sequence counter
    pub const fn pseudo_random_challenge(&self) -> bool {
        self.scp_parameter & SCP_PARAMETER_PSEUDO_RANDOM_CHALLENGE != 0
    }
}

/// Parsed INITIALIZE UPDATE response data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InitializeUpdateResponse {
    /// Key diversification data
    pub key_diversification_data: [u8; 10],
    /// Key information
    pub key_information: KeyInformation,
    /// Card challenge
    pub card_challenge: CardChallenge,
    /// Card cryptogram
    pub card_cryptogram: Cryptogram,
    /// Sequence counter of the card, present with pseudo-random challenges
    pub sequence_counter: Option<[u8; 3]>,
}

impl InitializeUpdateResponse {
    /// Length of a response without sequence counter
    pub const BASIC_LEN: usize = 10 + 3 + CHALLENGE_LEN + CRYPTOGRAM_LEN;

    /// Parse the response data
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::BASIC_LEN {
            return Err(Error::with_reason(
                module::SCP03,
                function::INITIALIZE_UPDATE,
                nexum_se_core::error::reason::TOO_LITTLE_DATA,
                ErrorKind::InvalidResponseLength,
            ));
        }

        let mut response = Self::default();
        response.key_diversification_data.copy_from_slice(&data[..10]);
        response.key_information = KeyInformation { version: data[10], scp_id: data[11], scp_parameter: data[12] };
        response.card_challenge.copy_from_slice(&data[13..21]);
        response.card_cryptogram.copy_from_slice(&data[21..29]);

        if response.key_information.pseudo_random_challenge() {
            if data.len() != Self::BASIC_LEN + 3 {
                return Err(Error::new(module::SCP03, function::INITIALIZE_UPDATE, ErrorKind::InvalidResponseLength));
            }
            let mut counter = [0u8; 3];
            counter.copy_from_slice(&data[Self::BASIC_LEN..]);
            response.sequence_counter = Some(counter);
        }

        Ok(response)
    }
}

/// Encode a logical channel into a class byte (ISO/IEC 7816-4, 5.4.1)
///
/// Channels 0 to 3 use the first interindustry coding, channels 4 to 19 the
/// further interindustry coding.
pub fn logical_channel_cla(cla: u8, channel: u8) -> Result<u8> {
    match channel {
        0..=3 => Ok((cla & !0x43) | channel),
        4..=MAX_LOGICAL_CHANNEL => Ok((cla & !0x0f) | 0x40 | (channel - 4)),
        _ => Err(Error::new(module::SCP03, function::INITIALIZE_UPDATE, ErrorKind::IllegalArgument)),
    }
}
