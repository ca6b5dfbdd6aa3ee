//! Test vectors and a secure element emulator answering SCP03 traffic

#![allow(dead_code, unreachable_pub)]

use std::time::Duration;

use hex_literal::hex;
use nexum_se_core::{Bytes, Command, DriverConfig, DriverLayer, ProtocolLayer, Result, transport::mock::MockDriver};
use nexum_se_scp03::{
    SessionKeys, StaticKeys,
    crypto::{aes_cmac, card_cryptogram, command_icv, decrypt_cbc, encrypt_cbc, host_cryptogram, response_icv},
};
use nexum_se_t1prime::{Block, SType, T1Prime, T1PrimeConfig, block::NAD_SE_TO_HOST};

pub const HOST_CHALLENGE: [u8; 8] = hex!("9070605040302010");
pub const CARD_CHALLENGE: [u8; 8] = hex!("8070605040302010");
pub const CARD_CRYPTOGRAM: [u8; 8] = hex!("033c9e8742307af4");
pub const HOST_CRYPTOGRAM: [u8; 8] = hex!("7ba27c4a0aee45cc");
pub const KEY_DIVERSIFICATION_DATA: [u8; 10] = hex!("00010203040506070809");

pub const S_ENC: [u8; 32] = hex!("8f964fc6a2e100d9ca1c777cdceae46b9a80b973d5189daac98af808705adb68");
pub const S_MAC: [u8; 32] = hex!("178e1d920add820349b96c167d9088e3087ff28b7b8fbf8e30c7eff4174c33f6");
pub const S_RMAC: [u8; 32] = hex!("b648fead12470be0b6e65a9eb2a8cf7acf6bd3a43f612b5774e4d76cf528916b");

/// CIP of an I2C secure element
pub const I2C_CIP: [u8; 21] = hex!("01 03 000000 02 08 00 00 03e8 00 05 0000 04 0080 0080 00");

/// T=1' I block sent by the host carrying `apdu`
pub fn host_i(ns: u8, apdu: &[u8]) -> Bytes {
    Block::i(ns, false, Bytes::copy_from_slice(apdu)).encode().unwrap()
}

/// T=1' I block sent by the secure element carrying `response`
pub fn se_i(ns: u8, response: &[u8]) -> Bytes {
    Block::i(ns, false, Bytes::copy_from_slice(response)).with_nad(NAD_SE_TO_HOST).encode().unwrap()
}

/// Script the CIP and resynchronization exchanged on activation
pub fn expect_activation(mock: &MockDriver) {
    mock.exchange(
        Block::s_request(SType::Cip, Bytes::new()).encode().unwrap(),
        Block::s_response(SType::Cip, Bytes::copy_from_slice(&I2C_CIP)).with_nad(NAD_SE_TO_HOST).encode().unwrap(),
    )
    .exchange(
        Block::s_request(SType::Resynch, Bytes::new()).encode().unwrap(),
        Block::s_response(SType::Resynch, Bytes::new()).with_nad(NAD_SE_TO_HOST).encode().unwrap(),
    );
}

/// T=1' layer on top of `mock`
pub fn link(mock: &MockDriver) -> T1Prime {
    let config = T1PrimeConfig::default().with_bwt(Duration::from_millis(1));
    T1Prime::with_config(DriverLayer::new(mock.clone(), &DriverConfig::default()), config)
}

/// Static keys of the test vectors
pub fn zero_keys() -> StaticKeys {
    StaticKeys::from_single_key(&[0u8; 32]).unwrap()
}

/// INITIALIZE UPDATE response data of the test vectors
pub fn initialize_update_data() -> Vec<u8> {
    [&KEY_DIVERSIFICATION_DATA[..], &hex!("30 03 00")[..], &CARD_CHALLENGE[..], &CARD_CRYPTOGRAM[..]].concat()
}

/// Secure element side of an SCP03 session
///
/// Checks every command MAC, decrypts command data and protects responses
/// at the level negotiated by the host.
#[derive(Debug)]
pub struct Card {
    static_keys: StaticKeys,
    session_keys: Option<SessionKeys>,
    host_challenge: [u8; 8],
    chaining: [u8; 16],
    level: u8,
    response_level: u8,
    counter: u32,
    /// Card challenge returned by INITIALIZE UPDATE
    pub card_challenge: [u8; 8],
    /// "i" parameter returned by INITIALIZE UPDATE
    pub scp_parameter: u8,
    /// Data returned to commands other than the handshake
    pub payload: Vec<u8>,
    /// Status word replacing the INITIALIZE UPDATE response
    pub initialize_update_status: Option<[u8; 2]>,
    /// Status word replacing the EXTERNAL AUTHENTICATE response
    pub external_authenticate_status: Option<[u8; 2]>,
    /// Corrupt the next response MAC
    pub tamper_rmac: bool,
    /// Commands after removing secure messaging
    pub received: Vec<Command>,
}

impl Card {
    pub fn new(static_keys: StaticKeys) -> Self {
        Self {
            static_keys,
            session_keys: None,
            host_challenge: [0; 8],
            chaining: [0; 16],
            level: 0,
            response_level: 0,
            counter: 0,
            card_challenge: CARD_CHALLENGE,
            scp_parameter: 0x00,
            payload: hex!("0102").to_vec(),
            initialize_update_status: None,
            external_authenticate_status: None,
            tamper_rmac: false,
            received: Vec::new(),
        }
    }

    pub const fn counter(&self) -> u32 {
        self.counter
    }

    pub const fn response_level(&self) -> u8 {
        self.response_level
    }

    fn keys(&self) -> &SessionKeys {
        self.session_keys.as_ref().expect("no session")
    }

    /// Check and strip the command MAC
    fn verify_mac(&mut self, command: &Command) -> Vec<u8> {
        let data = command.data();
        assert!(data.len() >= 8, "command without MAC");
        let (body, mac) = data.split_at(data.len() - 8);

        let cla = if command.cla & 0x40 != 0 { command.cla & 0xf0 } else { command.cla & 0xfc };
        let header = [cla, command.ins, command.p1, command.p2, data.len() as u8];
        let full = aes_cmac(self.keys().mac(), &[&self.chaining[..], &header[..], body], 0).unwrap();
        assert_eq!(&full[..8], mac, "command MAC mismatch");

        self.chaining = full;
        body.to_vec()
    }

    fn initialize_update(&mut self, command: &Command) -> Vec<u8> {
        if let Some(sw) = self.initialize_update_status {
            return sw.to_vec();
        }

        self.host_challenge.copy_from_slice(command.data());
        let keys = SessionKeys::derive(&self.static_keys, &self.host_challenge, &self.card_challenge).unwrap();
        let cryptogram = card_cryptogram(keys.mac(), &self.host_challenge, &self.card_challenge, 0).unwrap();
        self.session_keys = Some(keys);
        self.chaining = [0; 16];
        self.level = 0;
        self.response_level = 0;
        self.counter = 0;

        let mut response = KEY_DIVERSIFICATION_DATA.to_vec();
        response.extend_from_slice(&[0x30, 0x03, self.scp_parameter]);
        response.extend_from_slice(&self.card_challenge);
        response.extend_from_slice(&cryptogram);
        if self.scp_parameter & 0x10 != 0 {
            response.extend_from_slice(&hex!("00002a"));
        }
        response.extend_from_slice(&hex!("9000"));
        response
    }

    fn external_authenticate(&mut self, command: &Command) -> Vec<u8> {
        let cryptogram = self.verify_mac(command);
        if let Some(sw) = self.external_authenticate_status {
            return sw.to_vec();
        }

        let expected = host_cryptogram(self.keys().mac(), &self.host_challenge, &self.card_challenge, 0).unwrap();
        assert_eq!(cryptogram, expected, "host cryptogram mismatch");

        self.level = command.p1;
        self.response_level = command.p1 & 0x30;
        self.counter = 1;
        hex!("9000").to_vec()
    }

    fn secured(&mut self, command: &Command) -> Vec<u8> {
        let mut data = if self.level & 0x01 != 0 { self.verify_mac(command) } else { command.data().to_vec() };
        if self.level & 0x02 != 0 && !data.is_empty() {
            let icv = command_icv(self.keys().enc(), self.counter, 0).unwrap();
            data = decrypt_cbc(self.keys().enc(), &icv, &data, 0).unwrap();
        }

        let mut plain = Command::new(command.cla, command.ins, command.p1, command.p2);
        if !data.is_empty() {
            plain = plain.with_data(data);
        }
        plain.le = command.le;
        self.received.push(plain);

        let mut payload = match command.ins {
            0x7A => Vec::new(),
            0x78 => hex!("5aa5").to_vec(),
            _ => self.payload.clone(),
        };
        let sw = hex!("9000");

        if self.response_level & 0x20 != 0 && !payload.is_empty() {
            let icv = response_icv(self.keys().enc(), self.counter, 0).unwrap();
            payload = encrypt_cbc(self.keys().enc(), &icv, &payload, 0).unwrap();
        }
        if self.response_level & 0x10 != 0 {
            let mut mac = aes_cmac(self.keys().rmac(), &[&self.chaining[..], &payload[..], &sw[..]], 0).unwrap();
            if std::mem::take(&mut self.tamper_rmac) {
                mac[0] ^= 0xff;
            }
            payload.extend_from_slice(&mac[..8]);
        }

        match command.ins {
            0x7A => self.response_level = command.p1 & 0x30,
            0x78 => self.response_level = self.level & 0x30,
            _ => {}
        }
        self.counter += 1;

        payload.extend_from_slice(&sw);
        payload
    }
}

impl ProtocolLayer for Card {
    fn layer_id(&self) -> &'static str {
        "CARD"
    }

    fn transceive(&mut self, data: &[u8]) -> Result<Bytes> {
        let command = Command::from_bytes(data)?;
        let response = match command.ins {
            0x50 => self.initialize_update(&command),
            0x82 => self.external_authenticate(&command),
            _ => self.secured(&command),
        };
        Ok(response.into())
    }
}
