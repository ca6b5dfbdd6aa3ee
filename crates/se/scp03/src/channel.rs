//! SCP03 secure channel layer
//!
//! [`Scp03`] opens a session with INITIALIZE UPDATE and EXTERNAL
//! AUTHENTICATE and then wraps every APDU passing through it according to
//! the negotiated [`SecurityLevel`]. Any MAC or padding failure terminates
//! the session, and the sequence counter and chaining value only advance
//! after a verified exchange.

use std::{collections::BTreeSet, fmt};

use nexum_se_core::{
    ApduTransceive, Bytes, Command, Error, ErrorKind, LE_ANY, LogHandle, LogLevel, ProtocolLayer, Response, Result,
    SharedLogger, StatusWord,
    command::MAX_EXTENDED_LC,
    error::{function as layer_function, module},
};
use rand::RngCore;
use tracing::{debug, trace, warn};
use zeroize::Zeroize;

use crate::{
    config::Scp03Config,
    constants::{CLA_GP, MAC_LEN, ins},
    crypto::{
        CardChallenge, ChainingValue, Cryptogram, HostChallenge, aes_cmac, command_icv, decrypt_cbc, encrypt_cbc,
        host_cryptogram, response_icv, verify_aes_cmac, verify_card_cryptogram,
    },
    function,
    level::SecurityLevel,
    session::{InitializeUpdateResponse, SessionKeys, StaticKeys, logical_channel_cla},
};

/// Identifier of the SCP03 layer
pub const LAYER_ID: &str = "SCP03";

/// Source of host challenges
pub type ChallengeSource = Box<dyn FnMut() -> HostChallenge + Send>;

fn error(function: u8, kind: ErrorKind) -> Error {
    Error::new(module::SCP03, function, kind)
}

/// Error for a status word the secure element rejected a command with
fn status_error(function: u8, sw: StatusWord) -> Error {
    Error::with_reason(module::SCP03, function, sw.general_error_reason(), ErrorKind::Status(sw))
}

fn random_challenge() -> HostChallenge {
    let mut challenge = HostChallenge::default();
    rand::rng().fill_bytes(&mut challenge);
    challenge
}

/// Secrets of the current session
#[derive(Default, Zeroize)]
#[zeroize(drop)]
struct SessionData {
    host_challenge: HostChallenge,
    card_challenge: CardChallenge,
    card_cryptogram: Cryptogram,
    host_cryptogram: Cryptogram,
    chaining: ChainingValue,
    static_keys: Option<StaticKeys>,
    session_keys: Option<SessionKeys>,
    #[zeroize(skip)]
    initialize_update: Option<InitializeUpdateResponse>,
}

impl SessionData {
    fn keys(&self) -> Result<&SessionKeys> {
        self.session_keys.as_ref().ok_or_else(|| error(layer_function::TRANSCEIVE, ErrorKind::InvalidState))
    }

    /// Protect `command`, returning it with the chaining value it produces
    fn wrap(&self, command: &Command, level: SecurityLevel, counter: u32) -> Result<(Command, ChainingValue)> {
        const FUNCTION: u8 = layer_function::TRANSCEIVE;
        let keys = self.keys()?;

        let mut data = command.data().to_vec();
        if level.has_c_dec() && !data.is_empty() {
            let icv = command_icv(keys.enc(), counter, FUNCTION)?;
            data = encrypt_cbc(keys.enc(), &icv, &data, FUNCTION)?;
        }

        if !level.has_c_mac() {
            let mut plain = Command::new(command.cla, command.ins, command.p1, command.p2);
            plain.data = (!data.is_empty()).then(|| data.into());
            plain.le = command.le;
            return Ok((plain, self.chaining));
        }

        // Secure messaging indication depends on the class byte coding,
        // the logical channel is not covered by the MAC
        let (cla, mac_cla) = if command.cla & 0x40 != 0 {
            let cla = command.cla | 0x20;
            (cla, cla & 0xf0)
        } else {
            let cla = command.cla | 0x04;
            (cla, cla & 0xfc)
        };

        let lc = data.len() + MAC_LEN;
        if lc > MAX_EXTENDED_LC {
            return Err(error(FUNCTION, ErrorKind::IllegalArgument));
        }
        let extended = lc > 0xff || command.le.is_some_and(|le| le > LE_ANY);
        let lc_field = if extended { vec![0x00, (lc >> 8) as u8, lc as u8] } else { vec![lc as u8] };

        let header = [mac_cla, command.ins, command.p1, command.p2];
        let mac = aes_cmac(keys.mac(), &[&self.chaining[..], &header[..], &lc_field[..], &data[..]], FUNCTION)?;
        data.extend_from_slice(&mac[..MAC_LEN]);

        let mut wrapped = Command::new_with_data(cla, command.ins, command.p1, command.p2, data);
        wrapped.le = command.le;
        Ok((wrapped, mac))
    }

    /// Verify and decrypt a response to a command protected with `chaining`
    fn unwrap(
        &self,
        response: Response,
        chaining: &ChainingValue,
        level: SecurityLevel,
        counter: u32,
        whitelist: &BTreeSet<u16>,
    ) -> Result<Response> {
        const FUNCTION: u8 = layer_function::TRANSCEIVE;
        let (payload, sw) = response.into_parts();

        // Under R-MAC, errors carry neither MAC nor data
        if level.has_r_mac() && !whitelist.contains(&sw.to_u16()) && !sw.is_warning() {
            return Ok(Response::status_only(sw));
        }

        let keys = self.keys()?;
        let mut data = payload.to_vec();

        if level.has_r_mac() {
            if data.len() < MAC_LEN {
                return Err(error(FUNCTION, ErrorKind::AuthenticationFailed));
            }
            let tag = data.split_off(data.len() - MAC_LEN);
            let sw_bytes = sw.to_u16().to_be_bytes();
            let valid = verify_aes_cmac(keys.rmac(), &[&chaining[..], &data[..], &sw_bytes[..]], &tag, FUNCTION)?;
            if !valid {
                return Err(error(FUNCTION, ErrorKind::AuthenticationFailed));
            }
        }

        if level.has_r_enc() && !data.is_empty() {
            let icv = response_icv(keys.enc(), counter, FUNCTION)?;
            data = decrypt_cbc(keys.enc(), &icv, &data, FUNCTION)?;
        }

        Ok(Response::new(data, sw))
    }
}

/// GlobalPlatform SCP03 secure channel on top of a transport layer
pub struct Scp03 {
    base: Box<dyn ProtocolLayer>,
    config: Scp03Config,
    session: SessionData,
    sequence_counter: u32,
    authenticated: bool,
    session_level: SecurityLevel,
    current_level: SecurityLevel,
    channel: u8,
    whitelist: BTreeSet<u16>,
    challenge_source: ChallengeSource,
    logger: LogHandle,
}

impl fmt::Debug for Scp03 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scp03")
            .field("base", &self.base)
            .field("authenticated", &self.authenticated)
            .field("session_level", &self.session_level)
            .field("current_level", &self.current_level)
            .field("sequence_counter", &self.sequence_counter)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl Scp03 {
    /// Layer on top of `base` with default key selection
    pub fn new(base: impl ProtocolLayer) -> Self {
        Self::with_config(base, Scp03Config::default())
    }

    /// Layer on top of `base`
    pub fn with_config(base: impl ProtocolLayer, config: Scp03Config) -> Self {
        Self::from_boxed(Box::new(base), config)
    }

    /// Layer on top of an already boxed base
    pub fn from_boxed(base: Box<dyn ProtocolLayer>, config: Scp03Config) -> Self {
        Self {
            base,
            config,
            session: SessionData::default(),
            sequence_counter: 0,
            authenticated: false,
            session_level: SecurityLevel::none(),
            current_level: SecurityLevel::none(),
            channel: config.channel,
            whitelist: BTreeSet::from([StatusWord::SUCCESS.to_u16()]),
            challenge_source: Box::new(random_challenge),
            logger: LogHandle::default(),
        }
    }

    /// Replace the random host challenge generator
    pub fn with_challenge_source(mut self, source: impl FnMut() -> HostChallenge + Send + 'static) -> Self {
        self.challenge_source = Box::new(source);
        self
    }

    /// Key selection this layer was created with
    pub const fn config(&self) -> &Scp03Config {
        &self.config
    }

    /// Accept `sw` as success in addition to `9000`
    pub fn add_custom_statusword(&mut self, sw: u16) {
        self.whitelist.insert(sw);
    }

    fn is_success(&self, sw: StatusWord) -> bool {
        self.whitelist.contains(&sw.to_u16())
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.logger.log(LAYER_ID, level, message);
    }

    /// Open a session with the configured key set
    pub fn open(&mut self, static_keys: &StaticKeys, level: impl Into<SecurityLevel>) -> Result<()> {
        let Scp03Config { key_version, key_id, channel } = self.config;
        self.initialize_update(key_version, key_id, channel)?;
        self.external_authenticate(static_keys, level)
    }

    /// Send INITIALIZE UPDATE, the first half of the handshake
    ///
    /// Any running session is terminated first. The card challenge and
    /// cryptogram are kept for [`external_authenticate`](Self::external_authenticate).
    ///
    /// # Arguments
    ///
    /// * `key_version` - Key version number, `0x00` for the first available
    /// * `key_id` - Key identifier
    /// * `channel` - Logical channel (0 to 19)
    pub fn initialize_update(&mut self, key_version: u8, key_id: u8, channel: u8) -> Result<InitializeUpdateResponse> {
        self.terminate();

        let cla = logical_channel_cla(CLA_GP, channel)?;
        self.channel = channel;

        let host_challenge = (self.challenge_source)();
        self.session.host_challenge = host_challenge;
        trace!(host_challenge = %hex::encode(host_challenge), "INITIALIZE UPDATE");

        let command = Command::new_with_data_and_le(
            cla,
            ins::INITIALIZE_UPDATE,
            key_version,
            key_id,
            host_challenge.to_vec(),
            LE_ANY,
        );
        let response = self.base.transceive_apdu(&command)?;

        let sw = response.status();
        if sw == StatusWord::REFERENCED_DATA_NOT_FOUND {
            return Err(error(function::INITIALIZE_UPDATE, ErrorKind::ReferencedDataNotFound));
        }
        if !self.is_success(sw) {
            warn!(%sw, "INITIALIZE UPDATE rejected");
            return Err(status_error(function::INITIALIZE_UPDATE, sw));
        }

        let parsed = InitializeUpdateResponse::parse(response.payload())?;
        self.session.card_challenge = parsed.card_challenge;
        self.session.card_cryptogram = parsed.card_cryptogram;
        self.session.initialize_update = Some(parsed.clone());
        self.sequence_counter = 0;

        debug!(key_version = parsed.key_information.version, channel, "INITIALIZE UPDATE done");
        Ok(parsed)
    }

    /// Send EXTERNAL AUTHENTICATE, completing the handshake
    ///
    /// Verifies the card cryptogram before the host cryptogram is sent. On
    /// success the session runs at `level`, masked to the bits SCP03 defines.
    pub fn external_authenticate(&mut self, static_keys: &StaticKeys, level: impl Into<SecurityLevel>) -> Result<()> {
        const FUNCTION: u8 = function::EXTERNAL_AUTHENTICATE;

        if self.session.initialize_update.is_none() {
            return Err(error(FUNCTION, ErrorKind::InvalidState));
        }
        let level = level.into().sanitized();

        let host = self.session.host_challenge;
        let card = self.session.card_challenge;
        let session_keys = SessionKeys::derive(static_keys, &host, &card)?;

        if !verify_card_cryptogram(session_keys.mac(), &host, &card, &self.session.card_cryptogram, FUNCTION)? {
            warn!("card cryptogram mismatch");
            self.log(LogLevel::Error, "card cryptogram mismatch");
            self.terminate();
            return Err(error(FUNCTION, ErrorKind::AuthenticationFailed));
        }

        let cryptogram = host_cryptogram(session_keys.mac(), &host, &card, FUNCTION)?;
        self.session.host_cryptogram = cryptogram;
        self.session.static_keys = Some(static_keys.clone());
        self.session.session_keys = Some(session_keys);
        self.session_level = level;

        // EXTERNAL AUTHENTICATE itself only carries a command MAC
        self.authenticated = true;
        self.current_level = SecurityLevel::c_mac();

        let command = Command::new_with_data(
            logical_channel_cla(CLA_GP, self.channel)?,
            ins::EXTERNAL_AUTHENTICATE,
            level.bits(),
            0x00,
            cryptogram.to_vec(),
        );
        let response = match self.secure_transceive(&command) {
            Ok(response) => response,
            Err(e) => {
                self.terminate();
                return Err(e);
            }
        };

        let sw = response.status();
        if sw == StatusWord::AUTHENTICATION_FAILED {
            self.terminate();
            return Err(Error::with_reason(module::SCP03, FUNCTION, 0x02, ErrorKind::AuthenticationFailed));
        }
        if !self.is_success(sw) {
            self.terminate();
            return Err(status_error(FUNCTION, sw));
        }

        self.current_level = level;
        self.sequence_counter = 1;

        debug!(%level, "secure channel established");
        self.log(LogLevel::Info, &format!("session established at {level}"));
        Ok(())
    }

    /// Continue a session negotiated earlier
    ///
    /// # Arguments
    ///
    /// * `session_keys` - Keys of the session
    /// * `chaining` - MAC of the last command sent
    /// * `level` - Security level of the session
    /// * `sequence_counter` - Counter of the next command
    pub fn resume(
        &mut self,
        session_keys: SessionKeys,
        chaining: ChainingValue,
        level: impl Into<SecurityLevel>,
        sequence_counter: u32,
    ) {
        self.terminate();

        let level = level.into().sanitized();
        self.session.session_keys = Some(session_keys);
        self.session.chaining = chaining;
        self.session_level = level;
        self.current_level = level;
        self.sequence_counter = sequence_counter;
        self.authenticated = true;
    }

    /// Exchange `command` inside the session
    ///
    /// While responses are MACed, error status words other than warnings
    /// come back without data and without a MAC check.
    pub fn secure_transceive(&mut self, command: &Command) -> Result<Response> {
        if !self.authenticated {
            return Err(error(layer_function::TRANSCEIVE, ErrorKind::InvalidState));
        }

        let level = self.current_level;
        let counter = self.sequence_counter;
        let (wrapped, chaining) = self.session.wrap(command, level, counter)?;
        trace!(counter, %level, "wrapped command");

        let response = self.base.transceive_apdu(&wrapped)?;

        match self.session.unwrap(response, &chaining, level, counter, &self.whitelist) {
            Ok(response) => {
                self.session.chaining = chaining;
                self.sequence_counter = counter.wrapping_add(1);
                Ok(response)
            }
            Err(e) => {
                warn!(counter, "response verification failed, terminating session");
                self.log(LogLevel::Error, "response verification failed");
                self.terminate();
                Err(e)
            }
        }
    }

    /// Start protecting responses with `level` (R-MAC, optionally R-ENC)
    ///
    /// # Arguments
    ///
    /// * `level` - Requested level, only the response bits are used
    /// * `data` - Session data sent with BEGIN R-MAC SESSION
    pub fn begin_rmac_session(&mut self, level: impl Into<SecurityLevel>, data: &[u8]) -> Result<()> {
        const FUNCTION: u8 = function::BEGIN_RMAC;

        if !self.authenticated {
            return Err(error(FUNCTION, ErrorKind::InvalidState));
        }
        let response_level = level.into().response();

        if self.current_level != self.session_level {
            return Err(error(FUNCTION, ErrorKind::SessionAlreadyActive));
        }
        if self.current_level.response().bits() >= response_level.bits() {
            return Err(error(FUNCTION, ErrorKind::SecurityLevelViolation));
        }
        // Commands must be protected at least as well as responses
        if self.current_level.command().bits() < response_level.bits() >> 4 {
            return Err(Error::with_reason(module::SCP03, FUNCTION, 0x03, ErrorKind::SecurityLevelViolation));
        }

        let mut command = Command::new(
            logical_channel_cla(CLA_GP, self.channel)?,
            ins::BEGIN_RMAC_SESSION,
            response_level.bits(),
            0x01,
        );
        if !data.is_empty() {
            command = command.with_data(data.to_vec());
        }

        let response = self.secure_transceive(&command)?;
        if !self.is_success(response.status()) {
            return Err(status_error(FUNCTION, response.status()));
        }

        self.current_level = SecurityLevel::new((self.current_level.bits() & 0x0f) | response_level.bits());
        debug!(level = %self.current_level, "R-MAC session started");
        Ok(())
    }

    /// End the R-MAC session started with [`begin_rmac_session`](Self::begin_rmac_session)
    ///
    /// Returns the data of the END R-MAC SESSION response.
    pub fn end_rmac_session(&mut self) -> Result<Bytes> {
        const FUNCTION: u8 = function::END_RMAC;

        if !self.authenticated || self.current_level == self.session_level {
            return Err(error(FUNCTION, ErrorKind::InvalidState));
        }

        let command = Command::new_with_le(
            logical_channel_cla(CLA_GP, self.channel)?,
            ins::END_RMAC_SESSION,
            0x00,
            0x03,
            LE_ANY,
        );
        let response = self.secure_transceive(&command)?;
        if !self.is_success(response.status()) {
            return Err(status_error(FUNCTION, response.status()));
        }

        self.current_level = self.session_level;
        debug!("R-MAC session ended");
        Ok(response.payload().clone())
    }

    /// Stop protecting traffic, keeping the key material
    pub fn abort(&mut self) {
        self.authenticated = false;
        self.current_level = SecurityLevel::none();
    }

    /// End the session and wipe its key material
    pub fn terminate(&mut self) {
        self.abort();
        self.session = SessionData::default();
        self.session_level = SecurityLevel::none();
        self.sequence_counter = 0;
    }

    /// Counter of the next command
    pub const fn sequence_counter(&self) -> u32 {
        self.sequence_counter
    }

    /// Level currently applied to traffic
    pub const fn security_level(&self) -> SecurityLevel {
        self.current_level
    }

    /// Level negotiated with EXTERNAL AUTHENTICATE
    pub const fn session_level(&self) -> SecurityLevel {
        self.session_level
    }

    /// Whether traffic is currently protected by a session
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Session keys, if a session was negotiated
    pub const fn session_keys(&self) -> Option<&SessionKeys> {
        self.session.session_keys.as_ref()
    }

    /// MAC of the last command sent
    pub const fn chaining_value(&self) -> &ChainingValue {
        &self.session.chaining
    }

    /// Host challenge of the last INITIALIZE UPDATE
    pub const fn host_challenge(&self) -> &HostChallenge {
        &self.session.host_challenge
    }

    /// Host cryptogram sent with EXTERNAL AUTHENTICATE
    pub const fn host_cryptogram(&self) -> &Cryptogram {
        &self.session.host_cryptogram
    }

    /// Response of the last INITIALIZE UPDATE
    pub const fn initialize_update_response(&self) -> Option<&InitializeUpdateResponse> {
        self.session.initialize_update.as_ref()
    }

    /// Logical channel of the session
    pub const fn logical_channel(&self) -> u8 {
        self.channel
    }
}

impl ProtocolLayer for Scp03 {
    fn layer_id(&self) -> &'static str {
        LAYER_ID
    }

    fn base(&self) -> Option<&(dyn ProtocolLayer + 'static)> {
        Some(&*self.base)
    }

    fn base_mut(&mut self) -> Option<&mut (dyn ProtocolLayer + 'static)> {
        Some(&mut *self.base)
    }

    /// Reactivating the secure element ends any session
    fn activate(&mut self) -> Result<Bytes> {
        self.terminate();
        self.base.activate()
    }

    fn transceive(&mut self, data: &[u8]) -> Result<Bytes> {
        let command = Command::from_bytes(data)?;
        Ok(self.secure_transceive(&command)?.to_bytes())
    }

    fn set_logger(&mut self, logger: Option<SharedLogger>) {
        self.logger.set(logger.clone());
        self.base.set_logger(logger);
    }

    fn log_handle(&self) -> Option<&LogHandle> {
        Some(&self.logger)
    }
}
