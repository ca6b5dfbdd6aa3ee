//! The T=1' protocol layer
//!
//! Outgoing data is chained into I blocks of at most IFSC bytes. Every block
//! exchange goes through [`T1Prime::block_transceive`], which owns the
//! retransmission policy: a block that cannot be received is answered with
//! R(CRC) until the budget from [`T1PrimeConfig::retransmissions`] is used up,
//! after which the link is resynchronized and the exchange fails with
//! [`ErrorKind::ResyncExhausted`]. Retransmission requests from the secure
//! element draw on the same budget, counted per block.

use std::{
    mem, thread,
    time::{Duration, Instant},
};

use bytes::{Bytes, BytesMut};
use derive_more::Display;
use nexum_se_core::{
    Error, ErrorKind, LogHandle, LogLevel, ProtocolLayer, Result, SharedLogger,
    error::{function as layer_function, module},
};
use tracing::{debug, trace, warn};

use crate::{
    block::{Block, EPILOGUE_LEN, PROLOGUE_LEN, Pcb, RType, SType},
    cip::{Cip, PhysicalLayer},
    config::T1PrimeConfig,
    function, ifs,
};

/// Layer identifier, also used as log source
pub const LAYER_ID: &str = "T1PRIME";

/// Link state of a [`T1Prime`] layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum LinkState {
    /// Not activated yet
    #[default]
    Idle,
    /// Negotiating parameters
    Activating,
    /// Ready for exchanges
    Ready,
    /// Recovering from exhausted retransmissions
    Resynchronizing,
    /// Resynchronization failed, the secure element needs a reset
    Fatal,
}

/// SPI timing announced by the secure element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiTiming {
    /// Guard time in µs
    pub segt: u16,
    /// Maximum access length in bytes
    pub seal: u16,
}

fn error(function: u8, kind: ErrorKind) -> Error {
    Error::new(module::T1PRIME, function, kind)
}

fn invalid_block(function: u8) -> Error {
    error(function, ErrorKind::InvalidBlock)
}

/// GlobalPlatform T=1' block transport on top of a physical driver layer
#[derive(Debug)]
pub struct T1Prime {
    base: Box<dyn ProtocolLayer>,
    config: T1PrimeConfig,
    ifsc: usize,
    ifsd: usize,
    bwt: Duration,
    mpot: u8,
    send_counter: u8,
    receive_counter: u8,
    wtx_delay: Duration,
    spi: Option<SpiTiming>,
    state: LinkState,
    logger: LogHandle,
}

impl T1Prime {
    /// Layer on top of `base` with default parameters
    pub fn new(base: impl ProtocolLayer) -> Self {
        Self::with_config(base, T1PrimeConfig::default())
    }

    /// Layer on top of `base`
    pub fn with_config(base: impl ProtocolLayer, config: T1PrimeConfig) -> Self {
        Self::from_boxed(Box::new(base), config)
    }

    /// Layer on top of an already boxed base
    pub fn from_boxed(base: Box<dyn ProtocolLayer>, config: T1PrimeConfig) -> Self {
        Self {
            base,
            config,
            ifsc: config.ifsc,
            ifsd: config.ifsd,
            bwt: config.bwt(),
            mpot: config.mpot,
            send_counter: 0,
            receive_counter: 0,
            wtx_delay: Duration::ZERO,
            spi: None,
            state: LinkState::Idle,
            logger: LogHandle::default(),
        }
    }

    /// Defaults this layer was created with
    pub const fn config(&self) -> &T1PrimeConfig {
        &self.config
    }

    /// Current information field size of the secure element
    pub const fn ifsc(&self) -> usize {
        self.ifsc
    }

    /// Information field size announced to the secure element
    pub const fn ifsd(&self) -> usize {
        self.ifsd
    }

    /// Current block waiting time
    pub const fn bwt(&self) -> Duration {
        self.bwt
    }

    /// Override the block waiting time
    pub const fn set_bwt(&mut self, bwt: Duration) {
        self.bwt = bwt;
    }

    /// `(send, receive)` sequence counters
    pub const fn counters(&self) -> (u8, u8) {
        (self.send_counter, self.receive_counter)
    }

    /// SPI timing from the last activation, if the secure element uses SPI
    pub const fn spi_timing(&self) -> Option<SpiTiming> {
        self.spi
    }

    /// Link state
    pub const fn state(&self) -> LinkState {
        self.state
    }

    /// Resynchronize sequence counters with the secure element
    pub fn s_resynch(&mut self) -> Result<()> {
        self.block_transceive(&Block::s_request(SType::Resynch, Bytes::new()))?;
        self.reset_counters();
        self.state = LinkState::Ready;
        debug!("Link resynchronized");
        Ok(())
    }

    /// Read the communication interface parameters
    pub fn s_cip(&mut self) -> Result<Cip> {
        let response = self.block_transceive(&Block::s_request(SType::Cip, Bytes::new()))?;
        Cip::decode(&response.information)
    }

    /// Warm reset of the secure element
    pub fn s_swr(&mut self) -> Result<()> {
        self.block_transceive(&Block::s_request(SType::Swr, Bytes::new()))?;
        self.reset_counters();
        debug!("Secure element warm reset");
        Ok(())
    }

    /// Signal the end of an APDU session
    pub fn s_release(&mut self) -> Result<()> {
        self.block_transceive(&Block::s_request(SType::Release, Bytes::new()))?;
        Ok(())
    }

    /// Announce the information field size of the host
    pub fn set_ifsd(&mut self, ifsd: usize) -> Result<()> {
        let request = Block::s_request(SType::Ifs, ifs::encode(ifsd)?);
        let response = self.block_transceive(&request)?;
        match ifs::decode(&response.information) {
            Ok(echoed) if echoed == ifsd => {
                self.ifsd = ifsd;
                Ok(())
            }
            _ => Err(invalid_block(layer_function::SET_PROPERTY)),
        }
    }

    const fn reset_counters(&mut self) {
        self.send_counter = 0;
        self.receive_counter = 0;
    }

    fn negotiate(&mut self) -> Result<()> {
        self.base.set_clock_frequency(self.config.clock_frequency)?;
        if let Err(e) = self.base.activate() {
            debug!(error = %e, "Base layer activation failed, continuing");
        }

        let cip = self.s_cip()?;
        let dllp = cip.data_link_parameters()?;
        if dllp.ifsc == 0 {
            return Err(error(function::DLLP_DECODE, ErrorKind::IllegalArgument));
        }
        self.bwt = Duration::from_millis(dllp.bwt.into());
        self.ifsc = dllp.ifsc.into();

        let physical = cip.physical_layer()?;
        if physical.mcf() != 0 {
            self.base.set_clock_frequency(u32::from(physical.mcf()) * 1000)?;
        }
        self.mpot = physical.mpot();
        self.spi = match physical {
            PhysicalLayer::Spi(plp) => Some(SpiTiming { segt: plp.segt, seal: plp.seal }),
            PhysicalLayer::I2c(_) => None,
        };
        debug!(bwt = ?self.bwt, ifsc = self.ifsc, mpot = self.mpot, "Applied communication interface parameters");

        self.s_resynch()
    }

    fn transmit_block(&mut self, block: &Block) -> Result<()> {
        if block.pcb.is_i() && block.information.len() > self.ifsc {
            return Err(error(layer_function::TRANSMIT, ErrorKind::IllegalArgument));
        }
        let encoded = block.encode()?;
        trace!(%block, "Sending block");
        self.logger.log(LAYER_ID, LogLevel::Debug, &format!(">> {block}"));
        self.base.transmit(&encoded)
    }

    fn poll_nad(&mut self) -> Result<u8> {
        let deadline = Instant::now() + self.bwt;
        let polling_time = Duration::from_micros(u64::from(self.mpot) * 100);
        loop {
            if let Ok(data) = self.base.receive(Some(1))
                && let &[nad] = &data[..]
                && nad != 0x00
                && nad != 0xff
            {
                return Ok(nad);
            }
            if Instant::now() >= deadline {
                return Err(error(layer_function::RECEIVE, ErrorKind::TooLittleData));
            }
            thread::sleep(polling_time);
        }
    }

    fn receive_exact(&mut self, len: usize) -> Result<Bytes> {
        let data = self.base.receive(Some(len))?;
        if data.len() != len {
            return Err(error(layer_function::RECEIVE, ErrorKind::TooLittleData));
        }
        Ok(data)
    }

    fn receive_block(&mut self) -> Result<Block> {
        let nad = self.poll_nad()?;

        let header = self.receive_exact(PROLOGUE_LEN - 1)?;
        let len = u16::from_be_bytes([header[1], header[2]]) as usize;
        let information = if len > 0 { self.receive_exact(len)? } else { Bytes::new() };
        let epilogue = self.receive_exact(EPILOGUE_LEN)?;

        let block = Block { nad, pcb: Pcb(header[0]), information };
        trace!(%block, "Received block");
        self.logger.log(LAYER_ID, LogLevel::Debug, &format!("<< {block}"));

        block
            .validate_crc(u16::from_be_bytes([epilogue[0], epilogue[1]]))
            .map_err(|_| error(function::BLOCK_DECODE, ErrorKind::InvalidCrc))?;
        Ok(block)
    }

    /// Send `block` and return the answer of the secure element
    ///
    /// S requests only accept the matching S response. For every other block
    /// any well formed answer is returned and interpreted by the caller.
    pub fn block_transceive(&mut self, block: &Block) -> Result<Block> {
        let s_request = block.pcb.is_s() && block.pcb.is_request();
        let mut to_send = block.clone();
        let mut attempt = 0;

        loop {
            self.transmit_block(&to_send)?;
            if !self.wtx_delay.is_zero() {
                thread::sleep(mem::take(&mut self.wtx_delay));
            }

            let failure = match self.receive_block() {
                Ok(response) if !s_request => return Ok(response),
                Ok(response) => {
                    let pcb = response.pcb;
                    // same S type with the response bit set
                    if pcb.is_s() && !pcb.is_request() && pcb.0 & 0x1f == block.pcb.0 & 0x1f {
                        return Ok(response);
                    }
                    if pcb.is_i() || (pcb.is_r() && pcb.nr() != self.send_counter) {
                        return Err(invalid_block(layer_function::TRANSCEIVE));
                    }
                    invalid_block(layer_function::TRANSCEIVE)
                }
                Err(e) => e,
            };

            if attempt >= self.config.retransmissions {
                if s_request {
                    return Err(failure);
                }
                return self.resynchronize(failure);
            }
            attempt += 1;
            warn!(attempt, error = %failure, "Block exchange failed, retransmitting");

            if !s_request {
                to_send = Block::r(self.receive_counter, RType::Crc);
            }
        }
    }

    fn resynchronize(&mut self, failure: Error) -> Result<Block> {
        warn!(error = %failure, "Retransmissions exhausted, resynchronizing");
        self.state = LinkState::Resynchronizing;
        match self.s_resynch() {
            Ok(()) => Err(error(layer_function::TRANSCEIVE, ErrorKind::ResyncExhausted)),
            Err(e) => {
                self.state = LinkState::Fatal;
                Err(e)
            }
        }
    }

    fn i_block(&self, data: &Bytes, offset: usize, chunk: usize) -> Block {
        let more = offset + chunk < data.len();
        Block::i(self.send_counter, more, data.slice(offset..offset + chunk))
    }

    fn wtx_response(&mut self, request: Block) -> Result<Block> {
        let &[multiplier] = &request.information[..] else {
            return Err(invalid_block(layer_function::TRANSCEIVE));
        };
        self.wtx_delay = self.bwt * u32::from(multiplier);
        debug!(multiplier, delay = ?self.wtx_delay, "Waiting time extension requested");
        Ok(Block::s_response(SType::Wtx, request.information))
    }

    /// Send `data` as a chain of I blocks, returning the first I block of the answer
    fn send_chained(&mut self, data: &Bytes) -> Result<Block> {
        let mut offset = 0;
        let mut chunk = data.len().min(self.ifsc);
        let mut aborted = false;
        let mut retransmissions = 0;
        let mut request = self.i_block(data, offset, chunk);

        loop {
            let response = self.block_transceive(&request)?;
            let pcb = response.pcb;
            let last = offset + chunk >= data.len();

            if pcb.is_i() {
                if !last {
                    return Err(invalid_block(layer_function::TRANSCEIVE));
                }
                self.send_counter ^= 1;
                return Ok(response);
            }

            request = if pcb.is_r() {
                if pcb.nr() != self.send_counter ^ 1 {
                    if retransmissions >= self.config.retransmissions {
                        return self.resynchronize(invalid_block(layer_function::TRANSCEIVE));
                    }
                    retransmissions += 1;
                    warn!(attempt = retransmissions, "Secure element requested retransmission");
                    self.i_block(data, offset, chunk)
                } else if aborted {
                    return Err(error(layer_function::TRANSCEIVE, ErrorKind::Aborted));
                } else if last {
                    Block::r(self.receive_counter, RType::Crc)
                } else {
                    offset += chunk;
                    chunk = (data.len() - offset).min(self.ifsc);
                    self.send_counter ^= 1;
                    retransmissions = 0;
                    self.i_block(data, offset, chunk)
                }
            } else if pcb.is_s_request(SType::Wtx) {
                self.wtx_response(response)?
            } else if pcb.is_s_request(SType::Ifs) {
                let ifsc = ifs::decode(&response.information)?;
                if ifsc == 0 {
                    return Err(invalid_block(layer_function::TRANSCEIVE));
                }
                debug!(ifsc, "Secure element changed its information field size");
                self.ifsc = ifsc;
                chunk = chunk.min(ifsc);
                Block::s_response(SType::Ifs, response.information)
            } else if pcb.is_s_request(SType::Abort) {
                aborted = true;
                Block::s_response(SType::Abort, Bytes::new())
            } else {
                return Err(invalid_block(layer_function::TRANSCEIVE));
            };
        }
    }

    /// Collect the chained I blocks of an answer starting with `first`
    fn receive_chained(&mut self, first: Block) -> Result<Bytes> {
        let mut output = BytesMut::new();
        let mut retransmissions = 0;
        let mut response = first;

        loop {
            let pcb = response.pcb;
            let request = if pcb.is_i() {
                if pcb.ns() != self.receive_counter || (output.is_empty() && response.information.is_empty()) {
                    return Err(invalid_block(layer_function::TRANSCEIVE));
                }
                output.extend_from_slice(&response.information);
                self.receive_counter ^= 1;
                if !pcb.has_more() {
                    return Ok(output.freeze());
                }
                retransmissions = 0;
                Block::r(self.receive_counter, RType::Ack)
            } else if pcb.is_r() {
                if retransmissions >= self.config.retransmissions {
                    return self.resynchronize(invalid_block(layer_function::TRANSCEIVE)).map(|block| block.information);
                }
                retransmissions += 1;
                warn!(attempt = retransmissions, "Secure element requested retransmission");
                Block::r(self.receive_counter, RType::Ack)
            } else if pcb.is_s_request(SType::Wtx) {
                self.wtx_response(response)?
            } else if pcb.is_s_request(SType::Abort) {
                if let Err(e) = self.block_transceive(&Block::s_response(SType::Abort, Bytes::new())) {
                    debug!(error = %e, "No answer to abort response");
                }
                return Err(error(layer_function::TRANSCEIVE, ErrorKind::Aborted));
            } else {
                return Err(invalid_block(layer_function::TRANSCEIVE));
            };
            response = self.block_transceive(&request)?;
        }
    }
}

impl ProtocolLayer for T1Prime {
    fn layer_id(&self) -> &'static str {
        LAYER_ID
    }

    fn base(&self) -> Option<&(dyn ProtocolLayer + 'static)> {
        Some(&*self.base)
    }

    fn base_mut(&mut self) -> Option<&mut (dyn ProtocolLayer + 'static)> {
        Some(&mut *self.base)
    }

    fn activate(&mut self) -> Result<Bytes> {
        self.state = LinkState::Activating;
        self.ifsc = self.config.ifsc;
        self.bwt = self.config.bwt();
        self.mpot = self.config.mpot;

        match self.negotiate() {
            Ok(()) => {
                self.state = LinkState::Ready;
                Ok(Bytes::new())
            }
            Err(e) => {
                if self.state != LinkState::Fatal {
                    self.state = LinkState::Idle;
                }
                Err(e)
            }
        }
    }

    fn transceive(&mut self, data: &[u8]) -> Result<Bytes> {
        if data.is_empty() {
            return Err(error(layer_function::TRANSCEIVE, ErrorKind::IllegalArgument));
        }
        let data = Bytes::copy_from_slice(data);
        let first = self.send_chained(&data)?;
        self.receive_chained(first)
    }

    fn set_logger(&mut self, logger: Option<SharedLogger>) {
        self.logger.set(logger.clone());
        self.base.set_logger(logger);
    }

    fn log_handle(&self) -> Option<&LogHandle> {
        Some(&self.logger)
    }
}
