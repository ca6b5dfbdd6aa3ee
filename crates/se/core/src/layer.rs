//! Protocol layering
//!
//! A protocol stack is a chain of layers, each owning the layer below it. The
//! bottom of every chain is a [`DriverLayer`](crate::transport::DriverLayer).
//! Operations a layer does not implement itself fall through to the default
//! methods of [`ProtocolLayer`], which either delegate to the base layer or
//! report an invalid stack.

use std::{any::Any, fmt};

use bytes::Bytes;
use tracing::debug;

use crate::{
    command::Command,
    error::{Error, ErrorKind, Result, function, module},
    logger::{LogHandle, LogLevel, SharedLogger},
    response::Response,
};

/// Log source used for APDU traces
pub const APDU_LOG_SOURCE: &str = "APDU";

/// One layer of a protocol stack
pub trait ProtocolLayer: fmt::Debug + Send + Any {
    /// Short identifier, also used as log source
    fn layer_id(&self) -> &'static str;

    /// Layer below this one
    fn base(&self) -> Option<&(dyn ProtocolLayer + 'static)> {
        None
    }

    /// Layer below this one
    fn base_mut(&mut self) -> Option<&mut (dyn ProtocolLayer + 'static)> {
        None
    }

    /// Bring the layer up, returning the answer to reset
    fn activate(&mut self) -> Result<Bytes> {
        match self.base_mut() {
            Some(base) => base.activate(),
            None => Err(Error::invalid_stack(module::PROTOCOL, function::ACTIVATE)),
        }
    }

    /// Send `data` and return the answer
    fn transceive(&mut self, data: &[u8]) -> Result<Bytes> {
        self.transmit(data)?;
        self.receive(None)
    }

    /// Send `data` without waiting for an answer
    fn transmit(&mut self, _data: &[u8]) -> Result<()> {
        Err(Error::invalid_stack(module::PROTOCOL, function::TRANSMIT))
    }

    /// Receive `len` bytes, or whatever is available with `None`
    fn receive(&mut self, _len: Option<usize>) -> Result<Bytes> {
        Err(Error::invalid_stack(module::PROTOCOL, function::RECEIVE))
    }

    /// Attach a logger to this layer and every layer below
    fn set_logger(&mut self, logger: Option<SharedLogger>) {
        if let Some(base) = self.base_mut() {
            base.set_logger(logger);
        }
    }

    /// Logger reachable from this layer
    fn log_handle(&self) -> Option<&LogHandle> {
        self.base().and_then(|base| base.log_handle())
    }

    /// Change the bus clock
    fn set_clock_frequency(&mut self, hz: u32) -> Result<()> {
        match self.base_mut() {
            Some(base) => base.set_clock_frequency(hz),
            None => Err(Error::invalid_stack(module::PROTOCOL, function::SET_PROPERTY)),
        }
    }

    /// Change the bus address of the secure element
    fn set_address(&mut self, address: u16) -> Result<()> {
        match self.base_mut() {
            Some(base) => base.set_address(address),
            None => Err(Error::invalid_stack(module::PROTOCOL, function::SET_PROPERTY)),
        }
    }
}

impl dyn ProtocolLayer {
    /// Find the first layer of type `L`, starting at this one
    pub fn find_layer<L: ProtocolLayer>(&self) -> Option<&L> {
        let any: &dyn Any = self;
        match any.downcast_ref::<L>() {
            Some(layer) => Some(layer),
            None => self.base()?.find_layer::<L>(),
        }
    }

    /// Find the first layer of type `L`, starting at this one
    pub fn find_layer_mut<L: ProtocolLayer>(&mut self) -> Option<&mut L> {
        let is_match = {
            let any: &dyn Any = &*self;
            any.is::<L>()
        };
        if is_match {
            let any: &mut dyn Any = self;
            return any.downcast_mut::<L>();
        }
        self.base_mut()?.find_layer_mut::<L>()
    }
}

/// Exchange of whole APDUs over a layer
pub trait ApduTransceive {
    /// Encode `command`, transceive it and decode the response
    fn transceive_apdu(&mut self, command: &Command) -> Result<Response>;
}

fn apdu_exchange<F>(log: Option<LogHandle>, command: &Command, transceive: F) -> Result<Response>
where
    F: FnOnce(&[u8]) -> Result<Bytes>,
{
    let encoded = command.to_bytes()?;
    if let Some(log) = &log {
        log.log_bytes(APDU_LOG_SOURCE, LogLevel::Info, ">> ", &encoded, " ");
    }

    let raw = transceive(&encoded)?;
    if let Some(log) = &log {
        log.log_bytes(APDU_LOG_SOURCE, LogLevel::Info, "<< ", &raw, " ");
    }

    Response::from_bytes(&raw)
        .map_err(|_| Error::new(module::APDU_PROTOCOL, function::TRANSCEIVE, ErrorKind::TooLittleData))
}

impl<T: ProtocolLayer + ?Sized> ApduTransceive for T {
    fn transceive_apdu(&mut self, command: &Command) -> Result<Response> {
        let log = self.log_handle().cloned();
        apdu_exchange(log, command, |data| self.transceive(data))
    }
}

/// Owner of a complete protocol stack
#[derive(Debug, Default)]
pub struct ProtocolStack {
    top: Option<Box<dyn ProtocolLayer>>,
}

impl ProtocolStack {
    /// Stack with `top` as outermost layer
    pub fn new(top: impl ProtocolLayer) -> Self {
        Self { top: Some(Box::new(top)) }
    }

    /// Stack from an already boxed layer
    pub fn from_boxed(top: Box<dyn ProtocolLayer>) -> Self {
        Self { top: Some(top) }
    }

    /// Stack without layers
    pub const fn empty() -> Self {
        Self { top: None }
    }

    /// Whether the stack has no layers
    pub const fn is_empty(&self) -> bool {
        self.top.is_none()
    }

    /// Outermost layer
    pub fn top_mut(&mut self) -> Option<&mut (dyn ProtocolLayer + 'static)> {
        self.top.as_deref_mut()
    }

    fn top_or(&mut self, function: u8) -> Result<&mut (dyn ProtocolLayer + 'static)> {
        self.top
            .as_deref_mut()
            .ok_or_else(|| Error::invalid_stack(module::PROTOCOL, function))
    }

    /// Activate the stack, returning the answer to reset
    pub fn activate(&mut self) -> Result<Bytes> {
        self.top_or(function::ACTIVATE)?.activate()
    }

    /// Send `data` and return the answer
    pub fn transceive(&mut self, data: &[u8]) -> Result<Bytes> {
        self.top_or(function::TRANSCEIVE)?.transceive(data)
    }

    /// Send `data` without waiting for an answer
    pub fn transmit(&mut self, data: &[u8]) -> Result<()> {
        self.top_or(function::TRANSMIT)?.transmit(data)
    }

    /// Receive from the stack
    pub fn receive(&mut self, len: Option<usize>) -> Result<Bytes> {
        self.top_or(function::RECEIVE)?.receive(len)
    }

    /// Attach a logger to every layer
    pub fn set_logger(&mut self, logger: Option<SharedLogger>) {
        if let Some(top) = self.top.as_deref_mut() {
            top.set_logger(logger);
        }
    }

    /// Find the first layer of type `L`, starting at the top
    pub fn find_layer<L: ProtocolLayer>(&self) -> Option<&L> {
        self.top.as_deref()?.find_layer::<L>()
    }

    /// Find the first layer of type `L`, starting at the top
    pub fn find_layer_mut<L: ProtocolLayer>(&mut self) -> Option<&mut L> {
        self.top.as_deref_mut()?.find_layer_mut::<L>()
    }

    /// Tear down every layer, outermost first
    pub fn destroy(mut self) {
        if let Some(top) = self.top.take() {
            debug!(layer = top.layer_id(), "Destroying protocol stack");
        }
    }
}

impl ApduTransceive for ProtocolStack {
    fn transceive_apdu(&mut self, command: &Command) -> Result<Response> {
        let top = self.top_or(function::TRANSCEIVE)?;
        top.transceive_apdu(command)
    }
}
