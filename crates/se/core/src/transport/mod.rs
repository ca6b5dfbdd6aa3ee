//! Physical transport to the secure element
//!
//! A [`PhysicalDriver`] moves raw bytes over the bus. It knows nothing about
//! blocks or commands. [`DriverLayer`] turns a driver into the bottom layer of
//! a protocol stack.

pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod stream;

use std::{fmt, time::Duration};

use bytes::Bytes;
pub use error::TransportError;
use tracing::{debug, trace, warn};

use crate::{
    config::DriverConfig,
    error::{Error, ErrorKind, Result, function, module},
    layer::ProtocolLayer,
    logger::{LogHandle, LogLevel, SharedLogger},
};

/// Adapter state owned by a [`DriverLayer`] and passed to every driver call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverContext {
    /// Bus clock in Hz
    pub clock_frequency: u32,
    /// Bus address of the secure element
    pub address: u16,
    /// Upper bound for a single read or write
    pub timeout: Duration,
    /// Whether [`PhysicalDriver::open`] succeeded and the driver is not closed
    pub is_open: bool,
}

impl From<&DriverConfig> for DriverContext {
    fn from(config: &DriverConfig) -> Self {
        Self {
            clock_frequency: config.clock_frequency,
            address: config.address,
            timeout: config.timeout,
            is_open: false,
        }
    }
}

/// Byte level access to the bus the secure element is attached to
pub trait PhysicalDriver: Send + fmt::Debug {
    /// Acquire the bus and power up or reset the secure element
    fn open(&mut self, ctx: &mut DriverContext) -> std::result::Result<(), TransportError>;

    /// Read from the bus
    ///
    /// With `Some(len)` exactly `len` bytes are returned. With `None` the driver
    /// returns whatever the device delivered in one transfer.
    fn read(&mut self, ctx: &DriverContext, len: Option<usize>) -> std::result::Result<Bytes, TransportError> {
        let result = self.do_read(ctx, len);
        match &result {
            Ok(data) => {
                trace!(data = ?hex::encode(data), "Read from bus");
            }
            Err(e) => {
                debug!(error = ?e, "Transport error during read");
            }
        }
        result
    }

    /// Internal implementation of read
    fn do_read(&mut self, ctx: &DriverContext, len: Option<usize>) -> std::result::Result<Bytes, TransportError>;

    /// Write to the bus
    fn write(&mut self, ctx: &DriverContext, data: &[u8]) -> std::result::Result<(), TransportError> {
        trace!(data = ?hex::encode(data), "Writing to bus");
        let result = self.do_write(ctx, data);
        if let Err(e) = &result {
            debug!(error = ?e, "Transport error during write");
        }
        result
    }

    /// Internal implementation of write
    fn do_write(&mut self, ctx: &DriverContext, data: &[u8]) -> std::result::Result<(), TransportError>;

    /// Change the bus clock
    fn set_clock_frequency(&mut self, ctx: &mut DriverContext, hz: u32) -> std::result::Result<(), TransportError> {
        ctx.clock_frequency = hz;
        Ok(())
    }

    /// Change the bus address of the secure element
    fn set_address(&mut self, ctx: &mut DriverContext, address: u16) -> std::result::Result<(), TransportError> {
        ctx.address = address;
        Ok(())
    }

    /// Release the bus
    fn close(&mut self, ctx: &mut DriverContext) -> std::result::Result<(), TransportError> {
        ctx.is_open = false;
        Ok(())
    }
}

/// Bottom layer of every protocol stack
#[derive(Debug)]
pub struct DriverLayer<D: PhysicalDriver> {
    driver: D,
    context: DriverContext,
    logger: LogHandle,
}

impl<D: PhysicalDriver> DriverLayer<D> {
    /// Layer identifier used as log source
    pub const LAYER_ID: &'static str = "I2C";

    /// Wrap `driver` with the settings from `config`
    pub fn new(driver: D, config: &DriverConfig) -> Self {
        Self { driver, context: DriverContext::from(config), logger: LogHandle::default() }
    }

    /// Current bus clock in Hz
    pub const fn clock_frequency(&self) -> u32 {
        self.context.clock_frequency
    }

    /// Current bus address
    pub const fn address(&self) -> u16 {
        self.context.address
    }

    /// Adapter state
    pub const fn context(&self) -> &DriverContext {
        &self.context
    }

    /// The wrapped driver
    pub const fn driver(&self) -> &D {
        &self.driver
    }

    fn transport_error(function: u8, error: TransportError) -> Error {
        Error::new(module::I2C, function, ErrorKind::Transport(error))
    }
}

impl<D: PhysicalDriver + 'static> ProtocolLayer for DriverLayer<D> {
    fn layer_id(&self) -> &'static str {
        Self::LAYER_ID
    }

    fn activate(&mut self) -> Result<Bytes> {
        if !self.context.is_open {
            self.driver
                .open(&mut self.context)
                .map_err(|e| Self::transport_error(function::ACTIVATE, e))?;
            self.context.is_open = true;
            debug!(address = self.context.address, clock = self.context.clock_frequency, "Driver opened");
        }
        Ok(Bytes::new())
    }

    fn transmit(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::new(module::I2C, function::TRANSMIT, ErrorKind::IllegalArgument));
        }
        self.logger.log_bytes(Self::LAYER_ID, LogLevel::Debug, ">> ", data, " ");
        self.driver
            .write(&self.context, data)
            .map_err(|e| Self::transport_error(function::TRANSMIT, e))
    }

    fn receive(&mut self, len: Option<usize>) -> Result<Bytes> {
        if len == Some(0) {
            return Err(Error::new(module::I2C, function::RECEIVE, ErrorKind::IllegalArgument));
        }
        let data = self
            .driver
            .read(&self.context, len)
            .map_err(|e| Self::transport_error(function::RECEIVE, e))?;
        self.logger.log_bytes(Self::LAYER_ID, LogLevel::Debug, "<< ", &data, " ");
        Ok(data)
    }

    fn set_logger(&mut self, logger: Option<SharedLogger>) {
        self.logger.set(logger);
    }

    fn log_handle(&self) -> Option<&LogHandle> {
        Some(&self.logger)
    }

    fn set_clock_frequency(&mut self, hz: u32) -> Result<()> {
        self.driver
            .set_clock_frequency(&mut self.context, hz)
            .map_err(|e| Self::transport_error(function::SET_PROPERTY, e))
    }

    fn set_address(&mut self, address: u16) -> Result<()> {
        self.driver
            .set_address(&mut self.context, address)
            .map_err(|e| Self::transport_error(function::SET_PROPERTY, e))
    }
}

impl<D: PhysicalDriver> Drop for DriverLayer<D> {
    fn drop(&mut self) {
        if self.context.is_open
            && let Err(e) = self.driver.close(&mut self.context)
        {
            warn!(error = %e, "Failed to close driver");
        }
        self.context.is_open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::{mock::MockDriver, *};
    use hex_literal::hex;

    #[test]
    fn test_driver_layer_defaults() {
        let layer = DriverLayer::new(MockDriver::new(), &DriverConfig::default());
        assert_eq!(layer.address(), 0x10);
        assert_eq!(layer.clock_frequency(), 100_000);
        assert!(!layer.context().is_open);
    }

    #[test]
    fn test_activate_opens_once() {
        let mock = MockDriver::new();
        let mut layer = DriverLayer::new(mock.clone(), &DriverConfig::default());

        assert!(layer.activate().unwrap().is_empty());
        assert!(layer.activate().unwrap().is_empty());
        assert_eq!(mock.open_count(), 1);

        drop(layer);
        assert_eq!(mock.close_count(), 1);
    }

    #[test]
    fn test_drop_without_open_does_not_close() {
        let mock = MockDriver::new();
        drop(DriverLayer::new(mock.clone(), &DriverConfig::default()));
        assert_eq!(mock.close_count(), 0);
    }

    #[test]
    fn test_transmit_receive() {
        let mock = MockDriver::new();
        mock.expect_write(hex!("0102"));
        mock.queue_read(hex!("a1a2a3"));

        let mut layer = DriverLayer::new(mock.clone(), &DriverConfig::default());
        layer.activate().unwrap();
        layer.transmit(&hex!("0102")).unwrap();
        assert_eq!(layer.receive(Some(1)).unwrap().as_ref(), hex!("a1"));
        assert_eq!(layer.receive(None).unwrap().as_ref(), hex!("a2a3"));
        assert!(mock.is_done());
    }

    #[test]
    fn test_zero_length_is_illegal() {
        let mut layer = DriverLayer::new(MockDriver::new(), &DriverConfig::default());
        let error = layer.transmit(&[]).unwrap_err();
        assert_eq!(error.code().decompose(), (0x23, 0x83, 0xfd));
        let error = layer.receive(Some(0)).unwrap_err();
        assert_eq!(error.code().decompose(), (0x23, 0x84, 0xfd));
    }

    #[test]
    fn test_unexpected_write_is_transport_error() {
        let mock = MockDriver::new();
        mock.expect_write(hex!("0102"));
        let mut layer = DriverLayer::new(mock, &DriverConfig::default());
        let error = layer.transmit(&hex!("0103")).unwrap_err();
        assert!(error.is_transport());
        assert_eq!(error.code().module(), module::I2C);
    }

    #[test]
    fn test_set_clock_and_address() {
        let mock = MockDriver::new();
        let mut layer = DriverLayer::new(mock.clone(), &DriverConfig::default());
        layer.set_clock_frequency(400_000).unwrap();
        layer.set_address(0x48).unwrap();
        assert_eq!(layer.clock_frequency(), 400_000);
        assert_eq!(layer.address(), 0x48);
        assert_eq!(mock.clock_frequencies(), [400_000]);
    }
}
