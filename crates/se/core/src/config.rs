//! Physical driver configuration

use std::time::Duration;

/// Default bus address of the secure element
pub const DEFAULT_ADDRESS: u16 = 0x10;

/// Default bus clock in Hz
pub const DEFAULT_CLOCK_FREQUENCY: u32 = 100_000;

/// Settings applied to a [`DriverLayer`](crate::transport::DriverLayer) on creation
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DriverConfig {
    /// Bus address of the secure element
    pub address: u16,
    /// Bus clock in Hz
    pub clock_frequency: u32,
    /// Upper bound for a single bus read or write
    pub timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            clock_frequency: DEFAULT_CLOCK_FREQUENCY,
            timeout: Duration::from_secs(1),
        }
    }
}

impl DriverConfig {
    /// Use a different bus address
    pub const fn with_address(mut self, address: u16) -> Self {
        self.address = address;
        self
    }

    /// Use a different bus clock
    pub const fn with_clock_frequency(mut self, clock_frequency: u32) -> Self {
        self.clock_frequency = clock_frequency;
        self
    }

    /// Use a different bus timeout
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
