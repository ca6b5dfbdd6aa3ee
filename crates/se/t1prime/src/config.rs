//! Link parameters used until the secure element announces its own

use std::time::Duration;

/// Default parameters of a [`T1Prime`](crate::T1Prime) layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct T1PrimeConfig {
    /// Information field size of the secure element
    pub ifsc: usize,
    /// Information field size of the host
    pub ifsd: usize,
    /// Block waiting time in ms
    pub bwt_ms: u16,
    /// Minimum polling time in multiples of 100 µs
    pub mpot: u8,
    /// Bus clock used for the CIP exchange, in Hz
    pub clock_frequency: u32,
    /// How often a block is retransmitted before giving up
    pub retransmissions: usize,
}

impl Default for T1PrimeConfig {
    fn default() -> Self {
        Self { ifsc: 8, ifsd: 0xfe, bwt_ms: 300, mpot: 10, clock_frequency: 400_000, retransmissions: 1 }
    }
}

impl T1PrimeConfig {
    /// Set the retransmission budget
    pub const fn with_retransmissions(mut self, retransmissions: usize) -> Self {
        self.retransmissions = retransmissions;
        self
    }

    /// Set the initial block waiting time, saturating at 65535 ms
    pub const fn with_bwt(mut self, bwt: Duration) -> Self {
        let ms = bwt.as_millis();
        self.bwt_ms = if ms > u16::MAX as u128 { u16::MAX } else { ms as u16 };
        self
    }

    /// Set the initial information field size of the secure element
    pub const fn with_ifsc(mut self, ifsc: usize) -> Self {
        self.ifsc = ifsc;
        self
    }

    /// Block waiting time
    pub const fn bwt(&self) -> Duration {
        Duration::from_millis(self.bwt_ms as u64)
    }

    /// Minimum polling time
    pub const fn polling_time(&self) -> Duration {
        Duration::from_micros(self.mpot as u64 * 100)
    }
}
