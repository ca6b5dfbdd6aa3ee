//! Key selection used when a session is opened without explicit parameters

/// Defaults for [`Scp03::open`](crate::Scp03::open)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Scp03Config {
    /// Key version number, `0x00` selects the first available key set
    pub key_version: u8,
    /// Key identifier
    pub key_id: u8,
    /// Logical channel (0 to 19)
    pub channel: u8,
}

impl Scp03Config {
    /// Select a key set
    pub const fn with_key(mut self, key_version: u8, key_id: u8) -> Self {
        self.key_version = key_version;
        self.key_id = key_id;
        self
    }

    /// Select a logical channel
    pub const fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Scp03Config::default();
        assert_eq!((config.key_version, config.key_id, config.channel), (0, 0, 0));

        let config = config.with_key(0x30, 0x01).with_channel(5);
        assert_eq!((config.key_version, config.key_id, config.channel), (0x30, 0x01, 5));
    }
}
