//! Persistent receiver configuration.
//!
//! Ground: `original_source/firmware/Receiver.h`'s `Configuration` struct,
//! `IsValidConfiguration`, and `LoadDefaultConfiguration`. The original reads
//! and writes this struct directly from AVR EEPROM with no abstraction; we
//! generalize the storage side behind [`EepromStorage`] so `load_or_default`
//! is host-testable, per the same reasoning as [`crate::capture_timer`].

pub const MAX_CHANNEL_COUNT: usize = crate::decoders::srxl::MAX_CHANNEL_COUNT as usize;

/// Schema tag `Configuration::version` must match; bumped whenever the
/// on-disk layout changes so a stale EEPROM image is rejected rather than
/// misinterpreted.
pub const SCHEMA_VERSION: u8 = 1;

/// Bit 0 of `Configuration::flags`: invert the PPM input signal's capture
/// polarity.
pub const FLAG_INVERTED_INPUT_POLARITY: u8 = 0x01;

const DEFAULT_MIN_SYNC_PULSE_WIDTH_US: u16 = 3500;
const DEFAULT_CENTER_CHANNEL_PULSE_WIDTH_US: u16 = 1500;
const DEFAULT_CHANNEL_PULSE_WIDTH_RANGE_US: u16 = 550;

const MIN_SYNC_WIDTH_US: u16 = 2000;
const MAX_SYNC_WIDTH_US: u16 = 4600;
const MIN_CHANNEL_PULSE_WIDTH_US: u16 = 800;
const MAX_CHANNEL_PULSE_WIDTH_US: u16 = 2200;
const MIN_CHANNEL_PULSE_WIDTH_RANGE_US: u16 = 10;

/// One joystick axis/button's mapping from a physical receiver channel.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(C)]
pub struct ChannelMapping {
    /// Index into the decoder's channel array, or `0xFF` to report neutral.
    pub source_channel: u8,
    /// Bit 0: invert polarity around center. Other bits reserved.
    pub flags: u8,
}

impl ChannelMapping {
    pub const UNMAPPED: u8 = 0xFF;

    pub const fn identity(source_channel: u8) -> Self {
        Self {
            source_channel,
            flags: 0,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.source_channel != Self::UNMAPPED
    }

    pub fn is_inverted(&self) -> bool {
        self.flags & 0x01 != 0
    }
}

/// The full persisted configuration. `#[repr(C)]` and plain-old-data so it
/// can be written to and read from EEPROM as raw bytes, matching the
/// original's direct struct-cast storage.
#[derive(Clone, Copy, PartialEq, Debug)]
#[repr(C)]
pub struct Configuration {
    /// Schema tag; must equal [`SCHEMA_VERSION`] for the rest of the struct
    /// to be trusted.
    pub version: u8,
    /// Global option bits; see [`FLAG_INVERTED_INPUT_POLARITY`].
    pub flags: u8,
    pub min_sync_pulse_width_us: u16,
    pub center_channel_pulse_width_us: u16,
    pub channel_pulse_width_range_us: u16,
    pub channel_mapping: [ChannelMapping; MAX_CHANNEL_COUNT],
}

impl Configuration {
    /// Whether the PPM input signal's capture polarity should be inverted
    /// ([`FLAG_INVERTED_INPUT_POLARITY`]).
    pub fn is_input_polarity_inverted(&self) -> bool {
        self.flags & FLAG_INVERTED_INPUT_POLARITY != 0
    }

    /// Validity predicate, ground: `Receiver.h::IsValidConfiguration`: the
    /// schema tag must match, the sync/center/range pulse-width parameters
    /// must each fall within their sane window, and every channel mapping
    /// must either be unmapped or reference a real input channel.
    pub fn is_valid(&self) -> bool {
        if self.version != SCHEMA_VERSION {
            return false;
        }

        if self.min_sync_pulse_width_us < MIN_SYNC_WIDTH_US
            || self.min_sync_pulse_width_us > MAX_SYNC_WIDTH_US
        {
            return false;
        }

        if self.center_channel_pulse_width_us < MIN_CHANNEL_PULSE_WIDTH_US
            || self.center_channel_pulse_width_us > MAX_CHANNEL_PULSE_WIDTH_US
        {
            return false;
        }

        if self.channel_pulse_width_range_us < MIN_CHANNEL_PULSE_WIDTH_RANGE_US
            || self.channel_pulse_width_range_us > MAX_CHANNEL_PULSE_WIDTH_US
        {
            return false;
        }

        self.channel_mapping
            .iter()
            .all(|mapping| !mapping.is_mapped() || (mapping.source_channel as usize) < MAX_CHANNEL_COUNT)
    }
}

impl Default for Configuration {
    /// Ground: `Receiver.h::LoadDefaultConfiguration` — identity channel
    /// mapping, no inversion, the three pulse-width constants unchanged
    /// from the original firmware.
    fn default() -> Self {
        let mut channel_mapping = [ChannelMapping::identity(0); MAX_CHANNEL_COUNT];
        for (i, mapping) in channel_mapping.iter_mut().enumerate() {
            *mapping = ChannelMapping::identity(i as u8);
        }

        Self {
            version: SCHEMA_VERSION,
            flags: 0,
            min_sync_pulse_width_us: DEFAULT_MIN_SYNC_PULSE_WIDTH_US,
            center_channel_pulse_width_us: DEFAULT_CENTER_CHANNEL_PULSE_WIDTH_US,
            channel_pulse_width_range_us: DEFAULT_CHANNEL_PULSE_WIDTH_RANGE_US,
            channel_mapping,
        }
    }
}

/// Byte-addressable persistent storage backing a [`Configuration`].
/// Implemented for real EEPROM in `main.rs`; tests use the RAM-backed fake
/// below.
pub trait EepromStorage {
    fn read(&self, offset: usize, buf: &mut [u8]);
    fn write(&mut self, offset: usize, buf: &[u8]);
}

const CONFIG_LEN: usize = core::mem::size_of::<Configuration>();

/// Reads a [`Configuration`] out of `storage`, falling back to
/// [`Configuration::default`] when the stored bytes fail validation — an
/// invalid configuration is never surfaced to the rest of the firmware.
pub fn load_or_default(storage: &impl EepromStorage) -> Configuration {
    let mut bytes = [0u8; CONFIG_LEN];
    storage.read(0, &mut bytes);

    // SAFETY: `Configuration` is `repr(C)` and plain-old-data, and `bytes`
    // is exactly `CONFIG_LEN` long, so every bit pattern is a valid (if
    // perhaps semantically invalid) instance.
    let candidate: Configuration = unsafe { core::ptr::read(bytes.as_ptr() as *const Configuration) };

    if candidate.is_valid() {
        candidate
    } else {
        Configuration::default()
    }
}

/// Persists `config` to `storage` as raw bytes.
pub fn save(storage: &mut impl EepromStorage, config: &Configuration) {
    let bytes = unsafe {
        core::slice::from_raw_parts((config as *const Configuration) as *const u8, CONFIG_LEN)
    };
    storage.write(0, bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RamStorage {
        bytes: [u8; 256],
    }

    impl RamStorage {
        fn new() -> Self {
            Self { bytes: [0xFF; 256] }
        }

        fn zeroed() -> Self {
            Self { bytes: [0; 256] }
        }
    }

    impl EepromStorage for RamStorage {
        fn read(&self, offset: usize, buf: &mut [u8]) {
            buf.copy_from_slice(&self.bytes[offset..offset + buf.len()]);
        }

        fn write(&mut self, offset: usize, buf: &[u8]) {
            self.bytes[offset..offset + buf.len()].copy_from_slice(buf);
        }
    }

    #[test]
    fn default_configuration_is_valid() {
        assert!(Configuration::default().is_valid());
    }

    #[test]
    fn default_configuration_has_identity_mapping() {
        let config = Configuration::default();
        for (i, mapping) in config.channel_mapping.iter().enumerate() {
            assert_eq!(mapping.source_channel, i as u8);
            assert!(!mapping.is_inverted());
        }
    }

    #[test]
    fn blank_eeprom_falls_back_to_defaults() {
        let storage = RamStorage::new();
        let config = load_or_default(&storage);
        assert_eq!(config, Configuration::default());
    }

    #[test]
    fn zeroed_eeprom_falls_back_to_defaults() {
        let storage = RamStorage::zeroed();
        let config = load_or_default(&storage);
        assert_eq!(config, Configuration::default());
    }

    #[test]
    fn saved_configuration_round_trips() {
        let mut storage = RamStorage::new();
        let mut config = Configuration::default();
        config.center_channel_pulse_width_us = 1520;
        config.channel_mapping[0] = ChannelMapping {
            source_channel: 3,
            flags: 0x01,
        };

        save(&mut storage, &config);
        let loaded = load_or_default(&storage);

        assert_eq!(loaded, config);
        assert!(loaded.channel_mapping[0].is_inverted());
    }

    #[test]
    fn zero_range_is_invalid() {
        let mut config = Configuration::default();
        config.channel_pulse_width_range_us = 0;
        assert!(!config.is_valid());
    }

    #[test]
    fn wrong_schema_version_is_invalid() {
        let mut config = Configuration::default();
        config.version = SCHEMA_VERSION.wrapping_add(1);
        assert!(!config.is_valid());
    }

    #[test]
    fn sync_pulse_width_outside_window_is_invalid() {
        let mut config = Configuration::default();
        config.min_sync_pulse_width_us = MIN_SYNC_WIDTH_US - 1;
        assert!(!config.is_valid());
    }

    #[test]
    fn center_pulse_width_outside_window_is_invalid() {
        let mut config = Configuration::default();
        config.center_channel_pulse_width_us = MAX_CHANNEL_PULSE_WIDTH_US + 1;
        assert!(!config.is_valid());
    }

    #[test]
    fn out_of_range_channel_mapping_is_invalid() {
        let mut config = Configuration::default();
        config.channel_mapping[0].source_channel = MAX_CHANNEL_COUNT as u8;
        assert!(!config.is_valid());
    }

    #[test]
    fn unmapped_channel_mapping_is_still_valid() {
        let mut config = Configuration::default();
        config.channel_mapping[0].source_channel = ChannelMapping::UNMAPPED;
        assert!(config.is_valid());
    }

    #[test]
    fn inverted_input_polarity_flag_round_trips() {
        let mut config = Configuration::default();
        assert!(!config.is_input_polarity_inverted());
        config.flags |= FLAG_INVERTED_INPUT_POLARITY;
        assert!(config.is_input_polarity_inverted());
    }
}
