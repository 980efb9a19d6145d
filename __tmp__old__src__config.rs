//! Persistent receiver configuration (spec §3 "Configuration", §4.E,
//! §6 "Configuration validation").
//!
//! Ground: `original_source/firmware/Receiver.h`'s `Configuration` struct,
//! `IsValidConfiguration`, and `LoadDefaultConfiguration`. The original reads
//! and writes this struct directly from AVR EEPROM with no abstraction; we
//! generalize the storage side behind [`EepromStorage`] so `load_or_default`
//! is host-testable, per the same reasoning as [`crate::capture_timer`].

pub const MAX_CHANNEL_COUNT: usize = crate::decoders::srxl::MAX_CHANNEL_COUNT as usize;

const DEFAULT_MIN_SYNC_PULSE_WIDTH_US: u16 = 3500;
const DEFAULT_CENTER_CHANNEL_PULSE_WIDTH_US: u16 = 1500;
const DEFAULT_CHANNEL_PULSE_WIDTH_RANGE_US: u16 = 550;

/// One joystick axis/button's mapping from a physical receiver channel
/// (spec §4.E "Channel mapping").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(C)]
pub struct ChannelMapping {
    /// Index into the decoder's channel array, or `0xFF` to report neutral
    /// (spec §4.E "Unmapped channel").
    pub source_channel: u8,
    /// Bit 0: invert polarity around center. Other bits reserved (spec §4.E
    /// "Polarity").
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

/// The full persisted configuration (spec §3 "Configuration"). `#[repr(C)]`
/// and plain-old-data so it can be written to and read from EEPROM as raw
/// bytes, matching the original's direct struct-cast storage.
#[derive(Clone, Copy, PartialEq, Debug)]
#[repr(C)]
pub struct Configuration {
    pub min_sync_pulse_width_us: u16,
    pub center_channel_pulse_width_us: u16,
    pub channel_pulse_width_range_us: u16,
    pub channel_mapping: [ChannelMapping; MAX_CHANNEL_COUNT],
}

impl Configuration {
    /// Spec §6's validity predicate: pulse-width parameters must describe a
    /// sane, non-degenerate scaling window. Ground:
    /// `Receiver.h::IsValidConfiguration`.
    pub fn is_valid(&self) -> bool {
        self.channel_pulse_width_range_us > 0
            && self.min_sync_pulse_width_us > 0
            && self.center_channel_pulse_width_us > self.channel_pulse_width_range_us
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
            min_sync_pulse_width_us: DEFAULT_MIN_SYNC_PULSE_WIDTH_US,
            center_channel_pulse_width_us: DEFAULT_CENTER_CHANNEL_PULSE_WIDTH_US,
            channel_pulse_width_range_us: DEFAULT_CHANNEL_PULSE_WIDTH_RANGE_US,
            channel_mapping,
        }
    }
}

/// Byte-addressable persistent storage backing a [`Configuration`] (spec §4.E
/// "Configuration storage"). Implemented for real EEPROM in `main.rs`; tests
/// use the RAM-backed fake below.
pub trait EepromStorage {
    fn read(&self, offset: usize, buf: &mut [u8]);
    fn write(&mut self, offset: usize, buf: &[u8]);
}

const CONFIG_LEN: usize = core::mem::size_of::<Configuration>();

/// Reads a [`Configuration`] out of `storage`, falling back to
/// [`Configuration::default`] when the stored bytes fail validation (spec
/// §6: "an invalid configuration is never surfaced; defaults are used
/// instead").
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
