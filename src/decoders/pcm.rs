//! PCM decoder: a pulse-width-symbol byte encoding with a 2-bit per-byte
//! checksum.
//!
//! Ground: `original_source/firmware/PcmReceiver.h`. We use the XOR-3
//! checksum variant (`calculate_checksum` below); the original source file
//! instead implements the plain-parity form with no leading `3 ^`, which we
//! do not carry forward — see DESIGN.md.

use crate::capture_timer::{ticks_since, us_to_ticks, CaptureTimer};
use crate::decoders::{DecoderState, MIN_CHANNEL_COUNT};

pub const MAX_CHANNEL_COUNT: u8 = 9;
const MIN_SYNC_PULSE_WIDTH_US: u16 = 750;
const NEUTRAL_BYTE: u8 = 0x80;

/// Symbol boundaries, in microseconds, for the 7 nominal pulse widths
/// (spacing 140 us, centered bins of +-70 us).
const SYMBOL_WIDTHS_US: [u16; 7] = [880, 1020, 1160, 1300, 1440, 1580, 1720];
const SYMBOL_HALF_SPACING_US: u16 = 70;

pub struct PcmDecoder<T: CaptureTimer> {
    timer: T,
    channel_data: [[u8; MAX_CHANNEL_COUNT as usize]; 2],
    time_of_last_edge: u16,
    state: DecoderState,
    last_value: u8,
    bit_count: u8,
    current_byte: u8,
    current_bank: u8,
    current_channel: u8,
    channel_count: u8,
    timeout_counter: u8,
    positive_edge: bool,
    is_receiving: bool,
    has_new_data: bool,
}

impl<T: CaptureTimer> PcmDecoder<T> {
    pub fn new(timer: T) -> Self {
        let mut decoder = Self {
            timer,
            channel_data: [[0; MAX_CHANNEL_COUNT as usize]; 2],
            time_of_last_edge: 0,
            state: DecoderState::WaitingForSync,
            last_value: 3,
            bit_count: 0,
            current_byte: 0,
            current_bank: 0,
            current_channel: 0,
            channel_count: 0,
            timeout_counter: 0,
            positive_edge: false,
            is_receiving: false,
            has_new_data: false,
        };
        decoder.wait_for_sync();
        decoder
    }

    pub fn reset(&mut self) {
        self.wait_for_sync();
        self.current_bank = 0;
        self.channel_count = 0;
        self.is_receiving = false;
        self.has_new_data = false;
    }

    /// Called once per 1 ms task tick.
    pub fn run_task(&mut self) {
        const TIMEOUT_MS: u8 = 100;
        if self.timeout_counter < TIMEOUT_MS {
            self.timeout_counter += 1;
        } else {
            self.timeout_counter = 0;
            self.reset();
        }
    }

    pub fn is_receiving(&self) -> bool {
        self.is_receiving
    }

    pub fn has_new_data(&self) -> bool {
        self.has_new_data
    }

    pub fn clear_new_data(&mut self) {
        self.has_new_data = false;
    }

    pub fn channel_count(&self) -> u8 {
        self.channel_count
    }

    /// Raw byte for `channel`, or the neutral default `0x80` once `channel`
    /// is out of range.
    pub fn get_channel_data(&self, channel: u8) -> u8 {
        if channel < self.channel_count {
            let read_bank = (self.current_bank ^ 1) as usize;
            self.channel_data[read_bank][channel as usize]
        } else {
            NEUTRAL_BYTE
        }
    }

    /// Input-capture ISR handler: a new edge arrived, of either polarity
    /// while sync-searching, then of the configured polarity once
    /// `ReceivingData`.
    pub fn on_input_capture(&mut self) {
        let time = self.timer.last_capture();
        self.process_edge(time);
    }

    fn wait_for_sync(&mut self) {
        self.timer.set_capture_edge(false);
        self.positive_edge = false;
        self.state = DecoderState::WaitingForSync;
    }

    fn process_edge(&mut self, time: u16) {
        let diff = ticks_since(self.time_of_last_edge, time);
        self.time_of_last_edge = time;

        match self.state {
            DecoderState::WaitingForSync => {
                if self.positive_edge {
                    self.positive_edge = false;
                    self.timer.set_capture_edge(false);

                    if diff >= us_to_ticks(MIN_SYNC_PULSE_WIDTH_US) {
                        self.state = DecoderState::SyncDetected;
                    }
                } else {
                    self.positive_edge = true;
                    self.timer.set_capture_edge(true);
                }
            }
            DecoderState::SyncDetected => {
                self.state = DecoderState::ReceivingData;
                self.last_value = 3;
                self.bit_count = 0;
                self.current_byte = 0;
                self.current_channel = 0;
            }
            DecoderState::ReceivingData => self.process_receiving_edge(diff),
        }
    }

    fn process_receiving_edge(&mut self, diff: u16) {
        let offset = 3u8.wrapping_sub(self.last_value);
        let symbol = Self::get_symbol(diff);

        let complete = if symbol >= offset {
            let value = symbol - offset;
            if value <= 3 {
                self.accept_bit_pair(value);
                false
            } else {
                true
            }
        } else {
            true
        };

        if complete {
            self.complete_frame();
        }
    }

    fn accept_bit_pair(&mut self, value: u8) {
        if self.bit_count >= 8 {
            let current_channel = self.current_channel;
            if current_channel < MAX_CHANNEL_COUNT {
                self.channel_data[self.current_bank as usize][current_channel as usize] =
                    self.current_byte;
                self.current_channel = current_channel + 1;
            }

            if Self::calculate_checksum(self.current_byte) != value {
                defmt::warn!("PCM: checksum mismatch, resyncing");
                self.wait_for_sync();
            }

            self.bit_count = 0;
            self.current_byte = 0;
        } else {
            self.bit_count += 2;
            self.current_byte = (self.current_byte << 2) | value;
        }

        self.last_value = value;
    }

    fn complete_frame(&mut self) {
        let current_channel = self.current_channel;
        if current_channel >= MIN_CHANNEL_COUNT {
            self.timeout_counter = 0;
            self.current_bank ^= 1;
            self.channel_count = current_channel;
            self.is_receiving = true;
            self.has_new_data = true;
        } else {
            defmt::warn!("PCM: short frame ({} channels), discarding", current_channel);
        }

        self.state = DecoderState::WaitingForSync;
    }

    /// Maps a pulse width in ticks to a 3-bit symbol: 0..6 for the seven
    /// nominal widths, 7 for "too short". Widths above the highest bin fall
    /// through to 6, matching the original's binary-search shape (no value
    /// can exceed 6 from this function; callers treat an offset-adjusted
    /// `value > 3` as the terminator).
    fn get_symbol(width: u16) -> u8 {
        let bin = |us: u16| us_to_ticks(us - SYMBOL_HALF_SPACING_US);

        if width < bin(SYMBOL_WIDTHS_US[3]) {
            if width < bin(SYMBOL_WIDTHS_US[1]) {
                if width < bin(SYMBOL_WIDTHS_US[0]) {
                    7
                } else {
                    0
                }
            } else if width < bin(SYMBOL_WIDTHS_US[2]) {
                1
            } else {
                2
            }
        } else if width < bin(SYMBOL_WIDTHS_US[5]) {
            if width < bin(SYMBOL_WIDTHS_US[4]) {
                3
            } else {
                4
            }
        } else if width < bin(SYMBOL_WIDTHS_US[6]) {
            5
        } else {
            6
        }
    }

    /// XOR-3 checksum over a byte's six overlapping 2-bit fields.
    fn calculate_checksum(value: u8) -> u8 {
        (3 ^ (value >> 6) ^ (value >> 4) ^ (value >> 2) ^ value) & 3
    }
}
