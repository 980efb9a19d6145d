//! SRXL decoder: a UART byte stream framed with a CRC-16 trailer (spec
//! §4.D).
//!
//! Ground: `original_source/firmware/SrxlReceiver.h`. The original frames
//! both V1 (12 channel, 27 byte) and V2 (16 channel, 35 byte) variants from a
//! single header byte; we keep that shape, swapping the timer-derived
//! "byte gap" detection for an explicit [`CaptureTimer`]-scheduled compare
//! (spec §9's hardware-timer-abstraction note).

use crate::capture_timer::{CaptureTimer, CompareChannel};
use crate::decoders::MIN_CHANNEL_COUNT;

pub const MAX_CHANNEL_COUNT: u8 = 16;

const HEADER_V1: u8 = 0xA1;
const HEADER_V2: u8 = 0xA2;
const FRAME_LEN_V1: usize = 27;
const FRAME_LEN_V2: usize = 35;
const CHANNEL_COUNT_V1: u8 = 12;
const CHANNEL_COUNT_V2: u8 = 16;

/// Compare channel SRXL uses for its 5 ms inter-byte sync pause (SPEC_FULL
/// §5 event table: PPM owns B, SRXL owns C). Re-armed after every byte, the
/// same way [`crate::decoders::ppm::PpmDecoder`] re-arms its own sync-pause
/// compare after every edge.
const SYNC_PAUSE_CHANNEL: CompareChannel = CompareChannel::C;
const SYNC_PAUSE_TICKS: u16 = 10_000; // 5 ms at the shared ~2 MHz tick rate

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
enum FrameState {
    #[default]
    WaitingForHeader,
    Receiving {
        expected_len: usize,
    },
}

pub struct SrxlDecoder<T: CaptureTimer> {
    timer: T,
    buffer: heapless::Vec<u8, FRAME_LEN_V2>,
    channel_data: [[u16; MAX_CHANNEL_COUNT as usize]; 2],
    state: FrameState,
    current_bank: u8,
    channel_count: u8,
    timeout_counter: u8,
    is_receiving: bool,
    has_new_data: bool,
}

impl<T: CaptureTimer> SrxlDecoder<T> {
    pub fn new(timer: T) -> Self {
        let mut decoder = Self {
            timer,
            buffer: heapless::Vec::new(),
            channel_data: [[0; MAX_CHANNEL_COUNT as usize]; 2],
            state: FrameState::WaitingForHeader,
            current_bank: 0,
            channel_count: 0,
            timeout_counter: 0,
            is_receiving: false,
            has_new_data: false,
        };
        decoder.arm_sync_pause();
        decoder
    }

    pub fn reset(&mut self) {
        self.state = FrameState::WaitingForHeader;
        self.buffer.clear();
        self.current_bank = 0;
        self.channel_count = 0;
        self.is_receiving = false;
        self.has_new_data = false;
    }

    fn arm_sync_pause(&mut self) {
        let at = self.timer.now().wrapping_add(SYNC_PAUSE_TICKS);
        self.timer.schedule_compare(SYNC_PAUSE_CHANNEL, at);
    }

    /// Called once per 1 ms task tick (spec §5, §3 "Lifecycles").
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

    /// Pulse-width-equivalent value for `channel`, in microseconds, mapped
    /// from the 12-bit SRXL channel word (spec §4.D "Reported value").
    pub fn get_channel_pulse_width(&self, channel: u8) -> u16 {
        if channel < self.channel_count {
            let read_bank = (self.current_bank ^ 1) as usize;
            self.channel_data[read_bank][channel as usize]
        } else {
            0
        }
    }

    /// Compare-match ISR handler for the 5 ms inter-byte sync pause: a gap
    /// this long means whatever partial frame was in flight is stale.
    pub fn on_sync_pause(&mut self) {
        if !matches!(self.state, FrameState::WaitingForHeader) {
            defmt::warn!("SRXL: inter-byte gap, discarding partial frame");
        }
        self.reset_to_header();
    }

    fn reset_to_header(&mut self) {
        self.state = FrameState::WaitingForHeader;
        self.buffer.clear();
    }

    /// UART RX ISR handler: one byte arrived.
    pub fn on_byte_received(&mut self, byte: u8) {
        self.arm_sync_pause();

        match self.state {
            FrameState::WaitingForHeader => self.on_header_byte(byte),
            FrameState::Receiving { expected_len } => self.on_body_byte(byte, expected_len),
        }
    }

    fn on_header_byte(&mut self, byte: u8) {
        let expected_len = match byte {
            HEADER_V1 => FRAME_LEN_V1,
            HEADER_V2 => FRAME_LEN_V2,
            _ => return,
        };
        self.buffer.clear();
        // Capacity is fixed at `FRAME_LEN_V2`; `expected_len` never exceeds it.
        self.buffer.push(byte).ok();
        self.state = FrameState::Receiving { expected_len };
    }

    fn on_body_byte(&mut self, byte: u8, expected_len: usize) {
        self.buffer.push(byte).ok();

        if self.buffer.len() == expected_len {
            self.finish_frame(expected_len);
            self.reset_to_header();
        }
    }

    fn finish_frame(&mut self, frame_len: usize) {
        let frame = &self.buffer[..frame_len];
        let (payload, crc_bytes) = frame.split_at(frame_len - 2);
        let received_crc = u16::from_be_bytes([crc_bytes[0], crc_bytes[1]]);

        if Self::calculate_crc16(payload) != received_crc {
            defmt::warn!("SRXL: CRC mismatch, discarding frame");
            return;
        }

        let channel_count = if frame[0] == HEADER_V1 {
            CHANNEL_COUNT_V1
        } else {
            CHANNEL_COUNT_V2
        };

        if channel_count < MIN_CHANNEL_COUNT {
            return;
        }

        let write_bank = self.current_bank as usize;
        for channel in 0..channel_count as usize {
            let hi = frame[2 + channel * 2];
            let lo = frame[3 + channel * 2];
            let raw = u16::from_be_bytes([hi, lo]);
            self.channel_data[write_bank][channel] = Self::data_to_us(raw);
        }

        self.timeout_counter = 0;
        self.current_bank ^= 1;
        self.channel_count = channel_count;
        self.is_receiving = true;
        self.has_new_data = true;
    }

    /// Maps a 12-bit SRXL channel word to a pulse-width-equivalent
    /// microsecond value spanning 800..2200 us (spec §4.D, ground:
    /// `original_source/firmware/SrxlReceiver.h`'s `DataToUs`).
    fn data_to_us(raw: u16) -> u16 {
        const RANGE_LOW_US: u32 = 800;
        const RANGE_HIGH_US: u32 = 2200;
        const FULL_SCALE: u32 = 0x1000;

        let value = (raw & 0x0FFF) as u32;
        (RANGE_LOW_US + value * (RANGE_HIGH_US - RANGE_LOW_US) / FULL_SCALE) as u16
    }

    /// CRC-16/CCITT-FALSE: poly 0x1021, init 0, no input/output reflection,
    /// no final XOR (spec §4.D, ground: `SrxlReceiver.h`'s `CalculateCrc16`).
    fn calculate_crc16(data: &[u8]) -> u16 {
        let mut crc: u16 = 0;
        for &byte in data {
            crc ^= (byte as u16) << 8;
            for _ in 0..8 {
                crc = if crc & 0x8000 != 0 {
                    (crc << 1) ^ 0x1021
                } else {
                    crc << 1
                };
            }
        }
        crc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture_timer::SimClock;

    fn frame_v1(channels: &[u16; CHANNEL_COUNT_V1 as usize]) -> [u8; FRAME_LEN_V1] {
        let mut frame = [0u8; FRAME_LEN_V1];
        frame[0] = HEADER_V1;
        frame[1] = 0; // rssi/frame-counter byte, unused by the decoder
        for (i, &value) in channels.iter().enumerate() {
            let bytes = value.to_be_bytes();
            frame[2 + i * 2] = bytes[0];
            frame[3 + i * 2] = bytes[1];
        }
        let crc = SrxlDecoder::<SimClock>::calculate_crc16(&frame[..FRAME_LEN_V1 - 2]);
        let crc_bytes = crc.to_be_bytes();
        frame[FRAME_LEN_V1 - 2] = crc_bytes[0];
        frame[FRAME_LEN_V1 - 1] = crc_bytes[1];
        frame
    }

    fn feed(decoder: &mut SrxlDecoder<SimClock>, bytes: &[u8]) {
        for &byte in bytes {
            decoder.on_byte_received(byte);
        }
    }

    #[test]
    fn v1_frame_with_valid_crc_reports_twelve_channels() {
        let mut decoder = SrxlDecoder::new(SimClock::new());
        let channels = [0x800u16; CHANNEL_COUNT_V1 as usize];
        feed(&mut decoder, &frame_v1(&channels));

        assert!(decoder.is_receiving());
        assert!(decoder.has_new_data());
        assert_eq!(decoder.channel_count(), CHANNEL_COUNT_V1);
        assert_eq!(decoder.get_channel_pulse_width(0), 1500);
    }

    #[test]
    fn corrupted_crc_is_rejected() {
        let mut decoder = SrxlDecoder::new(SimClock::new());
        let mut frame = frame_v1(&[0x800u16; CHANNEL_COUNT_V1 as usize]);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        feed(&mut decoder, &frame);

        assert!(!decoder.is_receiving());
        assert!(!decoder.has_new_data());
    }

    #[test]
    fn sync_pause_discards_partial_frame() {
        let mut decoder = SrxlDecoder::new(SimClock::new());
        decoder.on_byte_received(HEADER_V1);
        decoder.on_byte_received(0);
        decoder.on_sync_pause();

        assert!(decoder.buffer.is_empty());
        assert!(matches!(decoder.state, FrameState::WaitingForHeader));
    }

    #[test]
    fn data_to_us_spans_the_full_range() {
        assert_eq!(SrxlDecoder::<SimClock>::data_to_us(0x000), 800);
        assert_eq!(SrxlDecoder::<SimClock>::data_to_us(0xFFF), 2199);
    }

    #[test]
    fn unmapped_channel_reports_zero() {
        let decoder = SrxlDecoder::new(SimClock::new());
        assert_eq!(decoder.get_channel_pulse_width(15), 0);
    }
}


