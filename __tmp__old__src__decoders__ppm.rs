//! PPM (pulse-position modulation) decoder: spec §4.B.
//!
//! Ground: `original_source/firmware/PpmReceiver.h`. The original is a
//! `template<class timer>` C++ class inheriting from the timer; here the
//! timer is held by composition and accessed through the [`CaptureTimer`]
//! trait, per spec §9's "Hardware timer abstraction → interface" note.

use crate::capture_timer::{ticks_since, ticks_to_us, us_to_ticks, CaptureTimer, CompareChannel};
use crate::decoders::{DecoderState, MIN_CHANNEL_COUNT};

pub const MAX_CHANNEL_COUNT: u8 = 9;
const DEFAULT_SYNC_PULSE_WIDTH_US: u16 = 3500;

/// PPM's sync-pause compare match lives on channel B (spec's SPEC_FULL §5
/// event table); SRXL owns A/C, leaving PCM with no compare channel of its
/// own since it re-syncs purely from pulse widths.
const SYNC_PAUSE_CHANNEL: CompareChannel = CompareChannel::B;

pub struct PpmDecoder<T: CaptureTimer> {
    timer: T,
    pulse_width: [[u16; MAX_CHANNEL_COUNT as usize]; 2],
    min_sync_pulse_width: u16,
    time_of_last_edge: u16,
    state: DecoderState,
    current_bank: u8,
    current_channel: u8,
    channel_count: u8,
    timeout_counter: u8,
    inverted_signal: bool,
    is_receiving: bool,
    has_new_data: bool,
}

impl<T: CaptureTimer> PpmDecoder<T> {
    pub fn new(timer: T) -> Self {
        let mut decoder = Self {
            timer,
            pulse_width: [[0; MAX_CHANNEL_COUNT as usize]; 2],
            min_sync_pulse_width: us_to_ticks(DEFAULT_SYNC_PULSE_WIDTH_US),
            time_of_last_edge: 0,
            state: DecoderState::WaitingForSync,
            current_bank: 0,
            current_channel: 0,
            channel_count: 0,
            timeout_counter: 0,
            inverted_signal: false,
            is_receiving: false,
            has_new_data: false,
        };
        decoder.arm_sync_compare();
        decoder
    }

    /// Equivalent of the original's `SetConfiguration` + `Initialize`: adopt
    /// a new sync threshold and input polarity, and re-arm from scratch.
    pub fn set_configuration(&mut self, min_sync_pulse_width_us: u16, inverted_signal: bool) {
        self.min_sync_pulse_width = us_to_ticks(min_sync_pulse_width_us);
        self.inverted_signal = inverted_signal;
        self.timer.set_capture_edge(!inverted_signal);
        self.reset();
        self.arm_sync_compare();
    }

    fn arm_sync_compare(&mut self) {
        let at = self.timer.now().wrapping_add(self.min_sync_pulse_width);
        self.timer.schedule_compare(SYNC_PAUSE_CHANNEL, at);
    }

    pub fn reset(&mut self) {
        self.state = DecoderState::WaitingForSync;
        self.current_bank = 0;
        self.channel_count = 0;
        self.is_receiving = false;
        self.has_new_data = false;
    }

    /// Called once per 1 ms task tick (spec §5). After 100 ms without a
    /// completed frame the decoder resets (spec §3 "Lifecycles", §7
    /// "Inter-event timeout").
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

    /// Pulse width of `channel` in microseconds, read from the bank the ISR
    /// is *not* currently writing (spec §3 "Double buffer" invariant).
    pub fn get_channel_pulse_width(&self, channel: u8) -> u16 {
        if channel < self.channel_count {
            let read_bank = (self.current_bank ^ 1) as usize;
            ticks_to_us(self.pulse_width[read_bank][channel as usize])
        } else {
            0
        }
    }

    /// Input-capture ISR handler: a new edge arrived.
    pub fn on_input_capture(&mut self) {
        let time = self.timer.last_capture();
        let at = time.wrapping_add(self.min_sync_pulse_width);
        self.timer.schedule_compare(SYNC_PAUSE_CHANNEL, at);
        self.process_edge(time);
    }

    /// Compare-match ISR handler: the inter-frame sync pause elapsed.
    pub fn on_sync_pause(&mut self) {
        self.process_sync_pause();
    }

    fn process_edge(&mut self, time: u16) {
        let diff = ticks_since(self.time_of_last_edge, time);
        self.time_of_last_edge = time;

        match self.state {
            DecoderState::SyncDetected => {
                self.state = DecoderState::ReceivingData;
                self.current_channel = 0;
            }
            DecoderState::ReceivingData => {
                let current_channel = self.current_channel;
                if current_channel < MAX_CHANNEL_COUNT {
                    self.pulse_width[self.current_bank as usize][current_channel as usize] = diff;
                    self.current_channel = current_channel + 1;
                }
            }
            DecoderState::WaitingForSync => {}
        }
    }

    fn process_sync_pause(&mut self) {
        if self.state == DecoderState::ReceivingData {
            self.finish_frame();
        }
        self.state = DecoderState::SyncDetected;
    }

    fn finish_frame(&mut self) {
        let current_channel = self.current_channel;
        if current_channel >= MIN_CHANNEL_COUNT {
            self.timeout_counter = 0;
            self.current_bank ^= 1;
            self.channel_count = current_channel;
            self.is_receiving = true;
            self.has_new_data = true;
        } else {
            defmt::warn!("PPM: short frame ({} channels), discarding", current_channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture_timer::SimClock;

    /// Feeds one sync-pause (simulating the inter-frame silence that trips
    /// the compare match) followed by edges at the given pulse-width
    /// intervals (in us). The first edge after sync only establishes the
    /// baseline timestamp and stores no channel, matching
    /// `original_source/firmware/PpmReceiver.h`'s `ProcessEdge`.
    fn feed_frame(decoder: &mut PpmDecoder<SimClock>, channel_widths_us: &[u16]) {
        decoder.on_sync_pause();

        let mut t: u32 = 0;
        decoder.timer.capture_at(t as u16);
        decoder.on_input_capture();

        for &us in channel_widths_us {
            t += us_to_ticks(us) as u32;
            decoder.timer.capture_at(t as u16);
            decoder.on_input_capture();
        }
    }

    /// Scenario 1 from spec §8: a nominal 7-channel frame.
    #[test]
    fn nominal_frame_reports_seven_channels() {
        let mut decoder = PpmDecoder::new(SimClock::new());

        let widths = [1000u16, 1500, 2000, 1000, 1500, 2000, 1000];
        feed_frame(&mut decoder, &widths);

        // The next sync pause completes the frame.
        decoder.on_sync_pause();

        assert!(decoder.is_receiving());
        assert!(decoder.has_new_data());
        assert_eq!(decoder.channel_count(), 7);

        for (i, &want) in widths.iter().enumerate() {
            assert_eq!(decoder.get_channel_pulse_width(i as u8), want);
        }
    }

    /// Scenario 2 from spec §8: 150 ms of silence resets the decoder.
    #[test]
    fn timeout_resets_after_150ms() {
        let mut decoder = PpmDecoder::new(SimClock::new());

        let widths = [1000u16, 1500, 2000, 1000, 1500, 2000, 1000];
        feed_frame(&mut decoder, &widths);
        decoder.on_sync_pause();
        assert!(decoder.is_receiving());

        for _ in 0..150 {
            decoder.run_task();
        }

        assert!(!decoder.is_receiving());
        assert_eq!(decoder.channel_count(), 0);
    }

    #[test]
    fn short_frame_is_discarded_but_stays_in_sync() {
        let mut decoder = PpmDecoder::new(SimClock::new());

        // Only 2 channels: below MIN_CHANNEL_COUNT.
        feed_frame(&mut decoder, &[1000u16, 1500]);
        decoder.on_sync_pause();

        assert!(!decoder.is_receiving());
        assert!(!decoder.has_new_data());
    }

    #[test]
    fn unmapped_channel_reports_zero() {
        let clock = SimClock::new();
        let decoder = PpmDecoder::new(clock);
        assert_eq!(decoder.get_channel_pulse_width(8), 0);
    }
}


