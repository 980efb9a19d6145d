//! Arbitration and scaling: picks the highest-priority active signal source
//! and maps its channels onto the 8-bit joystick report.
//!
//! Ground: `original_source/firmware/Receiver.h`'s `ScaleValue` /
//! `InvertValue` / `SaturateValue`, generalized to read from whichever of
//! the three decoders currently has signal instead of a single built-in
//! receiver.

use crate::config::Configuration;
use crate::decoders::pcm::PcmDecoder;
use crate::decoders::ppm::PpmDecoder;
use crate::decoders::srxl::SrxlDecoder;
use crate::decoders::SignalSource;
use crate::capture_timer::CaptureTimer;

/// One channel's value as reported by its source decoder, before scaling.
/// PPM and SRXL report a pulse-width-equivalent microsecond value; PCM
/// reports a raw byte that is passed straight through and only ever
/// inverted, never rescaled.
#[derive(Clone, Copy, Debug)]
enum RawChannelValue {
    PulseWidthUs(u16),
    Byte(u8),
}

/// Picks the active source in priority order PPM > PCM > SRXL and scales
/// its channels into an 8-bit joystick report using `config`.
pub struct Arbiter {
    active_source: SignalSource,
    channel_count: u8,
}

impl Arbiter {
    pub fn new() -> Self {
        Self {
            active_source: SignalSource::NoSignal,
            channel_count: 0,
        }
    }

    pub fn active_source(&self) -> SignalSource {
        self.active_source
    }

    /// Channel count reported by the currently active source (not the
    /// number of output channels `update` fills, which is capped by the
    /// joystick report's own channel mapping).
    pub fn channel_count(&self) -> u8 {
        self.channel_count
    }

    /// Re-evaluates which source is active and fills `out` with up to
    /// `out.len()` scaled channel values. Returns the number of channels
    /// written.
    pub fn update<TP, TS, TC>(
        &mut self,
        ppm: &PpmDecoder<TP>,
        srxl: &SrxlDecoder<TS>,
        pcm: &PcmDecoder<TC>,
        config: &Configuration,
        out: &mut [u8],
    ) -> usize
    where
        TP: CaptureTimer,
        TS: CaptureTimer,
        TC: CaptureTimer,
    {
        self.active_source =
            Self::select_source(ppm.is_receiving(), pcm.is_receiving(), srxl.is_receiving());

        self.channel_count = match self.active_source {
            SignalSource::Ppm => ppm.channel_count(),
            SignalSource::Pcm => pcm.channel_count(),
            SignalSource::Srxl => srxl.channel_count(),
            SignalSource::NoSignal => 0,
        };
        let channel_count = self.channel_count;

        let mapped_count = config.channel_mapping.len().min(out.len());
        for (out_channel, mapping) in config.channel_mapping.iter().enumerate().take(mapped_count) {
            out[out_channel] = if !mapping.is_mapped() || mapping.source_channel >= channel_count {
                Self::neutral_value()
            } else {
                let raw = match self.active_source {
                    SignalSource::Ppm => {
                        RawChannelValue::PulseWidthUs(ppm.get_channel_pulse_width(mapping.source_channel))
                    }
                    SignalSource::Srxl => {
                        RawChannelValue::PulseWidthUs(srxl.get_channel_pulse_width(mapping.source_channel))
                    }
                    SignalSource::Pcm => RawChannelValue::Byte(pcm.get_channel_data(mapping.source_channel)),
                    SignalSource::NoSignal => RawChannelValue::Byte(Self::neutral_value()),
                };
                Self::scale(raw, mapping.is_inverted(), config)
            };
        }

        mapped_count
    }

    /// The arbitration contract, isolated as a pure function of each
    /// source's `is_receiving` state: PPM outranks PCM outranks SRXL.
    fn select_source(ppm_active: bool, pcm_active: bool, srxl_active: bool) -> SignalSource {
        if ppm_active {
            SignalSource::Ppm
        } else if pcm_active {
            SignalSource::Pcm
        } else if srxl_active {
            SignalSource::Srxl
        } else {
            SignalSource::NoSignal
        }
    }

    fn neutral_value() -> u8 {
        0x80
    }

    /// Maps a raw channel value to `0..=255` around a center of `0x80`
    /// (ground: `Receiver.h::ScaleValue`/`SaturateValue`). A PCM byte is
    /// already in output range and is only inverted, never rescaled.
    fn scale(raw: RawChannelValue, inverted: bool, config: &Configuration) -> u8 {
        let value = match raw {
            RawChannelValue::PulseWidthUs(us) => {
                let center = config.center_channel_pulse_width_us as i32;
                let range = config.channel_pulse_width_range_us as i32;
                let scaled = 128 + 128 * (us as i32 - center) / range;
                scaled.clamp(0, 255) as u8
            }
            RawChannelValue::Byte(b) => b,
        };

        if inverted {
            255 - value
        } else {
            value
        }
    }
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture_timer::SimClock;
    use crate::config::ChannelMapping;

    fn config_with_mapping(mapping: &[ChannelMapping]) -> Configuration {
        let mut config = Configuration::default();
        for (i, m) in mapping.iter().enumerate() {
            config.channel_mapping[i] = *m;
        }
        for m in config.channel_mapping.iter_mut().skip(mapping.len()) {
            *m = ChannelMapping {
                source_channel: ChannelMapping::UNMAPPED,
                flags: 0,
            };
        }
        config
    }

    fn idle_decoders() -> (PpmDecoder<SimClock>, SrxlDecoder<SimClock>, PcmDecoder<SimClock>) {
        (
            PpmDecoder::new(SimClock::new()),
            SrxlDecoder::new(SimClock::new()),
            PcmDecoder::new(SimClock::new()),
        )
    }

    #[test]
    fn no_signal_reports_neutral_on_every_mapped_channel() {
        let (ppm, srxl, pcm) = idle_decoders();
        let config = config_with_mapping(&[ChannelMapping::identity(0)]);
        let mut arbiter = Arbiter::new();
        let mut out = [0u8; 1];

        arbiter.update(&ppm, &srxl, &pcm, &config, &mut out);

        assert_eq!(arbiter.active_source(), SignalSource::NoSignal);
        assert_eq!(arbiter.channel_count(), 0);
        assert_eq!(out[0], 0x80);
    }

    #[test]
    fn center_pulse_width_scales_to_neutral_byte() {
        let center = 1500u16;
        let range = 550u16;
        let config = Configuration {
            center_channel_pulse_width_us: center,
            channel_pulse_width_range_us: range,
            ..Configuration::default()
        };

        let scaled = Arbiter::scale(RawChannelValue::PulseWidthUs(center), false, &config);
        assert_eq!(scaled, 0x80);
    }

    #[test]
    fn extreme_pulse_widths_saturate() {
        let config = Configuration::default();
        let low = Arbiter::scale(RawChannelValue::PulseWidthUs(0), false, &config);
        let high = Arbiter::scale(RawChannelValue::PulseWidthUs(u16::MAX), false, &config);
        assert_eq!(low, 0);
        assert_eq!(high, 255);
    }

    #[test]
    fn inversion_mirrors_around_center() {
        let config = Configuration::default();
        let plain = Arbiter::scale(RawChannelValue::PulseWidthUs(2000), false, &config);
        let inverted = Arbiter::scale(RawChannelValue::PulseWidthUs(2000), true, &config);
        assert_eq!(inverted, 255 - plain);
    }

    #[test]
    fn source_priority_is_ppm_over_pcm_over_srxl() {
        assert_eq!(Arbiter::select_source(true, true, true), SignalSource::Ppm);
        assert_eq!(Arbiter::select_source(true, false, true), SignalSource::Ppm);
        assert_eq!(Arbiter::select_source(false, true, true), SignalSource::Pcm);
        assert_eq!(Arbiter::select_source(false, false, true), SignalSource::Srxl);
        assert_eq!(Arbiter::select_source(false, false, false), SignalSource::NoSignal);
    }

    #[test]
    fn pcm_bytes_pass_through_unscaled() {
        let config = Configuration::default();
        let value = Arbiter::scale(RawChannelValue::Byte(0x42), false, &config);
        assert_eq!(value, 0x42);
    }

    /// A wider pulse never scales to a smaller (non-inverted) output than a
    /// narrower one.
    #[quickcheck_macros::quickcheck]
    fn scaling_is_monotonic_in_pulse_width(a: u16, b: u16) -> bool {
        let config = Configuration::default();
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let scaled_low = Arbiter::scale(RawChannelValue::PulseWidthUs(low), false, &config);
        let scaled_high = Arbiter::scale(RawChannelValue::PulseWidthUs(high), false, &config);
        scaled_low <= scaled_high
    }

    /// Double inversion is the identity: inverting a value twice returns it
    /// unchanged.
    #[quickcheck_macros::quickcheck]
    fn double_inversion_is_identity(us: u16) -> bool {
        let config = Configuration::default();
        let once = Arbiter::scale(RawChannelValue::PulseWidthUs(us), true, &config);
        let twice = 255 - once;
        twice == Arbiter::scale(RawChannelValue::PulseWidthUs(us), false, &config)
    }
}
