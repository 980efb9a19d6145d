//! USB HID report layout and the feature-report protocol used for
//! configuration (spec §4.F/4.G, SPEC_FULL §4.G, §5 "USB boundary").
//!
//! Ground: `original_source/firmware/UsbReports.h`'s `UsbReport` /
//! `UsbEnhancedReport` structs and `ReportIds` enum, reshaped from C
//! bit-fields into explicit byte layouts. The plain joystick report is built
//! with `usbd-hid`'s `gen_hid_descriptor!`, which the teacher firmware did
//! not need (it exposes a CDC-ACM serial port, not a HID joystick) — this is
//! the one dependency this crate adds beyond the teacher's USB stack. The
//! enhanced diagnostic report is manually byte-packed instead, matching the
//! teacher's preference (see `protocols/dshot.rs`) for explicit byte-level
//! control where the wire format is externally dictated.

use usbd_hid::descriptor::generator_prelude::*;

use crate::decoders::SignalSource;

/// Channels carried on the plain joystick report: 7 axes, matching the
/// original's `UsbReport::value` field (`original_source/firmware/UsbReports.h`,
/// `static_assert(sizeof(UsbReport) <= 8)` once the report-id byte is added
/// back by the USB stack).
pub const REPORT_CHANNELS: usize = 7;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ReportId {
    Joystick = 1,
    JoystickEnhanced = 2,
    Configuration = 3,
}

#[gen_hid_descriptor(
    (collection = APPLICATION, usage_page = GENERIC_DESKTOP, usage = JOYSTICK) = {
        (collection = PHYSICAL, usage_page = GENERIC_DESKTOP) = {
            (usage = X, usage = Y, usage = Z, usage = RX, usage = RY, usage = RZ, usage = 0x32,
             logical_min = 0x0, logical_max = 0xff) = {
                #[item_settings data,variable,absolute] channels=input;
            };
        };
    }
)]
#[derive(Clone, Copy, Debug, Default)]
pub struct UsbReport {
    pub channels: [u8; REPORT_CHANNELS],
}

/// Diagnostic report carrying the active source and the raw pulse widths
/// behind the scaled [`UsbReport`] values (SPEC_FULL §4.G). Manually packed
/// little-endian, since the wire shape (a leading status byte then 7 `u16`s)
/// doesn't fit `gen_hid_descriptor!`'s variable-length-axis model.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct UsbEnhancedReport {
    pub status: u8,
    pub channel_pulse_width_us: [u16; REPORT_CHANNELS],
}

impl UsbEnhancedReport {
    pub fn new(source: SignalSource, channel_pulse_width_us: [u16; REPORT_CHANNELS]) -> Self {
        Self {
            status: source.into(),
            channel_pulse_width_us,
        }
    }

    /// Serializes to the wire layout: 1 status byte followed by 7
    /// little-endian `u16`s (15 bytes; the report-id byte is prepended by
    /// the USB stack, not by this buffer).
    pub fn to_bytes(&self) -> [u8; 1 + REPORT_CHANNELS * 2] {
        let mut out = [0u8; 1 + REPORT_CHANNELS * 2];
        out[0] = self.status;
        for (i, width) in self.channel_pulse_width_us.iter().enumerate() {
            let bytes = width.to_le_bytes();
            out[1 + i * 2] = bytes[0];
            out[2 + i * 2] = bytes[1];
        }
        out
    }
}

/// Feature-report requests the host can send on [`ReportId::Configuration`]
/// (SPEC_FULL §4.G). Ground: the original's bootloader jump and EEPROM
/// passthrough commands in `UsbReports.h` plus the control transfer handling
/// described in `Receiver.h`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConfigRequest {
    ReadConfiguration,
    WriteConfiguration,
    LoadDefaults,
    JumpToBootloader,
}

impl ConfigRequest {
    /// Decodes the first byte of an incoming feature report. An
    /// unrecognized command byte is not an error: the host simply gets no
    /// response, matching the original firmware's silent ignore.
    pub fn decode(command: u8) -> Option<Self> {
        match command {
            0x01 => Some(Self::ReadConfiguration),
            0x02 => Some(Self::WriteConfiguration),
            0x03 => Some(Self::LoadDefaults),
            0x04 => Some(Self::JumpToBootloader),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enhanced_report_serializes_status_then_little_endian_widths() {
        let mut widths = [0u16; REPORT_CHANNELS];
        widths[0] = 0x1234;
        let report = UsbEnhancedReport::new(SignalSource::Ppm, widths);
        let bytes = report.to_bytes();

        assert_eq!(bytes[0], SignalSource::Ppm as u8);
        assert_eq!(bytes[1], 0x34);
        assert_eq!(bytes[2], 0x12);
    }

    #[test]
    fn config_request_decodes_known_commands() {
        assert_eq!(ConfigRequest::decode(0x01), Some(ConfigRequest::ReadConfiguration));
        assert_eq!(ConfigRequest::decode(0x02), Some(ConfigRequest::WriteConfiguration));
        assert_eq!(ConfigRequest::decode(0x03), Some(ConfigRequest::LoadDefaults));
        assert_eq!(ConfigRequest::decode(0x04), Some(ConfigRequest::JumpToBootloader));
    }

    #[test]
    fn config_request_rejects_unknown_commands() {
        assert_eq!(ConfigRequest::decode(0xAA), None);
    }
}


