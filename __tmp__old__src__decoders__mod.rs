//! The three concurrent signal decoders (spec §4.B–§4.D) and the types they
//! share.

pub mod pcm;
pub mod ppm;
pub mod srxl;

/// A decoder's position in its own frame-sync state machine (spec §3,
/// "Decoder state"). Transitions are total functions on `(state, event)` —
/// see each decoder's `on_*` methods.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum DecoderState {
    #[default]
    WaitingForSync,
    SyncDetected,
    ReceivingData,
}

/// Every decoder agrees on this floor: a frame with fewer channels than this
/// is discarded rather than published (spec §3).
pub const MIN_CHANNEL_COUNT: u8 = 4;

/// Which receiver currently owns the joystick output, in priority order
/// (spec §4.E step 1, §8 "Arbiter priority is stable"). The discriminants
/// double as the `status` byte in [`crate::hid::UsbEnhancedReport`]
/// (spec §3 supplement, ground: `original_source/firmware/UsbReports.h`'s
/// `Status` enum).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, num_enum::IntoPrimitive)]
#[repr(u8)]
pub enum SignalSource {
    #[default]
    NoSignal = 0,
    Ppm = 1,
    Srxl = 2,
    Pcm = 3,
}


