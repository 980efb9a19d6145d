//! The three concurrent signal decoders and the types they share.

pub mod pcm;
pub mod ppm;
pub mod srxl;

/// A decoder's position in its own frame-sync state machine. Transitions are
/// total functions on `(state, event)` — see each decoder's `on_*` methods.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum DecoderState {
    #[default]
    WaitingForSync,
    SyncDetected,
    ReceivingData,
}

/// Every decoder agrees on this floor: a frame with fewer channels than this
/// is discarded rather than published.
pub const MIN_CHANNEL_COUNT: u8 = 4;

/// Which receiver currently owns the joystick output. The discriminants
/// double as the `status` byte in [`crate::hid::UsbEnhancedReport`], ground:
/// `original_source/firmware/UsbReports.h`'s `Status` enum. Priority order
/// among sources (PPM over PCM over SRXL) is the arbiter's concern, not
/// this enum's discriminant order.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, num_enum::IntoPrimitive)]
#[repr(u8)]
pub enum SignalSource {
    #[default]
    NoSignal = 0,
    Ppm = 1,
    Srxl = 2,
    Pcm = 3,
}
