//! Telephony signalling core for an embedded switch controller
//!
//! Two independent real-time paths:
//! - Tone synthesis: call-progress tones, MF and DTMF outpulsing and raw
//!   sample playback, produced one interleaved stereo block at a time
//! - MF reception: Goertzel detection of the six MF frequencies and a
//!   digit decoder with KP gating, debounce and interdigit timeout

pub mod error;
pub mod sine;
pub mod nco;
pub mod tone_plan;
pub mod channel;
pub mod engine;
pub mod goertzel;
pub mod mf_decoder;
pub mod receiver;
pub mod resample;

pub use channel::{ChannelId, ChannelState, CompletionHandler};
pub use engine::{CallProgressTone, ToneEngine};
pub use error::{Result, SignalError};
pub use goertzel::{FilterBank, FrameClass, GoertzelFilter};
pub use mf_decoder::{DecoderState, MfConfig, MfDecoder, MfResult, MfStatus};
pub use receiver::{Descriptor, DigitHandler, MfReceiver, NullTrigger, SampleTrigger};
pub use tone_plan::{DigitSet, TonePlan};

// Output (synthesis) configuration
pub const SAMPLE_RATE: u32 = 8000;
pub const PHASE_ACCUMULATOR_BITS: u32 = 16;
pub const NUM_AUDIO_CHANNELS: usize = 2;
pub const LR_BLOCK_SIZE: usize = 320; // interleaved samples per half buffer (20 ms)
pub const SAMPLES_PER_CHANNEL: usize = LR_BLOCK_SIZE / NUM_AUDIO_CHANNELS;
pub const OUTPUT_BUFFER_SIZE: usize = LR_BLOCK_SIZE * 2;
pub const TONE_SHUTOFF_THRESHOLD: i16 = 1500;
pub const DIGIT_STRING_MAX_LENGTH: usize = 32;

// Input (MF receiver) configuration
pub const MF_SAMPLE_RATE: u32 = 16000;
pub const MF_FRAME_SIZE: usize = 320; // 20 ms
pub const MF_ADC_BUF_LEN: usize = MF_FRAME_SIZE * 2;
pub const MIN_ADC: f32 = -2048.0;
pub const SILENCE_THRESHOLD: f32 = 2.0;
pub const MIN_KP_GATE_BLOCK_COUNT: u8 = 3;
pub const MIN_DIGIT_BLOCK_COUNT: u8 = 2;
pub const MF_INTERDIGIT_TIMEOUT: u16 = 50 * 5; // frames, 5 seconds
pub const MF_MAX_DIGITS: usize = 16;

/// Convert a duration in milliseconds to output sample ticks
#[inline]
pub const fn ms_to_ticks(ms: u32) -> u32 {
    ms * (SAMPLE_RATE / 1000)
}

/// Which half of a double buffer a DMA half/full event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferHalf {
    Lower,
    Upper,
}

impl BufferHalf {
    /// Map an interrupt flag (0 = half complete, nonzero = full complete)
    pub fn from_index(index: u8) -> Self {
        if index == 0 {
            BufferHalf::Lower
        } else {
            BufferHalf::Upper
        }
    }

    /// Start offset of this half within a buffer of `half_len` per half
    #[inline]
    pub fn offset(self, half_len: usize) -> usize {
        match self {
            BufferHalf::Lower => 0,
            BufferHalf::Upper => half_len,
        }
    }
}
