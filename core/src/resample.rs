//! Line-path helpers between the tone engine output and the MF receiver input
//!
//! The engine produces interleaved 16-bit PCM at 8 kHz; the receiver samples
//! a 12-bit ADC at 16 kHz. These helpers model the analog loop in between.

use crate::channel::ChannelId;
use crate::{MF_SAMPLE_RATE, NUM_AUDIO_CHANNELS, SAMPLE_RATE};

/// ADC full-scale count (12-bit converter)
pub const ADC_MAX: u16 = 4095;
const ADC_CENTER: f32 = 2048.0;

/// Extract one channel from an interleaved stereo block
///
/// # Arguments
/// * `interleaved` - Samples [ch1, ch2, ch1, ch2, ...]
/// * `channel` - Channel to keep
pub fn channel_samples(interleaved: &[i16], channel: ChannelId) -> Vec<i16> {
    interleaved
        .iter()
        .skip(channel.index())
        .step_by(NUM_AUDIO_CHANNELS)
        .copied()
        .collect()
}

/// Resample audio to a target sample rate using linear interpolation
///
/// The last input sample is held past the end of the buffer.
///
/// # Example
/// ```ignore
/// let line_16k = resample_audio(&pcm_8k, 8000, 16000);
/// ```
pub fn resample_audio(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = to_rate as f32 / from_rate as f32;
    let new_length = ((samples.len() as f32) * ratio).ceil() as usize;
    let mut resampled = Vec::with_capacity(new_length);

    for i in 0..new_length {
        let src_idx = i as f32 / ratio;
        let floor = (src_idx.floor() as usize).min(samples.len() - 1);
        let fraction = src_idx - floor as f32;

        let interpolated = match samples.get(floor + 1) {
            Some(&next) => samples[floor] * (1.0 - fraction) + next * fraction,
            None => samples[floor],
        };
        resampled.push(interpolated);
    }

    resampled
}

/// Quantise PCM-scale samples to 12-bit unsigned ADC counts centred on 2048
pub fn pcm_to_adc(samples: &[f32]) -> Vec<u16> {
    samples
        .iter()
        .map(|&s| (ADC_CENTER + (s / 16.0).round()).clamp(0.0, ADC_MAX as f32) as u16)
        .collect()
}

/// One engine channel as the receiver's ADC would see it
pub fn line_to_adc(interleaved: &[i16], channel: ChannelId) -> Vec<u16> {
    let pcm: Vec<f32> = channel_samples(interleaved, channel)
        .into_iter()
        .map(f32::from)
        .collect();
    pcm_to_adc(&resample_audio(&pcm, SAMPLE_RATE, MF_SAMPLE_RATE))
}
