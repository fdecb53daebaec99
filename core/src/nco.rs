//! Numerically controlled oscillator
//!
//! 16-bit phase accumulator, top 10 bits index the shared sine table.
//! Frequency resolution is Fs / 2^16 (~0.12 Hz at 8 kHz).

use crate::sine::{SINE_TABLE, SINE_TABLE_BITS};
use crate::{PHASE_ACCUMULATOR_BITS, SAMPLE_RATE};

const PHASE_TRUNCATION: u32 = PHASE_ACCUMULATOR_BITS - SINE_TABLE_BITS;
const PHASE_MODULUS: f32 = (1u32 << PHASE_ACCUMULATOR_BITS) as f32;

/// Tuning word for `freq_hz` at the output sample rate
///
/// tuning_word = round(2^16 · f / Fs), wrapped to 16 bits
#[inline]
pub fn tuning_word(freq_hz: f32) -> u16 {
    let word = (PHASE_MODULUS * freq_hz / SAMPLE_RATE as f32).round();
    (word as u32 & 0xFFFF) as u16
}

/// Frequency actually produced by a tuning word
#[inline]
pub fn quantized_frequency(word: u16) -> f32 {
    word as f32 * SAMPLE_RATE as f32 / PHASE_MODULUS
}

/// Convert a dB level to linear gain (10^(dB/20))
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Single sine oscillator
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Oscillator {
    frequency: f32,
    gain: f32,
    phase: u16,
    tuning_word: u16,
}

impl Oscillator {
    pub fn new(freq_hz: f32, level_db: f32) -> Self {
        Self {
            frequency: freq_hz,
            gain: db_to_gain(level_db),
            phase: 0,
            tuning_word: tuning_word(freq_hz),
        }
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn phase(&self) -> u16 {
        self.phase
    }

    pub fn tuning_word(&self) -> u16 {
        self.tuning_word
    }

    /// Emit the current sample and advance the phase accumulator
    ///
    /// A zero-frequency oscillator contributes nothing.
    #[inline]
    pub fn next_sample(&mut self) -> i16 {
        let sample = if self.frequency != 0.0 {
            let index = (self.phase >> PHASE_TRUNCATION) as usize;
            // truncation toward zero keeps positive and negative excursions symmetric
            (SINE_TABLE[index] as f32 * self.gain) as i16
        } else {
            0
        };
        self.phase = self.phase.wrapping_add(self.tuning_word);
        sample
    }
}

/// Two oscillators summed into one channel output
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DualTone {
    oscillators: [Oscillator; 2],
}

impl DualTone {
    /// Load a frequency pair; both phase accumulators restart at zero
    pub fn new(freqs: [f32; 2], levels_db: [f32; 2]) -> Self {
        Self {
            oscillators: [
                Oscillator::new(freqs[0], levels_db[0]),
                Oscillator::new(freqs[1], levels_db[1]),
            ],
        }
    }

    pub fn oscillators(&self) -> &[Oscillator; 2] {
        &self.oscillators
    }

    #[inline]
    pub fn next_sample(&mut self) -> i16 {
        let a = self.oscillators[0].next_sample();
        let b = self.oscillators[1].next_sample();
        a.saturating_add(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuning_word_rounding() {
        // 1000 Hz: 65536 * 1000 / 8000 = 8192 exactly
        assert_eq!(tuning_word(1000.0), 8192);
        // 350 Hz: 2867.2 rounds down
        assert_eq!(tuning_word(350.0), 2867);
        // 697 Hz: 5709.82 rounds up
        assert_eq!(tuning_word(697.0), 5710);
    }

    #[test]
    fn test_zero_frequency_is_silent() {
        let mut osc = Oscillator::new(0.0, 0.0);
        for _ in 0..100 {
            assert_eq!(osc.next_sample(), 0);
        }
    }

    #[test]
    fn test_db_to_gain() {
        assert!((db_to_gain(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_gain(-20.0) - 0.1).abs() < 1e-6);
        assert!((db_to_gain(-6.0) - 0.501).abs() < 1e-3);
    }

    #[test]
    fn test_quarter_rate_tone() {
        // Fs/4 steps a quarter cycle per tick: 0, +peak, 0, -peak
        let mut osc = Oscillator::new(2000.0, 0.0);
        let samples: Vec<i16> = (0..4).map(|_| osc.next_sample()).collect();
        assert_eq!(samples, vec![0, 32767, 0, -32767]);
    }

    #[test]
    fn test_gain_is_symmetric() {
        let mut osc = Oscillator::new(2000.0, -6.0);
        let samples: Vec<i16> = (0..4).map(|_| osc.next_sample()).collect();
        assert_eq!(samples[1], -samples[3]);
        assert!(samples[1] > 16000 && samples[1] < 17000);
    }

    #[test]
    fn test_phase_wraps() {
        let mut osc = Oscillator::new(3999.0, 0.0);
        let mut last = osc.phase();
        let mut wrapped = false;
        for _ in 0..10 {
            osc.next_sample();
            if osc.phase() < last {
                wrapped = true;
            }
            last = osc.phase();
        }
        assert!(wrapped);
    }

    #[test]
    fn test_dual_tone_sums_components() {
        let mut dual = DualTone::new([1000.0, 2000.0], [-7.0, -7.0]);
        let mut a = Oscillator::new(1000.0, -7.0);
        let mut b = Oscillator::new(2000.0, -7.0);
        for _ in 0..64 {
            assert_eq!(dual.next_sample(), a.next_sample() + b.next_sample());
        }
    }
}
