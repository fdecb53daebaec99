//! Goertzel filter bank for the six MF frequencies
//!
//! One frame (20 ms of 12-bit ADC counts) is normalised to [-1, 1], DC
//! corrected, and run through six second-order recurrences in a single pass.
//! A frequency is present when its power exceeds the silence threshold;
//! exactly two present frequencies form a two-of-six MF code.

use std::f32::consts::PI;

use crate::{MF_FRAME_SIZE, MF_SAMPLE_RATE, MIN_ADC, SILENCE_THRESHOLD};

pub const TONE_700: u8 = 0x20;
pub const TONE_900: u8 = 0x10;
pub const TONE_1100: u8 = 0x08;
pub const TONE_1300: u8 = 0x04;
pub const TONE_1500: u8 = 0x02;
pub const TONE_1700: u8 = 0x01;

pub const NUM_MF_FREQUENCIES: usize = 6;

/// Detector frequencies; filter `i` sets bit `1 << i` of the tone mask
pub const MF_FREQUENCIES: [f32; NUM_MF_FREQUENCIES] = [1700.0, 1500.0, 1300.0, 1100.0, 900.0, 700.0];

/// Single-frequency power detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoertzelFilter {
    frequency: f32,
    coeff_k: f32,
    q1: f32,
    q2: f32,
    power: f32,
}

impl GoertzelFilter {
    pub fn new(frequency: f32, sample_rate: u32) -> Self {
        Self {
            frequency,
            coeff_k: 2.0 * (2.0 * PI * frequency / sample_rate as f32).cos(),
            q1: 0.0,
            q2: 0.0,
            power: 0.0,
        }
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn coeff(&self) -> f32 {
        self.coeff_k
    }

    /// Power computed by the last [`GoertzelFilter::finish`]
    pub fn power(&self) -> f32 {
        self.power
    }

    pub fn reset(&mut self) {
        self.q1 = 0.0;
        self.q2 = 0.0;
    }

    #[inline]
    pub fn push(&mut self, sample: f32) {
        let q0 = self.coeff_k * self.q1 - self.q2 + sample;
        self.q2 = self.q1;
        self.q1 = q0;
    }

    /// sqrt(q1² + q2² − k·q1·q2)
    pub fn finish(&mut self) -> f32 {
        let energy = self.q1 * self.q1 + self.q2 * self.q2 - self.coeff_k * self.q1 * self.q2;
        // rounding can leave a tiny negative residue on silent input
        self.power = energy.max(0.0).sqrt();
        self.power
    }

    /// Reset, run a whole block and return its power
    pub fn process(&mut self, samples: &[f32]) -> f32 {
        self.reset();
        for &s in samples {
            self.push(s);
        }
        self.finish()
    }
}

/// Classification of one analysed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// No frequency above threshold
    Silence,
    /// Exactly two frequencies present; the tone mask
    Code(u8),
    /// One, or three and more, frequencies present
    Invalid,
}

impl FrameClass {
    pub fn from_mask(mask: u8) -> Self {
        match mask.count_ones() {
            0 => FrameClass::Silence,
            2 => FrameClass::Code(mask),
            _ => FrameClass::Invalid,
        }
    }
}

/// Scale raw ADC counts to [-1, 1] into `out`, returning the frame (max, min)
///
/// max and min start at ±1.0, so they only move when the input clips past
/// full scale.
pub fn normalize(frame: &[u16], out: &mut [f32]) -> (f32, f32) {
    let mut max = 1.0f32;
    let mut min = -1.0f32;
    for (dst, &raw) in out.iter_mut().zip(frame) {
        let val = (raw as f32 + MIN_ADC) / -MIN_ADC;
        max = max.max(val);
        min = min.min(val);
        *dst = val;
    }
    (max, min)
}

/// DC correction derived from the frame extremes: (1 − max) − (1 − |min|)
#[inline]
pub fn dc_offset(max: f32, min: f32) -> f32 {
    (1.0 - max) - (1.0 - min.abs())
}

/// The six MF detectors plus their frame scratch buffer
#[derive(Debug, Clone)]
pub struct FilterBank {
    filters: [GoertzelFilter; NUM_MF_FREQUENCIES],
    block: [f32; MF_FRAME_SIZE],
    silence_threshold: f32,
}

impl FilterBank {
    pub fn new() -> Self {
        Self::with_threshold(SILENCE_THRESHOLD)
    }

    pub fn with_threshold(silence_threshold: f32) -> Self {
        Self {
            filters: MF_FREQUENCIES.map(|f| GoertzelFilter::new(f, MF_SAMPLE_RATE)),
            block: [0.0; MF_FRAME_SIZE],
            silence_threshold,
        }
    }

    pub fn silence_threshold(&self) -> f32 {
        self.silence_threshold
    }

    pub fn set_silence_threshold(&mut self, threshold: f32) {
        self.silence_threshold = threshold;
    }

    pub fn filters(&self) -> &[GoertzelFilter; NUM_MF_FREQUENCIES] {
        &self.filters
    }

    /// Powers from the last analysed frame, in [`MF_FREQUENCIES`] order
    pub fn powers(&self) -> [f32; NUM_MF_FREQUENCIES] {
        self.filters.map(|f| f.power())
    }

    /// Bit mask of the frequencies above threshold in the last frame
    pub fn tone_mask(&self) -> u8 {
        self.filters
            .iter()
            .enumerate()
            .filter(|(_, f)| f.power() > self.silence_threshold)
            .fold(0u8, |mask, (i, _)| mask | (1 << i))
    }

    /// Analyse one frame of raw ADC counts
    ///
    /// Input beyond one frame is ignored.
    pub fn analyze(&mut self, frame: &[u16]) -> FrameClass {
        let n = frame.len().min(MF_FRAME_SIZE);
        let block = &mut self.block[..n];

        let (max, min) = normalize(&frame[..n], block);
        let offset = dc_offset(max, min);
        for s in block.iter_mut() {
            *s -= offset;
        }

        for filter in self.filters.iter_mut() {
            filter.reset();
        }
        for &s in block.iter() {
            for filter in self.filters.iter_mut() {
                filter.push(s);
            }
        }
        for filter in self.filters.iter_mut() {
            filter.finish();
        }

        FrameClass::from_mask(self.tone_mask())
    }
}

impl Default for FilterBank {
    fn default() -> Self {
        Self::new()
    }
}
