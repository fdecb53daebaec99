//! MF digit decoder
//!
//! Consumes one [`FrameClass`] per 20 ms frame. A call is gated by KP, then
//! each digit must be held for a minimum number of frames and followed by
//! silence before it is accepted. An ST-family digit ends the call. Time
//! spent waiting (silence or noise) is bounded by the interdigit timeout.

use std::fmt;

use crate::goertzel::{FrameClass, TONE_1100, TONE_1300, TONE_1500, TONE_1700, TONE_700, TONE_900};
use crate::{MF_INTERDIGIT_TIMEOUT, MF_MAX_DIGITS, MIN_DIGIT_BLOCK_COUNT, MIN_KP_GATE_BLOCK_COUNT, SILENCE_THRESHOLD};

pub const CODE_KP: u8 = TONE_1100 | TONE_1700;
pub const CODE_ST: u8 = TONE_1500 | TONE_1700;
pub const CODE_STP: u8 = TONE_900 | TONE_1700;
pub const CODE_ST2P: u8 = TONE_1300 | TONE_1700;
pub const CODE_ST3P: u8 = TONE_700 | TONE_1700;

/// Two-of-six tone mask to digit
const DECODE_TABLE: [(u8, char); 15] = [
    (TONE_1300 | TONE_1500, '0'),
    (TONE_700 | TONE_900, '1'),
    (TONE_700 | TONE_1100, '2'),
    (TONE_900 | TONE_1100, '3'),
    (TONE_700 | TONE_1300, '4'),
    (TONE_900 | TONE_1300, '5'),
    (TONE_1100 | TONE_1300, '6'),
    (TONE_700 | TONE_1500, '7'),
    (TONE_900 | TONE_1500, '8'),
    (TONE_1100 | TONE_1500, '9'),
    (CODE_KP, '*'),
    (CODE_ST, '#'),
    (CODE_STP, 'A'),
    (CODE_ST2P, 'B'),
    (CODE_ST3P, 'C'),
];

pub fn decode_code(mask: u8) -> Option<char> {
    DECODE_TABLE.iter().find(|(code, _)| *code == mask).map(|&(_, digit)| digit)
}

/// ST, STP, ST2P and ST3P end an MF address
pub fn is_terminator(digit: char) -> bool {
    matches!(digit, '#' | 'A' | 'B' | 'C')
}

/// Receiver thresholds; defaults are the firmware constants
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MfConfig {
    /// Goertzel power a frequency must exceed to count as present; applied
    /// by the receiver's filter bank, the decoder only sees frame classes
    pub silence_threshold: f32,
    /// Consecutive KP frames required to open a call
    pub kp_gate_frames: u8,
    /// Consecutive frames of one code required to accept a digit
    pub digit_frames: u8,
    /// Waiting frames allowed between digits
    pub interdigit_timeout: u16,
}

impl Default for MfConfig {
    fn default() -> Self {
        Self {
            silence_threshold: SILENCE_THRESHOLD,
            kp_gate_frames: MIN_KP_GATE_BLOCK_COUNT,
            digit_frames: MIN_DIGIT_BLOCK_COUNT,
            interdigit_timeout: MF_INTERDIGIT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Idle,
    WaitKp,
    KpSilence,
    WaitDigit,
    WaitDigitSilence,
    Timeout,
    Done,
    WaitRelease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MfStatus {
    Ok,
    Timeout,
}

pub type MfDigits = heapless::String<MF_MAX_DIGITS>;

/// Outcome of one seizure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfResult {
    pub status: MfStatus,
    pub digits: MfDigits,
}

impl MfResult {
    pub fn digit_count(&self) -> usize {
        self.digits.len()
    }

    pub fn is_ok(&self) -> bool {
        self.status == MfStatus::Ok
    }
}

impl fmt::Display for MfResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} \"{}\" ({} digits)", self.status, self.digits, self.digit_count())
    }
}

/// Frame-driven digit decoder state machine
#[derive(Debug, Clone)]
pub struct MfDecoder {
    config: MfConfig,
    state: DecoderState,
    status: MfStatus,
    digits: MfDigits,
    pending: char,
    last_code: u8,
    block_count: u8,
    timer: u16,
    result: Option<MfResult>,
}

impl MfDecoder {
    pub fn new(config: MfConfig) -> Self {
        Self {
            config,
            state: DecoderState::Idle,
            status: MfStatus::Ok,
            digits: MfDigits::new(),
            pending: '\0',
            last_code: 0,
            block_count: 0,
            timer: 0,
            result: None,
        }
    }

    pub fn config(&self) -> &MfConfig {
        &self.config
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Final result once the decoder has reached Done
    pub fn result(&self) -> Option<&MfResult> {
        self.result.as_ref()
    }

    /// Digits accepted so far
    pub fn digits(&self) -> &str {
        &self.digits
    }

    /// Clear all call state and wait for KP
    pub fn start(&mut self) {
        self.clear();
        self.state = DecoderState::WaitKp;
    }

    /// Return to Idle; frames are ignored until the next start
    pub fn reset(&mut self) {
        self.clear();
        self.state = DecoderState::Idle;
    }

    fn clear(&mut self) {
        self.status = MfStatus::Ok;
        self.digits.clear();
        self.pending = '\0';
        self.last_code = 0;
        self.block_count = 0;
        self.timer = 0;
        self.result = None;
    }

    fn reset_debounce(&mut self) {
        self.last_code = 0;
        self.block_count = 0;
    }

    /// Count one more frame of `code`; true once it has been held long enough
    fn debounce(&mut self, code: u8, required: u8) -> bool {
        if code == self.last_code {
            self.block_count = self.block_count.saturating_add(1);
        } else {
            self.last_code = code;
            self.block_count = 1;
        }
        self.block_count >= required
    }

    fn push_digit(&mut self, digit: char) {
        // full buffer drops the digit
        let _ = self.digits.push(digit);
    }

    /// Advance the interdigit timer by one waiting frame
    fn wait_tick(&mut self) {
        self.timer = self.timer.saturating_add(1);
        if self.timer >= self.config.interdigit_timeout {
            self.state = DecoderState::Timeout;
        }
    }

    /// Advance by one analysed frame
    ///
    /// Returns the result exactly once, on the frame that completes the call.
    pub fn advance(&mut self, frame: FrameClass) -> Option<MfResult> {
        match self.state {
            DecoderState::Idle | DecoderState::WaitRelease => return None,
            DecoderState::WaitKp => match frame {
                FrameClass::Code(CODE_KP) => {
                    if self.debounce(CODE_KP, self.config.kp_gate_frames) {
                        self.push_digit('*');
                        self.reset_debounce();
                        self.timer = 0;
                        self.state = DecoderState::KpSilence;
                    }
                }
                _ => self.reset_debounce(),
            },
            DecoderState::KpSilence => match frame {
                FrameClass::Silence => {
                    self.reset_debounce();
                    self.timer = 0;
                    self.state = DecoderState::WaitDigit;
                }
                _ => self.wait_tick(),
            },
            DecoderState::WaitDigit => match frame {
                FrameClass::Code(code) => {
                    if self.debounce(code, self.config.digit_frames) {
                        match decode_code(code) {
                            Some(digit) => {
                                self.pending = digit;
                                self.timer = 0;
                                self.state = DecoderState::WaitDigitSilence;
                            }
                            None => {
                                self.reset_debounce();
                                self.wait_tick();
                            }
                        }
                    }
                }
                FrameClass::Silence | FrameClass::Invalid => {
                    self.reset_debounce();
                    self.wait_tick();
                }
            },
            DecoderState::WaitDigitSilence => match frame {
                FrameClass::Silence => {
                    let digit = self.pending;
                    self.push_digit(digit);
                    if is_terminator(digit) {
                        self.state = DecoderState::Done;
                    } else {
                        self.reset_debounce();
                        self.timer = 0;
                        self.state = DecoderState::WaitDigit;
                    }
                }
                _ => self.wait_tick(),
            },
            DecoderState::Timeout | DecoderState::Done => {}
        }

        if self.state == DecoderState::Timeout {
            self.status = MfStatus::Timeout;
            self.state = DecoderState::Done;
        }

        if self.state == DecoderState::Done {
            let result = MfResult {
                status: self.status,
                digits: self.digits.clone(),
            };
            self.result = Some(result.clone());
            self.state = DecoderState::WaitRelease;
            return Some(result);
        }
        None
    }
}

impl Default for MfDecoder {
    fn default() -> Self {
        Self::new(MfConfig::default())
    }
}
