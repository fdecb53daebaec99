//! Tone plan: call-progress indications and MF/DTMF signalling tables
//!
//! All values are build-time constants. Frequencies in Hz, levels in dB
//! (converted to linear gain by the oscillator), durations in milliseconds.

use crate::error::{Result, SignalError};
use crate::DIGIT_STRING_MAX_LENGTH;

/// MF code points for the framing signals
pub const MF_KP: u8 = 0x0A;
pub const MF_ST: u8 = 0x0B;
pub const MF_STP: u8 = 0x0C;
pub const MF_ST2P: u8 = 0x0D;
pub const MF_ST3P: u8 = 0x0E;

/// Frequency pair and levels of a continuous or cadenced indication
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Indication {
    pub tone_pair: [f32; 2],
    pub level_pair: [f32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusyPlan {
    pub tone: Indication,
    pub busy_cadence_ms: u32,
    pub congestion_cadence_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RingingPlan {
    pub tone: Indication,
    pub ring_on_ms: u32,
    pub ring_off_ms: u32,
}

/// Low/high frequency of one signalling digit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TonePair {
    pub low: f32,
    pub high: f32,
}

const fn pair(low: f32, high: f32) -> TonePair {
    TonePair { low, high }
}

/// MF (R1) outpulsing table, indexed by digit code 0x0..=0xE
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MfPlan {
    pub tone_pairs: [TonePair; 15],
    pub levels: [f32; 2],
    pub active_time_ms: u32,
    pub inactive_time_ms: u32,
    pub kp_active_time_ms: u32,
    pub st_active_time_ms: u32,
}

impl MfPlan {
    /// Tone-on duration for a digit code; KP and the ST family have their own
    pub fn active_time_ms(&self, code: u8) -> u32 {
        match code {
            MF_KP => self.kp_active_time_ms,
            MF_ST | MF_STP | MF_ST2P | MF_ST3P => self.st_active_time_ms,
            _ => self.active_time_ms,
        }
    }
}

/// DTMF table, indexed by digit code 0x0..=0xF
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DtmfPlan {
    pub tone_pairs: [TonePair; 16],
    pub levels: [f32; 2],
    pub active_time_ms: u32,
    pub inactive_time_ms: u32,
}

/// Complete set of tones a switch can generate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TonePlan {
    pub dial: Indication,
    pub busy: BusyPlan,
    pub ringing: RingingPlan,
    pub mf: MfPlan,
    pub dtmf: DtmfPlan,
}

impl TonePlan {
    /// North American precise tone plan with Bell R1 MF and DTMF
    pub const NORTH_AMERICAN: TonePlan = TonePlan {
        dial: Indication {
            tone_pair: [350.0, 440.0],
            level_pair: [-13.0, -13.0],
        },
        busy: BusyPlan {
            tone: Indication {
                tone_pair: [480.0, 620.0],
                level_pair: [-12.0, -12.0],
            },
            busy_cadence_ms: 500,
            congestion_cadence_ms: 250,
        },
        ringing: RingingPlan {
            tone: Indication {
                tone_pair: [440.0, 480.0],
                level_pair: [-13.0, -13.0],
            },
            ring_on_ms: 2000,
            ring_off_ms: 4000,
        },
        mf: MfPlan {
            tone_pairs: [
                pair(1300.0, 1500.0), // 0
                pair(700.0, 900.0),   // 1
                pair(700.0, 1100.0),  // 2
                pair(900.0, 1100.0),  // 3
                pair(700.0, 1300.0),  // 4
                pair(900.0, 1300.0),  // 5
                pair(1100.0, 1300.0), // 6
                pair(700.0, 1500.0),  // 7
                pair(900.0, 1500.0),  // 8
                pair(1100.0, 1500.0), // 9
                pair(1100.0, 1700.0), // KP
                pair(1500.0, 1700.0), // ST
                pair(900.0, 1700.0),  // STP
                pair(1300.0, 1700.0), // ST2P
                pair(700.0, 1700.0),  // ST3P
            ],
            levels: [-7.0, -7.0],
            active_time_ms: 68,
            inactive_time_ms: 68,
            kp_active_time_ms: 100,
            st_active_time_ms: 68,
        },
        dtmf: DtmfPlan {
            tone_pairs: [
                pair(941.0, 1336.0), // 0
                pair(697.0, 1209.0), // 1
                pair(697.0, 1336.0), // 2
                pair(697.0, 1477.0), // 3
                pair(770.0, 1209.0), // 4
                pair(770.0, 1336.0), // 5
                pair(770.0, 1477.0), // 6
                pair(852.0, 1209.0), // 7
                pair(852.0, 1336.0), // 8
                pair(852.0, 1477.0), // 9
                pair(941.0, 1209.0), // *
                pair(941.0, 1477.0), // #
                pair(697.0, 1633.0), // A
                pair(770.0, 1633.0), // B
                pair(852.0, 1633.0), // C
                pair(941.0, 1633.0), // D
            ],
            levels: [-9.0, -7.0],
            active_time_ms: 50,
            inactive_time_ms: 50,
        },
    };
}

impl Default for TonePlan {
    fn default() -> Self {
        Self::NORTH_AMERICAN
    }
}

/// Character set accepted for outpulsing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigitSet {
    /// 0-9 * # A B C
    Mf,
    /// 0-9 * # A B C D
    Dtmf,
}

/// Map one digit character to its 4-bit code
pub fn encode_digit(c: char, set: DigitSet) -> Option<u8> {
    match c {
        '0'..='9' => Some(c as u8 - b'0'),
        '*' => Some(0x0A),
        '#' => Some(0x0B),
        'A' => Some(0x0C),
        'B' => Some(0x0D),
        'C' => Some(0x0E),
        'D' if set == DigitSet::Dtmf => Some(0x0F),
        _ => None,
    }
}

/// Inverse of [`encode_digit`]
pub fn decode_digit(code: u8) -> Option<char> {
    const MAP: [char; 16] = [
        '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', '*', '#', 'A', 'B', 'C', 'D',
    ];
    MAP.get(code as usize).copied()
}

/// Encoded outbound digit string
pub type DigitCodes = heapless::Vec<u8, DIGIT_STRING_MAX_LENGTH>;

/// Encode a whole digit string; either every digit encodes or nothing is returned
pub fn encode_digits(digits: &str, set: DigitSet) -> Result<DigitCodes> {
    let len = digits.chars().count();
    if len > DIGIT_STRING_MAX_LENGTH {
        return Err(SignalError::DigitStringTooLong {
            len,
            max: DIGIT_STRING_MAX_LENGTH,
        });
    }

    let mut codes = DigitCodes::new();
    for c in digits.chars() {
        let code = encode_digit(c, set).ok_or(SignalError::InvalidDigit(c))?;
        // length was checked above
        let _ = codes.push(code);
    }
    Ok(codes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_digit_map() {
        assert_eq!(encode_digit('0', DigitSet::Mf), Some(0x0));
        assert_eq!(encode_digit('9', DigitSet::Mf), Some(0x9));
        assert_eq!(encode_digit('*', DigitSet::Mf), Some(0xA));
        assert_eq!(encode_digit('#', DigitSet::Mf), Some(0xB));
        assert_eq!(encode_digit('A', DigitSet::Mf), Some(0xC));
        assert_eq!(encode_digit('B', DigitSet::Mf), Some(0xD));
        assert_eq!(encode_digit('C', DigitSet::Mf), Some(0xE));
        assert_eq!(encode_digit('D', DigitSet::Dtmf), Some(0xF));
    }

    #[test]
    fn test_d_is_dtmf_only() {
        assert_eq!(encode_digit('D', DigitSet::Mf), None);
        assert_eq!(
            encode_digits("12D", DigitSet::Mf),
            Err(SignalError::InvalidDigit('D'))
        );
    }

    #[test]
    fn test_unknown_characters_rejected() {
        for c in ['E', 'a', ' ', '-', '+'] {
            assert_eq!(encode_digit(c, DigitSet::Dtmf), None, "{:?}", c);
        }
    }

    #[test]
    fn test_decode_inverts_encode() {
        for c in "0123456789*#ABCD".chars() {
            let code = encode_digit(c, DigitSet::Dtmf).unwrap();
            assert_eq!(decode_digit(code), Some(c));
        }
        assert_eq!(decode_digit(16), None);
    }

    #[test]
    fn test_too_long_rejected() {
        let digits: String = std::iter::repeat('5').take(DIGIT_STRING_MAX_LENGTH + 1).collect();
        assert!(matches!(
            encode_digits(&digits, DigitSet::Mf),
            Err(SignalError::DigitStringTooLong { .. })
        ));

        let digits: String = std::iter::repeat('5').take(DIGIT_STRING_MAX_LENGTH).collect();
        assert_eq!(encode_digits(&digits, DigitSet::Mf).unwrap().len(), DIGIT_STRING_MAX_LENGTH);
    }

    #[test]
    fn test_mf_durations() {
        let mf = TonePlan::NORTH_AMERICAN.mf;
        assert_eq!(mf.active_time_ms(MF_KP), mf.kp_active_time_ms);
        for code in [MF_ST, MF_STP, MF_ST2P, MF_ST3P] {
            assert_eq!(mf.active_time_ms(code), mf.st_active_time_ms);
        }
        assert_eq!(mf.active_time_ms(5), mf.active_time_ms);
    }

    #[test]
    fn test_tone_pairs_in_band() {
        let plan = TonePlan::default();
        for p in plan.mf.tone_pairs.iter().chain(plan.dtmf.tone_pairs.iter()) {
            assert!(p.low < p.high);
            assert!(p.high < crate::SAMPLE_RATE as f32 / 2.0);
        }
    }
}
