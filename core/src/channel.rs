//! Per-channel tone state machine
//!
//! Each call to [`Channel::tick`] advances the channel by exactly one output
//! sample. Cadenced tones end on a zero-cross: once the cadence timer expires
//! the tone keeps running until the live sample falls inside
//! ±[`TONE_SHUTOFF_THRESHOLD`], which avoids an audible click.

use std::fmt;

use crate::nco::DualTone;
use crate::tone_plan::{DigitCodes, TonePair, TonePlan};
use crate::{ms_to_ticks, NUM_AUDIO_CHANNELS, TONE_SHUTOFF_THRESHOLD};

/// Identity of an output channel (1 = left, 2 = right)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u8);

impl ChannelId {
    pub fn new(number: u8) -> Option<Self> {
        if number >= 1 && number as usize <= NUM_AUDIO_CHANNELS {
            Some(Self(number))
        } else {
            None
        }
    }

    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u8 + 1)
    }

    pub fn number(self) -> u8 {
        self.0
    }

    /// Zero-based slot; also the interleave parity in the output block
    pub fn index(self) -> usize {
        self.0 as usize - 1
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// Notified when an outpulsing or one-shot playback finishes
pub trait CompletionHandler: Sync {
    fn on_complete(&self, channel: ChannelId);
}

impl<F> CompletionHandler for F
where
    F: Fn(ChannelId) + Sync,
{
    fn on_complete(&self, channel: ChannelId) {
        self(channel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    GenDialTone,
    GenDialToneWait,
    GenBusyTone,
    GenCongestionTone,
    BusyWaitToneEnd,
    BusyWaitSilenceEnd,
    GenRingingTone,
    RingingWaitToneEnd,
    RingingWaitSilenceEnd,
    SendMf,
    SendMfWaitToneEnd,
    SendMfWaitSilenceEnd,
    SendDtmf,
    SendDtmfWaitToneEnd,
    SendDtmfWaitSilenceEnd,
    SendAudio,
    SendAudioWait,
    SendAudioLoop,
    SendAudioLoopWait,
}

impl ChannelState {
    /// States that only load parameters before the first sample
    fn is_setup(self) -> bool {
        matches!(
            self,
            ChannelState::GenDialTone
                | ChannelState::GenBusyTone
                | ChannelState::GenCongestionTone
                | ChannelState::GenRingingTone
                | ChannelState::SendMf
                | ChannelState::SendDtmf
                | ChannelState::SendAudio
                | ChannelState::SendAudioLoop
        )
    }
}

/// Output of one sample tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub sample: i16,
    /// Digit string or one-shot sample buffer finished on this tick
    pub completed: bool,
}

impl Tick {
    fn sample(sample: i16) -> Self {
        Self { sample, completed: false }
    }

    fn done(sample: i16) -> Self {
        Self { sample, completed: true }
    }
}

pub(crate) struct Channel<'a> {
    pub(crate) in_use: bool,
    pub(crate) state: ChannelState,
    digits: DigitCodes,
    digit_index: usize,
    tone: DualTone,
    cadence_timer: u32,
    cadence_reload: u32,
    samples: &'a [i16],
    sample_index: usize,
    pub(crate) handler: Option<&'a dyn CompletionHandler>,
}

impl<'a> Channel<'a> {
    pub(crate) fn new() -> Self {
        Self {
            in_use: false,
            state: ChannelState::Idle,
            digits: DigitCodes::new(),
            digit_index: 0,
            tone: DualTone::default(),
            cadence_timer: 0,
            cadence_reload: 0,
            samples: &[],
            sample_index: 0,
            handler: None,
        }
    }

    /// Return to Idle and drop every borrowed resource
    pub(crate) fn reset(&mut self) {
        self.state = ChannelState::Idle;
        self.digits.clear();
        self.digit_index = 0;
        self.samples = &[];
        self.sample_index = 0;
        self.handler = None;
    }

    pub(crate) fn load_digits(
        &mut self,
        digits: DigitCodes,
        handler: &'a dyn CompletionHandler,
        state: ChannelState,
    ) {
        self.digits = digits;
        self.digit_index = 0;
        self.handler = Some(handler);
        self.state = state;
    }

    pub(crate) fn load_samples(
        &mut self,
        samples: &'a [i16],
        handler: Option<&'a dyn CompletionHandler>,
        state: ChannelState,
    ) {
        self.samples = samples;
        self.sample_index = 0;
        self.handler = handler;
        self.state = state;
    }

    #[cfg(test)]
    pub(crate) fn cadence_timer(&self) -> u32 {
        self.cadence_timer
    }

    /// Advance one sample tick
    pub(crate) fn tick(&mut self, plan: &TonePlan) -> Tick {
        if self.state.is_setup() {
            self.enter(plan);
        }

        match self.state {
            ChannelState::GenDialToneWait => Tick::sample(self.tone.next_sample()),

            ChannelState::BusyWaitToneEnd => {
                let (sample, shutoff) = self.tone_on_tick();
                if shutoff {
                    self.cadence_timer = self.cadence_reload;
                    self.state = ChannelState::BusyWaitSilenceEnd;
                }
                Tick::sample(sample)
            }

            ChannelState::BusyWaitSilenceEnd => {
                if self.silence_tick() {
                    self.cadence_timer = self.cadence_reload;
                    self.state = ChannelState::BusyWaitToneEnd;
                }
                Tick::sample(0)
            }

            ChannelState::RingingWaitToneEnd => {
                let (sample, shutoff) = self.tone_on_tick();
                if shutoff {
                    self.cadence_timer = ms_to_ticks(plan.ringing.ring_off_ms);
                    self.state = ChannelState::RingingWaitSilenceEnd;
                }
                Tick::sample(sample)
            }

            ChannelState::RingingWaitSilenceEnd => {
                if self.silence_tick() {
                    self.cadence_timer = ms_to_ticks(plan.ringing.ring_on_ms);
                    self.state = ChannelState::RingingWaitToneEnd;
                }
                Tick::sample(0)
            }

            ChannelState::SendMfWaitToneEnd => {
                self.digit_tone_tick(ms_to_ticks(plan.mf.inactive_time_ms), ChannelState::SendMfWaitSilenceEnd)
            }

            ChannelState::SendMfWaitSilenceEnd => {
                if self.silence_tick() {
                    self.start_mf_digit(plan);
                }
                Tick::sample(0)
            }

            ChannelState::SendDtmfWaitToneEnd => {
                self.digit_tone_tick(ms_to_ticks(plan.dtmf.inactive_time_ms), ChannelState::SendDtmfWaitSilenceEnd)
            }

            ChannelState::SendDtmfWaitSilenceEnd => {
                if self.silence_tick() {
                    self.start_dtmf_digit(plan);
                }
                Tick::sample(0)
            }

            ChannelState::SendAudioWait => match self.samples.get(self.sample_index) {
                Some(&sample) => {
                    self.sample_index += 1;
                    if self.sample_index >= self.samples.len() {
                        self.state = ChannelState::Idle;
                        Tick::done(sample)
                    } else {
                        Tick::sample(sample)
                    }
                }
                None => {
                    self.state = ChannelState::Idle;
                    Tick::sample(0)
                }
            },

            ChannelState::SendAudioLoopWait => match self.samples.get(self.sample_index) {
                Some(&sample) => {
                    self.sample_index += 1;
                    if self.sample_index >= self.samples.len() {
                        self.sample_index = 0;
                    }
                    Tick::sample(sample)
                }
                None => {
                    self.state = ChannelState::Idle;
                    Tick::sample(0)
                }
            },

            _ => Tick::sample(0),
        }
    }

    /// Load the parameters for a freshly commanded state
    fn enter(&mut self, plan: &TonePlan) {
        match self.state {
            ChannelState::GenDialTone => {
                self.tone = DualTone::new(plan.dial.tone_pair, plan.dial.level_pair);
                self.state = ChannelState::GenDialToneWait;
            }

            ChannelState::GenBusyTone | ChannelState::GenCongestionTone => {
                let cadence_ms = if self.state == ChannelState::GenCongestionTone {
                    plan.busy.congestion_cadence_ms
                } else {
                    plan.busy.busy_cadence_ms
                };
                self.cadence_reload = ms_to_ticks(cadence_ms);
                self.cadence_timer = self.cadence_reload;
                self.tone = DualTone::new(plan.busy.tone.tone_pair, plan.busy.tone.level_pair);
                self.state = ChannelState::BusyWaitToneEnd;
            }

            ChannelState::GenRingingTone => {
                self.cadence_timer = ms_to_ticks(plan.ringing.ring_on_ms);
                self.tone = DualTone::new(plan.ringing.tone.tone_pair, plan.ringing.tone.level_pair);
                self.state = ChannelState::RingingWaitToneEnd;
            }

            ChannelState::SendMf => {
                self.digit_index = 0;
                if self.digits.is_empty() {
                    self.state = ChannelState::Idle;
                } else {
                    self.start_mf_digit(plan);
                }
            }

            ChannelState::SendDtmf => {
                self.digit_index = 0;
                if self.digits.is_empty() {
                    self.state = ChannelState::Idle;
                } else {
                    self.start_dtmf_digit(plan);
                }
            }

            ChannelState::SendAudio => {
                self.sample_index = 0;
                self.state = ChannelState::SendAudioWait;
            }

            ChannelState::SendAudioLoop => {
                self.sample_index = 0;
                self.state = ChannelState::SendAudioLoopWait;
            }

            _ => {}
        }
    }

    fn start_mf_digit(&mut self, plan: &TonePlan) {
        let code = self.digits[self.digit_index];
        self.cadence_timer = ms_to_ticks(plan.mf.active_time_ms(code));
        self.start_digit_tone(plan.mf.tone_pairs[code as usize], plan.mf.levels);
        self.state = ChannelState::SendMfWaitToneEnd;
    }

    fn start_dtmf_digit(&mut self, plan: &TonePlan) {
        let code = self.digits[self.digit_index];
        self.cadence_timer = ms_to_ticks(plan.dtmf.active_time_ms);
        self.start_digit_tone(plan.dtmf.tone_pairs[code as usize], plan.dtmf.levels);
        self.state = ChannelState::SendDtmfWaitToneEnd;
    }

    fn start_digit_tone(&mut self, pair: TonePair, levels: [f32; 2]) {
        self.tone = DualTone::new([pair.low, pair.high], levels);
        self.digit_index += 1;
    }

    /// Tone-on tick shared by digit outpulsing: finish the string or start the gap
    fn digit_tone_tick(&mut self, gap_ticks: u32, gap_state: ChannelState) -> Tick {
        let (sample, shutoff) = self.tone_on_tick();
        if !shutoff {
            return Tick::sample(sample);
        }
        if self.digit_index >= self.digits.len() {
            self.state = ChannelState::Idle;
            Tick::done(sample)
        } else {
            self.cadence_timer = gap_ticks;
            self.state = gap_state;
            Tick::sample(sample)
        }
    }

    /// Emit one tone sample; true once the timer has expired on a zero-cross
    fn tone_on_tick(&mut self) -> (i16, bool) {
        let sample = self.tone.next_sample();
        if self.cadence_timer == 0 {
            (sample, sample > -TONE_SHUTOFF_THRESHOLD && sample < TONE_SHUTOFF_THRESHOLD)
        } else {
            self.cadence_timer -= 1;
            (sample, false)
        }
    }

    /// True once the silence timer has expired
    fn silence_tick(&mut self) -> bool {
        if self.cadence_timer == 0 {
            true
        } else {
            self.cadence_timer -= 1;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tone_plan::{encode_digits, DigitSet};

    fn run(channel: &mut Channel<'_>, plan: &TonePlan, ticks: usize) -> Vec<Tick> {
        (0..ticks).map(|_| channel.tick(plan)).collect()
    }

    #[test]
    fn test_channel_id_range() {
        assert!(ChannelId::new(0).is_none());
        assert_eq!(ChannelId::new(1).unwrap().index(), 0);
        assert_eq!(ChannelId::new(2).unwrap().index(), 1);
        assert!(ChannelId::new(3).is_none());
    }

    #[test]
    fn test_idle_is_silent() {
        let plan = TonePlan::default();
        let mut ch = Channel::new();
        assert!(run(&mut ch, &plan, 100).iter().all(|t| t.sample == 0 && !t.completed));
    }

    #[test]
    fn test_dial_tone_is_continuous() {
        let plan = TonePlan::default();
        let mut ch = Channel::new();
        ch.state = ChannelState::GenDialTone;
        let ticks = run(&mut ch, &plan, 8000);
        assert_eq!(ch.state, ChannelState::GenDialToneWait);
        assert!(ticks.iter().any(|t| t.sample.abs() > 4000));
        // Phase starts at zero
        assert_eq!(ticks[0].sample, 0);
    }

    #[test]
    fn test_busy_cadence_alternates() {
        let plan = TonePlan::default();
        let mut ch = Channel::new();
        ch.state = ChannelState::GenBusyTone;
        let on_ticks = ms_to_ticks(plan.busy.busy_cadence_ms) as usize;

        // Still on just before the timer expires
        run(&mut ch, &plan, on_ticks);
        assert_eq!(ch.state, ChannelState::BusyWaitToneEnd);

        // Zero-cross shutoff within a few milliseconds
        let mut ticks = 0;
        while ch.state == ChannelState::BusyWaitToneEnd {
            ch.tick(&plan);
            ticks += 1;
            assert!(ticks < 400, "no zero-cross found");
        }
        assert_eq!(ch.state, ChannelState::BusyWaitSilenceEnd);
        assert_eq!(ch.cadence_timer(), on_ticks as u32);

        let silence = run(&mut ch, &plan, on_ticks);
        assert!(silence.iter().all(|t| t.sample == 0));
        ch.tick(&plan);
        assert_eq!(ch.state, ChannelState::BusyWaitToneEnd);
    }

    #[test]
    fn test_congestion_uses_faster_cadence() {
        let plan = TonePlan::default();
        let mut ch = Channel::new();
        ch.state = ChannelState::GenCongestionTone;
        ch.tick(&plan);
        assert_eq!(ch.cadence_timer(), ms_to_ticks(plan.busy.congestion_cadence_ms) - 1);
    }

    #[test]
    fn test_shutoff_sample_is_near_zero() {
        let plan = TonePlan::default();
        let mut ch = Channel::new();
        ch.state = ChannelState::GenRingingTone;
        let mut last = Tick::sample(0);
        while ch.state != ChannelState::RingingWaitSilenceEnd {
            last = ch.tick(&plan);
        }
        assert!(last.sample.abs() < TONE_SHUTOFF_THRESHOLD);
        assert_eq!(ch.cadence_timer(), ms_to_ticks(plan.ringing.ring_off_ms));
    }

    #[test]
    fn test_empty_digit_string_aborts() {
        let plan = TonePlan::default();
        let handler = |_: ChannelId| panic!("must not complete");
        let mut ch = Channel::new();
        ch.load_digits(DigitCodes::new(), &handler, ChannelState::SendMf);
        let t = ch.tick(&plan);
        assert_eq!(t, Tick::sample(0));
        assert_eq!(ch.state, ChannelState::Idle);
    }

    #[test]
    fn test_dtmf_completes_once() {
        let plan = TonePlan::default();
        let handler = |_: ChannelId| {};
        let mut ch = Channel::new();
        let codes = encode_digits("12", DigitSet::Dtmf).unwrap();
        ch.load_digits(codes, &handler, ChannelState::SendDtmf);

        let ticks = run(&mut ch, &plan, 8000);
        assert_eq!(ticks.iter().filter(|t| t.completed).count(), 1);
        assert_eq!(ch.state, ChannelState::Idle);

        // Two tones of >= 50 ms separated by a 50 ms gap
        let last = ticks.iter().rposition(|t| t.completed).unwrap();
        assert!(last >= 3 * ms_to_ticks(50) as usize);
    }

    #[test]
    fn test_send_audio_plays_once() {
        let plan = TonePlan::default();
        let samples = [1i16, 2, 3, 4];
        let mut ch = Channel::new();
        ch.load_samples(&samples, None, ChannelState::SendAudio);
        let ticks = run(&mut ch, &plan, 6);
        let out: Vec<i16> = ticks.iter().map(|t| t.sample).collect();
        assert_eq!(out, vec![1, 2, 3, 4, 0, 0]);
        assert!(ticks[3].completed);
        assert_eq!(ch.state, ChannelState::Idle);
    }

    #[test]
    fn test_send_audio_loop_wraps() {
        let plan = TonePlan::default();
        let samples = [10i16, 20, 30];
        let mut ch = Channel::new();
        ch.load_samples(&samples, None, ChannelState::SendAudioLoop);
        let out: Vec<i16> = run(&mut ch, &plan, 7).iter().map(|t| t.sample).collect();
        assert_eq!(out, vec![10, 20, 30, 10, 20, 30, 10]);
        assert_eq!(ch.state, ChannelState::SendAudioLoopWait);
    }
}
