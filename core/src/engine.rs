//! Tone synthesis engine
//!
//! Owns the channel pool and the double-buffered interleaved output. Every
//! mutating call and [`ToneEngine::request_block`] serialise through one
//! mutex; the block fill holds it for exactly one half buffer. Completion
//! handlers run after the lock is dropped, so a handler may call back into
//! the engine (e.g. to release its channel).

use std::sync::{Mutex, MutexGuard};

use log::{debug, warn};

use crate::channel::{Channel, ChannelId, ChannelState, CompletionHandler};
use crate::error::{Result, SignalError};
use crate::tone_plan::{encode_digits, DigitSet, TonePlan};
use crate::{BufferHalf, LR_BLOCK_SIZE, NUM_AUDIO_CHANNELS, OUTPUT_BUFFER_SIZE};

/// Audible call-progress indications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallProgressTone {
    Dial,
    Busy,
    Congestion,
    Ringing,
}

impl CallProgressTone {
    fn state(self) -> ChannelState {
        match self {
            CallProgressTone::Dial => ChannelState::GenDialTone,
            CallProgressTone::Busy => ChannelState::GenBusyTone,
            CallProgressTone::Congestion => ChannelState::GenCongestionTone,
            CallProgressTone::Ringing => ChannelState::GenRingingTone,
        }
    }
}

struct EngineCore<'a> {
    channels: [Channel<'a>; NUM_AUDIO_CHANNELS],
    output: [i16; OUTPUT_BUFFER_SIZE],
}

impl<'a> EngineCore<'a> {
    /// Channel slot if the caller owns it
    fn owned(&mut self, id: ChannelId) -> Result<&mut Channel<'a>> {
        let channel = &mut self.channels[id.index()];
        if channel.in_use {
            Ok(channel)
        } else {
            Err(SignalError::InvalidChannel)
        }
    }
}

type Completions<'a> = heapless::Vec<(&'a dyn CompletionHandler, ChannelId), NUM_AUDIO_CHANNELS>;

/// Multi-channel tone generator
pub struct ToneEngine<'a> {
    plan: &'static TonePlan,
    core: Mutex<EngineCore<'a>>,
}

impl<'a> ToneEngine<'a> {
    pub fn new() -> Self {
        Self::with_plan(&TonePlan::NORTH_AMERICAN)
    }

    pub fn with_plan(plan: &'static TonePlan) -> Self {
        Self {
            plan,
            core: Mutex::new(EngineCore {
                channels: [Channel::new(), Channel::new()],
                output: [0; OUTPUT_BUFFER_SIZE],
            }),
        }
    }

    pub fn plan(&self) -> &'static TonePlan {
        self.plan
    }

    fn lock(&self) -> MutexGuard<'_, EngineCore<'a>> {
        // Channel state stays consistent even if a holder panicked
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the first free channel
    pub fn seize(&self) -> Result<ChannelId> {
        let mut core = self.lock();
        match core.channels.iter().position(|ch| !ch.in_use) {
            Some(index) => {
                core.channels[index].in_use = true;
                let id = ChannelId::from_index(index);
                debug!("Seized {}", id);
                Ok(id)
            }
            None => {
                warn!("No free audio channel");
                Err(SignalError::Exhausted)
            }
        }
    }

    /// Return a channel to Idle and mark it free
    pub fn release(&self, id: ChannelId) -> Result<()> {
        let mut core = self.lock();
        let channel = core.owned(id)?;
        channel.reset();
        channel.in_use = false;
        debug!("Released {}", id);
        Ok(())
    }

    /// Start a call-progress indication; it runs until [`ToneEngine::stop`]
    pub fn send_call_progress_tones(&self, id: ChannelId, tone: CallProgressTone) -> Result<()> {
        let mut core = self.lock();
        core.owned(id)?.state = tone.state();
        debug!("{}: {:?} tone", id, tone);
        Ok(())
    }

    /// Outpulse a digit string with MF tones
    pub fn send_mf(&self, id: ChannelId, digits: &str, handler: &'a dyn CompletionHandler) -> Result<()> {
        self.send_digits(id, digits, DigitSet::Mf, handler)
    }

    /// Outpulse a digit string with DTMF tones
    pub fn send_dtmf(&self, id: ChannelId, digits: &str, handler: &'a dyn CompletionHandler) -> Result<()> {
        self.send_digits(id, digits, DigitSet::Dtmf, handler)
    }

    fn send_digits(
        &self,
        id: ChannelId,
        digits: &str,
        set: DigitSet,
        handler: &'a dyn CompletionHandler,
    ) -> Result<()> {
        // Encode before touching the channel so a rejected string changes nothing
        let codes = encode_digits(digits, set).map_err(|e| {
            warn!("{}: rejected digit string {:?}: {}", id, digits, e);
            e
        })?;

        let state = match set {
            DigitSet::Mf => ChannelState::SendMf,
            DigitSet::Dtmf => ChannelState::SendDtmf,
        };

        let mut core = self.lock();
        core.owned(id)?.load_digits(codes, handler, state);
        debug!("{}: outpulsing {:?} as {:?}", id, digits, set);
        Ok(())
    }

    /// Play a sample buffer once, then notify `handler`
    pub fn send(&self, id: ChannelId, samples: &'a [i16], handler: &'a dyn CompletionHandler) -> Result<()> {
        if samples.is_empty() {
            return Err(SignalError::InvalidArgument("empty sample buffer".into()));
        }
        let mut core = self.lock();
        core.owned(id)?.load_samples(samples, Some(handler), ChannelState::SendAudio);
        debug!("{}: playing {} samples", id, samples.len());
        Ok(())
    }

    /// Play a sample buffer repeatedly until stopped
    pub fn send_loop(&self, id: ChannelId, samples: &'a [i16]) -> Result<()> {
        if samples.is_empty() {
            return Err(SignalError::InvalidArgument("empty sample buffer".into()));
        }
        let mut core = self.lock();
        core.owned(id)?.load_samples(samples, None, ChannelState::SendAudioLoop);
        debug!("{}: looping {} samples", id, samples.len());
        Ok(())
    }

    /// Force a channel to Idle; the channel stays seized
    pub fn stop(&self, id: ChannelId) -> Result<()> {
        let mut core = self.lock();
        core.owned(id)?.state = ChannelState::Idle;
        debug!("{}: stopped", id);
        Ok(())
    }

    pub fn state(&self, id: ChannelId) -> ChannelState {
        self.lock().channels[id.index()].state
    }

    pub fn is_seized(&self, id: ChannelId) -> bool {
        self.lock().channels[id.index()].in_use
    }

    /// Fill one half of the output buffer
    ///
    /// Even positions belong to channel 1, odd positions to channel 2. Each
    /// position advances its channel by exactly one sample tick.
    pub fn request_block(&self, half: BufferHalf) {
        let mut completions = Completions::new();
        {
            let mut core = self.lock();
            let core = &mut *core;
            let base = half.offset(LR_BLOCK_SIZE);

            for i in 0..LR_BLOCK_SIZE {
                let channel = &mut core.channels[i & 1];
                let tick = channel.tick(self.plan);
                core.output[base + i] = tick.sample;
                if tick.completed {
                    if let Some(handler) = channel.handler {
                        // a channel is Idle after completing, so at most one entry per channel
                        let _ = completions.push((handler, ChannelId::from_index(i & 1)));
                    }
                }
            }
        }

        for (handler, id) in completions {
            debug!("{}: complete", id);
            handler.on_complete(id);
        }
    }

    /// Copy one half of the output buffer into `out` (exactly one block long)
    pub fn read_block(&self, half: BufferHalf, out: &mut [i16]) -> Result<()> {
        if out.len() != LR_BLOCK_SIZE {
            return Err(SignalError::InvalidArgument(format!(
                "block buffer holds {} samples, expected {}",
                out.len(),
                LR_BLOCK_SIZE
            )));
        }
        let core = self.lock();
        let base = half.offset(LR_BLOCK_SIZE);
        out.copy_from_slice(&core.output[base..base + LR_BLOCK_SIZE]);
        Ok(())
    }
}

impl<'a> Default for ToneEngine<'a> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resample::channel_samples;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn read_half(engine: &ToneEngine<'_>, half: BufferHalf) -> Vec<i16> {
        let mut out = vec![0i16; LR_BLOCK_SIZE];
        engine.read_block(half, &mut out).unwrap();
        out
    }

    #[test]
    fn test_seize_exhausts_pool() {
        let engine = ToneEngine::new();
        let a = engine.seize().unwrap();
        let b = engine.seize().unwrap();
        assert_ne!(a, b);
        assert_eq!(engine.seize(), Err(SignalError::Exhausted));

        engine.release(a).unwrap();
        assert_eq!(engine.seize(), Ok(a));
    }

    #[test]
    fn test_release_unowned_fails() {
        let engine = ToneEngine::new();
        let id = ChannelId::new(1).unwrap();
        assert_eq!(engine.release(id), Err(SignalError::InvalidChannel));
    }

    #[test]
    fn test_commands_require_ownership() {
        let handler = |_: ChannelId| {};
        let engine = ToneEngine::new();
        let id = ChannelId::new(2).unwrap();
        assert_eq!(
            engine.send_call_progress_tones(id, CallProgressTone::Dial),
            Err(SignalError::InvalidChannel)
        );
        assert_eq!(engine.send_mf(id, "*1#", &handler), Err(SignalError::InvalidChannel));
        assert_eq!(engine.stop(id), Err(SignalError::InvalidChannel));
    }

    #[test]
    fn test_idle_block_is_silent() {
        let engine = ToneEngine::new();
        let id = engine.seize().unwrap();
        engine.request_block(BufferHalf::Lower);
        engine.request_block(BufferHalf::Upper);
        assert!(read_half(&engine, BufferHalf::Lower).iter().all(|&s| s == 0));
        assert!(read_half(&engine, BufferHalf::Upper).iter().all(|&s| s == 0));
        assert_eq!(engine.state(id), ChannelState::Idle);
    }

    #[test]
    fn test_dial_tone_only_on_owning_channel() {
        let engine = ToneEngine::new();
        let left = engine.seize().unwrap();
        let right = engine.seize().unwrap();
        engine.send_call_progress_tones(right, CallProgressTone::Dial).unwrap();
        engine.request_block(BufferHalf::Upper);

        let block = read_half(&engine, BufferHalf::Upper);
        assert!(channel_samples(&block, left).iter().all(|&s| s == 0));
        assert!(channel_samples(&block, right).iter().any(|&s| s != 0));
        // The other half is untouched
        assert!(read_half(&engine, BufferHalf::Lower).iter().all(|&s| s == 0));
    }

    #[test]
    fn test_stop_forces_idle() {
        let engine = ToneEngine::new();
        let id = engine.seize().unwrap();
        engine.send_call_progress_tones(id, CallProgressTone::Ringing).unwrap();
        engine.request_block(BufferHalf::Lower);
        assert_eq!(engine.state(id), ChannelState::RingingWaitToneEnd);

        engine.stop(id).unwrap();
        assert_eq!(engine.state(id), ChannelState::Idle);
        assert!(engine.is_seized(id));
        engine.request_block(BufferHalf::Lower);
        assert!(read_half(&engine, BufferHalf::Lower).iter().all(|&s| s == 0));
    }

    #[test]
    fn test_rejected_digits_leave_channel_untouched() {
        let handler = |_: ChannelId| {};
        let engine = ToneEngine::new();
        let id = engine.seize().unwrap();
        engine.send_call_progress_tones(id, CallProgressTone::Dial).unwrap();

        assert_eq!(engine.send_mf(id, "*12D#", &handler), Err(SignalError::InvalidDigit('D')));
        let long = "1".repeat(crate::DIGIT_STRING_MAX_LENGTH + 1);
        assert!(matches!(
            engine.send_dtmf(id, &long, &handler),
            Err(SignalError::DigitStringTooLong { .. })
        ));
        assert_eq!(engine.state(id), ChannelState::GenDialTone);
    }

    #[test]
    fn test_send_audio_completion_handler() {
        let calls = AtomicUsize::new(0);
        let handler = |ch: ChannelId| {
            assert_eq!(ch, ChannelId::new(1).unwrap());
            calls.fetch_add(1, Ordering::SeqCst);
        };
        let samples = [100i16; 50];
        let engine = ToneEngine::new();
        let id = engine.seize().unwrap();
        engine.send(id, &samples, &handler).unwrap();
        engine.request_block(BufferHalf::Lower);
        engine.request_block(BufferHalf::Upper);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let block = read_half(&engine, BufferHalf::Lower);
        let left = channel_samples(&block, id);
        assert!(left[..50].iter().all(|&s| s == 100));
        assert!(left[50..].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_handler_may_release_its_channel() {
        let samples = [1i16; 10];
        let engine = ToneEngine::new();
        let id = engine.seize().unwrap();
        let handler = |ch: ChannelId| {
            engine.release(ch).unwrap();
        };
        engine.send(id, &samples, &handler).unwrap();
        engine.request_block(BufferHalf::Lower);
        assert!(!engine.is_seized(id));
    }

    #[test]
    fn test_read_block_checks_length() {
        let engine = ToneEngine::new();
        let mut short = [0i16; 10];
        assert!(matches!(
            engine.read_block(BufferHalf::Lower, &mut short),
            Err(SignalError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_empty_samples_rejected() {
        let engine = ToneEngine::new();
        let id = engine.seize().unwrap();
        assert!(matches!(engine.send_loop(id, &[]), Err(SignalError::InvalidArgument(_))));
    }

    #[test]
    fn test_send_loop_wraps_across_blocks() {
        // 7 does not divide the 160 samples per channel in a block
        let samples: Vec<i16> = (1..=7).collect();
        let engine = ToneEngine::new();
        let id = engine.seize().unwrap();
        engine.send_loop(id, &samples).unwrap();

        let mut played = Vec::new();
        for half in [BufferHalf::Lower, BufferHalf::Upper, BufferHalf::Lower] {
            engine.request_block(half);
            played.extend(channel_samples(&read_half(&engine, half), id));
        }
        for (i, &s) in played.iter().enumerate() {
            assert_eq!(s, samples[i % samples.len()], "position {}", i);
        }
        assert_eq!(engine.state(id), ChannelState::SendAudioLoopWait);
    }
}
