//! MF receiver
//!
//! Ties the ADC double buffer, the Goertzel bank and the digit decoder to a
//! seize/release lifecycle. [`MfReceiver::handle_buffer`] is the frame-ready
//! entry point. Frame analysis runs under the front-end lock and the decoder
//! step under the control lock. The digit handler is invoked after both are
//! released, so it may poll or release the receiver.

use std::num::NonZeroU32;
use std::sync::{Mutex, MutexGuard};

use log::{debug, error, info, warn};

use crate::error::{Result, SignalError};
use crate::goertzel::{FilterBank, FrameClass};
use crate::mf_decoder::{DecoderState, MfConfig, MfDecoder, MfResult};
use crate::{BufferHalf, MF_ADC_BUF_LEN, MF_FRAME_SIZE};

/// Lowest and highest accepted Goertzel silence threshold
pub const MIN_SILENCE_THRESHOLD: f32 = 0.01;
pub const MAX_SILENCE_THRESHOLD: f32 = 1000.0;

/// Receives the outcome of a seizure
pub trait DigitHandler: Sync {
    fn on_digits(&self, result: &MfResult);
}

impl<F> DigitHandler for F
where
    F: Fn(&MfResult) + Sync,
{
    fn on_digits(&self, result: &MfResult) {
        self(result)
    }
}

/// Starts and stops the ADC conversion clock feeding the receive buffer
pub trait SampleTrigger: Send {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}

/// Trigger for hosts where frames are pushed by software
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTrigger;

impl SampleTrigger for NullTrigger {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Handle proving ownership of a seized receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor(NonZeroU32);

impl Descriptor {
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

struct FrontEnd {
    adc: [u16; MF_ADC_BUF_LEN],
    bank: FilterBank,
}

struct Control<'a, T> {
    decoder: MfDecoder,
    handler: Option<&'a dyn DigitHandler>,
    owner: Option<Descriptor>,
    serial: NonZeroU32,
    trigger: T,
}

impl<'a, T> Control<'a, T> {
    fn issue_descriptor(&mut self) -> Descriptor {
        let descriptor = Descriptor(self.serial);
        self.serial = self.serial.checked_add(1).unwrap_or(NonZeroU32::MIN);
        descriptor
    }

    fn check_owner(&self, descriptor: Descriptor) -> Result<()> {
        if self.owner == Some(descriptor) {
            Ok(())
        } else {
            Err(SignalError::InvalidDescriptor)
        }
    }
}

/// Single MF receiver
pub struct MfReceiver<'a, T: SampleTrigger = NullTrigger> {
    front: Mutex<FrontEnd>,
    control: Mutex<Control<'a, T>>,
}

fn lock<X>(mutex: &Mutex<X>) -> MutexGuard<'_, X> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<'a, T: SampleTrigger> MfReceiver<'a, T> {
    pub fn new(trigger: T) -> Self {
        Self::with_config(trigger, MfConfig::default())
    }

    pub fn with_config(trigger: T, config: MfConfig) -> Self {
        Self {
            front: Mutex::new(FrontEnd {
                adc: [0; MF_ADC_BUF_LEN],
                bank: FilterBank::with_threshold(config.silence_threshold),
            }),
            control: Mutex::new(Control {
                decoder: MfDecoder::new(config),
                handler: None,
                owner: None,
                serial: NonZeroU32::MIN,
                trigger,
            }),
        }
    }

    /// Claim the receiver and start listening for KP
    pub fn seize(&self, handler: &'a dyn DigitHandler) -> Result<Descriptor> {
        let mut control = lock(&self.control);
        if control.owner.is_some() {
            warn!("MF receiver already seized");
            return Err(SignalError::Busy);
        }

        control.trigger.start().map_err(|e| {
            error!("Failed to start MF sampling: {}", e);
            e
        })?;

        control.decoder.start();
        control.handler = Some(handler);
        let descriptor = control.issue_descriptor();
        control.owner = Some(descriptor);
        debug!("MF receiver seized ({})", descriptor.get());
        Ok(descriptor)
    }

    /// Stop sampling and return to Idle
    pub fn release(&self, descriptor: Descriptor) -> Result<()> {
        let mut control = lock(&self.control);
        if let Err(e) = control.check_owner(descriptor) {
            warn!("MF release with stale descriptor {}", descriptor.get());
            return Err(e);
        }

        control.decoder.reset();
        control.handler = None;
        control.owner = None;
        debug!("MF receiver released ({})", descriptor.get());

        control.trigger.stop().map_err(|e| {
            error!("Failed to stop MF sampling: {}", e);
            e
        })
    }

    /// Write one frame of raw ADC counts into a half of the receive buffer
    pub fn fill_half(&self, half: BufferHalf, samples: &[u16]) -> Result<()> {
        if samples.len() != MF_FRAME_SIZE {
            return Err(SignalError::InvalidArgument(format!(
                "ADC frame holds {} samples, expected {}",
                samples.len(),
                MF_FRAME_SIZE
            )));
        }
        let mut front = lock(&self.front);
        let base = half.offset(MF_FRAME_SIZE);
        front.adc[base..base + MF_FRAME_SIZE].copy_from_slice(samples);
        Ok(())
    }

    /// Process one half of the receive buffer
    ///
    /// Returns the frame classification for diagnostics.
    pub fn handle_buffer(&self, half: BufferHalf) -> FrameClass {
        let class = {
            let mut front = lock(&self.front);
            let front = &mut *front;
            let base = half.offset(MF_FRAME_SIZE);
            front.bank.analyze(&front.adc[base..base + MF_FRAME_SIZE])
        };

        let completed = {
            let mut control = lock(&self.control);
            let handler = control.handler;
            control.decoder.advance(class).map(|result| (result, handler))
        };

        if let Some((result, handler)) = completed {
            info!("MF receive complete: {}", result);
            if let Some(handler) = handler {
                handler.on_digits(&result);
            }
        }
        class
    }

    pub fn state(&self) -> DecoderState {
        lock(&self.control).decoder.state()
    }

    pub fn is_seized(&self) -> bool {
        lock(&self.control).owner.is_some()
    }

    /// True once the seizure identified by `descriptor` has completed
    pub fn is_done(&self, descriptor: Descriptor) -> bool {
        let control = lock(&self.control);
        control.check_owner(descriptor).is_ok() && control.decoder.result().is_some()
    }

    /// Completed result for `descriptor`, if any
    pub fn result(&self, descriptor: Descriptor) -> Option<MfResult> {
        let control = lock(&self.control);
        control.check_owner(descriptor).ok()?;
        control.decoder.result().cloned()
    }

    /// Goertzel powers from the most recent frame
    pub fn powers(&self) -> [f32; crate::goertzel::NUM_MF_FREQUENCIES] {
        lock(&self.front).bank.powers()
    }

    pub fn silence_threshold(&self) -> f32 {
        lock(&self.front).bank.silence_threshold()
    }

    /// Set the tone presence threshold, clamped to a usable range
    pub fn set_silence_threshold(&self, threshold: f32) {
        let threshold = threshold.max(MIN_SILENCE_THRESHOLD).min(MAX_SILENCE_THRESHOLD);
        lock(&self.front).bank.set_silence_threshold(threshold);
    }

    /// Decoder timing plus the threshold currently applied by the filter bank
    pub fn config(&self) -> MfConfig {
        let silence_threshold = self.silence_threshold();
        MfConfig {
            silence_threshold,
            ..*lock(&self.control).decoder.config()
        }
    }
}

impl<'a> Default for MfReceiver<'a, NullTrigger> {
    fn default() -> Self {
        Self::new(NullTrigger)
    }
}
