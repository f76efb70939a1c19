//! Realtime callback slot.
//!
//! The audio driver calls [`CallbackSlot::process_realtime`] once per
//! hardware buffer. The processor sits behind a `spin::Mutex` that the audio
//! thread only ever `try_lock`s: if the control side happens to hold it
//! (swapping in a new processor), that buffer is rendered as silence instead
//! of waiting.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;
use wavebank_core::{Result, SynthError, error::check_sample_rate};

/// Something that can fill an interleaved output buffer.
///
/// `process` runs on the audio thread: it must not block and should not
/// allocate.
pub trait AudioCallback: Send + 'static {
    /// Fill `output` (length == `frames * channels`, interleaved).
    fn process(&mut self, output: &mut [f32], sample_rate: f32, channels: usize, frames: usize);

    /// The rate this processor was built for, if it is tied to one.
    fn native_sample_rate(&self) -> Option<f32> {
        None
    }
}

fn rate_mismatch(processor: &dyn AudioCallback, sample_rate: f32) -> Option<f32> {
    processor
        .native_sample_rate()
        .filter(|native| *native != sample_rate)
}

/// What happened to one buffer handed to the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered,
    /// Processor was busy on another thread; silence written.
    Contended,
    /// Buffer held less than one frame; nothing done.
    Empty,
}

pub struct CallbackSlot {
    processor: Arc<Mutex<Box<dyn AudioCallback>>>,
    frames_played: Arc<AtomicU64>,
    sample_rate: f32,
    channels: usize,
}

impl CallbackSlot {
    pub fn new(processor: Box<dyn AudioCallback>, sample_rate: f32, channels: usize) -> Result<Self> {
        check_sample_rate(sample_rate)?;
        if channels == 0 {
            return Err(SynthError::invalid("channels", "need at least one output channel"));
        }
        if let Some(native) = rate_mismatch(processor.as_ref(), sample_rate) {
            return Err(SynthError::invalid(
                "sample_rate",
                format!("processor renders at {native} Hz, slot runs at {sample_rate} Hz"),
            ));
        }
        log::debug!("callback slot ready: {sample_rate} Hz, {channels} channel(s)");
        Ok(Self {
            processor: Arc::new(Mutex::new(processor)),
            frames_played: Arc::new(AtomicU64::new(0)),
            sample_rate,
            channels,
        })
    }

    /// A slot that plays silence until a real processor is swapped in.
    pub fn silent(sample_rate: f32, channels: usize) -> Result<Self> {
        Self::new(Box::new(Silence), sample_rate, channels)
    }

    /// Replace the processor. Control thread only; spins while the audio
    /// thread is mid-buffer. A processor built for another rate is still
    /// installed, with a warning.
    pub fn swap_processor(&self, processor: Box<dyn AudioCallback>) -> Box<dyn AudioCallback> {
        if let Some(native) = rate_mismatch(processor.as_ref(), self.sample_rate) {
            log::warn!(
                "processor renders at {native} Hz but the slot runs at {} Hz; pitch will be off",
                self.sample_rate
            );
        }
        let mut guard = self.processor.lock();
        std::mem::replace(&mut *guard, processor)
    }

    /// Run `f` against the processor under the lock. Control thread only.
    pub fn with_processor_mut<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut dyn AudioCallback) -> R,
    {
        let mut guard = self.processor.lock();
        f(&mut **guard)
    }

    /// Audio thread entry point. Never blocks, never allocates.
    ///
    /// Trailing samples that do not make up a whole frame are zeroed.
    pub fn process_realtime(&self, output: &mut [f32]) -> RenderOutcome {
        let frames = output.len() / self.channels;
        if frames == 0 {
            output.fill(0.0);
            return RenderOutcome::Empty;
        }
        let (body, tail) = output.split_at_mut(frames * self.channels);
        tail.fill(0.0);

        self.frames_played.fetch_add(frames as u64, Ordering::Relaxed);

        match self.processor.try_lock() {
            Some(mut guard) => {
                guard.process(body, self.sample_rate, self.channels, frames);
                RenderOutcome::Rendered
            }
            None => {
                body.fill(0.0);
                RenderOutcome::Contended
            }
        }
    }

    /// Seconds of audio handed to the driver so far.
    pub fn playback_time(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }

    pub fn frame_count(&self) -> u64 {
        self.frames_played.load(Ordering::Relaxed)
    }

    /// Shared frame counter, for readers on other threads.
    pub fn frame_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.frames_played)
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

struct Silence;

impl AudioCallback for Silence {
    fn process(&mut self, output: &mut [f32], _sample_rate: f32, _channels: usize, _frames: usize) {
        output.fill(0.0);
    }
}
