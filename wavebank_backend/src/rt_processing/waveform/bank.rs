//! Multi-voice wavetable oscillator bank.
//!
//! Every voice is a phase accumulator over the same shared [`WaveTable`].
//! The voices are summed into a stereo pair of buffers with a common gain of
//! `1 / voice_count`. After each voice's contribution the running sum is
//! clipped to +1.0; the lower side is left unclipped.

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use wavebank_core::{PhasePolicy, Result, SynthError, error::check_sample_rate};

use super::modulation::ModulationSource;
use super::tables::{WaveTable, phase_increment};

/// `((x mod 1) + 1) mod 1`: lands in [0, 1) for any finite input.
#[inline]
fn wrap_phase(x: f32) -> f32 {
    ((x % 1.0) + 1.0) % 1.0
}

/// Only forward phase motion is supported, so frequencies are folded.
/// Anything non-finite is treated as silence.
#[inline]
fn fold_frequency(frequency: f32) -> f32 {
    if frequency.is_finite() {
        frequency.abs()
    } else {
        0.0
    }
}

/// One phase accumulator inside the bank.
pub struct Voice {
    frequency: f32,
    phase: f32,
    increment: f32,
    modulator: Option<Box<dyn ModulationSource>>,
}

impl Voice {
    fn new(phase: f32) -> Self {
        Self {
            frequency: 0.0,
            phase,
            increment: 0.0,
            modulator: None,
        }
    }

    fn set_frequency(&mut self, frequency: f32, sample_rate: f32) {
        self.frequency = fold_frequency(frequency);
        self.increment = phase_increment(self.frequency, sample_rate);
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    pub fn increment(&self) -> f32 {
        self.increment
    }

    pub fn is_modulated(&self) -> bool {
        self.modulator.is_some()
    }
}

impl fmt::Debug for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Voice")
            .field("frequency", &self.frequency)
            .field("phase", &self.phase)
            .field("increment", &self.increment)
            .field("modulated", &self.modulator.is_some())
            .finish()
    }
}

/// N oscillators sharing one wave table, summed into stereo.
///
/// The sample rate is fixed at construction. Mutators that reshape the voice
/// array must not run while `process` is in flight; the engine takes care of
/// that by applying them between blocks.
pub struct OscillatorBank {
    voices: Vec<Voice>,
    table: WaveTable,
    sample_rate: f32,
    gain: f32,
    phase_policy: PhasePolicy,
    rng: StdRng,
}

impl OscillatorBank {
    /// Create a bank of `voice_count` silent voices starting at phase 0.
    pub fn new(table: WaveTable, voice_count: usize, sample_rate: f32) -> Result<Self> {
        check_sample_rate(sample_rate)?;
        let mut bank = Self {
            voices: Vec::new(),
            table,
            sample_rate,
            gain: 0.0,
            phase_policy: PhasePolicy::default(),
            rng: StdRng::from_os_rng(),
        };
        bank.set_voice_count(voice_count);
        Ok(bank)
    }

    /// Make random phase draws reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_phase_policy(mut self, policy: PhasePolicy) -> Self {
        self.set_phase_policy(policy);
        self
    }

    /// Reserve room for `capacity` voices so later growth up to that count
    /// does not allocate.
    pub fn with_voice_capacity(mut self, capacity: usize) -> Self {
        self.voices
            .reserve_exact(capacity.saturating_sub(self.voices.len()));
        self
    }

    /// Resize the bank.
    ///
    /// The first `min(old, new)` voices keep their frequency and phase, except
    /// under [`PhasePolicy::Random`] where every voice gets a fresh phase.
    /// Added voices start silent (frequency 0).
    pub fn set_voice_count(&mut self, voice_count: usize) {
        self.resize_voices(voice_count, drop);
    }

    /// [`set_voice_count`](Self::set_voice_count), handing the modulators of
    /// removed voices to `retire` instead of dropping them here.
    ///
    /// Allocation-free while `voice_count` fits in
    /// [`voice_capacity`](Self::voice_capacity).
    pub fn resize_voices(
        &mut self,
        voice_count: usize,
        mut retire: impl FnMut(Box<dyn ModulationSource>),
    ) {
        let kept = self.voices.len().min(voice_count);
        for voice in self.voices.drain(kept..) {
            if let Some(modulator) = voice.modulator {
                retire(modulator);
            }
        }

        if self.phase_policy == PhasePolicy::Random {
            for voice in &mut self.voices {
                voice.phase = self.rng.random::<f32>();
            }
        }

        for _ in kept..voice_count {
            let phase = self.start_phase();
            self.voices.push(Voice::new(phase));
        }

        self.gain = if voice_count == 0 {
            0.0
        } else {
            1.0 / voice_count as f32
        };
    }

    /// Change the phase policy and re-apply it at the current voice count.
    ///
    /// Switching to `Random` therefore redraws every phase right away;
    /// `Fixed(p)` leaves existing voices where they are.
    pub fn set_phase_policy(&mut self, policy: PhasePolicy) {
        self.phase_policy = policy.normalized();
        self.set_voice_count(self.voices.len());
    }

    /// Swap the shared table, returning the previous one.
    ///
    /// An empty table is refused and handed back as `Err`; the old table stays.
    pub fn set_wave_table(&mut self, table: WaveTable) -> std::result::Result<WaveTable, WaveTable> {
        if table.is_empty() {
            return Err(table);
        }
        Ok(std::mem::replace(&mut self.table, table))
    }

    /// Snapshot each source's current value as the matching voice's frequency.
    ///
    /// Voices without a matching source are silenced. Any attached live
    /// modulators are dropped.
    pub fn set_frequencies(&mut self, sources: &[&dyn ModulationSource]) {
        for (i, voice) in self.voices.iter_mut().enumerate() {
            let frequency = sources.get(i).map_or(0.0, |s| s.current_value());
            voice.modulator = None;
            voice.set_frequency(frequency, self.sample_rate);
        }
    }

    /// Same as [`set_frequencies`](Self::set_frequencies) with plain values in Hz.
    pub fn set_frequency_values(&mut self, frequencies: &[f32]) {
        self.set_frequency_values_with(frequencies, drop);
    }

    /// [`set_frequency_values`](Self::set_frequency_values), handing detached
    /// modulators to `retire`.
    pub fn set_frequency_values_with(
        &mut self,
        frequencies: &[f32],
        mut retire: impl FnMut(Box<dyn ModulationSource>),
    ) {
        for (i, voice) in self.voices.iter_mut().enumerate() {
            if let Some(modulator) = voice.modulator.take() {
                retire(modulator);
            }
            let frequency = frequencies.get(i).copied().unwrap_or(0.0);
            voice.set_frequency(frequency, self.sample_rate);
        }
    }

    /// Drive one voice's frequency from a live source, polled every frame.
    /// Returns the source it replaced, if any.
    pub fn attach_modulator(
        &mut self,
        index: usize,
        source: Box<dyn ModulationSource>,
    ) -> Result<Option<Box<dyn ModulationSource>>> {
        let voice_count = self.voices.len();
        let voice = self.voices.get_mut(index).ok_or_else(|| {
            SynthError::invalid(
                "index",
                format!("voice {index} out of range for {voice_count} voices"),
            )
        })?;
        voice.set_frequency(source.current_value(), self.sample_rate);
        Ok(voice.modulator.replace(source))
    }

    /// Detach a voice's live source. The voice keeps its last frequency.
    pub fn detach_modulator(&mut self, index: usize) -> Option<Box<dyn ModulationSource>> {
        self.voices.get_mut(index).and_then(|v| v.modulator.take())
    }

    /// Render `block_size` frames into freshly allocated buffers.
    pub fn process(&mut self, block_size: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0; block_size];
        let mut right = vec![0.0; block_size];
        self.process_into(&mut left, &mut right);
        (left, right)
    }

    /// Render into caller buffers. Does not allocate.
    ///
    /// Renders `min(left.len(), right.len())` frames; both buffers are
    /// overwritten over that range.
    pub fn process_into(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len());
        let left = &mut left[..frames];
        let right = &mut right[..frames];
        left.fill(0.0);
        right.fill(0.0);

        let table = &self.table;
        let gain = self.gain;
        let sample_rate = self.sample_rate;

        for voice in self.voices.iter_mut() {
            for j in 0..frames {
                if let Some(modulator) = voice.modulator.as_mut() {
                    let frequency = modulator.current_value();
                    modulator.advance();
                    voice.frequency = fold_frequency(frequency);
                    voice.increment = phase_increment(voice.frequency, sample_rate);
                }

                voice.phase = wrap_phase(voice.phase + voice.increment);
                let sample = gain * table.lookup(voice.phase);

                // Clip after every voice, not once at the end. Upper side only.
                left[j] += sample;
                if left[j] > 1.0 {
                    left[j] = 1.0;
                }
                right[j] += sample;
                if right[j] > 1.0 {
                    right[j] = 1.0;
                }
            }
        }
    }

    fn start_phase(&mut self) -> f32 {
        match self.phase_policy {
            PhasePolicy::Fixed(phase) => phase,
            PhasePolicy::Random => self.rng.random::<f32>(),
        }
    }

    // Getters

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn voice_capacity(&self) -> usize {
        self.voices.capacity()
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn frequencies(&self) -> Vec<f32> {
        self.voices.iter().map(|v| v.frequency).collect()
    }

    pub fn phases(&self) -> Vec<f32> {
        self.voices.iter().map(|v| v.phase).collect()
    }

    pub fn phase_policy(&self) -> PhasePolicy {
        self.phase_policy
    }

    pub fn table(&self) -> &WaveTable {
        &self.table
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }
}

impl fmt::Debug for OscillatorBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OscillatorBank")
            .field("voices", &self.voices)
            .field("table_len", &self.table.len())
            .field("sample_rate", &self.sample_rate)
            .field("gain", &self.gain)
            .field("phase_policy", &self.phase_policy)
            .finish()
    }
}
