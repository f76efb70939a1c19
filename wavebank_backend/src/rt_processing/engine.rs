//! Render-side synthesis engine and its control handle.
//!
//! Control code never touches the bank or the envelope directly. It sends
//! [`SynthCommand`]s through a bounded channel; the engine drains the channel
//! with `try_recv` at the start of every block, so voice arrays are only ever
//! reshaped between blocks, on the render thread. Anything expensive (table
//! generation, snapshotting modulation sources) happens on the control side
//! before the command is sent.
//!
//! The render side neither allocates nor frees. Voice storage is reserved for
//! `max_voices` up front, and whatever a command displaces (old tables,
//! frequency lists, modulators) travels back over a second channel as
//! [`Retired`] and is dropped by the handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::atomic::AtomicCell;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use wavebank_core::{EngineConfig, PhasePolicy, Result, SynthError, WaveformKind};

use super::callback::AudioCallback;
use super::waveform::bank::OscillatorBank;
use super::waveform::envelopes::EnvelopeGenerator;
use super::waveform::modulation::ModulationSource;
use super::waveform::tables::{WaveTable, factory_for};

/// A change requested by the control side, applied at the next block boundary.
pub enum SynthCommand {
    SetVoiceCount(usize),
    SetFrequencies(Vec<f32>),
    SetWaveTable(WaveTable),
    SetPhasePolicy(PhasePolicy),
    AttachModulator {
        index: usize,
        source: Box<dyn ModulationSource>,
    },
    NoteOn,
    NoteOff,
}

impl SynthCommand {
    fn name(&self) -> &'static str {
        match self {
            SynthCommand::SetVoiceCount(_) => "SetVoiceCount",
            SynthCommand::SetFrequencies(_) => "SetFrequencies",
            SynthCommand::SetWaveTable(_) => "SetWaveTable",
            SynthCommand::SetPhasePolicy(_) => "SetPhasePolicy",
            SynthCommand::AttachModulator { .. } => "AttachModulator",
            SynthCommand::NoteOn => "NoteOn",
            SynthCommand::NoteOff => "NoteOff",
        }
    }
}

/// Something a command displaced on the render side, waiting to be dropped
/// on the control side.
pub enum Retired {
    Table(WaveTable),
    Frequencies(Vec<f32>),
    Modulator(Box<dyn ModulationSource>),
}

/// Hand `item` to the control side. If that side has stopped draining or is
/// gone, the item is dropped here.
fn retire(retired: &Sender<Retired>, item: Retired) {
    let _ = retired.try_send(item);
}

/// Values published by the render thread for lock-free reading elsewhere.
#[derive(Debug, Default)]
pub struct EngineStatus {
    frames_rendered: AtomicU64,
    rejected_commands: AtomicU64,
    envelope_level: AtomicCell<f32>,
    voice_count: AtomicCell<usize>,
}

impl EngineStatus {
    /// Commands the render side refused: out-of-range modulator indices,
    /// voice counts above `max_voices`, empty tables.
    pub fn rejected_commands(&self) -> u64 {
        self.rejected_commands.load(Ordering::Relaxed)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    /// Envelope value at the end of the last rendered block.
    pub fn envelope_level(&self) -> f32 {
        self.envelope_level.load()
    }

    /// Voice count as of the last applied command batch.
    pub fn voice_count(&self) -> usize {
        self.voice_count.load()
    }
}

/// Cloneable control-side handle. All methods are non-blocking.
#[derive(Clone)]
pub struct SynthHandle {
    commands: Sender<SynthCommand>,
    retired: Receiver<Retired>,
    capacity: usize,
    table_size: usize,
    max_voices: usize,
    status: Arc<EngineStatus>,
}

impl SynthHandle {
    pub fn set_voice_count(&self, voice_count: usize) -> Result<()> {
        if voice_count > self.max_voices {
            return Err(SynthError::invalid(
                "voice_count",
                format!("{voice_count} voices exceed max_voices {}", self.max_voices),
            ));
        }
        self.send(SynthCommand::SetVoiceCount(voice_count))
    }

    /// Frequencies in Hz, one per voice. Missing entries silence their voice.
    pub fn set_frequencies(&self, frequencies: &[f32]) -> Result<()> {
        self.send(SynthCommand::SetFrequencies(frequencies.to_vec()))
    }

    /// Snapshot the sources' current values here and send those.
    pub fn set_frequencies_from(&self, sources: &[&dyn ModulationSource]) -> Result<()> {
        self.set_frequencies(
            &sources
                .iter()
                .map(|s| s.current_value())
                .collect::<Vec<_>>(),
        )
    }

    /// Swap the shared table. An empty table is dropped here, keeping the
    /// one currently playing.
    pub fn set_wave_table(&self, table: WaveTable) -> Result<()> {
        if table.is_empty() {
            log::warn!("ignoring empty wave table; keeping the current one");
            return Ok(());
        }
        self.send(SynthCommand::SetWaveTable(table))
    }

    /// Generate a table for `kind` on this thread and swap it in.
    pub fn set_waveform(&self, kind: WaveformKind) -> Result<()> {
        let table = factory_for(kind).generate(self.table_size)?;
        log::debug!("switching waveform to {kind:?} ({} samples)", table.len());
        self.send(SynthCommand::SetWaveTable(table))
    }

    pub fn set_phase_policy(&self, policy: PhasePolicy) -> Result<()> {
        self.send(SynthCommand::SetPhasePolicy(policy))
    }

    /// Drive voice `index` from a live source.
    ///
    /// The index is checked against the last applied voice count. A resize
    /// still sitting in the queue is not seen here; if it leaves the index out
    /// of range the render side drops the command and counts it in
    /// [`EngineStatus::rejected_commands`].
    pub fn attach_modulator(&self, index: usize, source: Box<dyn ModulationSource>) -> Result<()> {
        let voice_count = self.status.voice_count();
        if index >= voice_count {
            return Err(SynthError::invalid(
                "index",
                format!("voice {index} out of range for {voice_count} voices"),
            ));
        }
        self.send(SynthCommand::AttachModulator { index, source })
    }

    pub fn note_on(&self) -> Result<()> {
        self.send(SynthCommand::NoteOn)
    }

    pub fn note_off(&self) -> Result<()> {
        self.send(SynthCommand::NoteOff)
    }

    pub fn status(&self) -> &EngineStatus {
        &self.status
    }

    /// Drop everything the render side has handed back. Returns the count.
    /// Runs before every send as well.
    pub fn collect_retired(&self) -> usize {
        let collected = self.retired.try_iter().count();
        if collected > 0 {
            log::trace!("dropped {collected} retired object(s)");
        }
        collected
    }

    fn send(&self, command: SynthCommand) -> Result<()> {
        self.collect_retired();
        match self.commands.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(command)) => {
                log::warn!(
                    "command queue full ({} pending), dropping {}",
                    self.capacity,
                    command.name()
                );
                Err(SynthError::CommandQueueFull {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Disconnected(command)) => {
                log::error!("render engine gone, dropping {}", command.name());
                Err(SynthError::EngineDisconnected)
            }
        }
    }
}

/// Oscillator bank plus amplitude envelope, driven one block at a time.
pub struct SynthEngine {
    bank: OscillatorBank,
    envelope: EnvelopeGenerator,
    commands: Receiver<SynthCommand>,
    retired: Sender<Retired>,
    status: Arc<EngineStatus>,
    max_voices: usize,

    // Scratch for the interleaved callback path, sized once up front.
    scratch_left: Vec<f32>,
    scratch_right: Vec<f32>,
}

impl SynthEngine {
    /// Build an engine and the handle that controls it.
    pub fn new(config: &EngineConfig) -> Result<(SynthEngine, SynthHandle)> {
        config.validate()?;

        let table = factory_for(config.waveform).generate(config.table_size)?;
        let bank = OscillatorBank::new(table, config.voices, config.sample_rate)?
            .with_phase_policy(config.phase_policy)
            .with_voice_capacity(config.max_voices);
        let envelope = EnvelopeGenerator::from_params(config.envelope, config.sample_rate)?;

        let (sender, receiver) = channel::bounded(config.command_capacity);
        // One command displaces at most a frequency list plus one modulator
        // per voice, and the handle drains before every send.
        let (retired_sender, retired_receiver) =
            channel::bounded((config.command_capacity + 1) * (config.max_voices + 1));
        let status = Arc::new(EngineStatus::default());
        status.voice_count.store(bank.voice_count());

        log::info!(
            "synth engine: {}/{} voice(s), {:?} table of {}, {} Hz, blocks of {}",
            config.voices,
            config.max_voices,
            config.waveform,
            config.table_size,
            config.sample_rate,
            config.max_block_size
        );

        let engine = SynthEngine {
            bank,
            envelope,
            commands: receiver,
            retired: retired_sender,
            status: Arc::clone(&status),
            max_voices: config.max_voices,
            scratch_left: vec![0.0; config.max_block_size],
            scratch_right: vec![0.0; config.max_block_size],
        };
        let handle = SynthHandle {
            commands: sender,
            retired: retired_receiver,
            capacity: config.command_capacity,
            table_size: config.table_size,
            max_voices: config.max_voices,
            status,
        };
        Ok((engine, handle))
    }

    /// Apply pending commands, then render one block into `left`/`right`
    /// with the envelope applied as gain.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.apply_pending();
        self.render_block(left, right);
    }

    /// Drain the command queue. Returns how many commands were applied.
    pub fn apply_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
            applied += 1;
        }
        if applied > 0 {
            self.status.voice_count.store(self.bank.voice_count());
        }
        applied
    }

    fn apply(&mut self, command: SynthCommand) {
        let retired = &self.retired;
        match command {
            SynthCommand::SetVoiceCount(n) if n > self.max_voices => self.reject(),
            SynthCommand::SetVoiceCount(n) => self
                .bank
                .resize_voices(n, |m| retire(retired, Retired::Modulator(m))),
            SynthCommand::SetFrequencies(frequencies) => {
                self.bank
                    .set_frequency_values_with(&frequencies, |m| {
                        retire(retired, Retired::Modulator(m))
                    });
                retire(retired, Retired::Frequencies(frequencies));
            }
            SynthCommand::SetWaveTable(table) => match self.bank.set_wave_table(table) {
                Ok(previous) => retire(retired, Retired::Table(previous)),
                Err(refused) => {
                    retire(retired, Retired::Table(refused));
                    self.reject();
                }
            },
            SynthCommand::SetPhasePolicy(policy) => self.bank.set_phase_policy(policy),
            SynthCommand::AttachModulator { index, source } => {
                // Checked here so the bank's error path, which formats a
                // message, never runs on this thread.
                if index < self.bank.voice_count() {
                    if let Ok(Some(previous)) = self.bank.attach_modulator(index, source) {
                        retire(retired, Retired::Modulator(previous));
                    }
                } else {
                    retire(retired, Retired::Modulator(source));
                    self.reject();
                }
            }
            SynthCommand::NoteOn => self.envelope.note_on(),
            SynthCommand::NoteOff => self.envelope.note_off(),
        }
    }

    fn reject(&self) {
        self.status.rejected_commands.fetch_add(1, Ordering::Relaxed);
    }

    fn render_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len());
        let (left, right) = (&mut left[..frames], &mut right[..frames]);

        self.bank.process_into(left, right);
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let gain = self.envelope.advance();
            *l *= gain;
            *r *= gain;
        }

        self.status
            .frames_rendered
            .fetch_add(frames as u64, Ordering::Relaxed);
        self.status.envelope_level.store(self.envelope.current_value());
    }

    pub fn bank(&self) -> &OscillatorBank {
        &self.bank
    }

    pub fn envelope(&self) -> &EnvelopeGenerator {
        &self.envelope
    }

    pub fn status(&self) -> Arc<EngineStatus> {
        Arc::clone(&self.status)
    }
}

impl AudioCallback for SynthEngine {
    /// Left to channel 0, right to channel 1 (mono gets left only), any
    /// further channels silent. Long buffers are rendered in scratch-sized
    /// chunks; commands are applied once, before the first chunk.
    fn process(&mut self, output: &mut [f32], _sample_rate: f32, channels: usize, frames: usize) {
        self.apply_pending();
        output.fill(0.0);
        if channels == 0 {
            return;
        }
        let frames = frames.min(output.len() / channels);

        let chunk = self.scratch_left.len();
        let mut start = 0;
        while start < frames {
            let n = chunk.min(frames - start);

            let mut left = std::mem::take(&mut self.scratch_left);
            let mut right = std::mem::take(&mut self.scratch_right);
            self.render_block(&mut left[..n], &mut right[..n]);

            for i in 0..n {
                let base = (start + i) * channels;
                output[base] = left[i];
                if channels > 1 {
                    output[base + 1] = right[i];
                }
            }

            self.scratch_left = left;
            self.scratch_right = right;
            start += n;
        }
    }

    fn native_sample_rate(&self) -> Option<f32> {
        Some(self.bank.sample_rate())
    }
}
