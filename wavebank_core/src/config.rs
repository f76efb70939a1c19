//! Engine configuration and the parameter types shared between the control
//! side and the render side.
//!
//! Everything here is plain data: validation happens once, on the control
//! thread, before anything reaches the audio path.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SynthError, check_duration_ms, check_sample_rate, check_unit_level};

/// Periodic waveforms the engine can build tables for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveformKind {
    Sine,
    #[default]
    Triangle,
    Sawtooth,
    Square,
}

/// Where a voice's phase starts when the bank is (re)sized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhasePolicy {
    /// Start new voices at this phase; existing voices keep theirs.
    Fixed(f32),
    /// Draw a fresh uniform phase for every voice on every resize.
    Random,
}

impl PhasePolicy {
    /// Fixed phase wrapped into [0, 1). Random is passed through.
    pub fn normalized(self) -> Self {
        match self {
            PhasePolicy::Fixed(p) if p.is_finite() => PhasePolicy::Fixed(p - p.floor()),
            PhasePolicy::Fixed(_) => PhasePolicy::Fixed(0.0),
            PhasePolicy::Random => PhasePolicy::Random,
        }
    }
}

impl Default for PhasePolicy {
    fn default() -> Self {
        PhasePolicy::Fixed(0.0)
    }
}

/// Attack/decay/sustain/release settings. Times are in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeParams {
    pub attack_ms: f32,
    pub decay_ms: f32,
    pub sustain_level: f32, // 0.0 to 1.0
    pub release_ms: f32,
}

impl EnvelopeParams {
    pub fn new(attack_ms: f32, decay_ms: f32, sustain_level: f32, release_ms: f32) -> Self {
        Self {
            attack_ms,
            decay_ms,
            sustain_level,
            release_ms,
        }
    }

    /// Attack/release only: no decay, full sustain.
    pub fn ar(attack_ms: f32, release_ms: f32) -> Self {
        Self::new(attack_ms, 0.0, 1.0, release_ms)
    }

    /// Short envelope for testing
    pub fn quick() -> Self {
        Self::new(10.0, 100.0, 0.7, 300.0)
    }

    /// Slow envelope for pads
    pub fn slow() -> Self {
        Self::new(1000.0, 500.0, 0.8, 2000.0)
    }

    /// Percussive envelope (no sustain)
    pub fn percussive() -> Self {
        Self::new(10.0, 200.0, 0.0, 100.0)
    }

    pub fn validate(&self) -> Result<()> {
        check_duration_ms("attack_ms", self.attack_ms)?;
        check_duration_ms("decay_ms", self.decay_ms)?;
        check_unit_level("sustain_level", self.sustain_level)?;
        check_duration_ms("release_ms", self.release_ms)?;
        Ok(())
    }
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        Self::ar(5.0, 20.0)
    }
}

/// Complete description of one synthesis engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: f32,
    pub table_size: usize,
    pub voices: usize,
    /// Voice capacity reserved up front; the render side never grows past it.
    pub max_voices: usize,
    pub waveform: WaveformKind,
    pub phase_policy: PhasePolicy,
    pub envelope: EnvelopeParams,
    /// Largest block rendered in one pass; bigger requests are chunked.
    pub max_block_size: usize,
    /// Capacity of the control-to-render command queue.
    pub command_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            table_size: 4096,
            voices: 1,
            max_voices: 64,
            waveform: WaveformKind::Triangle,
            phase_policy: PhasePolicy::default(),
            envelope: EnvelopeParams::default(),
            max_block_size: 1024,
            command_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        log::debug!("loaded engine config: {config:?}");
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::info!("reading engine config from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        check_sample_rate(self.sample_rate)?;
        if self.table_size == 0 {
            return Err(SynthError::invalid("table_size", "table size must be positive"));
        }
        if self.voices > self.max_voices {
            return Err(SynthError::invalid(
                "voices",
                format!("{} voices exceed max_voices {}", self.voices, self.max_voices),
            ));
        }
        if self.max_block_size == 0 {
            return Err(SynthError::invalid(
                "max_block_size",
                "block size must be positive",
            ));
        }
        if self.command_capacity == 0 {
            return Err(SynthError::invalid(
                "command_capacity",
                "command queue needs room for at least one command",
            ));
        }
        self.envelope.validate()
    }
}
