use wavebank_core::{Result, error::check_sample_rate};

use super::tables::{WaveTable, normalize_phase, phase_increment};

/// A scalar control signal sampled once per audio frame.
///
/// Constant sources only ever change through `set_value`. Time-varying
/// sources (LFOs, envelopes) move forward one frame per `advance` call.
pub trait ModulationSource: Send {
    /// Value at the current frame.
    fn current_value(&self) -> f32;

    /// Overwrite the value (or the center value for time-varying sources).
    fn set_value(&mut self, value: f32);

    /// Step one frame forward.
    fn advance(&mut self) {}

    /// Step a whole block forward.
    fn process(&mut self, frames: usize) {
        for _ in 0..frames {
            self.advance();
        }
    }
}

/// A source that holds one value until told otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Constant {
    value: f32,
}

impl Constant {
    pub fn new(value: f32) -> Self {
        Self { value }
    }
}

impl ModulationSource for Constant {
    fn current_value(&self) -> f32 {
        self.value
    }

    fn set_value(&mut self, value: f32) {
        self.value = value;
    }
}

/// A low frequency oscillator for modulation purposes
/// (vibrato when it drives a voice's frequency).
///
/// Output is `center + depth * table(phase)`.
#[derive(Debug, Clone)]
pub struct Lfo {
    table: WaveTable,
    frequency: f32,
    sample_rate: f32,
    phase: f32,
    depth: f32,
    center: f32,
}

impl Lfo {
    pub fn new(table: WaveTable, frequency: f32, sample_rate: f32) -> Result<Self> {
        check_sample_rate(sample_rate)?;
        Ok(Self {
            table,
            frequency,
            sample_rate,
            phase: 0.0,
            depth: 1.0,
            center: 0.0,
        })
    }

    pub fn with_depth(mut self, depth: f32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_center(mut self, center: f32) -> Self {
        self.center = center;
        self
    }

    /// Set starting phase (0.0 to 1.0)
    pub fn with_phase(mut self, phase: f32) -> Self {
        self.phase = normalize_phase(phase);
        self
    }

    pub fn set_frequency(&mut self, frequency: f32) {
        self.frequency = frequency;
    }

    pub fn set_depth(&mut self, depth: f32) {
        self.depth = depth;
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn depth(&self) -> f32 {
        self.depth
    }

    pub fn center(&self) -> f32 {
        self.center
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }
}

impl ModulationSource for Lfo {
    fn current_value(&self) -> f32 {
        self.center + self.depth * self.table.lookup(self.phase)
    }

    fn set_value(&mut self, value: f32) {
        self.center = value;
    }

    fn advance(&mut self) {
        let inc = phase_increment(self.frequency, self.sample_rate);
        self.phase = normalize_phase(self.phase + inc);
    }
}
