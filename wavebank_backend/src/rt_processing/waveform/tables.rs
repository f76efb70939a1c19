use std::f32::consts::PI;
use std::sync::Arc;

use wavebank_core::{Result, SynthError, WaveformKind};

/// Default table resolution. Power of 2, but any positive length works.
pub const DEFAULT_TABLE_SIZE: usize = 4096;

/// One period of a periodic waveform, sampled at a fixed resolution.
///
/// Immutable once built. Cloning only bumps a reference count, so any number
/// of voices (and threads) can read the same table without synchronization.
#[derive(Debug, Clone)]
pub struct WaveTable {
    samples: Arc<[f32]>,
}

impl WaveTable {
    /// Build a table from caller-supplied samples.
    ///
    /// Rejects empty tables and samples outside [-1.0, 1.0].
    pub fn from_samples(samples: Vec<f32>) -> Result<Self> {
        if samples.is_empty() {
            return Err(SynthError::invalid("samples", "wave table cannot be empty"));
        }
        if let Some((index, value)) = samples
            .iter()
            .enumerate()
            .find(|(_, v)| !(-1.0..=1.0).contains(*v))
        {
            return Err(SynthError::invalid(
                "samples",
                format!("sample {index} is {value}, outside [-1, 1]"),
            ));
        }
        Ok(Self {
            samples: samples.into(),
        })
    }

    /// Sample `f(phase)` for `phase` in [0, 1) at `table_size` points.
    pub fn from_fn(table_size: usize, f: impl Fn(f32) -> f32) -> Result<Self> {
        check_table_size(table_size)?;
        Self::from_samples(
            (0..table_size)
                .map(|i| f(i as f32 / table_size as f32))
                .collect(),
        )
    }

    /// Interpolated read at a fractional position in the period.
    ///
    /// Position should be in [0.0, 1.0); anything else is wrapped first.
    #[inline]
    pub fn lookup(&self, position: f32) -> f32 {
        let size = self.samples.len();
        let scaled = normalize_phase(position) * size as f32;
        let floor = scaled.floor();
        let frac = scaled - floor;
        // `normalize_phase` can round up to exactly 1.0 for tiny negative inputs.
        let index = (floor as usize) % size;

        let sample1 = self.samples[index];
        let sample2 = self.samples[(index + 1) % size];

        sample1 + frac * (sample2 - sample1)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// True when both handles point at the same underlying table.
    pub fn ptr_eq(&self, other: &WaveTable) -> bool {
        Arc::ptr_eq(&self.samples, &other.samples)
    }
}

/// A generator for one kind of periodic waveform.
///
/// Implementations must keep every sample in [-1.0, 1.0] and must refuse a
/// zero table size instead of producing a table.
pub trait WaveTableFactory: Send + Sync {
    fn generate(&self, table_size: usize) -> Result<WaveTable>;

    fn name(&self) -> &'static str;
}

fn check_table_size(table_size: usize) -> Result<()> {
    if table_size == 0 {
        return Err(SynthError::invalid("table_size", "table size must be positive"));
    }
    Ok(())
}

/// Symmetric triangle: -1 at index 0, +1 at the midpoint, back toward -1.
#[derive(Debug, Clone, Copy, Default)]
pub struct Triangle;

impl WaveTableFactory for Triangle {
    fn generate(&self, table_size: usize) -> Result<WaveTable> {
        check_table_size(table_size)?;
        let half = table_size as f32 / 2.0;
        let samples = (0..table_size)
            .map(|i| {
                let i = i as f32;
                if i < half {
                    i / half * 2.0 - 1.0
                } else {
                    1.0 - (i - half) / half * 2.0
                }
            })
            .collect();
        WaveTable::from_samples(samples)
    }

    fn name(&self) -> &'static str {
        "Triangle"
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sine;

impl WaveTableFactory for Sine {
    fn generate(&self, table_size: usize) -> Result<WaveTable> {
        WaveTable::from_fn(table_size, |phase| {
            (2.0 * PI * phase).sin().clamp(-1.0, 1.0)
        })
    }

    fn name(&self) -> &'static str {
        "Sine"
    }
}

/// Rising ramp from -1 toward +1 over the period.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sawtooth;

impl WaveTableFactory for Sawtooth {
    fn generate(&self, table_size: usize) -> Result<WaveTable> {
        WaveTable::from_fn(table_size, |phase| 2.0 * phase - 1.0)
    }

    fn name(&self) -> &'static str {
        "Sawtooth"
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Square;

impl WaveTableFactory for Square {
    fn generate(&self, table_size: usize) -> Result<WaveTable> {
        WaveTable::from_fn(table_size, |phase| if phase < 0.5 { 1.0 } else { -1.0 })
    }

    fn name(&self) -> &'static str {
        "Square"
    }
}

/// Factory for a configured waveform kind.
pub fn factory_for(kind: WaveformKind) -> &'static dyn WaveTableFactory {
    match kind {
        WaveformKind::Sine => &Sine,
        WaveformKind::Triangle => &Triangle,
        WaveformKind::Sawtooth => &Sawtooth,
        WaveformKind::Square => &Square,
    }
}

/// Normalize phase to [0.0, 1.0) range to prevent accumulation errors
#[inline]
pub fn normalize_phase(phase: f32) -> f32 {
    let wrapped = phase - phase.floor();
    if wrapped >= 1.0 { 0.0 } else { wrapped }
}

/// Phase increment calculation helper
#[inline]
pub fn phase_increment(frequency: f32, sample_rate: f32) -> f32 {
    frequency / sample_rate
}
