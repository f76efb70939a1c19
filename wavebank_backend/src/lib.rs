//! Wavetable oscillator bank, envelope generator and the realtime plumbing
//! that drives them.

pub mod rt_processing;

pub use rt_processing::callback::{AudioCallback, CallbackSlot, RenderOutcome};
pub use rt_processing::engine::{EngineStatus, Retired, SynthCommand, SynthEngine, SynthHandle};
pub use rt_processing::waveform::*;
pub use wavebank_core::{EngineConfig, EnvelopeParams, PhasePolicy, Result, SynthError, WaveformKind};
