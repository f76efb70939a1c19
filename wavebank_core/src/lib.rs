pub mod config;
pub mod error;

pub use config::{EngineConfig, EnvelopeParams, PhasePolicy, WaveformKind};
pub use error::{Result, SynthError};
