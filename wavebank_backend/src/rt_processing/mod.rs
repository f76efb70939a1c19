pub mod callback;
pub mod engine;
pub mod waveform;
