pub mod tables;
pub mod modulation;
pub mod bank;
pub mod envelopes;

pub use bank::{OscillatorBank, Voice};
pub use envelopes::{EnvelopeGenerator, EnvelopeState};
pub use modulation::{Constant, Lfo, ModulationSource};
pub use tables::{Sawtooth, Sine, Square, Triangle, WaveTable, WaveTableFactory, factory_for};
