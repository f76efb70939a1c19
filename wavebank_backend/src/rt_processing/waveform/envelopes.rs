use std::collections::VecDeque;

use wavebank_core::error::{check_duration_ms, check_sample_rate, check_unit_level};
use wavebank_core::{EnvelopeParams, Result};

use super::modulation::ModulationSource;

/// ADSR envelope states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeState {
    Idle,
    Attacking,
    Decaying,
    Sustaining,
    Releasing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Attack,
    Decay,
    Release,
}

impl Stage {
    fn state(self) -> EnvelopeState {
        match self {
            Stage::Attack => EnvelopeState::Attacking,
            Stage::Decay => EnvelopeState::Decaying,
            Stage::Release => EnvelopeState::Releasing,
        }
    }
}

/// A linear ramp toward `target` lasting `duration_samples` frames.
#[derive(Debug, Clone, Copy)]
struct Segment {
    target: f32,
    duration_samples: u32,
    stage: Stage,
}

#[derive(Debug, Clone, Copy)]
struct ActiveSegment {
    segment: Segment,
    start_value: f32,
    elapsed: u32,
}

/// Segment-sequencing ADSR envelope generator.
///
/// `note_on` queues an attack ramp to 1.0 followed by a decay ramp to the
/// sustain level; `note_off` appends a release ramp to 0.0 behind whatever is
/// still queued. Every ramp starts from the value the previous one ended on,
/// so the output never jumps at a segment boundary. With nothing queued the
/// value simply holds, which is how sustain works.
///
/// The generator only produces a control value; applying it to a signal is
/// up to the caller.
#[derive(Debug, Clone)]
pub struct EnvelopeGenerator {
    params: EnvelopeParams,
    sample_rate: f32,

    segments: VecDeque<Segment>,
    active: Option<ActiveSegment>,

    state: EnvelopeState,
    current_value: f32,

    // Scaling applied when used as a modulation source.
    depth: f32,
    center: f32,
}

impl EnvelopeGenerator {
    /// Create a new envelope. Durations are in milliseconds.
    pub fn new(
        attack_ms: f32,
        decay_ms: f32,
        sustain_level: f32,
        release_ms: f32,
        sample_rate: f32,
    ) -> Result<Self> {
        Self::from_params(
            EnvelopeParams::new(attack_ms, decay_ms, sustain_level, release_ms),
            sample_rate,
        )
    }

    pub fn from_params(params: EnvelopeParams, sample_rate: f32) -> Result<Self> {
        params.validate()?;
        check_sample_rate(sample_rate)?;
        Ok(Self {
            params,
            sample_rate,
            segments: VecDeque::with_capacity(8),
            active: None,
            state: EnvelopeState::Idle,
            current_value: 0.0,
            depth: 1.0,
            center: 0.0,
        })
    }

    /// Scale the modulation output: `center + depth * value`.
    pub fn with_depth(mut self, depth: f32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_center(mut self, center: f32) -> Self {
        self.center = center;
        self
    }

    /// Start a note: drop anything queued, then ramp to 1.0 and down to sustain.
    ///
    /// The attack starts from the current value rather than from 0, so a
    /// retrigger mid-release rises from where the release had got to instead
    /// of clicking down first.
    pub fn note_on(&mut self) {
        self.segments.clear();
        self.active = None;
        self.segments.push_back(Segment {
            target: 1.0,
            duration_samples: self.ms_to_samples(self.params.attack_ms),
            stage: Stage::Attack,
        });
        self.segments.push_back(Segment {
            target: self.params.sustain_level,
            duration_samples: self.ms_to_samples(self.params.decay_ms),
            stage: Stage::Decay,
        });
        self.start_next(Stage::Decay);
    }

    /// Queue the release ramp behind whatever is still running.
    ///
    /// Not queued while idle, or when a release is already the last thing
    /// queued or running: a second ramp to 0 would only hold the state out of
    /// `Idle` for another release time. This also keeps the queue within its
    /// preallocated capacity.
    pub fn note_off(&mut self) {
        if self.state == EnvelopeState::Idle && self.segments.is_empty() {
            return;
        }
        // A second release behind a pending one would only stretch the tail at 0.
        let last = self
            .segments
            .back()
            .map(|s| s.stage)
            .or(self.active.map(|a| a.segment.stage));
        if last == Some(Stage::Release) {
            return;
        }

        self.segments.push_back(Segment {
            target: 0.0,
            duration_samples: self.ms_to_samples(self.params.release_ms),
            stage: Stage::Release,
        });
        if self.active.is_none() {
            self.start_next(Stage::Release);
        }
    }

    /// Move one frame forward and return the new value.
    pub fn advance(&mut self) -> f32 {
        if let Some(active) = self.active.as_mut() {
            active.elapsed += 1;
            let segment = active.segment;
            if active.elapsed >= segment.duration_samples {
                self.current_value = segment.target;
                self.active = None;
                self.start_next(segment.stage);
            } else {
                let progress = active.elapsed as f32 / segment.duration_samples as f32;
                self.current_value =
                    active.start_value + progress * (segment.target - active.start_value);
            }
        }
        self.current_value
    }

    /// Advance a whole block.
    pub fn process(&mut self, frames: usize) {
        for _ in 0..frames {
            self.advance();
        }
    }

    /// Advance one frame per output slot, writing each new value.
    pub fn process_into(&mut self, output: &mut [f32]) {
        for out in output.iter_mut() {
            *out = self.advance();
        }
    }

    /// Raw envelope value in [0, 1].
    pub fn current_value(&self) -> f32 {
        self.current_value
    }

    /// Value after modulation scaling.
    pub fn output(&self) -> f32 {
        self.center + self.depth * self.current_value
    }

    pub fn state(&self) -> EnvelopeState {
        self.state
    }

    /// True while a ramp is running, queued or held at sustain.
    pub fn is_active(&self) -> bool {
        self.state != EnvelopeState::Idle
    }

    /// Back to silence with nothing queued.
    pub fn reset(&mut self) {
        self.segments.clear();
        self.active = None;
        self.state = EnvelopeState::Idle;
        self.current_value = 0.0;
    }

    // Setters only affect segments queued after the call.

    pub fn set_attack_ms(&mut self, attack_ms: f32) -> Result<()> {
        self.params.attack_ms = check_duration_ms("attack_ms", attack_ms)?;
        Ok(())
    }

    pub fn set_decay_ms(&mut self, decay_ms: f32) -> Result<()> {
        self.params.decay_ms = check_duration_ms("decay_ms", decay_ms)?;
        Ok(())
    }

    /// Also moves the held value when the envelope is sitting at sustain.
    pub fn set_sustain_level(&mut self, sustain_level: f32) -> Result<()> {
        self.params.sustain_level = check_unit_level("sustain_level", sustain_level)?;
        if self.state == EnvelopeState::Sustaining {
            self.current_value = sustain_level;
        }
        Ok(())
    }

    pub fn set_release_ms(&mut self, release_ms: f32) -> Result<()> {
        self.params.release_ms = check_duration_ms("release_ms", release_ms)?;
        Ok(())
    }

    pub fn params(&self) -> EnvelopeParams {
        self.params
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn ms_to_samples(&self, ms: f32) -> u32 {
        (ms * self.sample_rate / 1000.0).round() as u32
    }

    /// Activate the next queued segment. Zero-length segments are applied on
    /// the spot. With nothing left, settle according to the last stage run.
    fn start_next(&mut self, mut last: Stage) {
        while let Some(segment) = self.segments.pop_front() {
            self.state = segment.stage.state();
            if segment.duration_samples == 0 {
                self.current_value = segment.target;
                last = segment.stage;
                continue;
            }
            self.active = Some(ActiveSegment {
                segment,
                start_value: self.current_value,
                elapsed: 0,
            });
            return;
        }

        self.state = match last {
            Stage::Attack | Stage::Decay => EnvelopeState::Sustaining,
            Stage::Release => EnvelopeState::Idle,
        };
    }
}

/// As a modulation source the envelope reports its scaled output and
/// `set_value` moves the center.
impl ModulationSource for EnvelopeGenerator {
    fn current_value(&self) -> f32 {
        self.output()
    }

    fn set_value(&mut self, value: f32) {
        self.center = value;
    }

    fn advance(&mut self) {
        EnvelopeGenerator::advance(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48_000.0;
    const EPS: f32 = 1e-4;

    fn samples(ms: f32) -> usize {
        (ms * SR / 1000.0).round() as usize
    }

    #[test]
    fn test_attack_then_release() {
        let mut env = EnvelopeGenerator::new(5.0, 0.0, 1.0, 20.0, SR).unwrap();
        assert_eq!(env.state(), EnvelopeState::Idle);

        env.note_on();
        assert_eq!(env.state(), EnvelopeState::Attacking);

        env.process(samples(5.0));
        assert!((env.current_value() - 1.0).abs() < EPS);
        assert_eq!(env.state(), EnvelopeState::Sustaining);

        // Hold for a while before letting go.
        env.process(1000);
        assert!((env.current_value() - 1.0).abs() < EPS);

        env.note_off();
        assert_eq!(env.state(), EnvelopeState::Releasing);

        let mut previous = env.current_value();
        for _ in 0..samples(20.0) {
            let value = env.advance();
            assert!(value < previous, "release must fall every frame");
            previous = value;
        }
        assert!(env.current_value().abs() < EPS);
        assert_eq!(env.state(), EnvelopeState::Idle);
    }

    #[test]
    fn test_attack_ramp_is_linear() {
        let mut env = EnvelopeGenerator::new(10.0, 0.0, 1.0, 10.0, 1000.0).unwrap();
        env.note_on();
        for k in 1..=10 {
            let value = env.advance();
            assert!((value - k as f32 / 10.0).abs() < EPS);
        }
    }

    #[test]
    fn test_decay_holds_at_sustain() {
        let mut env = EnvelopeGenerator::new(5.0, 50.0, 0.5, 20.0, SR).unwrap();
        env.note_on();

        env.process(samples(5.0));
        assert!((env.current_value() - 1.0).abs() < EPS);
        assert_eq!(env.state(), EnvelopeState::Decaying);

        env.process(samples(50.0));
        assert!((env.current_value() - 0.5).abs() < EPS);
        assert_eq!(env.state(), EnvelopeState::Sustaining);

        for _ in 0..10 {
            env.process(4800);
            assert!((env.current_value() - 0.5).abs() < EPS);
        }

        env.note_off();
        env.process(samples(20.0));
        assert!(env.current_value().abs() < EPS);
        assert!(!env.is_active());
    }

    #[test]
    fn test_early_note_off_waits_for_queue() {
        let mut env = EnvelopeGenerator::new(10.0, 10.0, 0.5, 10.0, 1000.0).unwrap();
        env.note_on();
        env.process(5);
        assert!((env.current_value() - 0.5).abs() < EPS);

        // Release is appended after attack and decay.
        env.note_off();
        assert_eq!(env.state(), EnvelopeState::Attacking);

        env.process(5);
        assert!((env.current_value() - 1.0).abs() < EPS);
        assert_eq!(env.state(), EnvelopeState::Decaying);

        env.process(10);
        assert!((env.current_value() - 0.5).abs() < EPS);
        assert_eq!(env.state(), EnvelopeState::Releasing);

        env.process(10);
        assert!(env.current_value().abs() < EPS);
        assert_eq!(env.state(), EnvelopeState::Idle);
    }

    #[test]
    fn test_retrigger_starts_from_current_value() {
        let mut env = EnvelopeGenerator::new(10.0, 0.0, 1.0, 10.0, 1000.0).unwrap();
        env.note_on();
        env.process(10);
        env.note_off();
        env.process(5);
        assert!((env.current_value() - 0.5).abs() < EPS);

        // No jump back to zero: the new attack climbs from 0.5.
        env.note_on();
        let first = env.advance();
        assert!((first - 0.55).abs() < EPS);
        env.process(9);
        assert!((env.current_value() - 1.0).abs() < EPS);
    }

    #[test]
    fn test_zero_length_segments_apply_immediately() {
        let mut env = EnvelopeGenerator::new(0.0, 0.0, 0.3, 0.0, SR).unwrap();
        env.note_on();
        assert!((env.current_value() - 0.3).abs() < EPS);
        assert_eq!(env.state(), EnvelopeState::Sustaining);

        env.note_off();
        assert_eq!(env.current_value(), 0.0);
        assert_eq!(env.state(), EnvelopeState::Idle);
    }

    #[test]
    fn test_note_off_when_idle_is_ignored() {
        let mut env = EnvelopeGenerator::new(5.0, 0.0, 1.0, 20.0, SR).unwrap();
        env.note_off();
        assert_eq!(env.state(), EnvelopeState::Idle);
        env.process(100);
        assert_eq!(env.current_value(), 0.0);
    }

    #[test]
    fn test_repeated_note_off_does_not_stack() {
        let mut env = EnvelopeGenerator::new(0.0, 0.0, 1.0, 10.0, 1000.0).unwrap();
        env.note_on();
        env.note_off();
        env.note_off();
        env.process(10);
        assert_eq!(env.state(), EnvelopeState::Idle);
    }

    #[test]
    fn test_sustain_change_moves_held_value() {
        let mut env = EnvelopeGenerator::new(1.0, 1.0, 0.8, 1.0, 1000.0).unwrap();
        env.note_on();
        env.process(2);
        assert_eq!(env.state(), EnvelopeState::Sustaining);

        env.set_sustain_level(0.4).unwrap();
        assert_eq!(env.current_value(), 0.4);
        assert!(env.set_sustain_level(1.2).is_err());
        assert_eq!(env.params().sustain_level, 0.4);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(EnvelopeGenerator::new(-1.0, 0.0, 1.0, 20.0, SR).unwrap_err().is_invalid_argument());
        assert!(EnvelopeGenerator::new(5.0, 0.0, 1.0, -20.0, SR).is_err());
        assert!(EnvelopeGenerator::new(5.0, 0.0, 2.0, 20.0, SR).is_err());
        assert!(EnvelopeGenerator::new(5.0, 0.0, 1.0, 20.0, 0.0).is_err());

        let mut env = EnvelopeGenerator::new(5.0, 0.0, 1.0, 20.0, SR).unwrap();
        assert!(env.set_attack_ms(-3.0).is_err());
        assert_eq!(env.params().attack_ms, 5.0);
    }

    #[test]
    fn test_process_into_writes_each_frame() {
        let mut env = EnvelopeGenerator::new(4.0, 0.0, 1.0, 4.0, 1000.0).unwrap();
        env.note_on();
        let mut out = [0.0; 6];
        env.process_into(&mut out);
        assert_eq!(out, [0.25, 0.5, 0.75, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_modulation_output_scaling() {
        let mut env = EnvelopeGenerator::new(0.0, 0.0, 1.0, 0.0, SR)
            .unwrap()
            .with_depth(100.0)
            .with_center(440.0);
        assert_eq!(ModulationSource::current_value(&env), 440.0);

        env.note_on();
        assert_eq!(ModulationSource::current_value(&env), 540.0);

        env.set_value(220.0);
        assert_eq!(env.output(), 320.0);
    }

    #[test]
    fn test_reset() {
        let mut env = EnvelopeGenerator::from_params(EnvelopeParams::quick(), SR).unwrap();
        env.note_on();
        env.process(100);
        env.reset();
        assert_eq!(env.state(), EnvelopeState::Idle);
        assert_eq!(env.current_value(), 0.0);
        env.process(100);
        assert_eq!(env.current_value(), 0.0);
    }
}
