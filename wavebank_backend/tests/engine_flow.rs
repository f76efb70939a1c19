use std::thread;

use wavebank_backend::{
    AudioCallback, CallbackSlot, EngineConfig, EnvelopeParams, PhasePolicy, RenderOutcome,
    SynthEngine, WaveformKind,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config() -> EngineConfig {
    EngineConfig {
        sample_rate: 48_000.0,
        table_size: 2048,
        voices: 4,
        max_voices: 16,
        waveform: WaveformKind::Triangle,
        phase_policy: PhasePolicy::Fixed(0.0),
        envelope: EnvelopeParams::new(5.0, 0.0, 1.0, 20.0),
        max_block_size: 256,
        command_capacity: 64,
    }
}

#[test]
fn note_lifecycle_through_the_handle() {
    init_logging();
    let (mut engine, handle) = SynthEngine::new(&config()).unwrap();
    handle.set_frequencies(&[110.0, 220.0, 330.0, 440.0]).unwrap();
    handle.note_on().unwrap();

    let mut left = vec![0.0; 240];
    let mut right = vec![0.0; 240];
    engine.render(&mut left, &mut right);
    assert!((engine.envelope().current_value() - 1.0).abs() < 1e-4);
    assert!(left.iter().chain(right.iter()).all(|s| *s <= 1.0));

    // Sustain a few blocks, then release over 20 ms (960 frames).
    for _ in 0..4 {
        engine.render(&mut left, &mut right);
    }
    handle.note_off().unwrap();

    let mut levels = Vec::new();
    for _ in 0..4 {
        engine.render(&mut left, &mut right);
        levels.push(handle.status().envelope_level());
    }
    assert!(levels.windows(2).all(|w| w[1] < w[0]));
    assert!(levels[3].abs() < 1e-4);
    assert!(!engine.envelope().is_active());
}

#[test]
fn control_thread_reshapes_bank_between_blocks() {
    init_logging();
    let (mut engine, handle) = SynthEngine::new(&config()).unwrap();
    let control = handle.clone();

    let sender = thread::spawn(move || {
        control.set_phase_policy(PhasePolicy::Fixed(0.5)).unwrap();
        control.set_voice_count(8).unwrap();
        control.set_waveform(WaveformKind::Sine).unwrap();
        control.set_frequencies(&[100.0; 8]).unwrap();
        control.note_on().unwrap();
    });
    sender.join().unwrap();

    let mut left = vec![0.0; 128];
    let mut right = vec![0.0; 128];
    engine.render(&mut left, &mut right);

    let bank = engine.bank();
    assert_eq!(bank.voice_count(), 8);
    assert_eq!(bank.gain(), 0.125);
    assert_eq!(bank.frequencies(), vec![100.0; 8]);
    assert_eq!(handle.status().voice_count(), 8);
    assert_eq!(handle.status().frames_rendered(), 128);
    assert!(left.iter().all(|s| *s <= 1.0));
}

#[test]
fn engine_plays_through_callback_slot() {
    init_logging();
    let (engine, handle) = SynthEngine::new(&config()).unwrap();
    let slot = CallbackSlot::new(Box::new(engine), 48_000.0, 2).unwrap();

    handle.set_frequencies(&[440.0]).unwrap();
    handle.note_on().unwrap();

    let mut output = vec![0.0; 512 * 2];
    assert_eq!(slot.process_realtime(&mut output), RenderOutcome::Rendered);
    assert!(output.iter().any(|s| *s != 0.0));
    assert!(output.iter().all(|s| *s <= 1.0));
    for frame in output.chunks(2) {
        assert_eq!(frame[0], frame[1]);
    }
    assert_eq!(slot.frame_count(), 512);
    assert_eq!(handle.status().frames_rendered(), 512);
}

#[test]
fn engine_config_loads_from_json() {
    init_logging();
    let config = EngineConfig::from_json_str(
        r#"{ "sample_rate": 44100.0, "voices": 3, "waveform": "square", "phase_policy": "random" }"#,
    )
    .unwrap();
    let (mut engine, _handle) = SynthEngine::new(&config).unwrap();
    assert_eq!(engine.bank().voice_count(), 3);
    assert!(engine.bank().phases().iter().all(|p| (0.0..1.0).contains(p)));

    let mut output = vec![0.0; 64];
    engine.process(&mut output, 44100.0, 1, 64);
    assert!(output.iter().all(|s| *s == 0.0));
}
