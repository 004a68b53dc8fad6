use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use itertools::Itertools;
use tracing::Level;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;
use zirp::{
    BankSample, EffectProcessor, Engine, EngineConfig, Error, Listener, ProcessContext, SoundId,
    SpatialParams,
};

const RATE: u32 = 1000;
const FRAMES: usize = 10;

fn engine() -> Engine {
    Engine::new(
        EngineConfig::default()
            .with_sample_rate(RATE)
            .with_audio_update_ms(10.0)
            .with_volume_ramp_ms(0.0)
            .with_max_nodes(64),
    )
    .unwrap()
}

fn dc(frames: usize) -> BankSample {
    BankSample::from_f32("dc", 1, RATE, &vec![1.0; frames])
}

fn sound(e: &mut Engine, frames: usize) -> SoundId {
    let bank = e.load_bank("test", vec![dc(frames)]);
    e.new_bank_sound(bank, 0).unwrap()
}

/// Renders one pass and runs housekeeping, like a host frame.
fn step(e: &mut Engine) -> Vec<f32> {
    let mut out = vec![0.0; FRAMES * 2];
    e.render(&mut out);
    e.update();
    out
}

fn is_silent(out: &[f32]) -> bool {
    out.iter().all(|&s| s == 0.0)
}

#[test]
fn playing_until_the_render_side_reports_done() {
    let mut e = engine();
    let s = sound(&mut e, 25);
    e.play(s).unwrap();
    assert!(e.is_playing(s));
    step(&mut e);
    step(&mut e);
    assert!(e.is_playing(s));
    step(&mut e);
    assert!(!e.is_playing(s));

    // a new play id, so the old done report doesn't count
    e.play(s).unwrap();
    assert!(e.is_playing(s));
    assert!(!is_silent(&step(&mut e)));
}

#[test]
fn last_volume_wins() {
    let mut e = engine();
    let s = sound(&mut e, 1000);
    e.play(s).unwrap();
    e.set_volume(s, 0.3).unwrap();
    e.set_volume(s, 0.7).unwrap();
    step(&mut e);
    let out = step(&mut e);
    let expected = 0.7 * std::f32::consts::FRAC_1_SQRT_2;
    assert!((out[FRAMES * 2 - 2] - expected).abs() < 1.0e-3, "{out:?}");
    assert!((out[FRAMES * 2 - 1] - expected).abs() < 1.0e-3);
}

#[test]
fn loop_count_plays_the_window_that_many_extra_times() {
    let mut e = engine();
    let s = sound(&mut e, 100);
    e.set_loop(s, 0, Some(100)).unwrap();
    e.set_loop_count(s, 2).unwrap();
    e.play(s).unwrap();

    let mut loops = Vec::new();
    let mut passes = 0;
    while e.is_playing(s) && passes < 100 {
        step(&mut e);
        passes += 1;
        if e.is_playing(s) {
            loops.push(e.current_loop(s).unwrap());
        }
    }
    assert_eq!(passes, 30);
    assert_eq!(loops.into_iter().dedup().collect::<Vec<_>>(), vec![0, 1, 2]);
}

#[test]
fn infinite_loops_keep_playing() {
    let mut e = engine();
    let s = sound(&mut e, 30);
    e.set_loop_count(s, -1).unwrap();
    e.play(s).unwrap();
    for _ in 0..50 {
        assert!(!is_silent(&step(&mut e)));
    }
    assert!(e.is_playing(s));
    assert_eq!(e.ms_left(s).unwrap(), None);

    e.release_loop(s).unwrap();
    for _ in 0..5 {
        step(&mut e);
    }
    assert!(!e.is_playing(s));
}

#[test]
fn bus_cycles_are_only_caught_one_hop_deep() {
    let mut e = engine();
    let a = e.new_effect_bus().unwrap();
    let b = e.new_effect_bus().unwrap();
    assert!(e.set_output_bus(a, Some(a)).is_err());
    assert_eq!(e.output_bus(a).unwrap(), None);

    e.set_output_bus(a, Some(b)).unwrap();
    e.set_output_bus(b, Some(a)).unwrap();

    let s = sound(&mut e, 100);
    e.set_effect_bus(s, Some(a)).unwrap();
    e.play(s).unwrap();
    for _ in 0..3 {
        assert!(step(&mut e).iter().all(|x| x.is_finite()));
    }
}

/// Counts events logged at one level.
struct CountEvents(Level, Arc<AtomicUsize>);

impl<S: tracing::Subscriber> Layer<S> for CountEvents {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == self.0 {
            self.1.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[test]
fn full_queue_drops_and_warns_once_per_command() {
    let mut e = Engine::new(
        EngineConfig::default()
            .with_sample_rate(RATE)
            .with_audio_update_ms(10.0)
            .with_max_audio_tasks(16),
    )
    .unwrap();
    let s = sound(&mut e, 1000);
    e.play(s).unwrap();

    let warnings = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(CountEvents(Level::WARN, warnings.clone()));
    tracing::subscriber::with_default(subscriber, || {
        for i in 0..40 {
            e.set_volume(s, i as f32 / 40.0).unwrap();
        }
    });

    let dropped = e.dropped_commands();
    assert!(dropped > 0);
    assert_eq!(warnings.load(Ordering::Relaxed) as u64, dropped);

    step(&mut e);
    e.set_volume(s, 1.0).unwrap();
    assert_eq!(e.dropped_commands(), dropped);
    assert!(!is_silent(&step(&mut e)));
}

#[test]
fn destroying_with_a_full_queue_changes_nothing() {
    let mut e = Engine::new(
        EngineConfig::default()
            .with_sample_rate(RATE)
            .with_audio_update_ms(10.0)
            .with_volume_ramp_ms(0.0)
            .with_max_audio_tasks(16),
    )
    .unwrap();
    let s = sound(&mut e, 1000);
    let t = sound(&mut e, 1000);
    e.play(s).unwrap();
    step(&mut e);

    for i in 0..20 {
        e.set_volume(s, i as f32 / 20.0).unwrap();
    }
    assert!(matches!(e.destroy_sound(s), Err(Error::QueueFull)));
    assert!(e.is_playing(s));
    assert!(e.volume(s).is_ok());
    assert!(matches!(e.stop(s), Err(Error::QueueFull)));
    assert!(e.is_playing(s));
    assert!(matches!(e.play(t), Err(Error::QueueFull)));
    assert!(!e.is_playing(t));

    assert!(!is_silent(&step(&mut e)));
    e.destroy_sound(s).unwrap();
    step(&mut e);
    assert!(is_silent(&step(&mut e)));
    assert!(e.volume(s).is_err());
}

#[test]
fn expired_virtual_sound_stops_once_the_queue_drains() {
    let mut e = Engine::new(
        EngineConfig::default()
            .with_sample_rate(RATE)
            .with_audio_update_ms(10.0)
            .with_max_audio_tasks(16),
    )
    .unwrap();
    e.set_spatializer(|_: &Listener, _: [f32; 3], _: [f32; 3]| SpatialParams {
        volume: 0.0,
        ..SpatialParams::default()
    });
    let s = sound(&mut e, 5);
    e.set_3d_enabled(s, true).unwrap();
    e.play(s).unwrap();
    assert!(e.is_virtual(s));
    e.render(&mut [0.0; FRAMES * 2]);

    for i in 0..20 {
        e.set_volume(s, i as f32 / 20.0).unwrap();
    }
    std::thread::sleep(Duration::from_millis(20));

    let errors = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(CountEvents(Level::ERROR, errors.clone()));
    tracing::subscriber::with_default(subscriber, || e.update());
    // the refused stop and the timeout that gave up on it
    assert!(errors.load(Ordering::Relaxed) >= 2);
    assert!(e.is_playing(s));

    step(&mut e);
    assert!(!e.is_playing(s));
}

#[test]
fn shutdown_keeps_manual_rendering() {
    let mut e = engine();
    let s = sound(&mut e, 1000);
    e.shutdown();
    e.play(s).unwrap();
    assert!(!is_silent(&step(&mut e)));
    assert!(e.take_renderer().is_some());
}

#[test]
fn audio_lock_holds_changes_back() {
    let mut e = engine();
    let s = sound(&mut e, 1000);
    e.lock_audio();
    e.play(s).unwrap();
    assert!(is_silent(&step(&mut e)));
    e.unlock_audio();
    assert!(!is_silent(&step(&mut e)));
}

#[test]
fn paused_mixer_silences_its_sounds() {
    let mut e = engine();
    let m = e.new_mixer("sfx", None).unwrap();
    let s = sound(&mut e, 1000);
    e.set_mixer(s, Some(m)).unwrap();
    e.play(s).unwrap();
    assert!(!is_silent(&step(&mut e)));

    e.set_mixer_paused(m, true).unwrap();
    assert!(e.is_mixed_paused(s).unwrap());
    assert!(is_silent(&step(&mut e)));
    assert!(e.is_playing(s));

    e.set_mixer_paused(m, false).unwrap();
    assert!(!is_silent(&step(&mut e)));
}

#[test]
fn next_sound_takes_over() {
    let mut e = engine();
    let a = sound(&mut e, 15);
    let b = sound(&mut e, 100);
    e.set_next_sound(a, Some(b)).unwrap();
    e.play(a).unwrap();
    for _ in 0..3 {
        step(&mut e);
    }
    assert!(!e.is_playing(a));
    assert!(e.is_playing(b));
    assert!(!is_silent(&step(&mut e)));
}

struct Mute;

impl EffectProcessor for Mute {
    fn set_param(&mut self, _id: i32, _value: f32) {}

    fn reset(&mut self) {}

    fn process(&mut self, _ctx: &ProcessContext, buf: &mut [f32], frames: usize) {
        buf[..frames * 2].fill(0.0);
    }
}

#[test]
fn sounds_on_a_bus_go_through_its_effects() {
    let mut e = engine();
    e.register_custom_effect(1, || Some(Box::new(Mute) as Box<dyn EffectProcessor>));
    let bus = e.new_effect_bus().unwrap();
    let mute = e.new_custom_effect(1).unwrap();
    e.add_effect(bus, mute).unwrap();

    let s = sound(&mut e, 1000);
    e.set_effect_bus(s, Some(bus)).unwrap();
    e.play(s).unwrap();
    assert!(is_silent(&step(&mut e)));

    e.set_bus_bypassed(bus, true).unwrap();
    assert!(!is_silent(&step(&mut e)));

    e.set_bus_bypassed(bus, false).unwrap();
    e.destroy_effect_bus(bus).unwrap();
    assert_eq!(e.sound_effect_bus(s).unwrap(), None);
    assert!(!is_silent(&step(&mut e)));
}

#[test]
fn capture_writes_what_was_rendered() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("takes").join("out.wav");
    let mut e = engine();
    let s = sound(&mut e, 1000);
    e.play(s).unwrap();

    e.start_capture(&path).unwrap();
    assert!(e.is_capturing());
    for _ in 0..5 {
        step(&mut e);
    }
    e.stop_capture().unwrap();
    assert!(!e.is_capturing());

    let reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.spec().channels, 2);
    assert_eq!(reader.spec().sample_rate, RATE);
    assert_eq!(reader.len() as usize, 5 * FRAMES * 2);

    assert!(e.start_capture(dir.path().join("out.mp3")).is_err());
}

#[test]
fn wav_stream_plays_once_buffered() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for _ in 0..2000 {
        writer.write_sample(12000i16).unwrap();
    }
    writer.finalize().unwrap();

    let mut e = Engine::new(
        EngineConfig::default()
            .with_sample_rate(RATE)
            .with_audio_update_ms(10.0)
            .with_stream_buffer_ms(200.0)
            .with_stream_file_update_ms(2.0),
    )
    .unwrap();
    let s = e.new_stream_sound_path(&path).unwrap();
    e.play(s).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !e.is_playing(s) && Instant::now() < deadline {
        e.update();
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(e.is_playing(s));
    assert_eq!(e.length(s).unwrap(), Some(2000));
    assert!(!is_silent(&step(&mut e)));

    assert!(e.new_stream_sound_path(dir.path().join("missing.wav")).is_err());
}

#[test]
fn stale_handles_fail_cleanly() {
    let mut e = engine();
    let s = sound(&mut e, 10);
    e.destroy_sound(s).unwrap();
    assert!(matches!(e.play(s), Err(Error::StaleHandle)));
    assert!(!e.is_playing(s));

    // the slot is reused, but the old id still misses
    let t = sound(&mut e, 10);
    assert_ne!(s, t);
    assert!(e.volume(s).is_err());
    assert!(e.volume(t).is_ok());
}
