use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dasp_signal::{self as signal, Signal};
use zirp::dsp::{pan_stereo, VolumeMatrix};
use zirp::{BankSample, EffectType, Engine, EngineConfig, ProcessContext};

fn sine(frames: usize) -> Vec<f32> {
    signal::rate(48000.0)
        .const_hz(440.0)
        .sine()
        .take(frames)
        .map(|s| s as f32 * 0.25)
        .collect()
}

fn render(c: &mut Criterion) {
    let mut group = c.benchmark_group("Engine::render");
    for voices in [1usize, 16, 64] {
        let mut engine = Engine::new(EngineConfig::default().with_max_nodes(256)).unwrap();
        let bank = engine.load_bank("bench", vec![BankSample::from_f32("sine", 1, 48000, &sine(48000))]);
        for i in 0..voices {
            let sound = engine.new_bank_sound(bank, 0).unwrap();
            engine.set_loop_count(sound, -1).unwrap();
            engine.set_pan(sound, (i as f32 / voices as f32) * 2.0 - 1.0).unwrap();
            engine.set_speed(sound, 1.0 + i as f32 * 0.01).unwrap();
            engine.play(sound).unwrap();
        }
        let mut out = vec![0.0f32; 480];
        group.bench_with_input(BenchmarkId::from_parameter(voices), &voices, |b, _| {
            b.iter(|| {
                engine.render(black_box(&mut out));
                engine.update();
            })
        });
    }
    group.finish();
}

fn effects(c: &mut Criterion) {
    let ctx = ProcessContext {
        sample_rate: 48000,
        buffer_size: 240,
    };
    let input: Vec<f32> = sine(480);
    for kind in [
        EffectType::BiquadFilter,
        EffectType::BitCrusher,
        EffectType::RingMod,
        EffectType::Distortion,
    ] {
        let mut fx = kind.new_processor();
        let mut buf = input.clone();
        c.bench_function(&format!("{kind:?}.process()"), |b| {
            b.iter(|| {
                buf.copy_from_slice(&input);
                fx.process(&ctx, black_box(&mut buf), 240);
            })
        });
    }
}

fn pan(c: &mut Criterion) {
    let mut buf = sine(480);
    let target = VolumeMatrix::stereo_pan(0.3);
    c.bench_function("pan_stereo ramp", |b| {
        b.iter(|| {
            let mut volume = VolumeMatrix::IDENTITY;
            pan_stereo(black_box(&mut buf), &target, &mut volume, 0.001);
        })
    });
}

criterion_group!(benches, render, effects, pan);
criterion_main!(benches);
