//! A real-time audio mixing engine.
//!
//! `zirp` plays memory-resident samples and disk streams through a tree of
//! mixers and a graph of effect buses, rendering on whatever thread pulls
//! audio out of it. Everything is driven from one [`Engine`]; the render
//! half ([`Renderer`]) only ever sees commands the engine queued for it, so
//! nothing on the audio path waits on the API thread.
//!
//! ```
//! use zirp::{BankSample, EffectType, Engine, EngineConfig};
//!
//! let mut engine = Engine::new(EngineConfig::default().with_sample_rate(8000)).unwrap();
//! let noise: Vec<f32> = (0..800).map(|i| ((i * 7919) % 200) as f32 / 100.0 - 1.0).collect();
//! let bank = engine.load_bank("sfx", vec![BankSample::from_f32("noise", 1, 8000, &noise)]);
//!
//! let bus = engine.new_effect_bus().unwrap();
//! let crusher = engine.new_effect(EffectType::BitCrusher).unwrap();
//! engine.set_effect_param(crusher, 0, 4.0).unwrap();
//! engine.add_effect(bus, crusher).unwrap();
//!
//! let sound = engine.new_bank_sound(bank, 0).unwrap();
//! engine.set_effect_bus(sound, Some(bus)).unwrap();
//! engine.play(sound).unwrap();
//!
//! let mut out = vec![0.0f32; 2 * 80];
//! engine.render(&mut out);
//! engine.update();
//! assert!(engine.is_playing(sound));
//! ```
//!
//! # Features
//!
//! - `cpal_sink`: output through a [`CpalDevice`].
//! - `vorbis_src`: Ogg Vorbis streams via [`VorbisStream`].

pub mod buffer;
pub mod decoder;
pub mod dsp;
pub mod effects;
pub mod node;
pub mod nodes;
pub mod source;
pub mod stream;

mod arena;
mod bank;
mod capture;
mod command;
mod config;
#[cfg(feature = "cpal_sink")]
mod device;
mod effect_bus;
mod engine;
mod error;
mod graph;
mod logging;
mod mixer;
mod sound;
mod spatial;

pub use bank::{BankId, BankSample};
pub use capture::CaptureWriter;
pub use command::Hook;
pub use config::EngineConfig;
pub use decoder::{AudioFormat, SampleInfo};
#[cfg(feature = "cpal_sink")]
pub use device::CpalDevice;
pub use dsp::VolumeMatrix;
pub use effect_bus::{BusId, EffectId};
pub use effects::{EffectProcessor, EffectType};
pub use engine::Engine;
pub use error::{Error, Result};
pub use graph::Renderer;
pub use logging::init_logging;
pub use mixer::MixerId;
pub use node::ProcessContext;
pub use sound::SoundId;
pub use spatial::{Listener, SpatialParams, Spatializer};
pub use stream::{AudioStream, MemoryStream, WavStream};

#[cfg(feature = "vorbis_src")]
pub use stream::VorbisStream;
