//! CPAL device discovery and the output stream that drives a [`Renderer`].
//!
//! # Example: List and Select a Device
//!
//! ```no_run
//! use zirp::{CpalDevice, Engine, EngineConfig};
//!
//! let devices = CpalDevice::list_outputs();
//! for (i, device) in devices.iter().enumerate() {
//!     println!("[{}] {} ({} Hz, {} ch)",
//!         i, device.name(), device.sample_rate(), device.channels());
//! }
//!
//! let device = &devices[0];
//! let config = EngineConfig::default().with_sample_rate(device.sample_rate());
//! let mut engine = Engine::new(config).unwrap();
//! engine.start_output(device).unwrap();
//! ```

use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::graph::Renderer;

/// A discovered audio output device.
///
/// Use [`CpalDevice::default_output`] to get the system default, or
/// [`CpalDevice::list_outputs`] to enumerate all available devices, then
/// hand it to [`Engine::start_output`](crate::Engine::start_output).
pub struct CpalDevice {
    device: cpal::Device,
    format: SampleFormat,
    name: String,
    sample_rate: u32,
    channels: u16,
}

impl CpalDevice {
    /// Get the system's default output device.
    ///
    /// Returns `None` if no audio device is available.
    pub fn default_output() -> Option<Self> {
        let host = cpal::default_host();
        Self::from_device(host.default_output_device()?)
    }

    /// List all available output devices.
    pub fn list_outputs() -> Vec<Self> {
        let host = cpal::default_host();
        host.output_devices()
            .map(|devices| devices.filter_map(Self::from_device).collect())
            .unwrap_or_default()
    }

    fn from_device(device: cpal::Device) -> Option<Self> {
        let config = device.default_output_config().ok()?;
        let name = device.name().unwrap_or_else(|_| "Unknown".into());
        Some(Self {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
            format: config.sample_format(),
            name,
            device,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

/// Frames rendered per step inside one device callback.
const SCRATCH_FRAMES: usize = 2048;

enum StreamControl {
    Play,
    Pause,
    Stop,
}

/// A running device stream.
///
/// The cpal stream lives on its own thread, which owns nothing but the
/// stream and waits for control messages. The callback only ever
/// `try_lock`s the renderer; the lock is contended solely while the stream
/// is being torn down.
pub(crate) struct OutputStream {
    renderer: Arc<Mutex<Renderer>>,
    control: mpsc::Sender<StreamControl>,
    thread: Option<JoinHandle<()>>,
}

impl OutputStream {
    /// Opens `device` at `sample_rate` and starts pulling from `renderer`.
    ///
    /// On error the stream thread has already exited, so `renderer` is again
    /// uniquely owned by the caller.
    pub fn start(device: &CpalDevice, sample_rate: u32, renderer: Arc<Mutex<Renderer>>) -> Result<Self> {
        if sample_rate != device.sample_rate {
            tracing::warn!(
                "device {} defaults to {} Hz; opening at {} Hz",
                device.name,
                device.sample_rate,
                sample_rate
            );
        }
        let config = cpal::StreamConfig {
            channels: device.channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let format = device.format;
        let cpal_device = device.device.clone();
        let shared = renderer.clone();
        let (control, control_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<std::result::Result<(), String>>(1);

        let thread = thread::Builder::new()
            .name("zirp-output".into())
            .spawn(move || {
                let stream = match build_stream(&cpal_device, format, &config, shared) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while let Ok(ctrl) = control_rx.recv() {
                    let result = match ctrl {
                        StreamControl::Play => stream.play().map_err(|e| e.to_string()),
                        StreamControl::Pause => stream.pause().map_err(|e| e.to_string()),
                        StreamControl::Stop => break,
                    };
                    if let Err(e) = result {
                        tracing::error!("output stream control failed: {e}");
                    }
                }
                tracing::debug!("output stream closed");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::info!("output started on {} ({} ch)", device.name, device.channels);
                Ok(Self {
                    renderer,
                    control,
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                tracing::error!("could not start output on {}: {e}", device.name);
                Err(Error::Device(e))
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::Device("output thread exited".into()))
            }
        }
    }

    pub fn pause(&self) {
        let _ = self.control.send(StreamControl::Pause);
    }

    pub fn play(&self) {
        let _ = self.control.send(StreamControl::Play);
    }

    /// Closes the stream and hands back the renderer.
    pub fn stop(mut self) -> Option<Renderer> {
        self.close();
        let renderer = self.renderer.clone();
        drop(self);
        reclaim(renderer)
    }

    fn close(&mut self) {
        let _ = self.control.send(StreamControl::Stop);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("output thread panicked");
            }
        }
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Takes the renderer back once no stream shares it.
pub(crate) fn reclaim(renderer: Arc<Mutex<Renderer>>) -> Option<Renderer> {
    Arc::try_unwrap(renderer).ok().map(Mutex::into_inner)
}

fn build_stream(
    device: &cpal::Device,
    format: SampleFormat,
    config: &cpal::StreamConfig,
    renderer: Arc<Mutex<Renderer>>,
) -> std::result::Result<cpal::Stream, String> {
    let channels = config.channels as usize;
    let stream = match format {
        SampleFormat::F32 => build::<f32>(device, config, renderer, channels, |s| s),
        SampleFormat::I16 => build::<i16>(device, config, renderer, channels, |s| {
            (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
        }),
        SampleFormat::U16 => build::<u16>(device, config, renderer, channels, |s| {
            ((s.clamp(-1.0, 1.0) + 1.0) * 0.5 * u16::MAX as f32) as u16
        }),
        other => return Err(format!("unsupported sample format: {other:?}")),
    };
    stream.map_err(|e| e.to_string())
}

fn build<T: SizedSample + Send + 'static>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    renderer: Arc<Mutex<Renderer>>,
    channels: usize,
    convert: fn(f32) -> T,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError> {
    let mut scratch = vec![0.0f32; SCRATCH_FRAMES * 2];
    let silence = convert(0.0);
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let Some(mut renderer) = renderer.try_lock() else {
                data.fill(silence);
                return;
            };
            for out in data.chunks_mut(SCRATCH_FRAMES * channels) {
                let frames = out.len() / channels;
                let stereo = &mut scratch[..frames * 2];
                renderer.render(stereo);
                for (frame, s) in out.chunks_exact_mut(channels).zip(stereo.chunks_exact(2)) {
                    if channels == 1 {
                        frame[0] = convert((s[0] + s[1]) * 0.5);
                    } else {
                        frame[0] = convert(s[0]);
                        frame[1] = convert(s[1]);
                        frame[2..].fill(silence);
                    }
                }
            }
        },
        |err| tracing::error!("CPAL stream error: {err}"),
        None,
    )
}
