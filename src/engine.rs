//! The engine context: every object table plus the graph they drive.

use std::path::Path;
use std::sync::Arc;

#[cfg(feature = "cpal_sink")]
use parking_lot::Mutex;

use crate::arena::Arena;
use crate::bank::{BankId, BankState};
use crate::command::{Command, Hook};
use crate::config::{self, EngineConfig};
use crate::effect_bus::{BusId, BusState, EffectId, EffectState};
use crate::effects::EffectFactories;
use crate::error::{Error, Result};
use crate::graph::{AudioGraph, Renderer};
use crate::mixer::{MixerId, MixerState};
use crate::sound::{SoundId, SoundState};
use crate::source::{FileThread, StreamShared};
use crate::spatial::{Listener, Spatializer};

#[cfg(feature = "cpal_sink")]
use crate::device::{self, CpalDevice, OutputStream};

/// Who pulls audio out of the graph.
enum Output {
    /// The host calls [`Engine::render`].
    Manual(Renderer),
    #[cfg(feature = "cpal_sink")]
    Device(OutputStream),
    /// The renderer was handed out with [`Engine::take_renderer`].
    Detached,
}

/// The audio engine.
///
/// `Engine` owns the API half of the render graph and every object built on
/// it: [mixers](Self::new_mixer), [sounds](Self::new_bank_sound),
/// [effect buses](Self::new_effect_bus), [effects](Self::new_effect) and
/// [banks](Self::load_bank). Objects are addressed by small copyable ids;
/// an id to a destroyed object makes calls fail with [`Error::StaleHandle`]
/// instead of reaching whatever reuses its slot.
///
/// Nothing here ever touches the render thread directly. Every change is
/// queued as a command and picked up at the start of the next render pass,
/// so calls never block on audio and commands to one sound are applied in
/// the order they were made.
///
/// # Rendering
///
/// A new engine renders manually: call [`render`](Self::render) with an
/// interleaved stereo buffer whenever you need audio. With the `cpal_sink`
/// feature, [`start_output`](Self::start_output) moves rendering onto a
/// device callback instead.
///
/// ```no_run
/// use zirp::{BankSample, Engine, EngineConfig};
///
/// let mut engine = Engine::new(EngineConfig::default()).unwrap();
/// let tone: Vec<f32> = (0..48000).map(|i| (i as f32 * 0.05).sin()).collect();
/// let bank = engine.load_bank("sfx", vec![BankSample::from_f32("tone", 1, 48000, &tone)]);
/// let sound = engine.new_bank_sound(bank, 0).unwrap();
/// engine.play(sound).unwrap();
///
/// let mut out = vec![0.0f32; 2 * 480];
/// loop {
///     engine.update();
///     engine.render(&mut out);
///     if !engine.is_playing(sound) {
///         break;
///     }
/// }
/// ```
///
/// # Housekeeping
///
/// Call [`update`](Self::update) once per host frame. It frees whatever the
/// render thread has finished with, finishes loading streams, tracks which
/// sounds have stopped and drives 3D sounds.
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) graph: AudioGraph,
    output: Output,
    suspended: bool,
    file_thread: Option<FileThread>,
    pub(crate) mixers: Arena<MixerId, MixerState>,
    pub(crate) master: MixerId,
    pub(crate) sounds: Arena<SoundId, SoundState>,
    pub(crate) buses: Arena<BusId, BusState>,
    pub(crate) global_bus: BusId,
    pub(crate) effects: Arena<EffectId, EffectState>,
    pub(crate) factories: EffectFactories,
    pub(crate) banks: Arena<BankId, BankState>,
    pub(crate) spatializer: Option<Box<dyn Spatializer>>,
    pub(crate) listener: Listener,
}

impl Engine {
    /// Creates an engine that renders manually.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let (graph, renderer) = AudioGraph::new(&config)?;
        let roots = graph.roots();

        let mut mixers = Arena::new();
        let master = mixers.insert(MixerState::new("master".into(), None));
        let mut buses = Arena::new();
        let global_bus = buses.insert(BusState::new(roots.global_mix, roots.root, true));

        tracing::info!(
            "engine started: {} Hz, {} frames per buffer",
            config.sample_rate,
            config.buffer_frames()
        );

        Ok(Self {
            config,
            graph,
            output: Output::Manual(renderer),
            suspended: false,
            file_thread: None,
            mixers,
            master,
            sounds: Arena::new(),
            buses,
            global_bus,
            effects: Arena::new(),
            factories: EffectFactories::new(),
            banks: Arena::new(),
            spatializer: None,
            listener: Listener::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Per-frame housekeeping; call from the thread that owns the engine.
    pub fn update(&mut self) {
        self.graph.update();
        let sounds: Vec<SoundId> = self.sounds.keys().collect();
        for id in sounds {
            self.update_sound(id);
        }
    }

    /// Renders `out.len() / 2` frames of interleaved stereo.
    ///
    /// Only works while the engine renders manually; otherwise, and while
    /// [suspended](Self::suspend), `out` is filled with silence.
    pub fn render(&mut self, out: &mut [f32]) {
        match &mut self.output {
            Output::Manual(renderer) if !self.suspended => renderer.render(out),
            Output::Manual(_) => out.fill(0.0),
            _ => {
                tracing::error!("render() called while the renderer is driven elsewhere");
                out.fill(0.0);
            }
        }
    }

    /// Hands the render half to the caller, for hosts that run their own
    /// audio callback.
    ///
    /// Returns `None` if it was already taken or a device is driving it.
    pub fn take_renderer(&mut self) -> Option<Renderer> {
        match std::mem::replace(&mut self.output, Output::Detached) {
            Output::Manual(renderer) => Some(renderer),
            other => {
                self.output = other;
                None
            }
        }
    }

    /// Starts pulling audio from `device` on its callback thread.
    #[cfg(feature = "cpal_sink")]
    pub fn start_output(&mut self, device: &CpalDevice) -> Result<()> {
        let renderer = match std::mem::replace(&mut self.output, Output::Detached) {
            Output::Manual(renderer) => renderer,
            other => {
                self.output = other;
                tracing::error!("output already started or renderer taken");
                return Err(Error::Device("renderer is not available".into()));
            }
        };
        let renderer = Arc::new(Mutex::new(renderer));
        match OutputStream::start(device, self.config.sample_rate, renderer.clone()) {
            Ok(stream) => {
                if self.suspended {
                    stream.pause();
                }
                self.output = Output::Device(stream);
                Ok(())
            }
            Err(e) => {
                if let Some(renderer) = device::reclaim(renderer) {
                    self.output = Output::Manual(renderer);
                }
                Err(e)
            }
        }
    }

    /// Stops pulling audio; commands queue up until [`resume`](Self::resume).
    pub fn suspend(&mut self) {
        if self.suspended {
            return;
        }
        self.suspended = true;
        #[cfg(feature = "cpal_sink")]
        if let Output::Device(stream) = &self.output {
            stream.pause();
        }
        tracing::debug!("output suspended");
    }

    pub fn resume(&mut self) {
        if !self.suspended {
            return;
        }
        self.suspended = false;
        #[cfg(feature = "cpal_sink")]
        if let Output::Device(stream) = &self.output {
            stream.play();
        }
        tracing::debug!("output resumed");
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Closes any device stream and returns to manual rendering.
    pub fn shutdown(&mut self) {
        #[cfg(feature = "cpal_sink")]
        if matches!(self.output, Output::Device(_)) {
            if let Output::Device(stream) = std::mem::replace(&mut self.output, Output::Detached) {
                match stream.stop() {
                    Some(renderer) => self.output = Output::Manual(renderer),
                    None => tracing::error!("renderer lost while closing the output stream"),
                }
            }
        }
        if let Err(e) = self.stop_capture() {
            tracing::error!("closing capture: {e}");
        }
        self.graph.update();
        tracing::info!("engine output shut down");
    }

    /// Render time as a fraction of real time, averaged over recent passes.
    pub fn render_load(&self) -> f32 {
        self.graph.render_load()
    }

    /// Whether any output sample has been clipped since the last reset.
    pub fn clip_flag(&self) -> bool {
        self.graph.clip_flag()
    }

    pub fn reset_clip_flag(&self) {
        self.graph.reset_clip_flag();
    }

    /// Changes how long volume changes take to ramp in.
    pub fn set_volume_ramp_ms(&mut self, ms: f32) {
        self.config.volume_ramp_ms = ms;
        let rate = config::volume_rate(ms, self.config.sample_rate);
        self.graph.send(Command::SetVolumeRate(rate));
    }

    pub fn volume_ramp_ms(&self) -> f32 {
        self.config.volume_ramp_ms
    }

    /// Holds back command processing so several changes land in one pass.
    ///
    /// Must be paired with [`unlock_audio`](Self::unlock_audio); while held,
    /// the render thread keeps rendering with its previous state.
    pub fn lock_audio(&mut self) {
        self.graph.lock_audio();
    }

    pub fn unlock_audio(&mut self) {
        self.graph.unlock_audio();
    }

    /// Runs `f` with the audio lock held.
    pub fn with_audio_lock<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let was_locked = self.graph.is_audio_locked();
        self.lock_audio();
        let out = f(self);
        if !was_locked {
            self.unlock_audio();
        }
        out
    }

    /// Tees the final mix to a `.wav` or `.raw` file.
    pub fn start_capture(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.graph.start_capture(path.as_ref())
    }

    pub fn stop_capture(&mut self) -> Result<()> {
        self.graph.stop_capture()
    }

    pub fn is_capturing(&self) -> bool {
        self.graph.is_capturing()
    }

    /// Runs `hook` on the render thread before each pass; `None` clears it.
    pub fn set_pre_render(&mut self, hook: Option<Hook>) {
        self.graph.send(Command::SetPreRender(hook));
    }

    /// Runs `hook` on the render thread after each pass; `None` clears it.
    pub fn set_post_render(&mut self, hook: Option<Hook>) {
        self.graph.send(Command::SetPostRender(hook));
    }

    /// Commands dropped so far because the queue was full.
    pub fn dropped_commands(&self) -> u64 {
        self.graph.dropped_commands()
    }

    /// Installs the function that positions 3D sounds.
    pub fn set_spatializer(&mut self, spatializer: impl Spatializer + 'static) {
        self.spatializer = Some(Box::new(spatializer));
    }

    pub fn clear_spatializer(&mut self) {
        self.spatializer = None;
    }

    /// Moves the listener. An up vector too short to normalize is ignored.
    pub fn set_listener(&mut self, position: [f32; 3], look_at: [f32; 3], up: [f32; 3]) {
        self.listener.position = position;
        self.listener.look_at = look_at;
        let len = up.iter().map(|c| c * c).sum::<f32>().sqrt();
        if len < 1.0e-15 {
            tracing::error!("Up vector is too small; ignoring");
        } else {
            self.listener.up = up.map(|c| c / len);
        }
    }

    pub fn set_listener_velocity(&mut self, velocity: [f32; 3]) {
        self.listener.velocity = velocity;
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    /// Registers a stream with the file thread, starting it if needed.
    pub(crate) fn register_stream(&mut self, stream: Arc<StreamShared>) -> Result<()> {
        let thread = match self.file_thread.take() {
            Some(thread) => thread,
            None => FileThread::spawn(self.config.stream_file_update_ms)?,
        };
        thread.register(stream);
        self.file_thread = Some(thread);
        Ok(())
    }

    pub(crate) fn unregister_stream(&mut self, stream: &Arc<StreamShared>) {
        if let Some(thread) = &self.file_thread {
            thread.unregister(stream);
        }
    }

    /// Logs and returns a usage error.
    pub(crate) fn usage<T>(err: Error) -> Result<T> {
        tracing::error!("{err}");
        Err(err)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.graph.stop_capture() {
            tracing::error!("closing capture: {e}");
        }
    }
}
