//! Sounds: one playable instance of a bank sample or a stream.
//!
//! The API side keeps a mirror of everything the render node needs and only
//! sends what changed. Whether a sound is still playing is worked out from
//! the play ids the node publishes: each [`Engine::play`] bumps the sound's
//! play id, and the node reports the id of the last playback that ran out.

use std::path::Path;
use std::sync::Arc;

use crate::arena::arena_key;
use crate::bank::BankId;
use crate::decoder::{new_decoder, Decoder, SampleInfo};
use crate::dsp::VolumeMatrix;
use crate::effect_bus::BusId;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::mixer::MixerId;
use crate::node::{NodeId, RenderNode};
use crate::nodes::{SourceMessage, SourceNode, SourceStatus};
use crate::source::{SourceKind, StreamShared, StreamSource};
use crate::spatial::{SpatialParams, SpatialState, AUDIBLE_VOLUME, VIRTUAL_VOLUME};
use crate::stream::{AudioStream, WavStream};

arena_key!(
    /// Handle to a sound.
    SoundId
);

/// Where a sound's data comes from.
pub(crate) enum SoundSource {
    /// `bank` is cleared when the bank is unloaded.
    Bank { bank: Option<BankId>, info: SampleInfo },
    Stream {
        shared: Arc<StreamShared>,
        /// Seek requested before the stream was ready.
        next_frame: Option<u32>,
        next_ms: Option<f32>,
    },
}

pub(crate) struct SoundState {
    pub source: SoundSource,
    pub node: NodeId,
    pub status: Arc<SourceStatus>,
    /// Set once the format is known.
    pub info: Option<SampleInfo>,
    pub playing: bool,
    pub play_id: i32,
    pub play_when_ready: bool,
    pub loop_start: u32,
    pub loop_end: Option<u32>,
    pub loop_count: i32,
    pub volume: f32,
    pub volume_set: bool,
    pub pan: f32,
    pub pan_matrix: Option<VolumeMatrix>,
    pub pan_set: bool,
    pub paused: bool,
    pub speed: f32,
    pub mixer: MixerId,
    pub bus: Option<BusId>,
    /// The mix node the render node currently outputs to.
    pub out_mix: NodeId,
    pub next: Option<SoundId>,
    pub prev: Vec<SoundId>,
    pub spatial: SpatialState,
}

impl SoundState {
    fn is_inited(&self) -> bool {
        self.info.is_some()
    }

    fn is_stream(&self) -> bool {
        matches!(self.source, SoundSource::Stream { .. })
    }

    /// Whether volume changes need to reach the node right now.
    fn is_audible_target(&self) -> bool {
        self.playing || !self.prev.is_empty()
    }

    fn channels(&self) -> u8 {
        self.info.map_or(1, |i| i.channels)
    }

    fn is_playing(&self) -> bool {
        (self.playing && self.status.done_id() != self.play_id) || self.status.play_id() == -1
    }
}

impl Engine {
    fn sound(&self, id: SoundId) -> Result<&SoundState> {
        self.sounds.get(id).ok_or(Error::StaleHandle)
    }

    fn sound_mut(&mut self, id: SoundId) -> Result<&mut SoundState> {
        self.sounds.get_mut(id).ok_or(Error::StaleHandle)
    }

    /// Builds the render node and API state for a new sound under the master mixer.
    pub(crate) fn add_sound(
        &mut self,
        kind: SourceKind,
        decoder: Option<Box<dyn Decoder>>,
        source: SoundSource,
    ) -> Result<SoundId> {
        let node_id = self.graph.alloc_id()?;
        let out_mix = self.graph.roots().out_mix;
        let status = Arc::new(SourceStatus::default());
        let node = SourceNode::new(node_id, kind, decoder, out_mix, status.clone());
        if !self.graph.insert(node_id, RenderNode::Source(node)) {
            return Self::usage(Error::QueueFull);
        }

        let mixer = self.master;
        let id = self.sounds.insert(SoundState {
            source,
            node: node_id,
            status,
            info: None,
            playing: false,
            play_id: 0,
            play_when_ready: false,
            loop_start: 0,
            loop_end: None,
            loop_count: 0,
            volume: 1.0,
            volume_set: false,
            pan: 0.0,
            pan_matrix: None,
            pan_set: false,
            paused: false,
            speed: 1.0,
            mixer,
            bus: None,
            out_mix,
            next: None,
            prev: Vec::new(),
            spatial: SpatialState::default(),
        });
        if let Some(m) = self.mixers.get_mut(mixer) {
            m.sounds.push(id);
        }
        self.init_sound(id);
        Ok(id)
    }

    /// Creates a sound that plays `stream`, read ahead on the file thread.
    pub fn new_stream_sound(&mut self, stream: Box<dyn AudioStream>) -> Result<SoundId> {
        let shared = StreamShared::new(stream);
        let kind = SourceKind::Stream(StreamSource::new(shared.clone()));
        let source = SoundSource::Stream {
            shared: shared.clone(),
            next_frame: None,
            next_ms: None,
        };
        let id = self.add_sound(kind, None, source)?;
        if let Err(e) = self.register_stream(shared) {
            tracing::error!("could not start the file thread: {e}");
            self.destroy_sound(id)?;
            return Err(e);
        }
        Ok(id)
    }

    /// Streams a `.wav` file, or a `.ogg` file with the `vorbis_src` feature.
    pub fn new_stream_sound_path(&mut self, path: impl AsRef<Path>) -> Result<SoundId> {
        let path = path.as_ref();
        if let Err(e) = std::fs::metadata(path) {
            tracing::error!("Stream file {} could not be opened", path.display());
            return Err(e.into());
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let stream: Box<dyn AudioStream> = match ext.as_deref() {
            Some("wav") => Box::new(WavStream::open(path)),
            #[cfg(feature = "vorbis_src")]
            Some("ogg") => Box::new(crate::stream::VorbisStream::open(path)),
            _ => {
                return Self::usage(Error::UnsupportedFormat(path.display().to_string()));
            }
        };
        self.new_stream_sound(stream)
    }

    /// Destroys a sound, stopping it and unlinking it from everything.
    ///
    /// Fails with [`Error::QueueFull`], changing nothing, if the render side
    /// can't be told about it yet.
    pub fn destroy_sound(&mut self, id: SoundId) -> Result<()> {
        // unlink next and each prev, stop, free
        let needed = self.sound(id)?.prev.len() + 3;
        if !self.graph.has_room(needed) {
            return Self::usage(Error::QueueFull);
        }
        self.set_next_sound(id, None)?;
        let prev = self.sound(id)?.prev.clone();
        for p in prev {
            self.set_next_sound(p, None)?;
        }
        self.stop(id)?;

        let Some(s) = self.sounds.remove(id) else {
            return Err(Error::StaleHandle);
        };
        if let Some(m) = self.mixers.get_mut(s.mixer) {
            m.sounds.retain(|&x| x != id);
        }
        if let Some(b) = s.bus.and_then(|b| self.buses.get_mut(b)) {
            b.input_sounds.retain(|&x| x != id);
        }
        match &s.source {
            SoundSource::Bank { bank, .. } => {
                if let Some(b) = bank.and_then(|b| self.banks.get_mut(b)) {
                    b.sounds.retain(|&x| x != id);
                }
            }
            SoundSource::Stream { shared, .. } => self.unregister_stream(shared),
        }
        self.graph.free(s.node);
        Ok(())
    }

    /// Starts playback from the beginning.
    ///
    /// A sound that isn't ready yet, such as a stream still buffering, starts
    /// as soon as it is, from within [`update`](Self::update).
    pub fn play(&mut self, id: SoundId) -> Result<()> {
        let s = self.sound(id)?;
        if let SoundSource::Bank { bank: None, .. } = s.source {
            tracing::error!("Could not play sound; bank has been unloaded");
            return Err(Error::BankUnloaded);
        }
        if self.is_failed(id) {
            tracing::error!("tried to play sound that failed to load");
            return Err(Error::SoundFailed);
        }

        self.stop(id)?;
        if self.is_ready_to_play(id) {
            if self.sound(id)?.spatial.enabled {
                self.update_3d(id);
            }
            self.update_volume_and_pan(id);
            self.update_speed(id);
            self.play_now(id)?;
            if self.is_virtual(id) {
                self.start_virtual_timer(id);
            }
            self.sound_mut(id)?.play_when_ready = false;
        } else {
            tracing::info!("sound is not ready; will delay until it is");
            self.sound_mut(id)?.play_when_ready = true;
        }
        Ok(())
    }

    fn play_now(&mut self, id: SoundId) -> Result<()> {
        self.init_sound(id);
        if !self.graph.has_room(2) {
            return Self::usage(Error::QueueFull);
        }
        let s = self.sound_mut(id)?;
        s.play_id = if s.play_id >= i32::MAX - 1 { 1 } else { s.play_id + 1 };
        let (node, play_id, is_virtual) = (s.node, s.play_id, s.spatial.is_virtual);
        s.playing = true;
        self.graph.source(node, SourceMessage::SetPlaying(play_id));
        if !is_virtual {
            self.graph.source(node, SourceMessage::Connect);
        }
        Ok(())
    }

    /// Stops playback. Nothing changes if the stop can't be queued.
    pub fn stop(&mut self, id: SoundId) -> Result<()> {
        let s = self.sound(id)?;
        let (playing, node) = (s.is_playing(), s.node);
        if playing && !self.graph.source(node, SourceMessage::SetPlaying(0)) {
            return Self::usage(Error::QueueFull);
        }
        let s = self.sound_mut(id)?;
        s.play_when_ready = false;
        s.playing = false;
        Ok(())
    }

    /// Whether the sound is playing, either on its own or as the next sound
    /// of one that finished. A stale id isn't playing.
    pub fn is_playing(&self, id: SoundId) -> bool {
        self.sounds.get(id).is_some_and(SoundState::is_playing)
    }

    /// Loaded and buffered, with no delayed play pending.
    pub fn is_ready(&self, id: SoundId) -> bool {
        self.is_ready_to_play(id) && self.sounds.get(id).is_some_and(|s| !s.play_when_ready)
    }

    pub fn is_failed(&self, id: SoundId) -> bool {
        match self.sounds.get(id).map(|s| &s.source) {
            Some(SoundSource::Stream { shared, .. }) => shared.is_failed(),
            _ => false,
        }
    }

    fn is_ready_to_play(&self, id: SoundId) -> bool {
        match self.sounds.get(id).map(|s| &s.source) {
            Some(SoundSource::Bank { .. }) => true,
            Some(SoundSource::Stream {
                shared,
                next_frame,
                next_ms,
            }) => next_frame.is_none() && next_ms.is_none() && shared.is_ready(),
            None => false,
        }
    }

    pub fn set_volume(&mut self, id: SoundId, volume: f32) -> Result<()> {
        let s = self.sound_mut(id)?;
        s.volume_set = true;
        if s.volume != volume {
            s.volume = volume;
            if s.is_audible_target() {
                self.update_volume_and_pan(id);
            }
        }
        Ok(())
    }

    pub fn volume(&self, id: SoundId) -> Result<f32> {
        Ok(self.sound(id)?.volume)
    }

    /// Volume including every mixer above the sound.
    pub fn mixed_volume(&self, id: SoundId) -> Result<f32> {
        let s = self.sound(id)?;
        Ok(s.volume * self.mixers.get(s.mixer).map_or(1.0, |m| m.mixed_volume))
    }

    /// Pans from `-1` (left) to `1` (right), replacing any pan matrix.
    pub fn set_pan(&mut self, id: SoundId, pan: f32) -> Result<()> {
        let pan = pan.clamp(-1.0, 1.0);
        let s = self.sound_mut(id)?;
        s.pan_set = true;
        if s.pan != pan || s.pan_matrix.is_some() {
            s.pan = pan;
            s.pan_matrix = None;
            if s.is_audible_target() {
                self.update_volume_and_pan(id);
            }
        }
        Ok(())
    }

    /// The pan, or the pan an explicit matrix amounts to.
    pub fn pan(&self, id: SoundId) -> Result<f32> {
        let s = self.sound(id)?;
        Ok(match s.pan_matrix {
            Some(m) if s.channels() < 2 => m.pan(),
            Some(m) => m.stereo_pan_value(),
            None => s.pan,
        })
    }

    /// Sets the channel gains directly; see [`VolumeMatrix`].
    pub fn set_pan_matrix(&mut self, id: SoundId, matrix: VolumeMatrix) -> Result<()> {
        let s = self.sound_mut(id)?;
        s.pan_set = true;
        if s.pan_matrix != Some(matrix) {
            s.pan_matrix = Some(matrix);
            if s.is_audible_target() {
                self.update_volume_and_pan(id);
            }
        }
        Ok(())
    }

    pub fn pan_matrix(&self, id: SoundId) -> Result<VolumeMatrix> {
        let s = self.sound(id)?;
        Ok(s.pan_matrix.unwrap_or_else(|| pan_to_matrix(s.pan, s.channels())))
    }

    /// Playback speed; `2.0` is an octave up and twice as fast.
    pub fn set_speed(&mut self, id: SoundId, speed: f32) -> Result<()> {
        let s = self.sound_mut(id)?;
        if s.speed != speed {
            s.speed = speed;
            if s.is_audible_target() {
                self.update_speed(id);
            }
        }
        Ok(())
    }

    pub fn speed(&self, id: SoundId) -> Result<f32> {
        Ok(self.sound(id)?.speed)
    }

    /// Shifts pitch by `semitones`, changing speed to match.
    pub fn set_pitch_shift(&mut self, id: SoundId, semitones: f32) -> Result<()> {
        self.set_speed(id, (semitones / 12.0).exp2())
    }

    pub fn pitch_shift(&self, id: SoundId) -> Result<f32> {
        Ok(self.speed(id)?.log2() * 12.0)
    }

    pub fn set_paused(&mut self, id: SoundId, paused: bool) -> Result<()> {
        let s = self.sound_mut(id)?;
        if s.paused != paused {
            s.paused = paused;
            self.update_paused(id);
        }
        Ok(())
    }

    pub fn is_paused(&self, id: SoundId) -> Result<bool> {
        Ok(self.sound(id)?.paused)
    }

    /// Paused on its own or through its mixer.
    pub fn is_mixed_paused(&self, id: SoundId) -> Result<bool> {
        let s = self.sound(id)?;
        Ok(s.paused || self.mixers.get(s.mixer).is_some_and(|m| m.mixed_paused))
    }

    /// Sets the loop window in frames; `end` of `None` loops to the end.
    ///
    /// Streams only accept this while stopped.
    pub fn set_loop(&mut self, id: SoundId, start: u32, end: Option<u32>) -> Result<()> {
        if end.is_some_and(|e| start >= e) {
            return Self::usage(Error::InvalidLoop);
        }
        let playing = self.is_playing(id);
        let s = self.sound_mut(id)?;
        if s.is_stream() && playing {
            return Self::usage(Error::LoopOnPlayingStream);
        }
        if s.loop_start != start || s.loop_end != end {
            s.loop_start = start;
            s.loop_end = end;
            let node = s.node;
            self.graph.source(node, SourceMessage::SetLoop(start, end));
        }
        Ok(())
    }

    pub fn loop_window(&self, id: SoundId) -> Result<(u32, Option<u32>)> {
        let s = self.sound(id)?;
        Ok((s.loop_start, s.loop_end))
    }

    /// How many times the loop window repeats; `-1` loops forever.
    pub fn set_loop_count(&mut self, id: SoundId, count: i32) -> Result<()> {
        let s = self.sound_mut(id)?;
        if s.loop_count != count {
            s.loop_count = count;
            let node = s.node;
            self.graph.source(node, SourceMessage::SetLoopCount(count));
        }
        Ok(())
    }

    pub fn loop_count(&self, id: SoundId) -> Result<i32> {
        Ok(self.sound(id)?.loop_count)
    }

    /// Loops completed so far in the current playback.
    pub fn current_loop(&self, id: SoundId) -> Result<i32> {
        Ok(self.sound(id)?.status.current_loop())
    }

    /// Lets the sound play past its loop end and finish.
    pub fn release_loop(&mut self, id: SoundId) -> Result<()> {
        let node = self.sound(id)?.node;
        self.graph.source(node, SourceMessage::ReleaseLoop);
        Ok(())
    }

    pub fn is_loop_released(&self, id: SoundId) -> Result<bool> {
        Ok(self.sound(id)?.status.loop_released())
    }

    pub fn set_play_position(&mut self, id: SoundId, frame: u32) -> Result<()> {
        let s = self.sound_mut(id)?;
        match &mut s.source {
            SoundSource::Bank { .. } => {
                let node = s.node;
                self.graph.source(node, SourceMessage::SetPlayPosition(frame));
            }
            SoundSource::Stream {
                next_frame,
                next_ms,
                ..
            } => {
                *next_frame = Some(frame);
                *next_ms = None;
                self.update_seek(id);
            }
        }
        Ok(())
    }

    pub fn set_play_position_ms(&mut self, id: SoundId, ms: f32) -> Result<()> {
        let s = self.sound_mut(id)?;
        match &mut s.source {
            SoundSource::Bank { .. } => {
                let node = s.node;
                self.graph.source(node, SourceMessage::SetPlayPositionMs(ms));
            }
            SoundSource::Stream {
                next_frame,
                next_ms,
                ..
            } => {
                *next_frame = None;
                *next_ms = Some(ms);
                self.update_seek(id);
            }
        }
        Ok(())
    }

    /// Current frame, as of the last render pass.
    pub fn play_position(&self, id: SoundId) -> Result<u32> {
        let s = self.sound(id)?;
        Ok(if s.is_inited() { s.status.frame_pos() } else { 0 })
    }

    pub fn play_position_ms(&self, id: SoundId) -> Result<f32> {
        let s = self.sound(id)?;
        Ok(s.info.map_or(0.0, |i| i.frames_to_ms(s.status.frame_pos())))
    }

    /// Length in frames, if known.
    pub fn length(&self, id: SoundId) -> Result<Option<u32>> {
        Ok(self.sound(id)?.info.and_then(|i| i.num_frames()))
    }

    pub fn length_ms(&self, id: SoundId) -> Result<Option<f32>> {
        Ok(self
            .sound(id)?
            .info
            .and_then(|i| Some(i.frames_to_ms(i.num_frames()?))))
    }

    pub fn sample_rate(&self, id: SoundId) -> Result<Option<u32>> {
        Ok(self.sound(id)?.info.map(|i| i.sample_rate))
    }

    pub fn channels(&self, id: SoundId) -> Result<Option<u8>> {
        Ok(self.sound(id)?.info.map(|i| i.channels))
    }

    /// Estimated time until the sound finishes, at its current speed.
    ///
    /// `None` if it loops forever or its length is unknown.
    pub fn ms_left(&self, id: SoundId) -> Result<Option<f32>> {
        let s = self.sound(id)?;
        let Some(info) = s.info else {
            return Ok(None);
        };
        let Some(frames) = info.num_frames() else {
            return Ok(None);
        };
        let speed = self.final_speed(s);
        let pos = s.status.frame_pos().min(frames);
        let rest = info.frames_to_ms(frames - pos);

        if s.loop_count == 0 || s.status.loop_released() {
            return Ok(Some(rest / speed));
        }
        if s.loop_count < 0 {
            return Ok(None);
        }
        let loops_left = (s.loop_count - s.status.current_loop()).max(0);
        let loop_end = s.loop_end.unwrap_or(frames).min(frames);
        let loop_ms = info.frames_to_ms(loop_end.saturating_sub(s.loop_start));
        Ok(Some((loops_left as f32 * loop_ms + rest) / speed))
    }

    /// Chains `next` to start the moment this sound finishes.
    pub fn set_next_sound(&mut self, id: SoundId, next: Option<SoundId>) -> Result<()> {
        let next_node = match next {
            Some(n) => Some(self.sound(n)?.node),
            None => None,
        };
        let s = self.sound_mut(id)?;
        let old = std::mem::replace(&mut s.next, next);
        let node = s.node;
        if old == next {
            return Ok(());
        }
        if let Some(o) = old.and_then(|o| self.sounds.get_mut(o)) {
            o.prev.retain(|&p| p != id);
        }
        if let Some(n) = next {
            self.sound_mut(n)?.prev.push(id);
            // the successor may start on the render thread at any time
            self.update_volume_and_pan(n);
            self.update_speed(n);
        }
        self.graph.source(node, SourceMessage::SetNext(next_node));
        Ok(())
    }

    pub fn next_sound(&self, id: SoundId) -> Result<Option<SoundId>> {
        Ok(self.sound(id)?.next)
    }

    /// Moves the sound under `mixer`, or the master mixer.
    pub fn set_mixer(&mut self, id: SoundId, mixer: Option<MixerId>) -> Result<()> {
        let mixer = mixer.unwrap_or(self.master);
        if !self.mixers.contains(mixer) {
            return Err(Error::StaleHandle);
        }
        let old = std::mem::replace(&mut self.sound_mut(id)?.mixer, mixer);
        if old == mixer {
            return Ok(());
        }
        if let Some(m) = self.mixers.get_mut(old) {
            m.sounds.retain(|&x| x != id);
        }
        if let Some(m) = self.mixers.get_mut(mixer) {
            m.sounds.push(id);
        }
        self.refresh_sound_mix(id);
        Ok(())
    }

    pub fn sound_mixer(&self, id: SoundId) -> Result<MixerId> {
        Ok(self.sound(id)?.mixer)
    }

    /// Routes the sound through `bus`; `None` sends it straight to the output.
    pub fn set_effect_bus(&mut self, id: SoundId, bus: Option<BusId>) -> Result<()> {
        if let Some(b) = bus {
            if !self.buses.contains(b) {
                return Err(Error::StaleHandle);
            }
        }
        let old = std::mem::replace(&mut self.sound_mut(id)?.bus, bus);
        if old == bus {
            return Ok(());
        }
        if let Some(b) = old.and_then(|b| self.buses.get_mut(b)) {
            b.input_sounds.retain(|&x| x != id);
        }
        if let Some(b) = bus.and_then(|b| self.buses.get_mut(b)) {
            b.input_sounds.push(id);
        }
        self.update_mix_node(id);
        Ok(())
    }

    pub fn sound_effect_bus(&self, id: SoundId) -> Result<Option<BusId>> {
        Ok(self.sound(id)?.bus)
    }

    /// Hands the sound's volume, pan and speed over to the spatializer.
    pub fn set_3d_enabled(&mut self, id: SoundId, enabled: bool) -> Result<()> {
        let s = self.sound_mut(id)?;
        if s.spatial.enabled == enabled {
            return Ok(());
        }
        s.spatial.enabled = enabled;
        if !s.is_audible_target() {
            return Ok(());
        }
        if enabled {
            self.update_3d(id);
        }
        self.update_volume_and_pan(id);
        self.update_speed(id);
        self.update_virtual(id);
        Ok(())
    }

    pub fn is_3d_enabled(&self, id: SoundId) -> Result<bool> {
        Ok(self.sound(id)?.spatial.enabled)
    }

    pub fn set_3d_position(&mut self, id: SoundId, position: [f32; 3]) -> Result<()> {
        self.sound_mut(id)?.spatial.position = position;
        Ok(())
    }

    pub fn position_3d(&self, id: SoundId) -> Result<[f32; 3]> {
        Ok(self.sound(id)?.spatial.position)
    }

    pub fn set_3d_velocity(&mut self, id: SoundId, velocity: [f32; 3]) -> Result<()> {
        self.sound_mut(id)?.spatial.velocity = velocity;
        Ok(())
    }

    pub fn velocity_3d(&self, id: SoundId) -> Result<[f32; 3]> {
        Ok(self.sound(id)?.spatial.velocity)
    }

    /// A 3D sound too quiet to hear is virtual: its node is disconnected and
    /// only a timer keeps track of when it would have finished.
    pub fn is_virtual(&self, id: SoundId) -> bool {
        self.sounds
            .get(id)
            .is_some_and(|s| s.spatial.enabled && s.spatial.is_virtual)
    }

    /// Per-sound housekeeping, run from [`Engine::update`].
    pub(crate) fn update_sound(&mut self, id: SoundId) {
        let Some(s) = self.sounds.get(id) else {
            return;
        };
        if let SoundSource::Stream { shared, .. } = &s.source {
            shared.update(self.config.stream_buffer_ms);
        }
        self.init_sound(id);
        self.update_seek(id);

        let Some(s) = self.sounds.get_mut(id) else {
            return;
        };
        if s.playing && s.status.done_id() == s.play_id {
            s.playing = false;
        }
        let (spatial, pending) = (s.spatial.enabled, s.play_when_ready);
        if spatial && self.is_playing(id) {
            self.update_3d(id);
        }
        if pending && self.is_ready_to_play(id) {
            if let Err(e) = self.play(id) {
                tracing::error!("delayed play failed: {e}");
            }
        }

        if self.is_playing(id) && self.is_virtual(id) {
            let expired = self.sounds.get(id).is_some_and(|s| {
                s.spatial
                    .stop_ms
                    .is_some_and(|stop| s.spatial.timer.elapsed_ms() >= stop)
            });
            if expired {
                tracing::debug!("virtual sound ran out");
                if let Err(e) = self.stop(id) {
                    tracing::error!("could not stop virtual sound: {e}");
                }
            }
        }
    }

    /// Picks up the format once the source knows it.
    fn init_sound(&mut self, id: SoundId) {
        let buffer_frames = self.config.buffer_frames();
        let Some(s) = self.sounds.get_mut(id) else {
            return;
        };
        if s.is_inited() {
            return;
        }
        let (info, decoder) = match &s.source {
            SoundSource::Bank { info, .. } => {
                s.loop_start = info.loop_start;
                s.loop_end = info.loop_end;
                s.loop_count = info.loop_count;
                (*info, None)
            }
            SoundSource::Stream { shared, .. } => {
                let Some(info) = shared.sample_info().filter(|_| shared.is_inited()) else {
                    return;
                };
                let (start, end) = shared.loop_window();
                s.loop_start = start;
                s.loop_end = end;
                s.loop_count = shared.loop_count();
                match new_decoder(&info, buffer_frames) {
                    Ok(decoder) => (info, Some(decoder)),
                    Err(e) => {
                        tracing::error!("stream can't be decoded: {e}");
                        return;
                    }
                }
            }
        };
        if !s.volume_set {
            s.volume = info.default_volume();
        }
        if !s.pan_set {
            s.pan = info.default_pan();
        }
        s.info = Some(info);
        let node = s.node;
        if let Some(decoder) = decoder {
            self.graph.source(node, SourceMessage::SetDecoder(decoder));
        }
        self.update_mix_node(id);
        self.update_volume_and_pan(id);
        self.update_paused(id);
    }

    /// Sends a pending stream seek once the node can act on it.
    fn update_seek(&mut self, id: SoundId) {
        let Some(s) = self.sounds.get_mut(id) else {
            return;
        };
        let inited = s.is_inited();
        let node = s.node;
        let SoundSource::Stream {
            next_frame,
            next_ms,
            ..
        } = &mut s.source
        else {
            return;
        };
        if !inited {
            return;
        }
        let info = s.info;
        let frame = match (next_frame.take(), next_ms.take()) {
            (Some(f), _) => f,
            (None, Some(ms)) => info.map_or(0, |i| i.ms_to_frames(ms)),
            (None, None) => return,
        };
        self.graph.source(node, SourceMessage::SetNextFrame(frame));
    }

    pub(crate) fn update_mix_node(&mut self, id: SoundId) {
        let out_mix = self.graph.roots().out_mix;
        let Some(s) = self.sounds.get(id) else {
            return;
        };
        if !s.is_inited() {
            return;
        }
        let mix = s
            .bus
            .and_then(|b| self.buses.get(b))
            .map_or(out_mix, |b| b.mix);
        if mix != s.out_mix {
            let node = s.node;
            if let Some(s) = self.sounds.get_mut(id) {
                s.out_mix = mix;
            }
            self.graph.source(node, SourceMessage::SetOutput(mix));
        }
    }

    /// Pushes the final volume matrix to the node.
    pub(crate) fn update_volume_and_pan(&mut self, id: SoundId) {
        let Some(s) = self.sounds.get(id) else {
            return;
        };
        if !s.is_inited() {
            return;
        }
        let matrix = match s.pan_matrix {
            Some(m) if !s.spatial.enabled => m,
            _ => {
                let pan = if s.spatial.enabled { s.spatial.params.pan } else { s.pan };
                pan_to_matrix(pan, s.channels())
            }
        };
        let mut volume = s.volume * self.mixers.get(s.mixer).map_or(1.0, |m| m.mixed_volume);
        if s.spatial.enabled {
            volume *= s.spatial.params.volume;
        }
        let node = s.node;
        self.graph.source(node, SourceMessage::SetVolume(matrix * volume));
    }

    fn final_speed(&self, s: &SoundState) -> f32 {
        if s.spatial.enabled {
            s.speed * s.spatial.params.speed
        } else {
            s.speed
        }
    }

    fn update_speed(&mut self, id: SoundId) {
        let Some(s) = self.sounds.get(id) else {
            return;
        };
        if !s.is_inited() {
            return;
        }
        let speed = self.final_speed(s);
        let node = s.node;
        self.graph.source(node, SourceMessage::SetSpeed(speed));
    }

    /// Sends the paused state, including the mixer's.
    pub(crate) fn update_paused(&mut self, id: SoundId) {
        let Ok(paused) = self.is_mixed_paused(id) else {
            return;
        };
        let Some(s) = self.sounds.get_mut(id) else {
            return;
        };
        if paused {
            s.spatial.timer.stop();
        } else if s.spatial.is_virtual && s.playing {
            s.spatial.timer.start();
        }
        let node = s.node;
        self.graph.source(node, SourceMessage::SetPaused(paused));
    }

    /// Volume and pause after the sound moved between mixers.
    pub(crate) fn refresh_sound_mix(&mut self, id: SoundId) {
        self.update_volume_and_pan(id);
        self.update_paused(id);
    }

    fn update_3d(&mut self, id: SoundId) {
        let Some(s) = self.sounds.get(id) else {
            return;
        };
        let params = self.spatializer.as_ref().map_or_else(SpatialParams::default, |sp| {
            sp.spatialize(&self.listener, s.spatial.position, s.spatial.velocity)
        });
        let old = s.spatial.params;

        if params.speed != old.speed {
            if let Some(s) = self.sounds.get_mut(id) {
                s.spatial.params.speed = params.speed;
            }
            self.update_speed(id);
        }
        self.set_virtual(id, params.volume < VIRTUAL_VOLUME);
        let volume_changed = params.volume != old.volume;
        let pan_changed = params.pan != old.pan && params.volume > AUDIBLE_VOLUME;
        if volume_changed || pan_changed {
            if let Some(s) = self.sounds.get_mut(id) {
                s.spatial.params.volume = params.volume;
                s.spatial.params.pan = params.pan;
            }
            self.update_volume_and_pan(id);
        }
    }

    fn set_virtual(&mut self, id: SoundId, is_virtual: bool) {
        let Some(s) = self.sounds.get_mut(id) else {
            return;
        };
        if s.spatial.is_virtual == is_virtual {
            return;
        }
        s.spatial.is_virtual = is_virtual;
        tracing::debug!("sound went {}", if is_virtual { "virtual" } else { "real" });
        self.update_virtual(id);
        if is_virtual {
            self.start_virtual_timer(id);
        }
    }

    fn update_virtual(&mut self, id: SoundId) {
        let Some(s) = self.sounds.get(id) else {
            return;
        };
        if !s.playing {
            return;
        }
        let msg = if s.spatial.enabled && s.spatial.is_virtual {
            SourceMessage::Disconnect
        } else {
            SourceMessage::Connect
        };
        let node = s.node;
        self.graph.source(node, msg);
    }

    fn start_virtual_timer(&mut self, id: SoundId) {
        let stop_ms = self.ms_left(id).ok().flatten();
        let paused = self.is_mixed_paused(id).unwrap_or(false);
        let Some(s) = self.sounds.get_mut(id) else {
            return;
        };
        s.spatial.stop_ms = stop_ms;
        s.spatial.timer.reset();
        if !paused {
            s.spatial.timer.start();
        }
    }
}

fn pan_to_matrix(pan: f32, channels: u8) -> VolumeMatrix {
    if channels < 2 {
        VolumeMatrix::mono_pan(pan)
    } else {
        VolumeMatrix::stereo_pan(pan)
    }
}
