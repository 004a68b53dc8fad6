use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use crate::buffer::BufferHandle;
use crate::command::Retired;
use crate::decoder::Decoder;
use crate::dsp::{pan_mono, pan_stereo, Resampler, VolumeMatrix};
use crate::node::{AudioNode, Deferred, NodeId, RenderContext};
use crate::source::{AudioSource, SourceKind};

/// Messages accepted by a [`SourceNode`].
pub enum SourceMessage {
    /// Starts playback under a new play id; `0` stops.
    SetPlaying(i32),
    SetPaused(bool),
    /// Playback speed relative to the sample's own rate.
    SetSpeed(f32),
    /// Target volume matrix; the node ramps toward it.
    SetVolume(VolumeMatrix),
    SetLoop(u32, Option<u32>),
    SetLoopCount(i32),
    ReleaseLoop,
    /// Seeks the decoder immediately.
    SetNextFrame(u32),
    /// Seeks at the start of the next pass.
    SetPlayPosition(u32),
    SetPlayPositionMs(f32),
    SetDecoder(Box<dyn Decoder>),
    SetOutput(NodeId),
    /// The node to hand over to when this one finishes.
    SetNext(Option<NodeId>),
    Connect,
    Disconnect,
}

/// Render-side state published for the API thread.
#[derive(Debug, Default)]
pub struct SourceStatus {
    play_id: AtomicI32,
    done_id: AtomicI32,
    current_loop: AtomicI32,
    frame_pos: AtomicU32,
    loop_released: AtomicBool,
}

impl SourceStatus {
    /// `-1` while the node plays as another node's chained successor.
    pub fn play_id(&self) -> i32 {
        self.play_id.load(Ordering::Acquire)
    }

    /// Play id of the last playback that ran to completion.
    pub fn done_id(&self) -> i32 {
        self.done_id.load(Ordering::Acquire)
    }

    pub fn current_loop(&self) -> i32 {
        self.current_loop.load(Ordering::Relaxed)
    }

    pub fn frame_pos(&self) -> u32 {
        self.frame_pos.load(Ordering::Relaxed)
    }

    pub fn loop_released(&self) -> bool {
        self.loop_released.load(Ordering::Relaxed)
    }
}

/// Decodes, resamples and pans one sound into its output mix node.
pub struct SourceNode {
    id: NodeId,
    source: SourceKind,
    decoder: Option<Box<dyn Decoder>>,
    output: NodeId,
    connected: bool,
    next: Option<NodeId>,
    target: VolumeMatrix,
    volume: VolumeMatrix,
    speed: f32,
    paused: bool,
    play_id: i32,
    done_id: i32,
    resampler: Resampler,
    /// Start frame within the chunk for a pending post pass.
    out_offset: Option<usize>,
    next_frame: Option<u32>,
    next_ms: Option<f32>,
    status: Arc<SourceStatus>,
}

impl SourceNode {
    pub fn new(
        id: NodeId,
        source: SourceKind,
        decoder: Option<Box<dyn Decoder>>,
        output: NodeId,
        status: Arc<SourceStatus>,
    ) -> Self {
        Self {
            id,
            source,
            decoder,
            output,
            connected: false,
            next: None,
            target: VolumeMatrix::IDENTITY,
            volume: VolumeMatrix::IDENTITY,
            speed: 1.0,
            paused: false,
            play_id: 0,
            done_id: 0,
            resampler: Resampler::new(),
            out_offset: None,
            next_frame: None,
            next_ms: None,
            status,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn connect(&mut self, ctx: &mut RenderContext) {
        if !self.connected {
            if let Some(mix) = ctx.nodes.mix_mut(self.output) {
                mix.add_input(self.id);
            }
            self.connected = true;
        }
    }

    pub fn disconnect(&mut self, ctx: &mut RenderContext) {
        if self.connected {
            if let Some(mix) = ctx.nodes.mix_mut(self.output) {
                mix.remove_input(self.id);
            }
            self.connected = false;
        }
    }

    fn publish(&self) {
        let s = &self.status;
        s.play_id.store(self.play_id, Ordering::Release);
        s.done_id.store(self.done_id, Ordering::Release);
        s.current_loop.store(self.source.current_loop(), Ordering::Relaxed);
        s.loop_released.store(self.source.is_loop_released(), Ordering::Relaxed);
        if let Some(decoder) = &self.decoder {
            s.frame_pos.store(decoder.frame_pos(&self.source), Ordering::Relaxed);
        }
    }

    /// Decodes into a pool buffer and pans it to stereo.
    ///
    /// Returns the output buffer and the frames written after `offset`.
    fn render(
        &mut self,
        ctx: &mut RenderContext,
        offset: usize,
        out_req: usize,
    ) -> Option<(BufferHandle, usize)> {
        let info = self.source.sample_info()?;
        let decoder = self.decoder.as_mut()?;
        let channels = info.channels as usize;

        let mut factor = self.speed * info.sample_rate as f32 / ctx.params.sample_rate as f32;
        let mut in_req = (out_req as f32 * factor).round() as usize;
        let max = ctx.params.buffer_frames;
        if offset + in_req > max {
            in_req = max - offset;
            factor = in_req as f32 / out_req as f32;
        }

        let input = ctx.pool.acquire()?;
        let in_frames = decoder.decode(
            &mut self.source,
            &mut ctx.pool.get_mut(&input)[offset * channels..],
            in_req,
        );
        debug_assert!(in_frames <= in_req);
        let out_frames = if in_frames < in_req {
            ((in_frames as f32 / factor).round() as usize).min(out_req)
        } else {
            out_req
        };

        let resampled = if in_frames == out_frames {
            input
        } else {
            let Some(resampled) = ctx.pool.acquire() else {
                ctx.pool.release(input);
                return None;
            };
            let (src, dst) = ctx.pool.pair_mut(&input, &resampled);
            self.resampler.resample(
                &src[offset * channels..],
                in_frames,
                &mut dst[offset * channels..],
                out_frames,
                channels,
            );
            ctx.pool.release(input);
            resampled
        };

        let rate = ctx.params.volume_rate;
        let output = if channels == 1 {
            let Some(output) = ctx.pool.acquire() else {
                ctx.pool.release(resampled);
                return None;
            };
            let (src, dst) = ctx.pool.pair_mut(&resampled, &output);
            pan_mono(
                &src[offset..offset + out_frames],
                &mut dst[offset * 2..],
                &self.target,
                &mut self.volume,
                rate,
            );
            ctx.pool.release(resampled);
            output
        } else {
            let buf = &mut ctx.pool.get_mut(&resampled)[offset * 2..(offset + out_frames) * 2];
            pan_stereo(buf, &self.target, &mut self.volume, rate);
            resampled
        };

        let buf = ctx.pool.get_mut(&output);
        buf[..offset * 2].fill(0.0);
        buf[(offset + out_frames) * 2..(offset + out_req) * 2].fill(0.0);
        Some((output, out_frames))
    }

    /// Hands over to the next node, or stops.
    fn finish(
        &mut self,
        ctx: &mut RenderContext,
        end: usize,
        short: bool,
        needs_post: &mut bool,
    ) {
        if let Some(next) = self.next {
            if next == self.id {
                self.play_id = -1;
                self.volume = self.target;
                if short {
                    *needs_post = true;
                    self.out_offset = Some(end);
                }
            } else if let Some(node) = ctx.nodes.source_mut(next) {
                node.play_id = -1;
                node.volume = node.target;
                node.resampler.copy_state(&self.resampler);
                if short {
                    *needs_post = true;
                    node.out_offset = Some(end);
                }
                // the output mix is mid-iteration
                ctx.defer(Deferred::Connect(next));
            }
        }

        self.source.reset();

        if !(self.next == Some(self.id) && self.play_id == -1) {
            ctx.defer(Deferred::Disconnect(self.id));
            self.done_id = self.play_id;
            self.play_id = 0;
            self.resampler.reset_state();
        }
    }
}

impl AudioNode for SourceNode {
    type Message = SourceMessage;

    fn process(
        &mut self,
        ctx: &mut RenderContext,
        frames: usize,
        post: bool,
        needs_post: &mut bool,
    ) -> Option<BufferHandle> {
        let offset = if post { self.out_offset? } else { 0 };
        self.out_offset = None;
        let out_req = frames.saturating_sub(offset);

        if !self.source.is_inited() {
            return None;
        }
        let info = self.source.sample_info()?;

        let seek = match (self.next_frame.take(), self.next_ms.take()) {
            (Some(frame), _) => Some(frame),
            (None, Some(ms)) => Some(info.ms_to_frames(ms)),
            (None, None) => None,
        };
        if let (Some(frame), Some(decoder)) = (seek, self.decoder.as_mut()) {
            decoder.set_frame_pos(&mut self.source, frame);
        }

        if self.play_id == 0 || self.paused || !self.source.is_ready() || self.speed <= 0.0 {
            return None;
        }

        let (output, out_frames) = self.render(ctx, offset, out_req)?;

        let done = self
            .decoder
            .as_ref()
            .is_some_and(|d| d.is_done(&self.source));
        if done {
            self.finish(ctx, offset + out_frames, out_frames < out_req, needs_post);
        }

        self.publish();
        Some(output)
    }

    fn execute(&mut self, ctx: &mut RenderContext, msg: SourceMessage) {
        match msg {
            SourceMessage::SetLoopCount(count) => self.source.set_loop_count(count),
            SourceMessage::ReleaseLoop => self.source.release_loop(),
            SourceMessage::SetLoop(start, end) => self.source.set_loop(start, end),
            SourceMessage::SetNextFrame(frame) => {
                if let Some(decoder) = self.decoder.as_mut() {
                    decoder.set_frame_pos(&mut self.source, frame);
                }
            }
            SourceMessage::SetDecoder(decoder) => {
                if let Some(old) = self.decoder.replace(decoder) {
                    ctx.retire(Retired::Decoder(old));
                }
            }
            SourceMessage::SetOutput(output) => {
                if output != self.output {
                    let connected = self.connected;
                    self.disconnect(ctx);
                    self.output = output;
                    if connected {
                        self.connect(ctx);
                    }
                }
            }
            SourceMessage::Connect => self.connect(ctx),
            SourceMessage::Disconnect => self.disconnect(ctx),
            SourceMessage::SetNext(next) => self.next = next,
            SourceMessage::SetSpeed(speed) => {
                debug_assert!(speed >= 0.0);
                self.speed = speed;
            }
            SourceMessage::SetVolume(target) => self.target = target,
            SourceMessage::SetPlaying(play_id) => {
                if self.play_id != play_id {
                    if play_id == 0 {
                        self.source.reset();
                        self.disconnect(ctx);
                    }
                    self.volume = self.target;
                    self.play_id = play_id;
                    self.resampler.reset_state();
                }
            }
            SourceMessage::SetPaused(paused) => {
                if self.paused != paused {
                    self.paused = paused;
                    self.volume = self.target;
                }
            }
            SourceMessage::SetPlayPosition(frame) => {
                self.next_frame = Some(frame);
                self.next_ms = None;
            }
            SourceMessage::SetPlayPositionMs(ms) => {
                self.next_ms = Some(ms);
                self.next_frame = None;
            }
        }
        self.publish();
    }
}
