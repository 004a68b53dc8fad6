//! The two halves of the render graph.
//!
//! [`AudioGraph`] lives on the API thread: it hands out node ids, queues
//! commands and collects whatever the render thread retires. [`Renderer`]
//! owns every node and is moved to whichever thread pulls audio, be it a
//! device callback or the host calling [`Engine::render`](crate::Engine::render).

use std::mem;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use rtrb::{Consumer, RingBuffer};

use crate::buffer::BufferPool;
use crate::capture::CaptureWriter;
use crate::command::{Command, CommandQueue, Hook, Retired};
use crate::config::EngineConfig;
use crate::dsp;
use crate::error::{Error, Result};
use crate::node::{
    AudioNode, Deferred, NodeId, NodeIds, NodeTable, RenderClock, RenderContext, RenderNode,
    RenderParams,
};
use crate::nodes::{EffectBusNode, MixNode, SourceMessage};

/// Callbacks averaged for the render-load figure.
const LOAD_WINDOW: usize = 50;

/// State both halves read.
pub(crate) struct GraphShared {
    audio_lock: Arc<Mutex<()>>,
    render_load: AtomicU32,
    clip: AtomicBool,
    capture: Mutex<Option<CaptureWriter>>,
}

impl GraphShared {
    fn set_render_load(&self, load: f32) {
        self.render_load.store(load.to_bits(), Ordering::Relaxed);
    }
}

/// The fixed top of every graph.
///
/// `root` is the global effect bus; its mixer sums `out_mix`, which every
/// unrouted sound and every other effect bus feeds.
#[derive(Clone, Copy, Debug)]
pub(crate) struct GraphRoots {
    pub root: NodeId,
    pub global_mix: NodeId,
    pub out_mix: NodeId,
}

/// API-side half of the graph.
pub(crate) struct AudioGraph {
    commands: CommandQueue,
    retired: Consumer<Retired>,
    ids: NodeIds,
    shared: Arc<GraphShared>,
    audio_guard: Option<ArcMutexGuard<RawMutex, ()>>,
    roots: GraphRoots,
    buffer_len: usize,
    max_nodes: usize,
    sample_rate: u32,
}

impl AudioGraph {
    /// Builds both halves with the root nodes already in place.
    pub fn new(config: &EngineConfig) -> Result<(Self, Renderer)> {
        let max_nodes = config.max_nodes.max(3);
        let buffer_frames = config.buffer_frames().max(1);
        let buffer_len = buffer_frames * 2;

        let (commands, consumer) = CommandQueue::new(config.max_audio_tasks);
        // every node can be retired at once, plus buffers, decoders and hooks
        let (retired_tx, retired) = RingBuffer::new(max_nodes * 3 + 8);

        let mut ids = NodeIds::new(max_nodes);
        let mut nodes = NodeTable::new(max_nodes);
        let mut alloc = || ids.alloc().ok_or(Error::TooManyNodes(max_nodes));
        let out_mix = alloc()?;
        let global_mix = alloc()?;
        let root = alloc()?;

        let mut global = MixNode::new(global_mix, buffer_len, max_nodes);
        global.add_input(out_mix);
        let top = [
            (out_mix, RenderNode::Mix(MixNode::new(out_mix, buffer_len, max_nodes))),
            (global_mix, RenderNode::Mix(global)),
            (root, RenderNode::EffectBus(EffectBusNode::new(Some(global_mix), max_nodes))),
        ];
        for (id, node) in top {
            nodes
                .insert(id, Box::new(node))
                .map_err(|_| Error::TooManyNodes(max_nodes))?;
        }

        let shared = Arc::new(GraphShared {
            audio_lock: Arc::new(Mutex::new(())),
            render_load: AtomicU32::new(0),
            clip: AtomicBool::new(false),
            capture: Mutex::new(None),
        });
        let roots = GraphRoots {
            root,
            global_mix,
            out_mix,
        };

        let ctx = RenderContext {
            nodes,
            pool: BufferPool::new(buffer_len, max_nodes),
            deferred: Vec::with_capacity(max_nodes * 2),
            retired: retired_tx,
            params: RenderParams {
                sample_rate: config.sample_rate,
                buffer_frames,
                volume_rate: config.volume_rate(),
                render_limit_ms: config.audio_update_ms * config.max_render_load,
            },
            clock: RenderClock::new(),
        };

        let renderer = Renderer {
            ctx,
            commands: consumer,
            shared: shared.clone(),
            root,
            pre: None,
            post: None,
            frame_avg: RunningAverage::new(),
            render_avg: RunningAverage::new(),
            last_start: None,
            last_render_ms: 0.0,
        };
        let graph = Self {
            commands,
            retired,
            ids,
            shared,
            audio_guard: None,
            roots,
            buffer_len,
            max_nodes,
            sample_rate: config.sample_rate,
        };
        Ok((graph, renderer))
    }

    pub fn roots(&self) -> GraphRoots {
        self.roots
    }

    /// Samples per render buffer.
    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    pub fn alloc_id(&mut self) -> Result<NodeId> {
        self.ids.alloc().ok_or_else(|| {
            tracing::error!("too many audio nodes (max {})", self.max_nodes);
            Error::TooManyNodes(self.max_nodes)
        })
    }

    /// Sends a node built for `id` over to the render thread.
    pub fn insert(&mut self, id: NodeId, node: RenderNode) -> bool {
        tracing::debug!("graph_add: {id:?}");
        if self.send(Command::Insert(id, Box::new(node))) {
            true
        } else {
            self.ids.release(id);
            false
        }
    }

    /// Hands back an id that never had a node sent for it.
    pub fn release_id(&mut self, id: NodeId) {
        self.ids.release(id);
    }

    /// Removes a node; its id is recycled once the render thread gives it back.
    ///
    /// Callers reserve room with [`has_room`](Self::has_room) first: a dropped
    /// free leaves the node running with nothing pointing at it.
    pub fn free(&mut self, id: NodeId) -> bool {
        tracing::debug!("graph_remove: {id:?}");
        self.send(Command::Free(id))
    }

    /// Whether `commands` more commands fit in the queue right now.
    pub fn has_room(&self, commands: usize) -> bool {
        self.commands.slots() >= commands
    }

    /// Queues `cmd`; returns `false` if it was dropped.
    pub fn send(&mut self, cmd: Command) -> bool {
        self.commands.push(cmd).is_ok()
    }

    pub fn source(&mut self, id: NodeId, msg: SourceMessage) -> bool {
        self.send(Command::Source(id, msg))
    }

    pub fn dropped_commands(&self) -> u64 {
        self.commands.dropped()
    }

    /// Frees on this thread whatever the render thread has finished with.
    pub fn update(&mut self) {
        while let Ok(item) = self.retired.pop() {
            if let Retired::Node(id, _) = &item {
                self.ids.release(*id);
            }
            if let Retired::Capture(writer) = item {
                if let Err(e) = writer.finish() {
                    tracing::error!("closing failed capture: {e}");
                }
            }
        }
    }

    /// Live node count, API-side view.
    pub fn live_nodes(&self) -> usize {
        self.ids.live()
    }

    /// Holds off command processing until [`unlock_audio`](Self::unlock_audio).
    pub fn lock_audio(&mut self) {
        if self.audio_guard.is_none() {
            self.audio_guard = Some(self.shared.audio_lock.lock_arc());
        }
    }

    pub fn unlock_audio(&mut self) {
        self.audio_guard = None;
    }

    pub fn is_audio_locked(&self) -> bool {
        self.audio_guard.is_some()
    }

    pub fn render_load(&self) -> f32 {
        f32::from_bits(self.shared.render_load.load(Ordering::Relaxed))
    }

    pub fn clip_flag(&self) -> bool {
        self.shared.clip.load(Ordering::Relaxed)
    }

    pub fn reset_clip_flag(&self) {
        self.shared.clip.store(false, Ordering::Relaxed);
    }

    pub fn start_capture(&mut self, path: &Path) -> Result<()> {
        let writer = CaptureWriter::create(path, self.sample_rate).inspect_err(|e| {
            tracing::error!("could not start capture to {}: {e}", path.display());
        })?;
        let old = self.shared.capture.lock().replace(writer);
        if let Some(old) = old {
            old.finish()?;
        }
        tracing::info!("Capturing to {}", path.display());
        Ok(())
    }

    pub fn stop_capture(&mut self) -> Result<()> {
        let writer = self.shared.capture.lock().take();
        if let Some(writer) = writer {
            writer.finish()?;
            tracing::info!("Capture stopped");
        }
        Ok(())
    }

    pub fn is_capturing(&self) -> bool {
        self.shared.capture.lock().is_some()
    }
}

/// Fixed-window running sum.
struct RunningAverage {
    samples: [f32; LOAD_WINDOW],
    next: usize,
    len: usize,
}

impl RunningAverage {
    fn new() -> Self {
        Self {
            samples: [0.0; LOAD_WINDOW],
            next: 0,
            len: 0,
        }
    }

    fn sample(&mut self, value: f32) {
        self.samples[self.next] = value;
        self.next = (self.next + 1) % LOAD_WINDOW;
        self.len = (self.len + 1).min(LOAD_WINDOW);
    }

    fn sum(&self) -> f32 {
        self.samples[..self.len].iter().sum()
    }
}

/// Render-side half of the graph.
///
/// Never blocks or allocates in [`render`](Self::render); everything it lets
/// go of is sent back to the [`AudioGraph`] to be freed.
pub struct Renderer {
    ctx: RenderContext,
    commands: Consumer<Command>,
    shared: Arc<GraphShared>,
    root: NodeId,
    pre: Option<Hook>,
    post: Option<Hook>,
    frame_avg: RunningAverage,
    render_avg: RunningAverage,
    last_start: Option<Instant>,
    last_render_ms: f32,
}

impl Renderer {
    pub fn sample_rate(&self) -> u32 {
        self.ctx.params.sample_rate
    }

    /// Largest chunk rendered in one pass.
    pub fn buffer_frames(&self) -> usize {
        self.ctx.params.buffer_frames
    }

    /// Renders `out.len() / 2` frames of interleaved stereo into `out`.
    pub fn render(&mut self, out: &mut [f32]) {
        let start = Instant::now();
        if let Some(prev) = self.last_start.replace(start) {
            self.frame_avg
                .sample(start.duration_since(prev).as_secs_f32() * 1000.0);
            self.render_avg.sample(self.last_render_ms);
            let frame_sum = self.frame_avg.sum();
            if frame_sum > 0.0 {
                self.shared.set_render_load(self.render_avg.sum() / frame_sum);
            }
        }
        self.ctx.clock.start_pass();

        if let Some(hook) = self.pre.as_mut() {
            hook();
        }

        self.process_commands();

        let max = self.ctx.params.buffer_frames;
        let mut frames = out.len() / 2;
        let mut divs = 1;
        while frames / divs + 1 > max {
            divs += 1;
        }
        let mut pos = 0;
        while frames > 0 {
            let chunk = (frames / divs).min(max).max(1);
            if divs > 1 {
                divs -= 1;
            }
            self.render_chunk(&mut out[pos * 2..(pos + chunk) * 2]);
            frames -= chunk;
            pos += chunk;
        }

        if let Some(hook) = self.post.as_mut() {
            hook();
        }
        self.last_render_ms = start.elapsed().as_secs_f32() * 1000.0;
    }

    fn render_chunk(&mut self, out: &mut [f32]) {
        let frames = out.len() / 2;
        let mut needs_post = false;
        let buf = self
            .ctx
            .process_node(self.root, frames, false, &mut needs_post);
        self.apply_deferred();

        match buf {
            Some(buf) => {
                while needs_post {
                    needs_post = false;
                    let extra = self
                        .ctx
                        .process_node(self.root, frames, true, &mut needs_post);
                    if let Some(extra) = extra {
                        let (dst, src) = self.ctx.pool.pair_mut(&buf, &extra);
                        dsp::mix(&src[..out.len()], &mut dst[..out.len()]);
                        self.ctx.pool.release(extra);
                    }
                    self.apply_deferred();
                }
                if dsp::clamp(&self.ctx.pool.get(&buf)[..out.len()], out) {
                    self.shared.clip.store(true, Ordering::Relaxed);
                }
                self.ctx.pool.release(buf);
            }
            None => out.fill(0.0),
        }

        self.write_capture(out);
    }

    fn write_capture(&mut self, out: &[f32]) {
        let Some(mut capture) = self.shared.capture.try_lock() else {
            return;
        };
        let failed = match capture.as_mut() {
            Some(writer) => writer.write(out).is_err(),
            None => false,
        };
        if failed {
            tracing::error!("Capture failed; closing file");
            if let Some(writer) = capture.take() {
                drop(capture);
                self.ctx.retire(Retired::Capture(writer));
            }
        }
    }

    fn process_commands(&mut self) {
        let shared = Arc::clone(&self.shared);
        let Some(_guard) = shared.audio_lock.try_lock() else {
            tracing::warn!(
                "Audio thread could not acquire lock; did you call lock_audio() but forget to call unlock_audio()?"
            );
            return;
        };
        while let Ok(cmd) = self.commands.pop() {
            self.apply(cmd);
        }
    }

    fn apply(&mut self, cmd: Command) {
        let ctx = &mut self.ctx;
        match cmd {
            Command::Insert(id, node) => {
                if let Err(node) = ctx.nodes.insert(id, node) {
                    tracing::warn!("node slot {} is occupied", id.index());
                    ctx.retire(Retired::Node(id, node));
                }
            }
            Command::Source(id, msg) => match ctx.nodes.take(id) {
                Some(mut node) => {
                    match &mut *node {
                        RenderNode::Source(s) => s.execute(ctx, msg),
                        _ => stray_source_message(ctx, msg),
                    }
                    ctx.nodes.restore(id, node);
                }
                None => stray_source_message(ctx, msg),
            },
            Command::Mix(id, msg) => {
                ctx.with_node(id, |node, ctx| {
                    if let RenderNode::Mix(m) = node {
                        m.execute(ctx, msg);
                    }
                });
            }
            Command::Bus(id, msg) => {
                ctx.with_node(id, |node, ctx| {
                    if let RenderNode::EffectBus(b) = node {
                        b.execute(ctx, msg);
                    }
                });
            }
            Command::Effect(id, msg) => {
                if let Some(RenderNode::Effect(fx)) = ctx.nodes.get_mut(id) {
                    fx.execute(msg);
                }
            }
            Command::Free(id) => {
                if let Some(mut node) = ctx.nodes.remove(id) {
                    node.detach(ctx);
                    ctx.retire(Retired::Node(id, node));
                }
            }
            Command::SetVolumeRate(rate) => ctx.params.volume_rate = rate,
            Command::SetPreRender(hook) => {
                if let Some(old) = mem::replace(&mut self.pre, hook) {
                    self.ctx.retire(Retired::Hook(old));
                }
            }
            Command::SetPostRender(hook) => {
                if let Some(old) = mem::replace(&mut self.post, hook) {
                    self.ctx.retire(Retired::Hook(old));
                }
            }
        }
    }

    fn apply_deferred(&mut self) {
        let mut deferred = mem::take(&mut self.ctx.deferred);
        for action in deferred.drain(..) {
            let (id, msg) = match action {
                Deferred::Connect(id) => (id, SourceMessage::Connect),
                Deferred::Disconnect(id) => (id, SourceMessage::Disconnect),
            };
            self.ctx.with_node(id, |node, ctx| {
                if let RenderNode::Source(s) = node {
                    s.execute(ctx, msg);
                }
            });
        }
        self.ctx.deferred = deferred;
    }
}

/// Disposes of a message whose node has gone.
fn stray_source_message(ctx: &mut RenderContext, msg: SourceMessage) {
    if let SourceMessage::SetDecoder(decoder) = msg {
        ctx.retire(Retired::Decoder(decoder));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> EngineConfig {
        EngineConfig::default()
            .with_sample_rate(1000)
            .with_audio_update_ms(8.0)
            .with_max_nodes(16)
    }

    #[test]
    fn empty_graph_renders_silence() {
        let (mut graph, mut renderer) = AudioGraph::new(&small_config()).unwrap();
        assert_eq!(renderer.buffer_frames(), 16);
        let mut out = vec![1.0f32; 100];
        renderer.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(!graph.clip_flag());
        graph.update();
        assert_eq!(graph.live_nodes(), 3);
    }

    #[test]
    fn freed_node_comes_back_and_id_is_recycled() {
        let (mut graph, mut renderer) = AudioGraph::new(&small_config()).unwrap();
        let id = graph.alloc_id().unwrap();
        let mix = MixNode::new(id, graph.buffer_len(), 4);
        assert!(graph.insert(id, RenderNode::Mix(mix)));
        graph.free(id);
        renderer.render(&mut [0.0; 8]);
        assert_eq!(graph.live_nodes(), 4);
        graph.update();
        assert_eq!(graph.live_nodes(), 3);
        let again = graph.alloc_id().unwrap();
        assert_eq!(again.index(), id.index());
        assert_ne!(again, id);
    }

    #[test]
    fn locked_audio_defers_commands() {
        let (mut graph, mut renderer) = AudioGraph::new(&small_config()).unwrap();
        let id = graph.alloc_id().unwrap();
        graph.lock_audio();
        assert!(graph.is_audio_locked());
        assert!(graph.insert(id, RenderNode::Mix(MixNode::new(id, graph.buffer_len(), 1))));
        graph.free(id);
        renderer.render(&mut [0.0; 8]);
        graph.update();
        assert_eq!(graph.live_nodes(), 4);

        graph.unlock_audio();
        renderer.render(&mut [0.0; 8]);
        graph.update();
        assert_eq!(graph.live_nodes(), 3);
    }

    #[test]
    fn room_is_counted_in_commands() {
        let config = small_config().with_max_audio_tasks(2);
        let (mut graph, mut renderer) = AudioGraph::new(&config).unwrap();
        assert!(graph.has_room(2));
        let id = graph.alloc_id().unwrap();
        assert!(graph.insert(id, RenderNode::Mix(MixNode::new(id, graph.buffer_len(), 1))));
        assert!(graph.has_room(1));
        assert!(!graph.has_room(2));
        assert!(graph.free(id));
        assert!(!graph.free(id));
        renderer.render(&mut [0.0; 8]);
        assert!(graph.has_room(2));
    }

    #[test]
    fn running_average_window() {
        let mut avg = RunningAverage::new();
        for _ in 0..LOAD_WINDOW + 10 {
            avg.sample(2.0);
        }
        assert_eq!(avg.sum(), 2.0 * LOAD_WINDOW as f32);
    }
}
