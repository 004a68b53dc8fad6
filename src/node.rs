//! Render-graph vertices and the context they process in.
//!
//! Nodes live in a fixed [`NodeTable`] owned by the render thread. The API
//! thread never touches a node directly: it allocates a [`NodeId`], ships the
//! boxed node over in a [`Command::Insert`](crate::command::Command), and from
//! then on talks to it only through per-kind messages.

use std::time::Instant;

use rtrb::Producer;

use crate::buffer::{BufferHandle, BufferPool};
use crate::command::Retired;
use crate::nodes::{EffectBusNode, EffectNode, MixNode, SourceNode};

/// Information available to effect processors during a pass.
#[derive(Clone, Copy, Debug)]
pub struct ProcessContext {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Frames in the current chunk.
    pub buffer_size: usize,
}

/// Identifies a node in the render graph.
///
/// The generation makes ids of freed nodes miss instead of aliasing whatever
/// reuses the slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) const fn from_raw(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// API-side allocator for node ids.
///
/// A slot only becomes reusable once the render thread has handed the freed
/// node back, so an id is never live on both sides with different meanings.
pub(crate) struct NodeIds {
    generations: Vec<u32>,
    free: Vec<u32>,
    max: usize,
}

impl NodeIds {
    pub fn new(max: usize) -> Self {
        Self {
            generations: Vec::with_capacity(max),
            free: Vec::new(),
            max,
        }
    }

    pub fn alloc(&mut self) -> Option<NodeId> {
        if let Some(index) = self.free.pop() {
            return Some(NodeId::from_raw(index, self.generations[index as usize]));
        }
        if self.generations.len() >= self.max {
            return None;
        }
        let index = self.generations.len() as u32;
        self.generations.push(0);
        Some(NodeId::from_raw(index, 0))
    }

    pub fn release(&mut self, id: NodeId) {
        let Some(generation) = self.generations.get_mut(id.index()) else {
            return;
        };
        if *generation == id.generation {
            *generation = generation.wrapping_add(1);
            self.free.push(id.index);
        }
    }

    pub fn live(&self) -> usize {
        self.generations.len() - self.free.len()
    }
}

struct Slot {
    generation: u32,
    node: Option<Box<RenderNode>>,
}

/// Render-side node storage, sized once at startup.
pub struct NodeTable {
    slots: Vec<Slot>,
}

impl NodeTable {
    pub fn new(max: usize) -> Self {
        let mut slots = Vec::with_capacity(max);
        slots.resize_with(max, || Slot {
            generation: 0,
            node: None,
        });
        Self { slots }
    }

    /// Places a node. Hands it back if the slot is out of range or occupied.
    pub fn insert(&mut self, id: NodeId, node: Box<RenderNode>) -> Result<(), Box<RenderNode>> {
        match self.slots.get_mut(id.index()) {
            Some(slot) if slot.node.is_none() => {
                slot.generation = id.generation;
                slot.node = Some(node);
                Ok(())
            }
            _ => Err(node),
        }
    }

    /// Removes a node for good.
    pub fn remove(&mut self, id: NodeId) -> Option<Box<RenderNode>> {
        self.take(id)
    }

    /// Takes a node out while it processes.
    ///
    /// Returns `None` for unknown ids and for nodes already taken further up
    /// the current call stack.
    #[inline]
    pub fn take(&mut self, id: NodeId) -> Option<Box<RenderNode>> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.take()
    }

    #[inline]
    pub fn restore(&mut self, id: NodeId, node: Box<RenderNode>) {
        if let Some(slot) = self.slots.get_mut(id.index()) {
            debug_assert!(slot.node.is_none());
            slot.node = Some(node);
        }
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut RenderNode> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_deref_mut()
    }

    pub fn source_mut(&mut self, id: NodeId) -> Option<&mut SourceNode> {
        match self.get_mut(id)? {
            RenderNode::Source(s) => Some(s),
            _ => None,
        }
    }

    pub fn mix_mut(&mut self, id: NodeId) -> Option<&mut MixNode> {
        match self.get_mut(id)? {
            RenderNode::Mix(m) => Some(m),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }
}

/// Every kind of render node.
pub enum RenderNode {
    Source(SourceNode),
    Mix(MixNode),
    EffectBus(EffectBusNode),
    Effect(EffectNode),
}

impl RenderNode {
    pub fn process(
        &mut self,
        ctx: &mut RenderContext,
        frames: usize,
        post: bool,
        needs_post: &mut bool,
    ) -> Option<BufferHandle> {
        match self {
            RenderNode::Source(n) => n.process(ctx, frames, post, needs_post),
            RenderNode::Mix(n) => n.process(ctx, frames, post, needs_post),
            RenderNode::EffectBus(n) => n.process(ctx, frames, post, needs_post),
            // effects are run by their bus
            RenderNode::Effect(_) => None,
        }
    }

    /// Gives back everything this node holds that must not be freed on the
    /// render thread.
    pub(crate) fn detach(&mut self, ctx: &mut RenderContext) {
        match self {
            RenderNode::Source(s) => s.disconnect(ctx),
            RenderNode::Mix(m) => m.detach(ctx),
            RenderNode::EffectBus(_) | RenderNode::Effect(_) => {}
        }
    }
}

/// Graph edits a node asks for while the graph is being walked.
///
/// They are applied once the pass is over, so no mix node has its input list
/// changed while it iterates over it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Deferred {
    Connect(NodeId),
    Disconnect(NodeId),
}

/// Fixed per-engine render parameters.
#[derive(Clone, Copy, Debug)]
pub struct RenderParams {
    pub sample_rate: u32,
    pub buffer_frames: usize,
    pub volume_rate: f32,
    pub render_limit_ms: f32,
}

/// Times the current pass and throttles the overload warning.
pub struct RenderClock {
    pass_start: Instant,
    last_warning: Option<Instant>,
}

impl RenderClock {
    pub fn new() -> Self {
        Self {
            pass_start: Instant::now(),
            last_warning: None,
        }
    }

    pub fn start_pass(&mut self) {
        self.pass_start = Instant::now();
    }

    /// Milliseconds since the pass started.
    #[inline]
    pub fn render_ms(&self) -> f32 {
        self.pass_start.elapsed().as_secs_f32() * 1000.0
    }

    /// Warns about render overload at most every 500 ms.
    pub fn overload_warning(&mut self, ms: f32) {
        let now = Instant::now();
        let due = self
            .last_warning
            .map_or(true, |t| now.duration_since(t).as_secs_f32() > 0.5);
        if due {
            self.last_warning = Some(now);
            tracing::warn!(
                "Audio rendering is taking too long ({ms:.2} ms); some sounds will not be played."
            );
        }
    }
}

impl Default for RenderClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a node can reach while it processes or executes a message.
pub struct RenderContext {
    pub nodes: NodeTable,
    pub pool: BufferPool,
    pub deferred: Vec<Deferred>,
    pub retired: Producer<Retired>,
    pub params: RenderParams,
    pub clock: RenderClock,
}

impl RenderContext {
    /// Queues a graph edit for after the pass.
    pub fn defer(&mut self, action: Deferred) {
        if self.deferred.len() < self.deferred.capacity() {
            self.deferred.push(action);
        } else {
            tracing::warn!("deferred action queue full; dropping {action:?}");
        }
    }

    /// Hands something back to the API thread to be freed there.
    pub fn retire(&mut self, item: Retired) {
        if let Err(rtrb::PushError::Full(item)) = self.retired.push(item) {
            tracing::warn!("retired queue full; freeing on the audio thread");
            drop(item);
        }
    }

    #[inline]
    pub fn process_context(&self, frames: usize) -> ProcessContext {
        ProcessContext {
            sample_rate: self.params.sample_rate,
            buffer_size: frames,
        }
    }

    /// Runs `f` on node `id` with the node lifted out of the table, so `f`
    /// can reach every other node through the context.
    pub fn with_node<R>(
        &mut self,
        id: NodeId,
        f: impl FnOnce(&mut RenderNode, &mut RenderContext) -> R,
    ) -> Option<R> {
        let mut node = self.nodes.take(id)?;
        let out = f(&mut node, self);
        self.nodes.restore(id, node);
        Some(out)
    }

    /// Runs the node `id`, if it exists and isn't already running.
    pub fn process_node(
        &mut self,
        id: NodeId,
        frames: usize,
        post: bool,
        needs_post: &mut bool,
    ) -> Option<BufferHandle> {
        self.with_node(id, |node, ctx| node.process(ctx, frames, post, needs_post))
            .flatten()
    }
}

/// Behavior shared by the processing node kinds.
pub trait AudioNode {
    /// Messages this node accepts from the API thread.
    type Message;

    /// Renders `frames` frames of interleaved stereo into a pool buffer.
    ///
    /// Returns `None` when the node is inactive this pass. `post` marks the
    /// follow-up pass used for gapless chaining; a node that needs one sets
    /// `needs_post`.
    fn process(
        &mut self,
        ctx: &mut RenderContext,
        frames: usize,
        post: bool,
        needs_post: &mut bool,
    ) -> Option<BufferHandle>;

    /// Applies one message. Only ever called between passes.
    fn execute(&mut self, ctx: &mut RenderContext, msg: Self::Message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_recycled_with_new_generation() {
        let mut ids = NodeIds::new(2);
        let a = ids.alloc().unwrap();
        let b = ids.alloc().unwrap();
        assert!(ids.alloc().is_none());
        ids.release(a);
        let c = ids.alloc().unwrap();
        assert_eq!(c.index(), a.index());
        assert_ne!(c, a);
        assert_eq!(ids.live(), 2);
        // releasing a stale id does nothing
        ids.release(a);
        assert_eq!(ids.live(), 2);
        ids.release(b);
        assert_eq!(ids.live(), 1);
    }

    #[test]
    fn taken_node_reads_as_missing() {
        let mut table = NodeTable::new(4);
        let id = NodeId::from_raw(1, 3);
        assert!(table.insert(id, Box::new(RenderNode::Mix(MixNode::new(id, 8, 4)))).is_ok());
        let node = table.take(id).unwrap();
        assert!(table.take(id).is_none());
        assert!(table.get_mut(id).is_none());
        table.restore(id, node);
        assert!(table.mix_mut(id).is_some());
        assert!(table.take(NodeId::from_raw(1, 2)).is_none());
        assert!(table.remove(id).is_some());
        assert_eq!(table.len(), 0);
    }
}
