use crate::buffer::BufferHandle;
use crate::command::Retired;
use crate::dsp;
use crate::node::{AudioNode, NodeId, RenderContext};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MixMessage {
    AddInput(NodeId),
    RemoveInput(NodeId),
}

/// Sums its inputs.
///
/// The first active input's buffer doubles as the accumulator. The node's
/// own buffer is lent to the pool the first time it mixes anything, which
/// guarantees one spare buffer per level of nesting.
pub struct MixNode {
    id: NodeId,
    /// Front is processed first. Capacity is fixed at construction.
    inputs: Vec<NodeId>,
    /// Taken by the pool once donated.
    buf: Option<Box<[f32]>>,
}

impl MixNode {
    /// Allocates everything up front; call on the API thread.
    pub fn new(id: NodeId, buffer_len: usize, max_inputs: usize) -> Self {
        Self {
            id,
            inputs: Vec::with_capacity(max_inputs),
            buf: Some(vec![0.0; buffer_len].into_boxed_slice()),
        }
    }

    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    /// Adds `input` at the front; does nothing if it is already an input.
    pub fn add_input(&mut self, input: NodeId) {
        if self.inputs.contains(&input) {
            return;
        }
        if self.inputs.len() == self.inputs.capacity() {
            tracing::warn!("mix node {:?} is full; dropping input {:?}", self.id, input);
            return;
        }
        self.inputs.insert(0, input);
    }

    pub fn remove_input(&mut self, input: NodeId) {
        self.inputs.retain(|&i| i != input);
    }

    /// Takes the donated buffer back out of the pool for disposal.
    pub fn detach(&mut self, ctx: &mut RenderContext) {
        if let Some(buf) = ctx.pool.remove(self.id) {
            ctx.retire(Retired::Buffer(buf));
        }
    }

    fn donate(&mut self, ctx: &mut RenderContext) {
        if let Some(buf) = self.buf.take() {
            if let Err(buf) = ctx.pool.add(buf, self.id) {
                tracing::warn!("buffer pool is full; mix buffer not added");
                self.buf = Some(buf);
            }
        }
    }
}

impl AudioNode for MixNode {
    type Message = MixMessage;

    fn process(
        &mut self,
        ctx: &mut RenderContext,
        frames: usize,
        post: bool,
        needs_post: &mut bool,
    ) -> Option<BufferHandle> {
        let mut next = 0;
        let mut acc = None;
        while next < self.inputs.len() && acc.is_none() {
            acc = ctx.process_node(self.inputs[next], frames, post, needs_post);
            next += 1;
        }
        let acc = acc?;

        self.donate(ctx);

        let limit = ctx.params.render_limit_ms;
        let ms = ctx.clock.render_ms();
        if ms > limit {
            ctx.clock.overload_warning(ms);
            return Some(acc);
        }

        let len = frames * 2;
        while next < self.inputs.len() {
            let input = self.inputs[next];
            next += 1;
            let Some(buf) = ctx.process_node(input, frames, post, needs_post) else {
                continue;
            };
            let ms = ctx.clock.render_ms();
            if ms > limit {
                ctx.clock.overload_warning(ms);
                ctx.pool.release(buf);
                break;
            }
            let (dst, src) = ctx.pool.pair_mut(&acc, &buf);
            dsp::mix(&src[..len], &mut dst[..len]);
            ctx.pool.release(buf);
        }
        Some(acc)
    }

    fn execute(&mut self, _ctx: &mut RenderContext, msg: MixMessage) {
        match msg {
            MixMessage::AddInput(id) => self.add_input(id),
            MixMessage::RemoveInput(id) => self.remove_input(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inputs_are_a_set_with_newest_first() {
        let mut mix = MixNode::new(NodeId::from_raw(0, 0), 4, 3);
        let (a, b) = (NodeId::from_raw(1, 0), NodeId::from_raw(2, 0));
        mix.add_input(a);
        mix.add_input(b);
        mix.add_input(a);
        assert_eq!(mix.inputs(), &[b, a]);
        mix.remove_input(a);
        mix.remove_input(a);
        assert_eq!(mix.inputs(), &[b]);
    }

    #[test]
    fn full_input_list_drops() {
        let mut mix = MixNode::new(NodeId::from_raw(0, 0), 4, 1);
        mix.add_input(NodeId::from_raw(1, 0));
        mix.add_input(NodeId::from_raw(2, 0));
        assert_eq!(mix.inputs(), &[NodeId::from_raw(1, 0)]);
    }
}
