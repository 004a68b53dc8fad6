use crate::buffer::BufferHandle;
use crate::dsp::{crossfade_gains, mix_vol};
use crate::effects::EffectProcessor;
use crate::node::{AudioNode, NodeId, RenderContext, RenderNode};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EffectMessage {
    SetParam(i32, f32),
    Reset,
    SetBypassed(bool),
    SetWetDry(f32),
}

/// One effect in a bus's chain.
///
/// Effects live in the node table like any other node but are only ever run
/// by the bus that lists them.
pub struct EffectNode {
    processor: Box<dyn EffectProcessor>,
    bypass: bool,
    wet_dry: f32,
}

impl EffectNode {
    pub fn new(processor: Box<dyn EffectProcessor>) -> Self {
        Self {
            processor,
            bypass: false,
            wet_dry: 1.0,
        }
    }

    pub fn execute(&mut self, msg: EffectMessage) {
        match msg {
            EffectMessage::SetParam(id, value) => self.processor.set_param(id, value),
            EffectMessage::Reset => self.processor.reset(),
            EffectMessage::SetBypassed(bypass) => {
                if bypass && !self.bypass {
                    self.processor.reset();
                }
                self.bypass = bypass;
            }
            EffectMessage::SetWetDry(wet_dry) => self.wet_dry = wet_dry.clamp(0.0, 1.0),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EffectBusMessage {
    AddEffect(NodeId),
    RemoveEffect(NodeId),
    RemoveAllEffects,
    Reset,
    SetBypassed(bool),
    SetWetDry(f32),
    SetInput(Option<NodeId>),
}

/// Runs its input through a chain of effects.
pub struct EffectBusNode {
    input: Option<NodeId>,
    effects: Vec<NodeId>,
    bypass: bool,
    wet_dry: f32,
    prev_active: bool,
}

impl EffectBusNode {
    pub fn new(input: Option<NodeId>, max_effects: usize) -> Self {
        Self {
            input,
            effects: Vec::with_capacity(max_effects),
            bypass: false,
            wet_dry: 1.0,
            prev_active: false,
        }
    }

    pub fn effects(&self) -> &[NodeId] {
        &self.effects
    }

    fn reset_effects(&self, ctx: &mut RenderContext) {
        for &id in &self.effects {
            if let Some(RenderNode::Effect(fx)) = ctx.nodes.get_mut(id) {
                fx.processor.reset();
            }
        }
    }

    /// Copies `len` samples of `src` into a fresh buffer.
    fn dry_copy(ctx: &mut RenderContext, src: &BufferHandle, len: usize) -> Option<BufferHandle> {
        let dry = ctx.pool.acquire()?;
        let (dst, src) = ctx.pool.pair_mut(&dry, src);
        dst[..len].copy_from_slice(&src[..len]);
        Some(dry)
    }

    /// Equal-power blend of `dry` back into `wet`; releases `dry`.
    fn crossfade(ctx: &mut RenderContext, wet: &BufferHandle, dry: BufferHandle, wet_dry: f32, len: usize) {
        let (wet_gain, dry_gain) = crossfade_gains(wet_dry);
        let (out, src) = ctx.pool.pair_mut(wet, &dry);
        mix_vol(&src[..len], dry_gain, &mut out[..len], wet_gain);
        ctx.pool.release(dry);
    }
}

impl AudioNode for EffectBusNode {
    type Message = EffectBusMessage;

    fn process(
        &mut self,
        ctx: &mut RenderContext,
        frames: usize,
        post: bool,
        needs_post: &mut bool,
    ) -> Option<BufferHandle> {
        let buf = self
            .input
            .and_then(|input| ctx.process_node(input, frames, post, needs_post));

        let Some(buf) = buf else {
            // post passes are normally silent; only a main pass ends a run
            if !post {
                if self.prev_active {
                    self.reset_effects(ctx);
                }
                self.prev_active = false;
            }
            return None;
        };
        if !post {
            self.prev_active = true;
        }

        if self.bypass || self.effects.is_empty() || self.wet_dry < 0.01 {
            return Some(buf);
        }

        let len = frames * 2;
        let bus_dry = if self.wet_dry < 0.99 {
            Self::dry_copy(ctx, &buf, len)
        } else {
            None
        };

        let pctx = ctx.process_context(frames);
        for &id in &self.effects {
            let (bypass, wet_dry) = match ctx.nodes.get_mut(id) {
                Some(RenderNode::Effect(fx)) => (fx.bypass, fx.wet_dry),
                _ => continue,
            };
            if bypass {
                continue;
            }
            let fx_dry = if wet_dry < 0.99 {
                Self::dry_copy(ctx, &buf, len)
            } else {
                None
            };
            if let Some(RenderNode::Effect(fx)) = ctx.nodes.get_mut(id) {
                fx.processor.process(&pctx, &mut ctx.pool.get_mut(&buf)[..len], frames);
            }
            if let Some(dry) = fx_dry {
                Self::crossfade(ctx, &buf, dry, wet_dry, len);
            }
        }

        if let Some(dry) = bus_dry {
            Self::crossfade(ctx, &buf, dry, self.wet_dry, len);
        }
        Some(buf)
    }

    fn execute(&mut self, ctx: &mut RenderContext, msg: EffectBusMessage) {
        match msg {
            EffectBusMessage::AddEffect(id) => {
                if self.effects.contains(&id) {
                    return;
                }
                if self.effects.len() == self.effects.capacity() {
                    tracing::warn!("effect bus is full; dropping effect {id:?}");
                    return;
                }
                self.effects.push(id);
                if let Some(RenderNode::Effect(fx)) = ctx.nodes.get_mut(id) {
                    fx.processor.reset();
                }
            }
            EffectBusMessage::RemoveEffect(id) => self.effects.retain(|&e| e != id),
            EffectBusMessage::RemoveAllEffects => self.effects.clear(),
            EffectBusMessage::Reset => self.reset_effects(ctx),
            EffectBusMessage::SetBypassed(bypass) => {
                if bypass && !self.bypass {
                    self.reset_effects(ctx);
                }
                self.bypass = bypass;
            }
            EffectBusMessage::SetWetDry(wet_dry) => self.wet_dry = wet_dry.clamp(0.0, 1.0),
            EffectBusMessage::SetInput(input) => self.input = input,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::RingMod;

    #[test]
    fn effect_bypass_and_wet_dry_clamp() {
        let mut fx = EffectNode::new(Box::new(RingMod::new()));
        fx.execute(EffectMessage::SetWetDry(3.0));
        assert_eq!(fx.wet_dry, 1.0);
        fx.execute(EffectMessage::SetWetDry(-1.0));
        assert_eq!(fx.wet_dry, 0.0);
        fx.execute(EffectMessage::SetBypassed(true));
        assert!(fx.bypass);
        fx.execute(EffectMessage::SetParam(0, 100.0));
    }
}
