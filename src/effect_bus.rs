//! Effect buses and the effects in them.
//!
//! Each bus is a mix node feeding an effect bus node. The global bus sits at
//! the root of the graph and everything ends up in it; every other bus
//! outputs to the main mix or to another bus's input. Sounds routed through
//! a bus output into its mix node instead of the main one.

use crate::arena::arena_key;
use crate::command::Command;
use crate::effects::{EffectProcessor, EffectType};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::node::{NodeId, RenderNode};
use crate::nodes::{EffectBusMessage, EffectBusNode, EffectMessage, EffectNode, MixMessage, MixNode};
use crate::sound::SoundId;

arena_key!(
    /// Handle to an effect bus.
    BusId
);

arena_key!(
    /// Handle to an effect.
    EffectId
);

pub(crate) struct BusState {
    /// Where sounds and input buses mix in.
    pub mix: NodeId,
    /// The effect chain node; what the bus outputs.
    pub fx: NodeId,
    pub is_global: bool,
    pub output: Option<BusId>,
    pub effects: Vec<EffectId>,
    pub bypass: bool,
    pub wet_dry: f32,
    pub input_sounds: Vec<SoundId>,
    pub input_buses: Vec<BusId>,
}

impl BusState {
    pub fn new(mix: NodeId, fx: NodeId, is_global: bool) -> Self {
        Self {
            mix,
            fx,
            is_global,
            output: None,
            effects: Vec::new(),
            bypass: false,
            wet_dry: 1.0,
            input_sounds: Vec::new(),
            input_buses: Vec::new(),
        }
    }
}

pub(crate) struct EffectState {
    pub node: NodeId,
    pub owner: Option<BusId>,
    pub bypass: bool,
    pub wet_dry: f32,
}

impl Engine {
    fn bus(&self, id: BusId) -> Result<&BusState> {
        self.buses.get(id).ok_or(Error::StaleHandle)
    }

    fn bus_mut(&mut self, id: BusId) -> Result<&mut BusState> {
        self.buses.get_mut(id).ok_or(Error::StaleHandle)
    }

    fn effect(&self, id: EffectId) -> Result<&EffectState> {
        self.effects.get(id).ok_or(Error::StaleHandle)
    }

    fn effect_mut(&mut self, id: EffectId) -> Result<&mut EffectState> {
        self.effects.get_mut(id).ok_or(Error::StaleHandle)
    }

    /// The mix node a bus's output feeds into.
    fn bus_destination(&self, output: Option<BusId>) -> NodeId {
        output
            .and_then(|b| self.buses.get(b))
            .map_or(self.graph.roots().out_mix, |b| b.mix)
    }

    /// The bus everything ends up in. It can't be destroyed or rerouted.
    pub fn global_effect_bus(&self) -> BusId {
        self.global_bus
    }

    /// Creates a bus that outputs to the main mix.
    pub fn new_effect_bus(&mut self) -> Result<BusId> {
        // two inserts and the hookup
        if !self.graph.has_room(3) {
            return Self::usage(Error::QueueFull);
        }
        let max_nodes = self.graph.max_nodes();
        let mix = self.graph.alloc_id()?;
        let fx = match self.graph.alloc_id() {
            Ok(fx) => fx,
            Err(e) => {
                self.graph.release_id(mix);
                return Err(e);
            }
        };
        let mix_node = MixNode::new(mix, self.graph.buffer_len(), max_nodes);
        if !self.graph.insert(mix, RenderNode::Mix(mix_node)) {
            self.graph.release_id(fx);
            return Self::usage(Error::QueueFull);
        }
        if !self
            .graph
            .insert(fx, RenderNode::EffectBus(EffectBusNode::new(Some(mix), max_nodes)))
        {
            self.graph.free(mix);
            return Self::usage(Error::QueueFull);
        }
        let out_mix = self.graph.roots().out_mix;
        self.graph.send(Command::Mix(out_mix, MixMessage::AddInput(fx)));
        Ok(self.buses.insert(BusState::new(mix, fx, false)))
    }

    /// Destroys a bus. Its effects are removed but not destroyed, its sounds
    /// go straight to the output and buses feeding it output to the main mix.
    pub fn destroy_effect_bus(&mut self, id: BusId) -> Result<()> {
        let bus = self.bus(id)?;
        if bus.is_global {
            return Self::usage(Error::DestroyGlobalBus);
        }
        // clear effects, unroute, unhook, reroute inputs, free both nodes
        let needed = 1 + 2 + 1 + bus.input_sounds.len() + bus.input_buses.len() + 2;
        if !self.graph.has_room(needed) {
            return Self::usage(Error::QueueFull);
        }
        self.remove_all_effects(id)?;
        self.set_output_bus(id, None)?;
        let Some(bus) = self.buses.remove(id) else {
            return Err(Error::StaleHandle);
        };
        let out_mix = self.graph.roots().out_mix;
        self.graph.send(Command::Mix(out_mix, MixMessage::RemoveInput(bus.fx)));

        for sound in bus.input_sounds {
            if let Some(s) = self.sounds.get_mut(sound) {
                s.bus = None;
            }
            self.update_mix_node(sound);
        }
        for input in bus.input_buses {
            if let Some(b) = self.buses.get_mut(input) {
                b.output = None;
                let fx = b.fx;
                self.graph.send(Command::Mix(out_mix, MixMessage::AddInput(fx)));
            }
        }
        self.graph.free(bus.fx);
        self.graph.free(bus.mix);
        Ok(())
    }

    /// Routes the bus into `output`'s input, or the main mix for `None`.
    ///
    /// Only a bus pointing at itself is rejected; longer cycles aren't
    /// detected and render as silence along the loop.
    pub fn set_output_bus(&mut self, id: BusId, output: Option<BusId>) -> Result<()> {
        let bus = self.bus(id)?;
        if bus.is_global {
            return Self::usage(Error::GlobalBusOutput);
        }
        if output == Some(id) {
            return Self::usage(Error::BusOutputToSelf);
        }
        if let Some(o) = output {
            self.bus(o)?;
        }
        if bus.output == output {
            return Ok(());
        }
        let (fx, old) = (bus.fx, bus.output);

        let old_dest = self.bus_destination(old);
        let new_dest = self.bus_destination(output);
        self.graph.send(Command::Mix(old_dest, MixMessage::RemoveInput(fx)));
        self.graph.send(Command::Mix(new_dest, MixMessage::AddInput(fx)));

        if let Some(b) = old.and_then(|o| self.buses.get_mut(o)) {
            b.input_buses.retain(|&x| x != id);
        }
        if let Some(b) = output.and_then(|o| self.buses.get_mut(o)) {
            b.input_buses.push(id);
        }
        self.bus_mut(id)?.output = output;
        Ok(())
    }

    pub fn output_bus(&self, id: BusId) -> Result<Option<BusId>> {
        Ok(self.bus(id)?.output)
    }

    /// Appends `effect` to the bus's chain, taking it off any other bus.
    pub fn add_effect(&mut self, id: BusId, effect: EffectId) -> Result<()> {
        let fx = self.bus(id)?.fx;
        let state = self.effect(effect)?;
        let (node, owner) = (state.node, state.owner);
        if owner == Some(id) {
            return Ok(());
        }
        if let Some(old) = owner {
            self.remove_effect(old, effect)?;
        }
        self.graph.send(Command::Bus(fx, EffectBusMessage::AddEffect(node)));
        self.bus_mut(id)?.effects.push(effect);
        self.effect_mut(effect)?.owner = Some(id);
        Ok(())
    }

    /// Takes `effect` out of the bus's chain; it stays alive.
    pub fn remove_effect(&mut self, id: BusId, effect: EffectId) -> Result<()> {
        let fx = self.bus(id)?.fx;
        let state = self.effect(effect)?;
        if state.owner != Some(id) {
            return Ok(());
        }
        let node = state.node;
        self.graph.send(Command::Bus(fx, EffectBusMessage::RemoveEffect(node)));
        self.bus_mut(id)?.effects.retain(|&e| e != effect);
        self.effect_mut(effect)?.owner = None;
        Ok(())
    }

    pub fn remove_all_effects(&mut self, id: BusId) -> Result<()> {
        let bus = self.bus_mut(id)?;
        let effects = std::mem::take(&mut bus.effects);
        let fx = bus.fx;
        for e in effects {
            if let Some(state) = self.effects.get_mut(e) {
                state.owner = None;
            }
        }
        self.graph.send(Command::Bus(fx, EffectBusMessage::RemoveAllEffects));
        Ok(())
    }

    /// Effects on the bus, in processing order.
    pub fn bus_effects(&self, id: BusId) -> Result<&[EffectId]> {
        Ok(&self.bus(id)?.effects)
    }

    /// Clears the state of every effect on the bus.
    pub fn reset_effect_bus(&mut self, id: BusId) -> Result<()> {
        let fx = self.bus(id)?.fx;
        self.graph.send(Command::Bus(fx, EffectBusMessage::Reset));
        Ok(())
    }

    pub fn set_bus_bypassed(&mut self, id: BusId, bypass: bool) -> Result<()> {
        let bus = self.bus_mut(id)?;
        if bus.bypass != bypass {
            bus.bypass = bypass;
            let fx = bus.fx;
            self.graph.send(Command::Bus(fx, EffectBusMessage::SetBypassed(bypass)));
        }
        Ok(())
    }

    pub fn is_bus_bypassed(&self, id: BusId) -> Result<bool> {
        Ok(self.bus(id)?.bypass)
    }

    /// Blend between the dry input (`0`) and the processed signal (`1`).
    pub fn set_bus_wet_dry(&mut self, id: BusId, wet_dry: f32) -> Result<()> {
        let wet_dry = wet_dry.clamp(0.0, 1.0);
        let bus = self.bus_mut(id)?;
        if bus.wet_dry != wet_dry {
            bus.wet_dry = wet_dry;
            let fx = bus.fx;
            self.graph.send(Command::Bus(fx, EffectBusMessage::SetWetDry(wet_dry)));
        }
        Ok(())
    }

    pub fn bus_wet_dry(&self, id: BusId) -> Result<f32> {
        Ok(self.bus(id)?.wet_dry)
    }

    /// Creates one of the built-in effects. It does nothing until added to a bus.
    pub fn new_effect(&mut self, kind: EffectType) -> Result<EffectId> {
        self.insert_effect(kind.new_processor())
    }

    /// Creates an effect from the factory registered under `factory_id`.
    pub fn new_custom_effect(&mut self, factory_id: i32) -> Result<EffectId> {
        let processor = self.factories.create(factory_id)?;
        self.insert_effect(processor)
    }

    fn insert_effect(&mut self, processor: Box<dyn EffectProcessor>) -> Result<EffectId> {
        let node = self.graph.alloc_id()?;
        if !self.graph.insert(node, RenderNode::Effect(EffectNode::new(processor))) {
            return Self::usage(Error::QueueFull);
        }
        Ok(self.effects.insert(EffectState {
            node,
            owner: None,
            bypass: false,
            wet_dry: 1.0,
        }))
    }

    /// Registers a factory for [`new_custom_effect`](Self::new_custom_effect),
    /// replacing any previous one under the same id.
    pub fn register_custom_effect<F>(&mut self, factory_id: i32, factory: F)
    where
        F: Fn() -> Option<Box<dyn EffectProcessor>> + Send + 'static,
    {
        self.factories.register(factory_id, Box::new(factory));
    }

    /// Returns `false` if nothing was registered under `factory_id`.
    pub fn unregister_custom_effect(&mut self, factory_id: i32) -> bool {
        self.factories.unregister(factory_id)
    }

    /// Destroys an effect, taking it off its bus first.
    pub fn destroy_effect(&mut self, effect: EffectId) -> Result<()> {
        let owner = self.effect(effect)?.owner;
        if !self.graph.has_room(usize::from(owner.is_some()) + 1) {
            return Self::usage(Error::QueueFull);
        }
        if let Some(owner) = owner {
            self.remove_effect(owner, effect)?;
        }
        let Some(state) = self.effects.remove(effect) else {
            return Err(Error::StaleHandle);
        };
        self.graph.free(state.node);
        Ok(())
    }

    pub fn effect_bus_of(&self, effect: EffectId) -> Result<Option<BusId>> {
        Ok(self.effect(effect)?.owner)
    }

    /// Sets a processor parameter; ids are listed on each processor.
    pub fn set_effect_param(&mut self, effect: EffectId, param: i32, value: f32) -> Result<()> {
        let node = self.effect(effect)?.node;
        self.graph.send(Command::Effect(node, EffectMessage::SetParam(param, value)));
        Ok(())
    }

    pub fn reset_effect(&mut self, effect: EffectId) -> Result<()> {
        let node = self.effect(effect)?.node;
        self.graph.send(Command::Effect(node, EffectMessage::Reset));
        Ok(())
    }

    pub fn set_effect_bypassed(&mut self, effect: EffectId, bypass: bool) -> Result<()> {
        let state = self.effect_mut(effect)?;
        if state.bypass != bypass {
            state.bypass = bypass;
            let node = state.node;
            self.graph.send(Command::Effect(node, EffectMessage::SetBypassed(bypass)));
        }
        Ok(())
    }

    pub fn is_effect_bypassed(&self, effect: EffectId) -> Result<bool> {
        Ok(self.effect(effect)?.bypass)
    }

    pub fn set_effect_wet_dry(&mut self, effect: EffectId, wet_dry: f32) -> Result<()> {
        let wet_dry = wet_dry.clamp(0.0, 1.0);
        let state = self.effect_mut(effect)?;
        if state.wet_dry != wet_dry {
            state.wet_dry = wet_dry;
            let node = state.node;
            self.graph.send(Command::Effect(node, EffectMessage::SetWetDry(wet_dry)));
        }
        Ok(())
    }

    pub fn effect_wet_dry(&self, effect: EffectId) -> Result<f32> {
        Ok(self.effect(effect)?.wet_dry)
    }
}

#[cfg(test)]
mod tests {
    use crate::{EffectType, Engine, EngineConfig, Error};

    fn engine() -> Engine {
        Engine::new(EngineConfig::default().with_sample_rate(1000).with_max_nodes(32)).unwrap()
    }

    #[test]
    fn self_output_is_rejected() {
        let mut e = engine();
        let a = e.new_effect_bus().unwrap();
        assert!(matches!(e.set_output_bus(a, Some(a)), Err(Error::BusOutputToSelf)));
        assert_eq!(e.output_bus(a).unwrap(), None);
        let global = e.global_effect_bus();
        assert!(matches!(e.set_output_bus(global, Some(a)), Err(Error::GlobalBusOutput)));
        assert!(matches!(e.destroy_effect_bus(global), Err(Error::DestroyGlobalBus)));
    }

    #[test]
    fn destroying_a_bus_unhooks_its_inputs() {
        let mut e = engine();
        let a = e.new_effect_bus().unwrap();
        let b = e.new_effect_bus().unwrap();
        e.set_output_bus(a, Some(b)).unwrap();
        let fx = e.new_effect(EffectType::Distortion).unwrap();
        e.add_effect(b, fx).unwrap();

        e.destroy_effect_bus(b).unwrap();
        assert_eq!(e.output_bus(a).unwrap(), None);
        assert_eq!(e.effect_bus_of(fx).unwrap(), None);
        assert!(matches!(e.output_bus(b), Err(Error::StaleHandle)));
    }

    #[test]
    fn effects_move_between_buses() {
        let mut e = engine();
        let a = e.new_effect_bus().unwrap();
        let b = e.new_effect_bus().unwrap();
        let fx = e.new_effect(EffectType::RingMod).unwrap();
        e.add_effect(a, fx).unwrap();
        e.add_effect(b, fx).unwrap();
        assert!(e.bus_effects(a).unwrap().is_empty());
        assert_eq!(e.bus_effects(b).unwrap(), &[fx]);

        e.destroy_effect(fx).unwrap();
        assert!(e.bus_effects(b).unwrap().is_empty());
    }

    #[test]
    fn destroying_waits_for_queue_room() {
        let mut e = Engine::new(
            EngineConfig::default()
                .with_sample_rate(1000)
                .with_max_nodes(32)
                .with_max_audio_tasks(8),
        )
        .unwrap();
        let bus = e.new_effect_bus().unwrap();
        let fx = e.new_effect(EffectType::Distortion).unwrap();
        e.add_effect(bus, fx).unwrap();
        for i in 0..8 {
            e.set_effect_wet_dry(fx, i as f32 / 8.0).unwrap();
        }

        assert!(matches!(e.destroy_effect(fx), Err(Error::QueueFull)));
        assert_eq!(e.effect_bus_of(fx).unwrap(), Some(bus));
        assert!(matches!(e.destroy_effect_bus(bus), Err(Error::QueueFull)));
        assert_eq!(e.bus_effects(bus).unwrap(), &[fx]);
        assert!(matches!(e.new_effect_bus(), Err(Error::QueueFull)));

        e.render(&mut [0.0; 64]);
        e.destroy_effect_bus(bus).unwrap();
        e.destroy_effect(fx).unwrap();
        assert!(matches!(e.effect_bus_of(fx), Err(Error::StaleHandle)));
    }

    #[test]
    fn custom_effects_need_a_factory() {
        let mut e = engine();
        assert!(matches!(e.new_custom_effect(3), Err(Error::UnknownEffect(3))));
        e.register_custom_effect(3, || Some(EffectType::BitCrusher.new_processor()));
        assert!(e.new_custom_effect(3).is_ok());
        assert!(e.unregister_custom_effect(3));
        assert!(!e.unregister_custom_effect(3));
    }

    #[test]
    fn wet_dry_is_clamped() {
        let mut e = engine();
        let fx = e.new_effect(EffectType::BiquadFilter).unwrap();
        e.set_effect_wet_dry(fx, 1.5).unwrap();
        assert_eq!(e.effect_wet_dry(fx).unwrap(), 1.0);
        let bus = e.global_effect_bus();
        e.set_bus_wet_dry(bus, -1.0).unwrap();
        assert_eq!(e.bus_wet_dry(bus).unwrap(), 0.0);
    }
}
