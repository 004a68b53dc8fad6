//! Built-in effect processors and the custom effect registry.
//!
//! Processors run on the render thread inside an
//! [`EffectNode`](crate::nodes::EffectNode), always on interleaved stereo
//! and always in place.

mod biquad;
mod bit_crusher;
mod distortion;
mod ring_mod;

pub use biquad::{BiquadFilter, FilterType};
pub use bit_crusher::BitCrusher;
pub use distortion::Distortion;
pub use ring_mod::RingMod;

use hashbrown::HashMap;

use crate::node::ProcessContext;

/// An audio effect.
///
/// `process` is called on the render thread and must not block or allocate.
pub trait EffectProcessor: Send {
    /// Sets a parameter; ids are processor-specific.
    fn set_param(&mut self, id: i32, value: f32);

    /// Clears internal state such as filter history.
    fn reset(&mut self);

    /// Processes `frames` frames of interleaved stereo in `buf`.
    fn process(&mut self, ctx: &ProcessContext, buf: &mut [f32], frames: usize);
}

/// The built-in processors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EffectType {
    BitCrusher,
    RingMod,
    BiquadFilter,
    Distortion,
}

impl EffectType {
    pub fn new_processor(self) -> Box<dyn EffectProcessor> {
        match self {
            EffectType::BitCrusher => Box::new(BitCrusher::new()),
            EffectType::RingMod => Box::new(RingMod::new()),
            EffectType::BiquadFilter => Box::new(BiquadFilter::new()),
            EffectType::Distortion => Box::new(Distortion::new()),
        }
    }
}

/// Builds a custom processor; `None` means the factory failed.
pub type EffectFactory = Box<dyn Fn() -> Option<Box<dyn EffectProcessor>> + Send>;

/// Registry of custom effect factories, keyed by a user-chosen id.
#[derive(Default)]
pub struct EffectFactories {
    factories: HashMap<i32, EffectFactory>,
}

impl EffectFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `id`, replacing any previous one.
    pub fn register(&mut self, id: i32, factory: EffectFactory) {
        if self.factories.insert(id, factory).is_some() {
            tracing::info!("Replacing effect factory function with id {id}");
        }
    }

    /// Removes the factory for `id`. Returns `false` if none was registered.
    pub fn unregister(&mut self, id: i32) -> bool {
        if self.factories.remove(&id).is_some() {
            true
        } else {
            tracing::warn!(
                "Could not unregister effect factory function; none registered with id {id}"
            );
            false
        }
    }

    pub fn contains(&self, id: i32) -> bool {
        self.factories.contains_key(&id)
    }

    /// Runs the factory for `id`.
    pub fn create(&self, id: i32) -> crate::Result<Box<dyn EffectProcessor>> {
        let Some(factory) = self.factories.get(&id) else {
            tracing::error!("Effect factory function not registered for id {id}");
            return Err(crate::Error::UnknownEffect(id));
        };
        factory().ok_or_else(|| {
            tracing::error!("Effect factory function for id {id} returned no processor");
            crate::Error::EffectFactoryFailed(id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silence;

    impl EffectProcessor for Silence {
        fn set_param(&mut self, _id: i32, _value: f32) {}
        fn reset(&mut self) {}
        fn process(&mut self, _ctx: &ProcessContext, buf: &mut [f32], frames: usize) {
            buf[..frames * 2].fill(0.0);
        }
    }

    #[test]
    fn registry_lifecycle() {
        let mut reg = EffectFactories::new();
        assert!(matches!(reg.create(7), Err(crate::Error::UnknownEffect(7))));

        reg.register(7, Box::new(|| Some(Box::new(Silence) as Box<dyn EffectProcessor>)));
        assert!(reg.contains(7));
        let mut fx = reg.create(7).unwrap();
        let mut buf = [1.0; 4];
        fx.process(&ProcessContext { sample_rate: 48000, buffer_size: 2 }, &mut buf, 2);
        assert_eq!(buf, [0.0; 4]);

        reg.register(7, Box::new(|| None));
        assert!(matches!(reg.create(7), Err(crate::Error::EffectFactoryFailed(7))));

        assert!(reg.unregister(7));
        assert!(!reg.unregister(7));
    }

    #[test]
    fn every_builtin_constructs() {
        let ctx = ProcessContext { sample_rate: 48000, buffer_size: 8 };
        for ty in [
            EffectType::BitCrusher,
            EffectType::RingMod,
            EffectType::BiquadFilter,
            EffectType::Distortion,
        ] {
            let mut fx = ty.new_processor();
            let mut buf = [0.25f32; 16];
            fx.process(&ctx, &mut buf, 8);
            assert!(buf.iter().all(|s| s.is_finite()), "{ty:?}");
            fx.reset();
        }
    }
}
