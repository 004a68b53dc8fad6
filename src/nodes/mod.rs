//! The render node kinds.

mod effect_bus;
mod mix;
mod source;

pub use effect_bus::{EffectBusMessage, EffectBusNode, EffectMessage, EffectNode};
pub use mix::{MixMessage, MixNode};
pub use source::{SourceMessage, SourceNode, SourceStatus};
