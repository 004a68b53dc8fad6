//! Ring modulator.

use core::f32::consts::{PI, TAU};

use super::EffectProcessor;
use crate::node::ProcessContext;

pub const PARAM_FREQ: i32 = 0;

/// Multiplies the signal by a sine at `freq` Hz.
pub struct RingMod {
    freq: f32,
    /// In [-π, π].
    phase: f32,
}

impl RingMod {
    pub fn new() -> Self {
        Self {
            freq: 500.0,
            phase: 0.0,
        }
    }
}

impl Default for RingMod {
    fn default() -> Self {
        Self::new()
    }
}

/// Parabolic sine approximation, valid on [-π, π].
#[inline]
fn fast_sin(x: f32) -> f32 {
    const B: f32 = 4.0 / PI;
    const C: f32 = -4.0 / (PI * PI);
    x * (B + C * x.abs())
}

impl EffectProcessor for RingMod {
    fn set_param(&mut self, id: i32, value: f32) {
        match id {
            PARAM_FREQ => self.freq = value.max(0.0),
            _ => tracing::error!("Ring Mod effect: unknown param ID {id}"),
        }
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }

    fn process(&mut self, ctx: &ProcessContext, buf: &mut [f32], frames: usize) {
        if self.freq == 0.0 {
            return;
        }
        let step = TAU * self.freq / ctx.sample_rate as f32;
        let mut phase = self.phase;
        for frame in buf[..frames * 2].chunks_exact_mut(2) {
            let m = fast_sin(phase);
            frame[0] *= m;
            frame[1] *= m;
            phase += step;
            if phase > PI {
                phase -= TAU;
            }
        }
        self.phase = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_sin_is_close() {
        for i in -10..=10 {
            let x = i as f32 * PI / 10.0;
            assert!((fast_sin(x) - x.sin()).abs() < 0.06, "{x}");
        }
    }

    #[test]
    fn modulates_at_freq() {
        let ctx = ProcessContext {
            sample_rate: 8,
            buffer_size: 8,
        };
        let mut rm = RingMod::new();
        rm.set_param(PARAM_FREQ, 2.0);
        let mut buf = [1.0f32; 16];
        rm.process(&ctx, &mut buf, 8);
        // quarter-period steps: 0, 1, 0, -1 ...
        let left: Vec<f32> = buf.iter().step_by(2).map(|s| (s * 100.0).round() / 100.0).collect();
        assert_eq!(left, [0.0, 1.0, 0.0, -1.0, 0.0, 1.0, 0.0, -1.0]);
    }

    #[test]
    fn zero_freq_is_bypass() {
        let ctx = ProcessContext {
            sample_rate: 48000,
            buffer_size: 2,
        };
        let mut rm = RingMod::new();
        rm.set_param(PARAM_FREQ, 0.0);
        let mut buf = [0.4f32; 4];
        rm.process(&ctx, &mut buf, 2);
        assert_eq!(buf, [0.4; 4]);
    }
}
