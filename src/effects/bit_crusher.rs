//! Bit-depth reduction with sample-and-hold.

use super::EffectProcessor;
use crate::node::ProcessContext;

pub const PARAM_BIT_RESOLUTION: i32 = 0;
pub const PARAM_HOLD_MS: i32 = 1;

const FULL_SCALE: f32 = (1 << 24) as f32;

/// Quantizes samples to a reduced bit depth and holds each one for
/// `hold_ms`, giving the classic lo-fi sound.
pub struct BitCrusher {
    bits: u32,
    hold_ms: f32,
    held: [f32; 2],
    hold_left: usize,
}

impl BitCrusher {
    pub fn new() -> Self {
        Self {
            bits: 8,
            hold_ms: 1.0,
            held: [0.0; 2],
            hold_left: 0,
        }
    }
}

impl Default for BitCrusher {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectProcessor for BitCrusher {
    fn set_param(&mut self, id: i32, value: f32) {
        match id {
            PARAM_BIT_RESOLUTION => self.bits = value.clamp(1.0, 24.0) as u32,
            PARAM_HOLD_MS => self.hold_ms = value.max(0.0),
            _ => tracing::error!("Bit Crusher effect: unknown param ID {id}"),
        }
    }

    fn reset(&mut self) {
        self.hold_left = 0;
    }

    fn process(&mut self, ctx: &ProcessContext, buf: &mut [f32], frames: usize) {
        let hold_frames = (ctx.sample_rate as f32 * self.hold_ms * 0.001) as usize;
        let shift = 24 - self.bits;
        if hold_frames == 0 && shift == 0 {
            return;
        }
        let mask = (u32::MAX << shift) as i32;

        for frame in buf[..frames * 2].chunks_exact_mut(2) {
            if self.hold_left > 0 {
                frame.copy_from_slice(&self.held);
                self.hold_left -= 1;
            } else {
                for (s, held) in frame.iter_mut().zip(self.held.iter_mut()) {
                    let v = ((*s * FULL_SCALE) as i32 & mask) as f32 / FULL_SCALE;
                    *s = v;
                    *held = v;
                }
                self.hold_left = hold_frames;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CTX: ProcessContext = ProcessContext {
        sample_rate: 1000,
        buffer_size: 8,
    };

    #[test]
    fn quantizes_to_one_bit() {
        let mut bc = BitCrusher::new();
        bc.set_param(PARAM_BIT_RESOLUTION, 1.0);
        bc.set_param(PARAM_HOLD_MS, 0.0);
        let mut buf = [0.3, -0.3, 0.7, 0.0];
        bc.process(&CTX, &mut buf, 2);
        // only the sign bit and the 0.5 bit survive
        assert_eq!(buf, [0.0, -0.5, 0.5, 0.0]);
    }

    #[test]
    fn holds_for_hold_frames() {
        let mut bc = BitCrusher::new();
        bc.set_param(PARAM_BIT_RESOLUTION, 24.0);
        // 2 ms at 1 kHz: each sample repeats for 2 more frames
        bc.set_param(PARAM_HOLD_MS, 2.0);
        let mut buf = [0.5, 0.5, 0.1, 0.1, 0.2, 0.2, 0.25, 0.25];
        bc.process(&CTX, &mut buf, 4);
        assert_eq!(buf, [0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.25, 0.25]);
    }

    #[test]
    fn full_resolution_without_hold_is_a_no_op() {
        let mut bc = BitCrusher::new();
        bc.set_param(PARAM_BIT_RESOLUTION, 99.0);
        bc.set_param(PARAM_HOLD_MS, 0.0);
        let mut buf = [0.123, -0.456];
        bc.process(&CTX, &mut buf, 1);
        assert_eq!(buf, [0.123, -0.456]);
    }
}
