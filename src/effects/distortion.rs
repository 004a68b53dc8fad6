//! Soft-clipping distortion.

use super::EffectProcessor;
use crate::node::ProcessContext;

pub const PARAM_DRIVE: i32 = 0;
pub const PARAM_OFFSET: i32 = 1;

/// Applies `y = x - x³/3` to the offset, driven input.
pub struct Distortion {
    drive: f32,
    offset: f32,
}

impl Distortion {
    pub fn new() -> Self {
        Self {
            drive: 1.0,
            offset: 0.0,
        }
    }
}

impl Default for Distortion {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectProcessor for Distortion {
    fn set_param(&mut self, id: i32, value: f32) {
        match id {
            PARAM_DRIVE => self.drive = value,
            PARAM_OFFSET => self.offset = value,
            _ => tracing::error!("Distortion effect: unknown param ID {id}"),
        }
    }

    fn reset(&mut self) {}

    fn process(&mut self, _ctx: &ProcessContext, buf: &mut [f32], frames: usize) {
        const ONE_THIRD: f32 = 0.33333;
        for s in &mut buf[..frames * 2] {
            let x = (*s + self.offset) * self.drive;
            *s = x - x * x * x * ONE_THIRD;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_clips() {
        let ctx = ProcessContext {
            sample_rate: 48000,
            buffer_size: 2,
        };
        let mut d = Distortion::new();
        let mut buf = [0.0, 1.0, -1.0, 0.5];
        d.process(&ctx, &mut buf, 2);
        assert_eq!(buf[0], 0.0);
        assert!((buf[1] - 0.66667).abs() < 1e-4);
        assert!((buf[2] + 0.66667).abs() < 1e-4);

        d.set_param(PARAM_DRIVE, 2.0);
        d.set_param(PARAM_OFFSET, 0.1);
        let mut buf = [0.0, 0.0];
        d.process(&ctx, &mut buf, 1);
        // x = 0.2
        assert!((buf[0] - (0.2 - 0.008 * 0.33333)).abs() < 1e-6);
    }
}
