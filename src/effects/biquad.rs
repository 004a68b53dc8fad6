//! Second-order IIR filter using the RBJ audio-EQ cookbook coefficients.

use core::f32::consts::TAU;

use super::EffectProcessor;
use crate::node::ProcessContext;

pub const PARAM_FILTER_TYPE: i32 = 0;
pub const PARAM_FREQ: i32 = 1;
pub const PARAM_Q: i32 = 2;
/// Gain in dB; only the peak and shelf types use it.
pub const PARAM_GAIN: i32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FilterType {
    LowPass = 0,
    HighPass = 1,
    BandPass = 2,
    Notch = 3,
    Peak = 4,
    LowShelf = 5,
    HighShelf = 6,
}

impl FilterType {
    /// Out-of-range values clamp to the nearest type.
    pub fn from_param(value: f32) -> Self {
        match value.clamp(0.0, 6.0) as u8 {
            0 => FilterType::LowPass,
            1 => FilterType::HighPass,
            2 => FilterType::BandPass,
            3 => FilterType::Notch,
            4 => FilterType::Peak,
            5 => FilterType::LowShelf,
            _ => FilterType::HighShelf,
        }
    }
}

/// Normalized coefficients, already divided by `a0`.
#[derive(Clone, Copy, Debug, Default)]
struct Coeffs {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Coeffs {
    fn calc(ty: FilterType, freq: f32, q: f32, gain_db: f32, sample_rate: u32) -> Self {
        let w0 = TAU * freq / sample_rate as f32;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        let a = 10f32.powf(gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match ty {
            FilterType::LowPass => {
                let b0 = (1.0 - cos) * 0.5;
                (b0, 1.0 - cos, b0, 1.0 + alpha, -2.0 * cos, 1.0 - alpha)
            }
            FilterType::HighPass => {
                let b0 = (1.0 + cos) * 0.5;
                (b0, -(1.0 + cos), b0, 1.0 + alpha, -2.0 * cos, 1.0 - alpha)
            }
            FilterType::BandPass => (alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cos, 1.0 - alpha),
            FilterType::Notch => (1.0, -2.0 * cos, 1.0, 1.0 + alpha, -2.0 * cos, 1.0 - alpha),
            FilterType::Peak => (
                1.0 + alpha * a,
                -2.0 * cos,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos,
                1.0 - alpha / a,
            ),
            FilterType::LowShelf => {
                let x = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos + x),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos),
                    a * ((a + 1.0) - (a - 1.0) * cos - x),
                    (a + 1.0) + (a - 1.0) * cos + x,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos),
                    (a + 1.0) + (a - 1.0) * cos - x,
                )
            }
            FilterType::HighShelf => {
                let x = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos + x),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos),
                    a * ((a + 1.0) + (a - 1.0) * cos - x),
                    (a + 1.0) - (a - 1.0) * cos + x,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos),
                    (a + 1.0) - (a - 1.0) * cos - x,
                )
            }
        };

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Direct form I history for one channel.
#[derive(Clone, Copy, Debug, Default)]
struct History {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

pub struct BiquadFilter {
    ty: FilterType,
    freq: f32,
    q: f32,
    gain_db: f32,
    coeffs: Coeffs,
    /// Sample rate the coefficients were computed for; `None` forces a recalc.
    calc_rate: Option<u32>,
    history: [History; 2],
}

impl BiquadFilter {
    pub fn new() -> Self {
        Self {
            ty: FilterType::LowPass,
            freq: 2000.0,
            q: 1.0,
            gain_db: 1.0,
            coeffs: Coeffs::default(),
            calc_rate: None,
            history: [History::default(); 2],
        }
    }

    pub fn filter_type(&self) -> FilterType {
        self.ty
    }
}

impl Default for BiquadFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectProcessor for BiquadFilter {
    fn set_param(&mut self, id: i32, value: f32) {
        match id {
            PARAM_FILTER_TYPE => self.ty = FilterType::from_param(value),
            PARAM_FREQ => self.freq = value.max(0.01),
            PARAM_Q => self.q = value.max(0.01),
            PARAM_GAIN => self.gain_db = value,
            _ => {
                tracing::error!("Biquad Filter effect: unknown param ID {id}");
                return;
            }
        }
        self.calc_rate = None;
    }

    fn reset(&mut self) {
        self.history = [History::default(); 2];
    }

    fn process(&mut self, ctx: &ProcessContext, buf: &mut [f32], frames: usize) {
        if self.calc_rate != Some(ctx.sample_rate) {
            self.coeffs = Coeffs::calc(self.ty, self.freq, self.q, self.gain_db, ctx.sample_rate);
            self.calc_rate = Some(ctx.sample_rate);
        }
        let c = self.coeffs;

        for frame in buf[..frames * 2].chunks_exact_mut(2) {
            for (x0, h) in frame.iter_mut().zip(self.history.iter_mut()) {
                let y0 = c.b0 * *x0 + c.b1 * h.x1 + c.b2 * h.x2 - c.a1 * h.y1 - c.a2 * h.y2;
                h.x2 = h.x1;
                h.x1 = *x0;
                h.y2 = h.y1;
                h.y1 = y0;
                *x0 = y0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CTX: ProcessContext = ProcessContext {
        sample_rate: 48000,
        buffer_size: 256,
    };

    fn settle(filter: &mut BiquadFilter, input: impl Fn(usize) -> f32) -> f32 {
        let mut peak = 0.0f32;
        for pass in 0..8 {
            let mut buf: Vec<f32> = (0..512).map(|i| input(pass * 256 + i / 2)).collect();
            filter.process(&CTX, &mut buf, 256);
            if pass == 7 {
                peak = buf.iter().fold(0.0, |m, s| m.max(s.abs()));
            }
        }
        peak
    }

    #[test]
    fn lowpass_passes_dc_and_blocks_nyquist() {
        let mut lp = BiquadFilter::new();
        assert!((settle(&mut lp, |_| 0.5) - 0.5).abs() < 1e-3);

        let mut lp = BiquadFilter::new();
        let nyquist = settle(&mut lp, |n| if n % 2 == 0 { 0.5 } else { -0.5 });
        assert!(nyquist < 0.01, "{nyquist}");
    }

    #[test]
    fn highpass_blocks_dc() {
        let mut hp = BiquadFilter::new();
        hp.set_param(PARAM_FILTER_TYPE, 1.0);
        assert_eq!(hp.filter_type(), FilterType::HighPass);
        assert!(settle(&mut hp, |_| 0.5) < 1e-3);
    }

    #[test]
    fn type_param_clamps() {
        assert_eq!(FilterType::from_param(-3.0), FilterType::LowPass);
        assert_eq!(FilterType::from_param(42.0), FilterType::HighShelf);
        assert_eq!(FilterType::from_param(4.0), FilterType::Peak);
    }

    #[test]
    fn reset_clears_history() {
        let mut lp = BiquadFilter::new();
        let mut buf = [1.0f32; 8];
        lp.process(&CTX, &mut buf, 4);
        lp.reset();
        let mut silence = [0.0f32; 8];
        lp.process(&CTX, &mut silence, 4);
        assert_eq!(silence, [0.0; 8]);
    }
}
