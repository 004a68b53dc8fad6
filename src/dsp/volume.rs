//! 2x2 volume matrix and the ramping pan routines that apply it.

use core::f32::consts::{FRAC_PI_2, FRAC_PI_4};
use core::ops::{Mul, MulAssign, Sub};

/// Maps an input frame `(l, r)` to `(l*ll + r*lr, l*rl + r*rr)`.
///
/// Mono sources only use `ll` and `rr`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VolumeMatrix {
    pub ll: f32,
    pub lr: f32,
    pub rl: f32,
    pub rr: f32,
}

impl Default for VolumeMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl VolumeMatrix {
    pub const IDENTITY: Self = Self::new(1.0, 0.0, 0.0, 1.0);
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(ll: f32, lr: f32, rl: f32, rr: f32) -> Self {
        Self { ll, lr, rl, rr }
    }

    /// Equal-power pan for mono sources, `pan` in [-1, 1].
    pub fn mono_pan(pan: f32) -> Self {
        let x = FRAC_PI_4 * (pan.clamp(-1.0, 1.0) + 1.0);
        Self::new(x.cos(), 0.0, 0.0, x.sin())
    }

    /// Balance pan for stereo sources, `pan` in [-1, 1].
    ///
    /// Scaled so total power is 0.5; a full-scale input panned hard won't clip.
    pub fn stereo_pan(pan: f32) -> Self {
        let pan = pan.clamp(-1.0, 1.0);
        let x = FRAC_PI_2 * pan;
        let m = if pan < 0.0 {
            Self::new(1.0, -x.sin(), 0.0, x.cos())
        } else {
            Self::new(x.cos(), 0.0, x.sin(), 1.0)
        };
        m * 0.5
    }

    /// Recovers a mono pan value; only `ll` and `rr` are considered.
    pub fn pan(&self) -> f32 {
        let power = self.rr * self.rr + self.ll * self.ll;
        if power < 0.0001 {
            return 0.0;
        }
        let r_norm = (self.rr.abs() / power.sqrt()).min(1.0);
        r_norm.asin() / FRAC_PI_4 - 1.0
    }

    /// Recovers a stereo (balance) pan value.
    pub fn stereo_pan_value(&self) -> f32 {
        let power = self.power();
        if power < 0.0001 {
            return 0.0;
        }
        let scale_sq = 0.5 / power;
        let right_power = (self.rr * self.rr + self.rl * self.rl) * scale_sq;
        if right_power > 0.25 {
            (4.0 * right_power - 1.0).min(1.0).sqrt().asin() / FRAC_PI_2
        } else {
            -(4.0 * right_power).sqrt().acos() / FRAC_PI_2
        }
    }

    #[inline]
    pub fn power(&self) -> f32 {
        self.ll * self.ll + self.lr * self.lr + self.rl * self.rl + self.rr * self.rr
    }

    /// True when the matrix is a plain gain (no cross terms, equal sides).
    pub fn is_scalar(&self) -> bool {
        self.lr == 0.0 && self.rl == 0.0 && approx(self.ll, self.rr, 0.001)
    }

    pub fn approx_eq(&self, other: &Self, tol: f32) -> bool {
        approx(self.ll, other.ll, tol)
            && approx(self.lr, other.lr, tol)
            && approx(self.rl, other.rl, tol)
            && approx(self.rr, other.rr, tol)
    }
}

impl Mul<f32> for VolumeMatrix {
    type Output = Self;

    fn mul(self, s: f32) -> Self {
        Self::new(self.ll * s, self.lr * s, self.rl * s, self.rr * s)
    }
}

impl MulAssign<f32> for VolumeMatrix {
    fn mul_assign(&mut self, s: f32) {
        *self = *self * s;
    }
}

impl Sub for VolumeMatrix {
    type Output = Self;

    fn sub(self, o: Self) -> Self {
        Self::new(self.ll - o.ll, self.lr - o.lr, self.rl - o.rl, self.rr - o.rr)
    }
}

#[inline]
fn approx(a: f32, b: f32, tol: f32) -> bool {
    (a - b).abs() <= tol
}

/// Per-component linear ramp toward a target.
struct Ramp {
    value: f32,
    inc: f32,
    frames: usize,
}

impl Ramp {
    fn new(from: f32, to: f32, rate: f32) -> Self {
        let diff = to - from;
        let frames = (diff / rate).abs() as usize;
        let inc = if frames > 0 { diff / frames as f32 } else { 0.0 };
        Self { value: from, inc, frames }
    }

    #[inline]
    fn step(&mut self, n: usize) {
        if n < self.frames {
            self.value += self.inc;
        }
    }

    fn finish(&self, n: usize, target: f32) -> f32 {
        if n >= self.frames {
            target
        } else {
            self.value
        }
    }
}

/// Applies `volume` to interleaved stereo `buf` in place, ramping it toward `target`.
///
/// `volume` is updated to where the ramp ended.
pub fn pan_stereo(buf: &mut [f32], target: &VolumeMatrix, volume: &mut VolumeMatrix, rate: f32) {
    let frames = buf.len() / 2;
    if target.approx_eq(volume, 0.001) {
        *volume = *target;
        if volume.is_scalar() {
            let s = (volume.ll + volume.rr) * 0.5;
            if !approx(s, 1.0, 0.001) {
                super::scale(buf, s);
            }
        } else {
            apply_stereo(buf, volume);
        }
        return;
    }

    let mut ll = Ramp::new(volume.ll, target.ll, rate);
    let mut lr = Ramp::new(volume.lr, target.lr, rate);
    let mut rl = Ramp::new(volume.rl, target.rl, rate);
    let mut rr = Ramp::new(volume.rr, target.rr, rate);
    let ramp_frames = ll.frames.max(lr.frames).max(rl.frames).max(rr.frames).min(frames);

    for (n, frame) in buf[..ramp_frames * 2].chunks_exact_mut(2).enumerate() {
        let (l, r) = (frame[0], frame[1]);
        frame[0] = l * ll.value + r * lr.value;
        frame[1] = l * rl.value + r * rr.value;
        ll.step(n);
        lr.step(n);
        rl.step(n);
        rr.step(n);
    }

    *volume = VolumeMatrix::new(
        ll.finish(ramp_frames, target.ll),
        lr.finish(ramp_frames, target.lr),
        rl.finish(ramp_frames, target.rl),
        rr.finish(ramp_frames, target.rr),
    );

    if ramp_frames < frames {
        apply_stereo(&mut buf[ramp_frames * 2..], volume);
    }
}

fn apply_stereo(buf: &mut [f32], m: &VolumeMatrix) {
    for frame in buf.chunks_exact_mut(2) {
        let (l, r) = (frame[0], frame[1]);
        frame[0] = l * m.ll + r * m.lr;
        frame[1] = l * m.rl + r * m.rr;
    }
}

/// Expands mono `input` into interleaved stereo `out`, ramping `volume` toward `target`.
pub fn pan_mono(input: &[f32], out: &mut [f32], target: &VolumeMatrix, volume: &mut VolumeMatrix, rate: f32) {
    let frames = input.len().min(out.len() / 2);
    let (input, out) = (&input[..frames], &mut out[..frames * 2]);

    if approx(volume.ll, target.ll, 0.001) && approx(volume.rr, target.rr, 0.001) {
        *volume = *target;
        apply_mono(input, out, volume.ll, volume.rr);
        return;
    }

    let mut l = Ramp::new(volume.ll, target.ll, rate);
    let mut r = Ramp::new(volume.rr, target.rr, rate);
    let ramp_frames = l.frames.max(r.frames).min(frames);

    for (n, (s, frame)) in input[..ramp_frames].iter().zip(out.chunks_exact_mut(2)).enumerate() {
        frame[0] = s * l.value;
        frame[1] = s * r.value;
        l.step(n);
        r.step(n);
    }

    // cross terms are unused for mono; snap them
    *volume = VolumeMatrix::new(
        l.finish(ramp_frames, target.ll),
        target.lr,
        target.rl,
        r.finish(ramp_frames, target.rr),
    );

    if ramp_frames < frames {
        apply_mono(&input[ramp_frames..], &mut out[ramp_frames * 2..], volume.ll, volume.rr);
    }
}

fn apply_mono(input: &[f32], out: &mut [f32], l: f32, r: f32) {
    for (s, frame) in input.iter().zip(out.chunks_exact_mut(2)) {
        frame[0] = s * l;
        frame[1] = s * r;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_pan_round_trips() {
        for pan in [-1.0, -0.3, 0.0, 0.6, 1.0] {
            let m = VolumeMatrix::mono_pan(pan);
            assert!((m.pan() - pan).abs() < 1e-3, "pan {pan}");
            assert!((m.ll * m.ll + m.rr * m.rr - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn stereo_pan_round_trips() {
        for pan in [-1.0, -0.5, 0.0, 0.4, 1.0] {
            let m = VolumeMatrix::stereo_pan(pan);
            assert!((m.stereo_pan_value() - pan).abs() < 1e-3, "pan {pan}");
        }
        assert!(VolumeMatrix::stereo_pan(0.0).is_scalar());
    }

    #[test]
    fn ramp_reaches_target() {
        let target = VolumeMatrix::IDENTITY * 0.5;
        let mut vol = VolumeMatrix::IDENTITY;
        // 0.5 / 0.1 = 5 ramp frames
        let mut buf = [1.0f32; 16];
        pan_stereo(&mut buf, &target, &mut vol, 0.1);
        assert_eq!(vol, target);
        assert_eq!(buf[0], 1.0);
        assert!((buf[14] - 0.5).abs() < 1e-6);
        assert!(buf[2] < 1.0 && buf[2] > 0.5);
    }

    #[test]
    fn mono_expands_to_stereo() {
        let mut vol = VolumeMatrix::IDENTITY;
        let mut out = [0.0f32; 6];
        pan_mono(&[0.1, 0.2, 0.3], &mut out, &VolumeMatrix::IDENTITY, &mut vol, 0.01);
        assert_eq!(out, [0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    fn partial_ramp_keeps_progress() {
        let target = VolumeMatrix::ZERO;
        let mut vol = VolumeMatrix::IDENTITY;
        let mut buf = [1.0f32; 4];
        pan_stereo(&mut buf, &target, &mut vol, 0.1);
        assert!(vol.ll > 0.7 && vol.ll < 0.9);
    }
}
