//! Sample-level helpers shared by the render nodes.
//!
//! All buffers are interleaved stereo `f32`.

mod resampler;
mod volume;

pub use resampler::Resampler;
pub use volume::{pan_mono, pan_stereo, VolumeMatrix};

use itertools::izip;

/// Adds `src` into `dst`.
#[inline]
pub fn mix(src: &[f32], dst: &mut [f32]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += *s;
    }
}

/// `dst = src * src_vol + dst * dst_vol`.
#[inline]
pub fn mix_vol(src: &[f32], src_vol: f32, dst: &mut [f32], dst_vol: f32) {
    for (d, s) in izip!(dst.iter_mut(), src) {
        *d = *s * src_vol + *d * dst_vol;
    }
}

/// Scales `buf` in place.
#[inline]
pub fn scale(buf: &mut [f32], volume: f32) {
    buf.iter_mut().for_each(|s| *s *= volume);
}

/// Copies `src` into `dst`, clamped to [-1, 1].
///
/// Returns `true` if any sample had to be clamped.
pub fn clamp(src: &[f32], dst: &mut [f32]) -> bool {
    let mut clip = false;
    for (d, s) in izip!(dst.iter_mut(), src) {
        let v = *s;
        *d = if v > 1.0 {
            clip = true;
            1.0
        } else if v < -1.0 {
            clip = true;
            -1.0
        } else {
            v
        };
    }
    clip
}

/// Equal-power crossfade gains `(wet, dry)` for a wet/dry ratio in [0, 1].
#[inline]
pub fn crossfade_gains(wet_dry: f32) -> (f32, f32) {
    let c = 0.5 * (core::f32::consts::PI * wet_dry).cos();
    ((0.5 - c).max(0.0).sqrt(), (0.5 + c).max(0.0).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_reports_clipping() {
        let src = [0.5, -0.5, 1.5, -2.0];
        let mut dst = [0.0; 4];
        assert!(clamp(&src, &mut dst));
        assert_eq!(dst, [0.5, -0.5, 1.0, -1.0]);

        let mut quiet = [0.0; 2];
        assert!(!clamp(&[0.25, -1.0], &mut quiet));
    }

    #[test]
    fn crossfade_endpoints() {
        let (wet, dry) = crossfade_gains(1.0);
        assert!((wet - 1.0).abs() < 1e-6 && dry.abs() < 1e-3);
        let (wet, dry) = crossfade_gains(0.0);
        assert!(wet.abs() < 1e-3 && (dry - 1.0).abs() < 1e-6);
        let (wet, dry) = crossfade_gains(0.5);
        assert!((wet * wet + dry * dry - 1.0).abs() < 1e-5);
    }

    #[test]
    fn mix_vol_blends() {
        let mut dst = [1.0, 1.0];
        mix_vol(&[0.5, -0.5], 2.0, &mut dst, 0.5);
        assert_eq!(dst, [1.5, -0.5]);
    }
}
