//! Linear-interpolation resampler.

/// Resamples one slice at a time, carrying the last input frame across calls
/// so consecutive slices join without a discontinuity.
#[derive(Clone, Copy, Debug, Default)]
pub struct Resampler {
    last: [f32; 2],
}

impl Resampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resamples `in_frames` frames of `input` into `out_frames` frames of `output`.
    ///
    /// `channels` is 1 or 2. Output frame `t` interpolates between input frames
    /// `floor(t * in/out) - 1` and `floor(t * in/out)`, where frame `-1` is the
    /// last frame of the previous call.
    pub fn resample(&mut self, input: &[f32], in_frames: usize, output: &mut [f32], out_frames: usize, channels: usize) {
        if in_frames == 0 || out_frames == 0 {
            return;
        }
        let ch = channels.clamp(1, 2);
        debug_assert!(input.len() >= in_frames * ch);
        debug_assert!(output.len() >= out_frames * ch);

        let factor = in_frames as f32 / out_frames as f32;
        for (to, frame) in output[..out_frames * ch].chunks_exact_mut(ch).enumerate() {
            let ti = to as f32 * factor;
            let ti0 = (ti as usize).min(in_frames - 1);
            let frac = ti - ti0 as f32;
            for (c, out) in frame.iter_mut().enumerate() {
                let s0 = if ti0 == 0 { self.last[c] } else { input[(ti0 - 1) * ch + c] };
                let s1 = input[ti0 * ch + c];
                *out = s0 + frac * (s1 - s0);
            }
        }

        for c in 0..ch {
            self.last[c] = input[(in_frames - 1) * ch + c];
        }
    }

    pub fn reset_state(&mut self) {
        self.last = [0.0; 2];
    }

    pub fn copy_state(&mut self, other: &Resampler) {
        self.last = other.last;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsample_interpolates_from_previous_slice() {
        let mut r = Resampler::new();
        let input = [1.0, 1.0];
        let mut out = [0.0; 4];
        r.resample(&input, 2, &mut out, 4, 1);
        // starts from the zeroed carry sample
        assert_eq!(out, [0.0, 0.5, 1.0, 1.0]);

        let mut out = [0.0; 2];
        r.resample(&[3.0], 1, &mut out, 2, 1);
        assert_eq!(out, [1.0, 2.0]);
    }

    #[test]
    fn stereo_channels_stay_separate() {
        let mut r = Resampler::new();
        let input = [1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0];
        let mut out = [0.0; 4];
        r.resample(&input, 4, &mut out, 2, 2);
        assert_eq!(out, [0.0, 0.0, 1.0, -1.0]);
    }
}
