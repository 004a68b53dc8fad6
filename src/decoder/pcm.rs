//! Linear PCM decoding (i8, i16 and f32, little-endian).

use super::{AudioFormat, Decoder};
use crate::source::AudioSource;

/// Decodes PCM, where one block is one frame.
pub struct PcmDecoder {
    format: AudioFormat,
    channels: usize,
    scratch: Box<[u8]>,
}

impl PcmDecoder {
    /// `max_frames` bounds how much a single [`decode`](Decoder::decode) call reads.
    pub fn new(format: AudioFormat, channels: u8, max_frames: usize) -> Self {
        let channels = channels.clamp(1, 2) as usize;
        let bytes = format.sample_bytes().unwrap_or(2) * channels * max_frames;
        Self {
            format,
            channels,
            scratch: vec![0; bytes].into_boxed_slice(),
        }
    }

    #[inline]
    fn frame_bytes(&self) -> usize {
        self.format.sample_bytes().unwrap_or(2) * self.channels
    }
}

impl Decoder for PcmDecoder {
    fn decode(&mut self, source: &mut dyn AudioSource, out: &mut [f32], frames: usize) -> usize {
        if source.is_done() || self.format == AudioFormat::Adpcm {
            return 0;
        }
        let frame_bytes = self.frame_bytes();
        let frames = frames
            .min(self.scratch.len() / frame_bytes)
            .min(out.len() / self.channels);
        let read = source.read(&mut self.scratch[..frames * frame_bytes], frames);
        let samples = read * self.channels;
        let bytes = &self.scratch[..read * frame_bytes];

        match self.format {
            AudioFormat::PcmI16 => {
                for (o, b) in out[..samples].iter_mut().zip(bytes.chunks_exact(2)) {
                    *o = i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0;
                }
            }
            AudioFormat::PcmI8 => {
                for (o, b) in out[..samples].iter_mut().zip(bytes) {
                    *o = *b as i8 as f32 / 128.0;
                }
            }
            AudioFormat::PcmF32 => {
                for (o, b) in out[..samples].iter_mut().zip(bytes.chunks_exact(4)) {
                    *o = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                }
            }
            AudioFormat::Adpcm => {}
        }
        read
    }

    fn is_done(&self, source: &dyn AudioSource) -> bool {
        source.is_done()
    }

    // block == frame for PCM
    fn set_frame_pos(&mut self, source: &mut dyn AudioSource, frame: u32) {
        source.set_block_pos(frame);
    }

    fn frame_pos(&self, source: &dyn AudioSource) -> u32 {
        source.block_pos()
    }

    fn num_frames(&self, source: &dyn AudioSource) -> Option<u32> {
        source.num_blocks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::SampleInfo;
    use crate::source::BufferSource;
    use std::sync::Arc;

    #[test]
    fn decodes_i16_stereo() {
        let samples: [i16; 4] = [0, 16384, -32768, 32767];
        let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let info = SampleInfo::pcm(AudioFormat::PcmI16, 2, 48000, Some(2));
        let mut source = BufferSource::new(info, Arc::from(data));
        let mut dec = PcmDecoder::new(AudioFormat::PcmI16, 2, 16);

        let mut out = [9.0f32; 8];
        assert_eq!(dec.decode(&mut source, &mut out, 4), 2);
        assert_eq!(&out[..4], &[0.0, 0.5, -1.0, 32767.0 / 32768.0]);
        assert!(dec.is_done(&source));
        assert_eq!(dec.decode(&mut source, &mut out, 4), 0);

        dec.set_frame_pos(&mut source, 1);
        assert_eq!(dec.frame_pos(&source), 1);
        assert_eq!(dec.num_frames(&source), Some(2));
    }

    #[test]
    fn decodes_i8_and_f32() {
        let info = SampleInfo::pcm(AudioFormat::PcmI8, 1, 8000, Some(2));
        let mut source = BufferSource::new(info, Arc::from(vec![64u8, 0xC0]));
        let mut dec = PcmDecoder::new(AudioFormat::PcmI8, 1, 4);
        let mut out = [0.0f32; 2];
        assert_eq!(dec.decode(&mut source, &mut out, 2), 2);
        assert_eq!(out, [0.5, -0.5]);

        let data: Vec<u8> = [0.25f32, -0.75].iter().flat_map(|s| s.to_le_bytes()).collect();
        let info = SampleInfo::pcm(AudioFormat::PcmF32, 1, 8000, Some(2));
        let mut source = BufferSource::new(info, Arc::from(data));
        let mut dec = PcmDecoder::new(AudioFormat::PcmF32, 1, 4);
        assert_eq!(dec.decode(&mut source, &mut out, 2), 2);
        assert_eq!(out, [0.25, -0.75]);
    }
}
