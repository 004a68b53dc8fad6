//! Sample formats and the decoders that turn encoded blocks into `f32`.

mod pcm;

pub use pcm::PcmDecoder;

use crate::error::{Error, Result};
use crate::source::AudioSource;

/// Encoding of a sample's data blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AudioFormat {
    PcmI16 = 0,
    PcmI8 = 1,
    Adpcm = 2,
    PcmF32 = 3,
}

impl AudioFormat {
    /// Bytes per mono PCM sample, `None` for block-compressed formats.
    pub fn sample_bytes(self) -> Option<usize> {
        match self {
            AudioFormat::PcmI16 => Some(2),
            AudioFormat::PcmI8 => Some(1),
            AudioFormat::PcmF32 => Some(4),
            AudioFormat::Adpcm => None,
        }
    }
}

/// Layout and defaults of a sample or stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleInfo {
    pub format: AudioFormat,
    pub channels: u8,
    pub sample_rate: u32,
    /// Total blocks, if known.
    pub blocks: Option<u32>,
    pub block_bytes: u16,
    pub block_frames: u16,
    /// Default volume, `u16::MAX` is unity.
    pub volume: u16,
    /// Default pan, `i16::MAX` is hard right.
    pub pan: i16,
    pub loop_start: u32,
    /// Loop end frame, `None` for the end of the data.
    pub loop_end: Option<u32>,
    /// Default loop count; -1 loops forever.
    pub loop_count: i32,
}

impl SampleInfo {
    /// Info for interleaved PCM, one frame per block.
    pub fn pcm(format: AudioFormat, channels: u8, sample_rate: u32, frames: Option<u32>) -> Self {
        let channels = channels.clamp(1, 2);
        let bytes = format.sample_bytes().unwrap_or(2) * channels as usize;
        Self {
            format,
            channels,
            sample_rate,
            blocks: frames,
            block_bytes: bytes as u16,
            block_frames: 1,
            volume: u16::MAX,
            pan: 0,
            loop_start: 0,
            loop_end: None,
            loop_count: 0,
        }
    }

    pub fn num_frames(&self) -> Option<u32> {
        self.blocks.map(|b| b * self.block_frames as u32)
    }

    pub fn frames_to_ms(&self, frames: u32) -> f32 {
        frames as f32 * 1000.0 / self.sample_rate as f32
    }

    pub fn ms_to_frames(&self, ms: f32) -> u32 {
        (ms * 0.001 * self.sample_rate as f32).round().max(0.0) as u32
    }

    pub fn default_volume(&self) -> f32 {
        self.volume as f32 / u16::MAX as f32
    }

    pub fn default_pan(&self) -> f32 {
        (self.pan as f32 / i16::MAX as f32).clamp(-1.0, 1.0)
    }
}

/// Converts a source's blocks to interleaved `f32` frames.
///
/// The decoder borrows its source for each call instead of owning it, so the
/// source node can hand both to the render path independently.
pub trait Decoder: Send {
    /// Decodes up to `frames` frames into `out`, returning the number decoded.
    fn decode(&mut self, source: &mut dyn AudioSource, out: &mut [f32], frames: usize) -> usize;

    fn is_done(&self, source: &dyn AudioSource) -> bool;

    fn set_frame_pos(&mut self, source: &mut dyn AudioSource, frame: u32);

    fn frame_pos(&self, source: &dyn AudioSource) -> u32;

    fn num_frames(&self, source: &dyn AudioSource) -> Option<u32>;
}

/// Picks a decoder for `info`, with scratch space for `max_frames` frames.
pub fn new_decoder(info: &SampleInfo, max_frames: usize) -> Result<Box<dyn Decoder>> {
    match info.format {
        AudioFormat::PcmI16 | AudioFormat::PcmI8 | AudioFormat::PcmF32 => {
            Ok(Box::new(PcmDecoder::new(info.format, info.channels, max_frames)))
        }
        AudioFormat::Adpcm => Err(Error::UnsupportedFormat("ADPCM".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_info_layout() {
        let info = SampleInfo::pcm(AudioFormat::PcmI16, 2, 44100, Some(100));
        assert_eq!(info.block_bytes, 4);
        assert_eq!(info.num_frames(), Some(100));
        assert_eq!(info.ms_to_frames(1000.0), 44100);
        assert!((info.default_volume() - 1.0).abs() < 1e-6);
        assert_eq!(info.default_pan(), 0.0);
    }

    #[test]
    fn adpcm_is_unsupported() {
        let info = SampleInfo {
            format: AudioFormat::Adpcm,
            ..SampleInfo::pcm(AudioFormat::PcmI16, 1, 48000, None)
        };
        assert!(matches!(new_decoder(&info, 64), Err(Error::UnsupportedFormat(_))));
    }
}
