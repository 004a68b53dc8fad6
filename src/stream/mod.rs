//! The I/O seam behind stream sources.
//!
//! An [`AudioStream`] is opened and read only on the file thread, so
//! implementations are free to block.

#[cfg(feature = "vorbis_src")]
mod vorbis;

#[cfg(feature = "vorbis_src")]
pub use vorbis::VorbisStream;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader};

use crate::decoder::{AudioFormat, SampleInfo};
use crate::error::{Error, Result};

/// A seekable source of encoded blocks.
///
/// Reads behave as if the stream held nothing but the audio data described
/// by the [`SampleInfo`] returned from [`init`](Self::init).
pub trait AudioStream: Send {
    /// Opens the stream and reads its format.
    fn init(&mut self) -> Result<SampleInfo>;

    /// Reads up to `blocks` blocks into `buf`, returning the number read.
    fn read(&mut self, buf: &mut [u8], blocks: usize) -> Result<usize>;

    /// Total blocks, if the stream knows.
    fn num_blocks(&self) -> Option<u32>;

    fn set_block_pos(&mut self, block: u32) -> Result<()>;

    fn block_pos(&self) -> u32;
}

/// A stream over bytes already in memory.
pub struct MemoryStream {
    info: SampleInfo,
    data: Vec<u8>,
    pos: usize,
}

impl MemoryStream {
    pub fn new(info: SampleInfo, data: Vec<u8>) -> Self {
        Self { info, data, pos: 0 }
    }

    fn block_bytes(&self) -> usize {
        self.info.block_bytes.max(1) as usize
    }
}

impl AudioStream for MemoryStream {
    fn init(&mut self) -> Result<SampleInfo> {
        self.info.blocks = Some((self.data.len() / self.block_bytes()) as u32);
        Ok(self.info)
    }

    fn read(&mut self, buf: &mut [u8], blocks: usize) -> Result<usize> {
        let bb = self.block_bytes();
        let bytes = (blocks * bb)
            .min(buf.len() - buf.len() % bb)
            .min(self.data.len() - self.pos);
        buf[..bytes].copy_from_slice(&self.data[self.pos..self.pos + bytes]);
        self.pos += bytes;
        Ok(bytes / bb)
    }

    fn num_blocks(&self) -> Option<u32> {
        Some((self.data.len() / self.block_bytes()) as u32)
    }

    fn set_block_pos(&mut self, block: u32) -> Result<()> {
        self.pos = (block as usize * self.block_bytes()).min(self.data.len());
        Ok(())
    }

    fn block_pos(&self) -> u32 {
        (self.pos / self.block_bytes()) as u32
    }
}

/// A WAV file read with `hound`.
///
/// 16- and 8-bit integer files stream as-is; everything else is converted to
/// `f32`.
pub struct WavStream {
    path: PathBuf,
    reader: Option<WavReader<BufReader<File>>>,
    spec: Option<hound::WavSpec>,
    pos: u32,
}

impl WavStream {
    /// The file is not opened until the file thread calls [`init`](AudioStream::init).
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            reader: None,
            spec: None,
            pos: 0,
        }
    }

    fn format(spec: &hound::WavSpec) -> AudioFormat {
        match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Int, 16) => AudioFormat::PcmI16,
            (SampleFormat::Int, 8) => AudioFormat::PcmI8,
            _ => AudioFormat::PcmF32,
        }
    }
}

impl AudioStream for WavStream {
    fn init(&mut self) -> Result<SampleInfo> {
        let reader = WavReader::open(&self.path)?;
        let spec = reader.spec();
        if spec.channels == 0 || spec.channels > 2 {
            return Err(Error::UnsupportedFormat(format!(
                "{} channels in {}",
                spec.channels,
                self.path.display()
            )));
        }
        let info = SampleInfo::pcm(
            Self::format(&spec),
            spec.channels as u8,
            spec.sample_rate,
            Some(reader.duration()),
        );
        tracing::debug!("opened {} ({:?})", self.path.display(), info);
        self.reader = Some(reader);
        self.spec = Some(spec);
        self.pos = 0;
        Ok(info)
    }

    fn read(&mut self, buf: &mut [u8], blocks: usize) -> Result<usize> {
        let (Some(reader), Some(spec)) = (self.reader.as_mut(), self.spec) else {
            return Ok(0);
        };
        let channels = spec.channels as usize;
        let format = Self::format(&spec);
        let sample_bytes = format.sample_bytes().unwrap_or(4);
        let max_samples = (blocks * channels).min(buf.len() / sample_bytes);

        let mut n = 0;
        match (format, spec.sample_format) {
            (AudioFormat::PcmI16, _) => {
                for s in reader.samples::<i16>().take(max_samples) {
                    buf[n * 2..n * 2 + 2].copy_from_slice(&s?.to_le_bytes());
                    n += 1;
                }
            }
            (AudioFormat::PcmI8, _) => {
                for s in reader.samples::<i8>().take(max_samples) {
                    buf[n] = s? as u8;
                    n += 1;
                }
            }
            (_, SampleFormat::Float) => {
                for s in reader.samples::<f32>().take(max_samples) {
                    buf[n * 4..n * 4 + 4].copy_from_slice(&s?.to_le_bytes());
                    n += 1;
                }
            }
            (_, SampleFormat::Int) => {
                let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
                for s in reader.samples::<i32>().take(max_samples) {
                    let v = s? as f32 * scale;
                    buf[n * 4..n * 4 + 4].copy_from_slice(&v.to_le_bytes());
                    n += 1;
                }
            }
        }

        let frames = n / channels;
        self.pos += frames as u32;
        Ok(frames)
    }

    fn num_blocks(&self) -> Option<u32> {
        self.reader.as_ref().map(WavReader::duration)
    }

    fn set_block_pos(&mut self, block: u32) -> Result<()> {
        if let Some(reader) = self.reader.as_mut() {
            let block = block.min(reader.duration());
            reader.seek(block)?;
            self.pos = block;
        }
        Ok(())
    }

    fn block_pos(&self) -> u32 {
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_stream_reads_whole_blocks() {
        let info = SampleInfo::pcm(AudioFormat::PcmI16, 2, 48000, None);
        let mut stream = MemoryStream::new(info, vec![1; 12]);
        assert_eq!(stream.init().unwrap().blocks, Some(3));
        let mut buf = [0u8; 10];
        assert_eq!(stream.read(&mut buf, 4).unwrap(), 2);
        assert_eq!(stream.block_pos(), 2);
        assert_eq!(stream.read(&mut buf, 4).unwrap(), 1);
        stream.set_block_pos(1).unwrap();
        assert_eq!(stream.block_pos(), 1);
    }

    #[test]
    fn wav_stream_reads_and_seeks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..10i16 {
            writer.write_sample(i * 100).unwrap();
        }
        writer.finalize().unwrap();

        let mut stream = WavStream::open(&path);
        let info = stream.init().unwrap();
        assert_eq!(info.format, AudioFormat::PcmI16);
        assert_eq!(info.sample_rate, 22050);
        assert_eq!(stream.num_blocks(), Some(10));

        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf, 4).unwrap(), 4);
        assert_eq!(i16::from_le_bytes([buf[2], buf[3]]), 100);

        stream.set_block_pos(7).unwrap();
        assert_eq!(stream.read(&mut buf, 4).unwrap(), 3);
        assert_eq!(i16::from_le_bytes([buf[0], buf[1]]), 700);
    }

    #[test]
    fn missing_wav_fails_init() {
        let mut stream = WavStream::open("/nonexistent/zirp.wav");
        assert!(stream.init().is_err());
    }
}
