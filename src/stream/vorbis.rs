//! Ogg Vorbis streaming via `lewton`.

use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use lewton::inside_ogg::OggStreamReader;

use super::AudioStream;
use crate::decoder::{AudioFormat, SampleInfo};
use crate::error::{Error, Result};

/// Decodes an Ogg Vorbis file to 16-bit PCM on the file thread.
///
/// The length isn't known up front, so looping to the end relies on the
/// reader hitting EOF. Seeks land on the nearest page boundary.
pub struct VorbisStream {
    path: PathBuf,
    reader: Option<OggStreamReader<BufReader<File>>>,
    channels: usize,
    pending: VecDeque<i16>,
    pos: u32,
}

impl VorbisStream {
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            reader: None,
            channels: 0,
            pending: VecDeque::new(),
            pos: 0,
        }
    }
}

impl AudioStream for VorbisStream {
    fn init(&mut self) -> Result<SampleInfo> {
        let file = File::open(&self.path)?;
        let reader = OggStreamReader::new(BufReader::new(file))?;
        let channels = reader.ident_hdr.audio_channels;
        if channels == 0 || channels > 2 {
            return Err(Error::UnsupportedFormat(format!(
                "{} channels in {}",
                channels,
                self.path.display()
            )));
        }
        let info = SampleInfo::pcm(
            AudioFormat::PcmI16,
            channels,
            reader.ident_hdr.audio_sample_rate,
            None,
        );
        self.channels = channels as usize;
        self.reader = Some(reader);
        self.pending.clear();
        self.pos = 0;
        Ok(info)
    }

    fn read(&mut self, buf: &mut [u8], blocks: usize) -> Result<usize> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(0);
        };
        let want = (blocks * self.channels).min(buf.len() / 2);
        while self.pending.len() < want {
            match reader.read_dec_packet_itl()? {
                Some(samples) => self.pending.extend(samples),
                None => break,
            }
        }

        let frames = want.min(self.pending.len()) / self.channels;
        for (chunk, s) in buf
            .chunks_exact_mut(2)
            .zip(self.pending.drain(..frames * self.channels))
        {
            chunk.copy_from_slice(&s.to_le_bytes());
        }
        self.pos += frames as u32;
        Ok(frames)
    }

    fn num_blocks(&self) -> Option<u32> {
        None
    }

    fn set_block_pos(&mut self, block: u32) -> Result<()> {
        if let Some(reader) = self.reader.as_mut() {
            reader.seek_absgp_pg(block as u64)?;
            self.pending.clear();
            self.pos = block;
        }
        Ok(())
    }

    fn block_pos(&self) -> u32 {
        self.pos
    }
}
