//! Banks of memory-resident samples.
//!
//! A bank owns its sample data; every sound made from it shares that data
//! and keeps its own read position. Unloading a bank stops its sounds and
//! leaves them in place, but they can no longer be played.

use std::path::Path;
use std::sync::Arc;

use crate::arena::arena_key;
use crate::decoder::{new_decoder, AudioFormat, SampleInfo};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::sound::{SoundId, SoundSource};
use crate::source::{BufferSource, SourceKind};

arena_key!(
    /// Handle to a loaded bank.
    BankId
);

/// One sample in a bank.
#[derive(Clone, Debug)]
pub struct BankSample {
    pub name: String,
    pub info: SampleInfo,
    data: Arc<[u8]>,
}

impl BankSample {
    /// Wraps encoded data laid out as `info` describes.
    ///
    /// Fails if the data isn't a whole number of blocks.
    pub fn new(name: impl Into<String>, info: SampleInfo, data: Vec<u8>) -> Result<Self> {
        let block_bytes = info.block_bytes as usize;
        if block_bytes == 0 || data.len() % block_bytes != 0 {
            return Err(Error::UnsupportedFormat(format!(
                "{} bytes of data don't fit {block_bytes}-byte blocks",
                data.len()
            )));
        }
        let mut info = info;
        info.blocks = Some((data.len() / block_bytes) as u32);
        Ok(Self {
            name: name.into(),
            info,
            data: data.into(),
        })
    }

    /// Builds a float PCM sample from interleaved frames.
    pub fn from_f32(name: impl Into<String>, channels: u8, sample_rate: u32, samples: &[f32]) -> Self {
        let channels = channels.clamp(1, 2);
        let frames = samples.len() / channels as usize;
        let data: Vec<u8> = samples[..frames * channels as usize]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let info = SampleInfo::pcm(AudioFormat::PcmF32, channels, sample_rate, Some(frames as u32));
        Self {
            name: name.into(),
            info,
            data: data.into(),
        }
    }

    /// Reads a whole WAV file into a sample named after the file.
    pub fn from_wav(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if spec.channels == 0 || spec.channels > 2 {
            return Err(Error::UnsupportedFormat(format!("{} channels", spec.channels)));
        }
        let channels = spec.channels as u8;

        let (format, data): (AudioFormat, Vec<u8>) = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Int, 16) => (
                AudioFormat::PcmI16,
                reader
                    .samples::<i16>()
                    .map(|s| s.map(i16::to_le_bytes))
                    .collect::<std::result::Result<Vec<_>, _>>()?
                    .concat(),
            ),
            (hound::SampleFormat::Int, 8) => (
                AudioFormat::PcmI8,
                reader
                    .samples::<i8>()
                    .map(|s| s.map(|s| s as u8))
                    .collect::<std::result::Result<Vec<_>, _>>()?,
            ),
            (hound::SampleFormat::Int, bits) => {
                let scale = 1.0 / (1i64 << (bits - 1)) as f32;
                (
                    AudioFormat::PcmF32,
                    reader
                        .samples::<i32>()
                        .map(|s| s.map(|s| (s as f32 * scale).to_le_bytes()))
                        .collect::<std::result::Result<Vec<_>, _>>()?
                        .concat(),
                )
            }
            (hound::SampleFormat::Float, _) => (
                AudioFormat::PcmF32,
                reader
                    .samples::<f32>()
                    .map(|s| s.map(f32::to_le_bytes))
                    .collect::<std::result::Result<Vec<_>, _>>()?
                    .concat(),
            ),
        };
        let info = SampleInfo::pcm(format, channels, spec.sample_rate, None);
        Self::new(name, info, data)
    }

    /// Frames in the sample.
    pub fn frames(&self) -> u32 {
        self.info.num_frames().unwrap_or(0)
    }
}

pub(crate) struct BankState {
    pub name: String,
    pub samples: Vec<BankSample>,
    pub sounds: Vec<SoundId>,
}

impl Engine {
    fn bank(&self, id: BankId) -> Result<&BankState> {
        self.banks.get(id).ok_or(Error::StaleHandle)
    }

    /// Loads `samples` as a bank.
    pub fn load_bank(&mut self, name: &str, samples: Vec<BankSample>) -> BankId {
        tracing::debug!("loading bank \"{name}\" with {} samples", samples.len());
        self.banks.insert(BankState {
            name: name.into(),
            samples,
            sounds: Vec::new(),
        })
    }

    /// Loads each WAV file in `paths` as one sample of a new bank.
    pub fn load_bank_wav<P: AsRef<Path>>(&mut self, name: &str, paths: &[P]) -> Result<BankId> {
        let samples = paths
            .iter()
            .map(|p| {
                BankSample::from_wav(p).inspect_err(|e| {
                    tracing::error!("could not load {}: {e}", p.as_ref().display());
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.load_bank(name, samples))
    }

    /// Unloads a bank. Its sounds are stopped and can't be played again.
    pub fn unload_bank(&mut self, id: BankId) -> Result<()> {
        // a stop and an unlink per chained predecessor, for each sound
        let needed: usize = self
            .bank(id)?
            .sounds
            .iter()
            .filter_map(|&s| self.sounds.get(s))
            .map(|s| 1 + s.prev.len())
            .sum();
        if !self.graph.has_room(needed) {
            return Self::usage(Error::QueueFull);
        }
        let Some(bank) = self.banks.remove(id) else {
            return Err(Error::StaleHandle);
        };
        for sound in bank.sounds {
            let Some(s) = self.sounds.get_mut(sound) else {
                continue;
            };
            if let SoundSource::Bank { bank, .. } = &mut s.source {
                *bank = None;
            }
            if self.is_playing(sound) {
                tracing::error!("Stopping sound; bank has been unloaded");
            }
            self.stop(sound)?;
            let prev = self.sounds.get(sound).map(|s| s.prev.clone()).unwrap_or_default();
            for p in prev {
                self.set_next_sound(p, None)?;
            }
        }
        tracing::debug!("unloaded bank \"{}\"", bank.name);
        Ok(())
    }

    pub fn bank_name(&self, id: BankId) -> Result<&str> {
        Ok(&self.bank(id)?.name)
    }

    /// Number of samples in the bank.
    pub fn bank_sound_count(&self, id: BankId) -> Result<usize> {
        Ok(self.bank(id)?.samples.len())
    }

    /// Index of the sample called `name`.
    pub fn find_bank_sound(&self, id: BankId, name: &str) -> Result<Option<usize>> {
        let found = self.bank(id)?.samples.iter().position(|s| s.name == name);
        if found.is_none() {
            tracing::info!("Couldn't find sound named \"{name}\"");
        }
        Ok(found)
    }

    /// Creates a sound playing sample `index` of `bank`.
    pub fn new_bank_sound(&mut self, bank: BankId, index: usize) -> Result<SoundId> {
        let Some(sample) = self.bank(bank)?.samples.get(index) else {
            return Self::usage(Error::SampleNotFound(format!("#{index}")));
        };
        let info = sample.info;
        let data = sample.data.clone();
        let decoder = new_decoder(&info, self.config.buffer_frames())?;
        let kind = SourceKind::Buffer(BufferSource::new(info, data));
        let id = self.add_sound(
            kind,
            Some(decoder),
            SoundSource::Bank {
                bank: Some(bank),
                info,
            },
        )?;
        if let Some(b) = self.banks.get_mut(bank) {
            b.sounds.push(id);
        }
        Ok(id)
    }

    /// Creates a sound from the sample called `name`, searching `bank` or
    /// every loaded bank.
    pub fn new_bank_sound_by_name(&mut self, bank: Option<BankId>, name: &str) -> Result<SoundId> {
        let found = match bank {
            Some(b) => self.bank(b)?.samples.iter().position(|s| s.name == name).map(|i| (b, i)),
            None => self.banks.iter().find_map(|(b, state)| {
                state.samples.iter().position(|s| s.name == name).map(|i| (b, i))
            }),
        };
        match found {
            Some((b, index)) => self.new_bank_sound(b, index),
            None => Self::usage(Error::SampleNotFound(name.into())),
        }
    }
}
