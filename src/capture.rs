//! Recording the final mix to disk.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::error::{Error, Result};

enum Sink {
    Wav(WavWriter<BufWriter<File>>),
    Raw(BufWriter<File>),
}

/// Writes interleaved stereo `f32` either as a float WAV or as headerless
/// little-endian samples, picked by the file extension.
pub struct CaptureWriter {
    sink: Sink,
    samples: u64,
}

impl CaptureWriter {
    /// Creates `path`, and any missing parent directories.
    ///
    /// The extension must be `.wav` or `.raw`.
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let wav = match ext.as_deref() {
            Some("wav") => true,
            Some("raw") => false,
            _ => return Err(Error::CaptureExtension(path.display().to_string())),
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let sink = if wav {
            let spec = WavSpec {
                channels: 2,
                sample_rate,
                bits_per_sample: 32,
                sample_format: SampleFormat::Float,
            };
            Sink::Wav(WavWriter::create(path, spec)?)
        } else {
            Sink::Raw(BufWriter::new(File::create(path)?))
        };
        Ok(Self { sink, samples: 0 })
    }

    pub fn write(&mut self, samples: &[f32]) -> Result<()> {
        match &mut self.sink {
            Sink::Wav(w) => {
                for &s in samples {
                    w.write_sample(s)?;
                }
            }
            Sink::Raw(w) => {
                for s in samples {
                    w.write_all(&s.to_le_bytes())?;
                }
            }
        }
        self.samples += samples.len() as u64;
        Ok(())
    }

    /// Samples written so far.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Flushes and, for WAV, patches the header.
    pub fn finish(self) -> Result<()> {
        match self.sink {
            Sink::Wav(w) => w.finalize()?,
            Sink::Raw(mut w) => w.flush()?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_other_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let err = CaptureWriter::create(dir.path().join("out.mp3"), 48000);
        assert!(matches!(err, Err(Error::CaptureExtension(_))));
        assert!(!dir.path().join("out.mp3").exists());
    }

    #[test]
    fn raw_is_little_endian_f32() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/out.raw");
        let mut w = CaptureWriter::create(&path, 48000).unwrap();
        w.write(&[0.5, -0.25]).unwrap();
        assert_eq!(w.samples(), 2);
        w.finish().unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(f32::from_le_bytes(bytes[4..8].try_into().unwrap()), -0.25);
    }

    #[test]
    fn wav_round_trips_through_hound() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.WAV");
        let mut w = CaptureWriter::create(&path, 22050).unwrap();
        w.write(&[0.1, 0.2, 0.3, 0.4]).unwrap();
        w.finish().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 22050);
        assert_eq!(reader.spec().channels, 2);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, [0.1, 0.2, 0.3, 0.4]);
    }
}
