//! WAV file encoding and decoding using hound
//!
//! Recordings are written as 44.1kHz mono 16-bit PCM.

use crate::error::{CaptureError, PlaybackError};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Fixed capture configuration for new recordings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl CaptureFormat {
    pub const VOICE_MEMO: CaptureFormat = CaptureFormat {
        sample_rate: 44100,
        channels: 1,
    };

    fn wav_spec(&self) -> WavSpec {
        WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        }
    }
}

impl Default for CaptureFormat {
    fn default() -> Self {
        Self::VOICE_MEMO
    }
}

/// Streaming WAV writer for an in-progress recording
pub struct WavSink {
    writer: WavWriter<BufWriter<File>>,
    path: PathBuf,
    samples_written: u64,
}

impl WavSink {
    /// Create the output file and write the WAV header
    pub fn create(path: &Path, format: CaptureFormat) -> Result<Self, CaptureError> {
        let file = File::create(path).map_err(|source| CaptureError::Output {
            path: path.to_path_buf(),
            source,
        })?;

        let writer = WavWriter::new(BufWriter::new(file), format.wav_spec())?;

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            samples_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Append f32 samples, converting to 16-bit PCM
    pub fn write(&mut self, samples: &[f32]) -> Result<(), CaptureError> {
        for &sample in samples {
            let clamped = sample.clamp(-1.0, 1.0);
            self.writer.write_sample((clamped * i16::MAX as f32) as i16)?;
        }
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    /// Patch the header lengths and flush to disk
    pub fn finalize(self) -> Result<PathBuf, CaptureError> {
        self.writer.finalize()?;
        Ok(self.path)
    }
}

/// Load a WAV file as mono f32 samples
///
/// Returns the samples and sample rate. Multi-channel files are mixed down.
pub fn load(path: &Path) -> Result<(Vec<f32>, u32), PlaybackError> {
    if !path.exists() {
        return Err(PlaybackError::NotFound(path.to_path_buf()));
    }

    let decode_err = |source| PlaybackError::Decode {
        path: path.to_path_buf(),
        source,
    };

    let reader = hound::WavReader::open(path).map_err(decode_err)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(decode_err)?,
        SampleFormat::Int => {
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_value))
                .collect::<Result<_, _>>()
                .map_err(decode_err)?
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok((samples, spec.sample_rate))
}

/// Duration of `sample_count` mono samples in milliseconds
pub fn duration_millis(sample_count: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    (sample_count as u64 * 1000) / sample_rate as u64
}

/// Peak level of a block of samples on the 16-bit scale (0..=32767)
pub fn peak_amplitude(samples: &[f32]) -> u16 {
    let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
    (peak.min(1.0) * i16::MAX as f32) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_duration_calculation() {
        assert_eq!(duration_millis(44100, 44100), 1000);
        assert_eq!(duration_millis(22050, 44100), 500);
        assert_eq!(duration_millis(100, 0), 0);
    }

    #[test]
    fn test_peak_amplitude_scale() {
        assert_eq!(peak_amplitude(&[]), 0);
        assert_eq!(peak_amplitude(&[0.0, -1.0, 0.5]), 32767);
        assert_eq!(peak_amplitude(&[2.5]), 32767);
        assert_eq!(peak_amplitude(&[0.5]), 16383);
    }

    #[test]
    fn test_sink_writes_readable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("REC_1.wav");

        let mut sink = WavSink::create(&path, CaptureFormat::VOICE_MEMO).unwrap();
        sink.write(&vec![0.25; 4410]).unwrap();
        assert_eq!(sink.samples_written(), 4410);
        sink.finalize().unwrap();

        let (samples, rate) = load(&path).unwrap();
        assert_eq!(rate, 44100);
        assert_eq!(samples.len(), 4410);
        assert!((samples[0] - 0.25).abs() < 0.001);
    }

    #[test]
    fn test_finalize_advances_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("REC_2.wav");
        let mut sink = WavSink::create(&path, CaptureFormat::VOICE_MEMO).unwrap();

        let created = SystemTime::now() - Duration::from_millis(5000);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(created)
            .unwrap();
        sink.write(&[0.1; 441]).unwrap();
        sink.finalize().unwrap();

        let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert!(modified.duration_since(created).unwrap() >= Duration::from_millis(5000));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load(&dir.path().join("missing.wav"));
        assert!(matches!(result, Err(PlaybackError::NotFound(_))));
    }

    #[test]
    fn test_load_garbage_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.wav");
        std::fs::write(&path, b"not a wav file").unwrap();
        assert!(matches!(load(&path), Err(PlaybackError::Decode { .. })));
    }
}
