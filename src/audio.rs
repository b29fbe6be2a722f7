//! WAV reading and writing helpers on top of [`hound`].
//!
//! Everything downstream works in mono f32 samples in `[-1.0, 1.0]`.
//! Reference clips may arrive as multi-channel or integer PCM; they are
//! mixed down and normalised on read.  Output is always 16-bit PCM mono,
//! the most widely decodable WAV flavour.

use std::path::Path;

use anyhow::{bail, Context, Result};

/// A decoded mono audio clip.
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    /// Duration in seconds.
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Read a WAV file and mix it down to mono f32.
///
/// Accepts 16-bit integer and 32-bit float PCM; other bit depths are
/// rejected rather than silently rescaled.
pub fn read_wav(path: &Path) -> Result<AudioClip> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Cannot open WAV: {}", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        bail!("WAV has zero channels: {}", path.display());
    }

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / i16::MAX as f32))
            .collect::<Result<_, _>>()
            .context("WAV decode error")?,
        (hound::SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .context("WAV decode error")?,
        (format, bits) => bail!(
            "Unsupported WAV format {:?}/{} bit in {} — expected 16-bit PCM or 32-bit float",
            format,
            bits,
            path.display()
        ),
    };

    // Mixdown: average across channels per frame.
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok(AudioClip { samples, sample_rate: spec.sample_rate })
}

/// Quantise an f32 sample in `[-1.0, 1.0]` to i16 PCM.
pub fn f32_to_i16(s: f32) -> i16 {
    (s * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Write mono f32 samples as a 16-bit PCM WAV file.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let pcm: Vec<i16> = samples.iter().map(|&s| f32_to_i16(s)).collect();
    write_wav_i16(path, &pcm, sample_rate)
}

/// Write mono i16 PCM samples as a WAV file.
pub fn write_wav_i16(path: &Path, samples: &[i16], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Cannot create WAV: {}", path.display()))?;
    for &s in samples {
        writer.write_sample(s).context("WAV write error")?;
    }
    writer.finalize().context("WAV finalise error")?;
    Ok(())
}
