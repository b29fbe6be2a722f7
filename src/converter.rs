//! Tone-color converter — rewrites the timbre of a waveform from a source
//! speaker embedding to a target one while preserving the content.
//!
//! The checkpoint directory holds `config.json` plus two opaque ONNX
//! graphs:
//!
//! - `converter.onnx` — inputs `audio [1, T] f32`, `src_se [1, D, 1] f32`,
//!   `tgt_se [1, D, 1] f32`, `tau [1] f32`; output is the converted
//!   waveform.
//! - `se_encoder.onnx` — the reference encoder: `audio [1, T] f32` in,
//!   one embedding out (any of `[D]`, `[1, D]`, `[1, D, 1]`).
//!
//! During conversion a short caller-supplied message is embedded in the
//! least-significant bits of the written PCM stream, recoverable with
//! [`recover_message`].

use std::{path::Path, sync::Mutex};

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use ort::{session::Session, value::Tensor};
use serde::Deserialize;

use crate::{audio, se::SpeakerEmbedding};

/// A component that can encode reference audio into a speaker embedding
/// and transfer a target embedding onto existing audio.  Seam for the
/// pipeline; mocked in its tests.
pub trait ToneTransfer: Send + Sync {
    /// Encode one voiced segment into a speaker embedding.
    fn encode_reference(&self, samples: &[f32], sample_rate: u32) -> Result<SpeakerEmbedding>;

    /// Convert `source_wav` from `src_se` to `tgt_se`, writing `output`
    /// with `message` embedded as a watermark.
    fn convert(
        &self,
        source_wav: &Path,
        src_se: &SpeakerEmbedding,
        tgt_se: &SpeakerEmbedding,
        output: &Path,
        message: &str,
    ) -> Result<()>;
}

fn default_tau() -> f32 {
    0.3
}

/// Deserialised `config.json` from the converter checkpoint directory.
#[derive(Debug, Deserialize)]
pub struct ConverterConfig {
    /// Sample rate both graphs operate at.
    pub sample_rate: u32,

    /// Conversion temperature.
    #[serde(default = "default_tau")]
    pub tau: f32,
}

/// The loaded converter checkpoint: conversion graph + reference encoder.
pub struct ToneColorConverter {
    convert_session: Mutex<Session>,
    encoder_session: Mutex<Session>,
    config: ConverterConfig,
}

impl ToneColorConverter {
    /// Load `config.json`, `converter.onnx` and `se_encoder.onnx`.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join("config.json");
        let config_bytes = std::fs::read(&config_path)
            .with_context(|| format!("Cannot read config: {}", config_path.display()))?;
        let config: ConverterConfig = serde_json::from_slice(&config_bytes)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        let load_session = |name: &str| -> Result<Session> {
            let path = dir.join(name);
            Session::builder()
                .context("Failed to create ORT session builder")?
                .commit_from_file(&path)
                .with_context(|| format!("Cannot load ONNX model: {}", path.display()))
        };

        Ok(Self {
            convert_session: Mutex::new(load_session("converter.onnx")?),
            encoder_session: Mutex::new(load_session("se_encoder.onnx")?),
            config,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }
}

impl ToneTransfer for ToneColorConverter {
    fn encode_reference(&self, samples: &[f32], sample_rate: u32) -> Result<SpeakerEmbedding> {
        if sample_rate != self.config.sample_rate {
            bail!(
                "Reference segment is {} Hz but the encoder expects {} Hz",
                sample_rate,
                self.config.sample_rate
            );
        }
        let t_audio = Tensor::<f32>::from_array(([1usize, samples.len()], samples.to_vec()))
            .context("Failed to build audio tensor")?;

        let mut session = self.encoder_session.lock().expect("ORT session mutex poisoned");
        let outputs =
            session.run(ort::inputs![t_audio]).context("Reference encoder inference failed")?;
        let (_shape, values) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to extract embedding tensor")?;

        SpeakerEmbedding::new(values.to_vec())
    }

    fn convert(
        &self,
        source_wav: &Path,
        src_se: &SpeakerEmbedding,
        tgt_se: &SpeakerEmbedding,
        output: &Path,
        message: &str,
    ) -> Result<()> {
        if src_se.dim() != tgt_se.dim() {
            bail!("Embedding dimension mismatch: src {} vs tgt {}", src_se.dim(), tgt_se.dim());
        }
        let clip = audio::read_wav(source_wav)?;
        if clip.sample_rate != self.config.sample_rate {
            bail!(
                "Source audio is {} Hz but the converter expects {} Hz",
                clip.sample_rate,
                self.config.sample_rate
            );
        }

        let dim = src_se.dim();
        let t_audio = Tensor::<f32>::from_array(([1usize, clip.samples.len()], clip.samples))
            .context("Failed to build audio tensor")?;
        let t_src = Tensor::<f32>::from_array(([1usize, dim, 1], src_se.as_slice().to_vec()))
            .context("Failed to build src_se tensor")?;
        let t_tgt = Tensor::<f32>::from_array(([1usize, dim, 1], tgt_se.as_slice().to_vec()))
            .context("Failed to build tgt_se tensor")?;
        let t_tau = Tensor::<f32>::from_array(([1usize], vec![self.config.tau]))
            .context("Failed to build tau tensor")?;

        let mut session = self.convert_session.lock().expect("ORT session mutex poisoned");
        let run = session
            .run(ort::inputs![t_audio, t_src, t_tgt, t_tau])
            .context("Tone color conversion failed")?;
        let (_shape, converted) =
            run[0].try_extract_tensor::<f32>().context("Failed to extract audio tensor")?;

        let mut pcm: Vec<i16> = converted.iter().map(|&s| audio::f32_to_i16(s)).collect();
        embed_message(&mut pcm, message);
        audio::write_wav_i16(output, &pcm, self.config.sample_rate)?;
        debug!("Converted {} -> {}", source_wav.display(), output.display());
        Ok(())
    }
}

// ─── Watermark ───────────────────────────────────────────────────────────────
//
// Layout, one bit per sample LSB, most-significant bit first:
//   magic "OV" (2 bytes) | payload length (u16 LE) | payload bytes

const WATERMARK_MAGIC: [u8; 2] = *b"OV";

fn bits_of(bytes: &[u8]) -> impl Iterator<Item = u16> + '_ {
    bytes.iter().flat_map(|b| (0..8).rev().map(move |i| ((b >> i) & 1) as u16))
}

/// Embed `message` into the LSBs of `pcm`.  If the clip is too short to
/// hold the payload the watermark is skipped.
pub fn embed_message(pcm: &mut [i16], message: &str) {
    let payload = message.as_bytes();
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&WATERMARK_MAGIC);
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(payload);

    if pcm.len() < frame.len() * 8 || payload.len() > u16::MAX as usize {
        warn!("Clip too short for watermark ({} samples), skipping", pcm.len());
        return;
    }
    for (sample, bit) in pcm.iter_mut().zip(bits_of(&frame)) {
        *sample = (*sample & !1) | bit as i16;
    }
}

/// Recover a message embedded by [`embed_message`], or `None` when the
/// stream carries no watermark.
pub fn recover_message(pcm: &[i16]) -> Option<String> {
    let mut bytes = Vec::new();
    let mut acc = 0u8;
    for (i, sample) in pcm.iter().enumerate() {
        acc = (acc << 1) | (*sample & 1) as u8;
        if i % 8 == 7 {
            bytes.push(acc);
            acc = 0;
        }
        // Stop as soon as the header tells us the payload length.
        if bytes.len() >= 4 {
            let len = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
            if bytes.len() == 4 + len {
                break;
            }
        }
    }
    if bytes.len() < 4 || bytes[..2] != WATERMARK_MAGIC {
        return None;
    }
    let len = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
    if bytes.len() < 4 + len {
        return None;
    }
    String::from_utf8(bytes[4..4 + len].to_vec()).ok()
}
