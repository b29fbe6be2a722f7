//! Base-speaker TTS — the pretrained synthesis model for one language.
//!
//! Each base speaker is a checkpoint directory holding a `config.json` and
//! a VITS-style ONNX export.  The model is opaque: this module only maps
//! text to the symbol ids the graph expects and feeds the standard input
//! set:
//!
//! | Name            | Shape         | dtype   |
//! |-----------------|---------------|---------|
//! | `input_ids`     | `[1, seq_len]`| int64   |
//! | `input_lengths` | `[1]`         | int64   |
//! | `scales`        | `[3]`         | float32 |
//! | `sid`           | `[1]`         | int64   |
//!
//! `scales` is `(noise, length, noise_w)`; `sid` is the speaker id the
//! checkpoint config maps each style name to.

use std::{collections::HashMap, path::Path, sync::Mutex};

use anyhow::{Context, Result};
use log::debug;
use ort::{session::Session, value::Tensor};
use serde::Deserialize;

use crate::audio;

/// A component that turns text into a speech WAV file.  Seam for the
/// pipeline; mocked in its tests.
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` in the given style, writing a WAV to `output`.
    fn synthesize(&self, text: &str, style: &str, output: &Path) -> Result<()>;
}

fn default_noise_scale() -> f32 {
    0.667
}
fn default_length_scale() -> f32 {
    1.0
}
fn default_noise_scale_w() -> f32 {
    0.8
}
fn default_add_blank() -> bool {
    true
}

/// Deserialised `config.json` from a base-speaker checkpoint directory.
#[derive(Debug, Deserialize)]
pub struct BaseSpeakerConfig {
    /// Human-readable language name, e.g. `"English"`.
    pub language: String,

    /// Output sample rate of the ONNX graph.
    pub sample_rate: u32,

    /// Symbol table the model was trained on, one entry per id.
    pub symbols: Vec<String>,

    /// Style name → speaker id within the multi-speaker graph.
    pub speakers: HashMap<String, i64>,

    /// Interleave a blank id (0) between symbols, the usual VITS frontend.
    #[serde(default = "default_add_blank")]
    pub add_blank: bool,

    #[serde(default = "default_noise_scale")]
    pub noise_scale: f32,
    #[serde(default = "default_length_scale")]
    pub length_scale: f32,
    #[serde(default = "default_noise_scale_w")]
    pub noise_scale_w: f32,
}

/// char → id from a checkpoint's symbol table (id = table index).
fn build_vocab(symbols: &[String]) -> HashMap<char, i64> {
    symbols
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.chars().next().map(|c| (c, i as i64)))
        .collect()
}

/// Map text to symbol ids.  Characters outside the symbol table are
/// skipped; with `add_blank` a 0 is interleaved around every symbol.
fn text_to_ids(vocab: &HashMap<char, i64>, add_blank: bool, text: &str) -> Vec<i64> {
    let ids = text.trim().chars().filter_map(|c| vocab.get(&c).copied());
    if add_blank {
        let mut out = vec![0i64];
        for id in ids {
            out.push(id);
            out.push(0);
        }
        out
    } else {
        ids.collect()
    }
}

/// One loaded base-speaker model.
pub struct BaseSpeakerTts {
    session: Mutex<Session>,
    config: BaseSpeakerConfig,
    vocab: HashMap<char, i64>,
}

impl BaseSpeakerTts {
    /// Load `config.json` and `model.onnx` from a checkpoint directory.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join("config.json");
        let config_bytes = std::fs::read(&config_path)
            .with_context(|| format!("Cannot read config: {}", config_path.display()))?;
        let config: BaseSpeakerConfig = serde_json::from_slice(&config_bytes)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        let model_path = dir.join("model.onnx");
        let session = Session::builder()
            .context("Failed to create ORT session builder")?
            .commit_from_file(&model_path)
            .with_context(|| format!("Cannot load ONNX model: {}", model_path.display()))?;

        let vocab = build_vocab(&config.symbols);

        debug!(
            "Loaded {} base speaker from {} ({} symbols, {} styles)",
            config.language,
            dir.display(),
            config.symbols.len(),
            config.speakers.len()
        );

        Ok(Self { session: Mutex::new(session), config, vocab })
    }

    /// Style names this checkpoint was trained with.
    pub fn styles(&self) -> Vec<&str> {
        self.config.speakers.keys().map(String::as_str).collect()
    }

    /// Synthesize `text` and return raw f32 samples at the config's rate.
    pub fn generate(&self, text: &str, style: &str) -> Result<Vec<f32>> {
        let sid = *self.config.speakers.get(style).with_context(|| {
            format!("Style '{}' not in checkpoint speakers: {:?}", style, self.styles())
        })?;

        let ids = text_to_ids(&self.vocab, self.config.add_blank, text);
        anyhow::ensure!(!ids.is_empty(), "Text maps to no symbols: {:?}", text);
        let seq_len = ids.len();

        let t_input_ids = Tensor::<i64>::from_array(([1usize, seq_len], ids))
            .context("Failed to build input_ids tensor")?;
        let t_lengths = Tensor::<i64>::from_array(([1usize], vec![seq_len as i64]))
            .context("Failed to build input_lengths tensor")?;
        let t_scales = Tensor::<f32>::from_array((
            [3usize],
            vec![self.config.noise_scale, self.config.length_scale, self.config.noise_scale_w],
        ))
        .context("Failed to build scales tensor")?;
        let t_sid = Tensor::<i64>::from_array(([1usize], vec![sid]))
            .context("Failed to build sid tensor")?;

        let mut session = self.session.lock().expect("ORT session mutex poisoned");
        let outputs = session
            .run(ort::inputs![t_input_ids, t_lengths, t_scales, t_sid])
            .context("Base speaker inference failed")?;

        // Output 0 is the waveform, shape [1, 1, T] or [T].
        let (_shape, samples) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to extract audio tensor")?;
        Ok(samples.to_vec())
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }
}

impl Synthesizer for BaseSpeakerTts {
    fn synthesize(&self, text: &str, style: &str, output: &Path) -> Result<()> {
        let samples = self.generate(text, style)?;
        audio::write_wav(output, &samples, self.config.sample_rate)?;
        debug!(
            "Synthesized {:.2}s of {} speech to {}",
            samples.len() as f32 / self.config.sample_rate as f32,
            self.config.language,
            output.display()
        );
        Ok(())
    }
}
