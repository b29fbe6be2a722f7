//! # openvoice
//!
//! Rust port of [OpenVoice](https://github.com/myshell-ai/OpenVoice) —
//! instant voice cloning by tone-color conversion.
//!
//! A prompt is synthesized by a pretrained per-language base-speaker model,
//! then the timbre of the result is rewritten to match a speaker embedding
//! extracted from a caller-supplied reference clip.  The acoustic models
//! are opaque ONNX checkpoints; this crate sequences them and validates
//! input.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::path::Path;
//! use openvoice::{OpenVoice, PipelineConfig};
//!
//! let pipeline = OpenVoice::load(PipelineConfig::new("checkpoints")).unwrap();
//! let prediction = pipeline
//!     .predict(
//!         "Hello there",
//!         "default",
//!         Path::new("reference.wav"),
//!         Path::new("cloned.wav"),
//!     )
//!     .unwrap();
//! println!("{}", prediction.message);
//! ```
//!
//! Checkpoints can also be fetched from the HuggingFace Hub (cached after
//! the first run):
//!
//! ```no_run
//! let pipeline = openvoice::download::load_from_hub("lwabish/openvoice-onnx").unwrap();
//! ```
//!
//! ## Pipeline (matches the Python implementation)
//! 1. **Validation** — prompt length (2–200 chars), detected language
//!    (`zh`/`en`), style against the per-language allow-list.
//! 2. **Tone-color extraction** — VAD splits the reference clip into
//!    voiced segments; the converter's reference encoder embeds each and
//!    the embeddings are averaged.
//! 3. **Synthesis** — the selected base speaker writes the prompt to a
//!    per-request temporary WAV.
//! 4. **Conversion** — the tone-color converter rewrites the timbre to
//!    the target embedding, embedding a watermark message, and writes the
//!    caller's output path.

// Checkpoint download from HuggingFace Hub is desktop-only: mobile builds
// bundle checkpoints and construct the pipeline from a local directory.
#[cfg(not(any(target_os = "ios", target_os = "android")))]
pub mod download;

pub mod audio;
pub mod base_speaker;
pub mod converter;
pub mod extractor;
pub mod lang;
pub mod npy;
pub mod pipeline;
pub mod se;

// ─── Re-exports for convenience ─────────────────────────────────────────────

pub use pipeline::{
    OpenVoice, PipelineConfig, PredictError, Prediction, EN_STYLES, WATERMARK_MESSAGE, ZH_STYLES,
};
pub use se::SpeakerEmbedding;
