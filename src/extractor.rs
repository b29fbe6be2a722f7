//! Target tone-color extraction from a caller-supplied reference clip.
//!
//! The clip is split into voiced segments by a simple energy-based VAD,
//! each segment is written under a processing directory and encoded by
//! the converter's reference encoder, and the per-segment embeddings are
//! averaged into the target tone color.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    ops::Range,
    path::Path,
};

use anyhow::{bail, Context, Result};
use log::debug;

use crate::{audio, converter::ToneTransfer, se::SpeakerEmbedding};

// ─── Voice activity detection ────────────────────────────────────────────────
//
// Energy proxy per frame = mean(|sample|); a frame above the threshold
// opens a speech state that stays open for a hangover window, so short
// intra-word dips don't split segments.

const FRAME_MS: usize = 20;
const ENERGY_THRESHOLD: f32 = 0.01;
const HANGOVER_FRAMES: usize = 8;
/// Segments shorter than this are treated as clicks and dropped.
const MIN_SEGMENT_MS: usize = 100;

/// Sample ranges of the voiced portions of `samples`.
pub fn voiced_segments(samples: &[f32], sample_rate: u32) -> Vec<Range<usize>> {
    let frame_len = (sample_rate as usize * FRAME_MS / 1000).max(1);
    let min_segment = sample_rate as usize * MIN_SEGMENT_MS / 1000;

    let mut segments: Vec<Range<usize>> = Vec::new();
    let mut current: Option<Range<usize>> = None;
    let mut hangover = 0usize;

    for (i, frame) in samples.chunks(frame_len).enumerate() {
        let energy = frame.iter().map(|s| s.abs()).sum::<f32>() / frame.len() as f32;
        if energy > ENERGY_THRESHOLD {
            hangover = HANGOVER_FRAMES;
        }

        let start = i * frame_len;
        let end = (start + frame.len()).min(samples.len());
        if hangover > 0 {
            hangover -= 1;
            current = match current.take() {
                Some(range) => Some(range.start..end),
                None => Some(start..end),
            };
        } else if let Some(range) = current.take() {
            segments.push(range);
        }
    }
    if let Some(range) = current {
        segments.push(range);
    }

    segments.retain(|r| r.len() >= min_segment);
    segments
}

// ─── Embedding extraction ────────────────────────────────────────────────────

/// Derived name for a reference clip: file stem plus a short hash of the
/// path and content length, so repeated extractions of different clips
/// with the same stem don't collide in the processing directory.
fn derive_name(path: &Path, n_samples: usize) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("audio");
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    n_samples.hash(&mut hasher);
    format!("{}_{:08x}", stem, hasher.finish() as u32)
}

/// Extract the target speaker embedding from `audio_path`.
///
/// With `vad` the clip is split into voiced segments (silence excluded);
/// without, the whole clip is one segment.  Segment WAVs land under
/// `processing_dir/<derived name>/`.  Returns the mean embedding and the
/// derived name.
pub fn get_se(
    audio_path: &Path,
    encoder: &dyn ToneTransfer,
    processing_dir: &Path,
    vad: bool,
) -> Result<(SpeakerEmbedding, String)> {
    let clip = audio::read_wav(audio_path)?;
    if clip.samples.is_empty() {
        bail!("Reference audio is empty: {}", audio_path.display());
    }

    let segments = if vad {
        voiced_segments(&clip.samples, clip.sample_rate)
    } else {
        vec![0..clip.samples.len()]
    };
    if segments.is_empty() {
        bail!("No voiced segments found in {}", audio_path.display());
    }

    let name = derive_name(audio_path, clip.samples.len());
    let segment_dir = processing_dir.join(&name);
    std::fs::create_dir_all(&segment_dir)
        .with_context(|| format!("Cannot create processing dir: {}", segment_dir.display()))?;

    debug!(
        "Extracting tone color from {} ({:.2}s clip, {} voiced segment(s), {:.2}s voiced)",
        audio_path.display(),
        clip.duration_secs(),
        segments.len(),
        segments.iter().map(|r| r.len()).sum::<usize>() as f32 / clip.sample_rate as f32
    );

    let mut embeddings = Vec::with_capacity(segments.len());
    for (i, range) in segments.iter().enumerate() {
        let segment = &clip.samples[range.clone()];
        let segment_path = segment_dir.join(format!("seg_{:03}.wav", i));
        audio::write_wav(&segment_path, segment, clip.sample_rate)?;
        embeddings.push(
            encoder
                .encode_reference(segment, clip.sample_rate)
                .with_context(|| format!("Failed to encode segment {}", segment_path.display()))?,
        );
    }

    let se = SpeakerEmbedding::mean_of(&embeddings)?;
    Ok((se, name))
}
