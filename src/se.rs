//! Speaker embeddings ("tone color").
//!
//! An embedding is an opaque fixed-size f32 vector produced by the
//! converter's reference encoder (or shipped precomputed with a base
//! speaker).  Nothing here interprets the values; the only structure the
//! pipeline relies on is a consistent dimension.

use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::npy;

/// A speaker's tone-color embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerEmbedding(Vec<f32>);

impl SpeakerEmbedding {
    pub fn new(values: Vec<f32>) -> Result<Self> {
        if values.is_empty() {
            bail!("Speaker embedding must not be empty");
        }
        Ok(Self(values))
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Element-wise mean of several embeddings — how a multi-segment
    /// reference clip collapses to one target tone color.
    pub fn mean_of(embeddings: &[SpeakerEmbedding]) -> Result<Self> {
        let Some(first) = embeddings.first() else {
            bail!("Cannot average zero embeddings");
        };
        let dim = first.dim();
        let mut sum = vec![0.0f32; dim];
        for e in embeddings {
            if e.dim() != dim {
                bail!("Embedding dimension mismatch: {} vs {}", e.dim(), dim);
            }
            for (acc, v) in sum.iter_mut().zip(e.as_slice()) {
                *acc += v;
            }
        }
        let n = embeddings.len() as f32;
        Ok(Self(sum.into_iter().map(|v| v / n).collect()))
    }
}

/// The precomputed source embeddings shipped with one base speaker,
/// loaded from its `ses.npz` archive.
///
/// English ships `default` and `style` (all non-default styles share the
/// one `style` embedding); Chinese ships only `default`.
pub struct SourceEmbeddings {
    default: SpeakerEmbedding,
    style: Option<SpeakerEmbedding>,
}

impl SourceEmbeddings {
    /// Load `ses.npz` from a base-speaker checkpoint directory.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join("ses.npz");
        let mut arrays = npy::load_npz(&path)
            .with_context(|| format!("Cannot load source embeddings: {}", path.display()))?;

        let default = arrays
            .remove("default")
            .with_context(|| format!("{} has no 'default' embedding", path.display()))?;
        let default = SpeakerEmbedding::new(default.into_vec())
            .with_context(|| format!("Bad 'default' embedding in {}", path.display()))?;

        let style = match arrays.remove("style") {
            Some(arr) => Some(
                SpeakerEmbedding::new(arr.into_vec())
                    .with_context(|| format!("Bad 'style' embedding in {}", path.display()))?,
            ),
            None => None,
        };

        Ok(Self { default, style })
    }

    pub fn from_parts(default: SpeakerEmbedding, style: Option<SpeakerEmbedding>) -> Self {
        Self { default, style }
    }

    pub fn default_se(&self) -> &SpeakerEmbedding {
        &self.default
    }

    /// The shared non-default-style embedding, falling back to `default`
    /// when this speaker ships none (the Chinese base speaker).
    pub fn style_se(&self) -> &SpeakerEmbedding {
        self.style.as_ref().unwrap_or(&self.default)
    }
}
