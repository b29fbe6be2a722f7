//! HuggingFace Hub checkpoint downloader.
//!
//! Fetches the full checkpoint tree (two base speakers plus the converter)
//! from a HuggingFace repository and returns a pipeline built on it.
//! Files are cached in the Hub cache directory (`~/.cache/huggingface/hub`
//! by default), so only the first run downloads anything.

use std::path::PathBuf;

use anyhow::{Context, Result};
use hf_hub::api::sync::Api;
use log::info;

use crate::pipeline::{OpenVoice, PipelineConfig};

/// Default checkpoint repository.
pub const DEFAULT_REPO: &str = "lwabish/openvoice-onnx";

/// Every file the pipeline needs, relative to the checkpoint root.
const CHECKPOINT_FILES: [&str; 9] = [
    "base_speakers/EN/config.json",
    "base_speakers/EN/model.onnx",
    "base_speakers/EN/ses.npz",
    "base_speakers/ZH/config.json",
    "base_speakers/ZH/model.onnx",
    "base_speakers/ZH/ses.npz",
    "converter/config.json",
    "converter/converter.onnx",
    "converter/se_encoder.onnx",
];

/// Download one file from a HuggingFace repository.
fn hf_download(api: &Api, repo_id: &str, filename: &str) -> Result<PathBuf> {
    let repo = api.model(repo_id.to_string());
    repo.get(filename)
        .with_context(|| format!("Failed to download '{}' from '{}'", filename, repo_id))
}

/// Fetch the whole checkpoint tree and return its local root directory.
///
/// The Hub cache preserves the repository's relative layout inside one
/// snapshot directory, so the root is derived from any downloaded path by
/// stripping its relative components.
pub fn fetch_checkpoints(repo_id: &str) -> Result<PathBuf> {
    let api = Api::new().context("Failed to initialise HuggingFace Hub client")?;

    let mut root: Option<PathBuf> = None;
    for relative in CHECKPOINT_FILES {
        info!("Fetching {}…", relative);
        let local = hf_download(&api, repo_id, relative)?;
        if root.is_none() {
            let mut dir = local;
            for _ in relative.split('/') {
                dir.pop();
            }
            root = Some(dir);
        }
    }
    root.context("Checkpoint file list is empty")
}

/// Download (or reuse the cached) checkpoints and load the pipeline.
///
/// # Example
/// ```no_run
/// let pipeline = openvoice::download::load_from_hub("lwabish/openvoice-onnx").unwrap();
/// ```
pub fn load_from_hub(repo_id: &str) -> Result<OpenVoice> {
    let root = fetch_checkpoints(repo_id)?;
    OpenVoice::load(PipelineConfig::new(root))
}

/// Convenience alias using [`DEFAULT_REPO`].
pub fn load_default() -> Result<OpenVoice> {
    load_from_hub(DEFAULT_REPO)
}
