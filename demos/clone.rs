//! Voice-cloning demo — downloads checkpoints and clones a reference voice.
//!
//! Usage:
//!   cargo run --example clone -- --audio reference.wav
//!   cargo run --example clone -- --audio ref.wav --text "Hello from Rust!" --style cheerful
//!
//! Requirements:
//!   - Internet access for the first run (checkpoints are cached afterwards)
//!   - A short reference clip (a few seconds of clean speech works best)

use std::path::Path;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // ── Parse simple CLI arguments ───────────────────────────────────────────
    let mut args = std::env::args().skip(1);

    let mut repo_id = openvoice::download::DEFAULT_REPO.to_string();
    let mut text = "Did you ever hear a folk tale about a giant turtle?".to_string();
    let mut style = "default".to_string();
    let mut audio = String::new();
    let mut output = "cloned.wav".to_string();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--repo" => { if let Some(v) = args.next() { repo_id = v; } }
            "--text" => { if let Some(v) = args.next() { text = v; } }
            "--style" => { if let Some(v) = args.next() { style = v; } }
            "--audio" => { if let Some(v) = args.next() { audio = v; } }
            "--output" => { if let Some(v) = args.next() { output = v; } }
            "--help" => {
                println!(
                    "Usage: clone --audio FILE [--repo REPO_ID] [--text TEXT] \
                     [--style NAME] [--output FILE]"
                );
                return Ok(());
            }
            _ => {}
        }
    }

    if audio.is_empty() {
        anyhow::bail!("--audio <reference clip> is required");
    }

    println!("Repo      : {}", repo_id);
    println!("Text      : {:?}", text);
    println!("Style     : {}", style);
    println!("Reference : {}", audio);
    println!("Output    : {}", output);
    println!();

    // ── Download / load checkpoints ──────────────────────────────────────────
    let pipeline = openvoice::download::load_from_hub(&repo_id)?;

    // ── Clone ────────────────────────────────────────────────────────────────
    println!("Cloning voice…");
    match pipeline.predict(&text, &style, Path::new(&audio), Path::new(&output)) {
        Ok(prediction) => {
            println!("{}", prediction.message);
            println!("Saved {}", prediction.output_path.display());
            Ok(())
        }
        Err(e) => anyhow::bail!("{}", e),
    }
}
