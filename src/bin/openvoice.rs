//! Command-line entry point: one cloning request per invocation.
//!
//! ```text
//! openvoice --text "Hello there" --audio reference.wav --output cloned.wav
//! ```
//!
//! Prints the result message and exits 0 on success, 1 on any error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use openvoice::{OpenVoice, PipelineConfig};

#[derive(Parser)]
#[command(name = "openvoice", version, about = "Clone a voice onto a text prompt")]
struct Args {
    /// Text to read.
    #[arg(long)]
    text: String,

    /// Reference audio clip to take the voice from.
    #[arg(long)]
    audio: PathBuf,

    /// Output WAV path.
    #[arg(long, default_value = "output.wav")]
    output: PathBuf,

    /// Speaking style (language-dependent; Chinese supports only "default").
    #[arg(long, default_value = "default")]
    style: String,

    /// Checkpoint directory.
    #[arg(long, default_value = "checkpoints")]
    checkpoints: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let pipeline = match OpenVoice::load(PipelineConfig::new(&args.checkpoints)) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to load checkpoints from {}: {:#}", args.checkpoints.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match pipeline.predict(&args.text, &args.style, &args.audio, &args.output) {
        Ok(prediction) => {
            println!("{}", prediction.message);
            println!("{}", prediction.output_path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}", e);
            ExitCode::FAILURE
        }
    }
}
