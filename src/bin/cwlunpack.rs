//! cwlunpack CLI
//!
//! Splits a packed CWL workflow back into one file per process: each inline
//! step process lands under `<output>.steps/<step-id>.cwl` and the step's
//! `run` is rewritten to the relative path.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cwlpack::explode;

/// Explode a packed CWL workflow into separate process files.
#[derive(Parser)]
#[command(name = "cwlunpack", version, about)]
struct Cli {
    /// The packed CWL document to explode.
    cwl_path: PathBuf,

    /// Where to write the root document; step files land next to it.
    output: PathBuf,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "cwlpack=debug,info",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let contents = fs::read_to_string(&cli.cwl_path)
        .with_context(|| format!("failed to read {}", cli.cwl_path.display()))?;
    let cwl: serde_yaml::Value = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse {}", cli.cwl_path.display()))?;

    for (n, process) in explode(cwl, &cli.output).into_iter().enumerate() {
        if let Some(parent) = process.file_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let rendered = serde_yaml::to_string(&process.cwl)?;
        fs::write(&process.file_path, rendered)
            .with_context(|| format!("failed to write {}", process.file_path.display()))?;
        tracing::info!("{}: {}", n + 1, process.file_path.display());
    }
    Ok(())
}
