//! cwlpack CLI
//!
//! Packs a CWL document graph (local or remote) into a single self-contained
//! document and writes it as YAML or JSON.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cwlpack::{HttpFetcher, PackOptions, Packer};

/// Flatten a multi-file CWL workflow into a single self-contained document.
#[derive(Parser)]
#[command(name = "cwlpack", version, about)]
struct Cli {
    /// Path or URL of the root CWL document.
    cwl_path: String,

    /// Emit JSON instead of YAML.
    #[arg(long)]
    json: bool,

    /// Insert "id" fields on processes that lack one.
    #[arg(long)]
    add_ids: bool,

    /// Write the packed document here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

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

    let mut packer = Packer::new(
        HttpFetcher::new(),
        PackOptions {
            add_ids: cli.add_ids,
        },
    );
    let packed = packer.pack(&cli.cwl_path)?;

    let rendered = if cli.json {
        serde_json::to_string_pretty(&packed)?
    } else {
        serde_yaml::to_string(&packed)?
    };

    match cli.output {
        Some(path) => fs::write(path, rendered)?,
        None => print!("{rendered}"),
    }
    Ok(())
}
