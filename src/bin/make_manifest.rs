use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use markscraper::manifest::{scan_directory, Manifest, ScanOptions};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Write a state-pack manifest.json for a directory of processed CSVs.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Directory holding `pois_<CODE>_<YYYYMMDD>.csv` files.
    directory: PathBuf,

    /// URL prefix the files will be served from.
    #[arg(long)]
    base_url: String,

    #[arg(long, default_value = "manifest.json")]
    output: PathBuf,

    /// Defaults to today.
    #[arg(long)]
    updated_at: Option<String>,

    #[arg(long, default_value_t = 1)]
    schema_version: u32,

    /// Version for files without a date stamp; file mtime otherwise.
    #[arg(long)]
    default_version: Option<String>,

    /// Keep files whose code is not a known region.
    #[arg(long)]
    no_strict: bool,
}

fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    let args = Args::parse();
    if !args.directory.is_dir() {
        bail!("invalid directory: {}", args.directory.display());
    }

    let opts = ScanOptions {
        base_url: args.base_url,
        default_version: args.default_version,
        strict: !args.no_strict,
    };
    let states = scan_directory(&args.directory, &opts)
        .with_context(|| format!("scanning {}", args.directory.display()))?;

    let manifest = Manifest {
        schema_version: args.schema_version,
        updated_at: args
            .updated_at
            .unwrap_or_else(|| Local::now().date_naive().format("%Y-%m-%d").to_string()),
        states,
    };
    manifest
        .write(&args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;

    info!(path = %args.output.display(), states = manifest.states.len(), "manifest written");
    Ok(())
}
