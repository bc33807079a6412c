use anyhow::{bail, Context, Result};
use clap::Parser;
use markscraper::{config::Config, pipeline::Pipeline};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Download the per-state survey mark archives and turn each into a
/// canonical CSV.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// YAML config file; built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output root (overrides the config file).
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Region codes to process, e.g. `--regions TX,CO` (overrides the config file).
    #[arg(long, value_delimiter = ',')]
    regions: Vec<String>,

    /// Do not keep a decoded copy of the full table next to the processed output.
    #[arg(long)]
    no_raw_csv: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    // ─── 2) resolve config ───────────────────────────────────────────
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::from_yaml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(out_dir) = args.out_dir {
        config.out_dir = out_dir;
    }
    if !args.regions.is_empty() {
        config.regions = args.regions;
    }
    if args.no_raw_csv {
        config.write_raw_csv = false;
    }
    config.validate().context("invalid configuration")?;

    let codes = config.selected_regions();
    info!(regions = codes.len(), out_dir = %config.out_dir.display(), "startup");

    // ─── 3) run ──────────────────────────────────────────────────────
    let pipeline = Pipeline::from_config(config)?;
    let summary = pipeline.run(&codes).await.context("run aborted")?;

    for failed in &summary.failed {
        error!(region = %failed.code, stage = %failed.stage, "{}", failed.message);
    }
    info!(
        succeeded = summary.succeeded.len(),
        skipped = summary.skipped.len(),
        failed = summary.failed.len(),
        diagnostics = %pipeline.layout().diagnostics().display(),
        "all done"
    );

    if !summary.is_success() {
        bail!("{} region(s) failed", summary.failed.len());
    }
    Ok(())
}
