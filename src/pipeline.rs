// src/pipeline.rs

//! Per-region driver: fetch → extract → decode → project → write.

use anyhow::Context;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::time::{sleep, Instant};
use tracing::{error, info, instrument, warn};

use crate::archive::{extract_member, ArchiveError};
use crate::config::Config;
use crate::diagnostics::{DiagnosticRecord, DiagnosticsLog};
use crate::error::{PipelineError, Stage};
use crate::fetch::{FetchOrigin, FetchTarget, Fetcher};
use crate::output::{existing_processed, processed_file_name, CsvSink};
use crate::project::{Projection, VersionTracker};
use crate::table::TableReader;

/// Where each artifact of a region lives under the output root.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn archive(&self, code: &str) -> PathBuf {
        self.root.join(format!("{}.ZIP", code))
    }

    pub fn table(&self, code: &str) -> PathBuf {
        self.root.join("dbfs").join(format!("{}.dbf", code))
    }

    pub fn raw_csv(&self, code: &str) -> PathBuf {
        self.csv_dir().join(format!("{}.csv", code))
    }

    pub fn csv_dir(&self) -> PathBuf {
        self.root.join("csvs")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.csv_dir().join("Processed")
    }

    pub fn rejected_dir(&self) -> PathBuf {
        self.root.join("rejected")
    }

    pub fn diagnostics(&self) -> PathBuf {
        self.root.join("diagnostics.jsonl")
    }
}

/// What decoding one table produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOutcome {
    pub path: PathBuf,
    pub rows: u64,
    pub deleted: u64,
    pub version: String,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionOutcome {
    Processed(TableOutcome),
    /// A processed output already existed; nothing was fetched or decoded.
    AlreadyProcessed(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedRegion {
    pub code: String,
    pub stage: Stage,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<FailedRegion>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Pipeline {
    config: Arc<Config>,
    layout: Layout,
    fetcher: Fetcher,
    diagnostics: DiagnosticsLog,
}

impl Pipeline {
    pub fn new(config: Config, fetcher: Fetcher, diagnostics: DiagnosticsLog) -> Self {
        let layout = Layout::new(&config.out_dir);
        Self {
            config: Arc::new(config),
            layout,
            fetcher,
            diagnostics,
        }
    }

    /// Build the HTTP client and open the diagnostics log for `config`.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let layout = Layout::new(&config.out_dir);
        std::fs::create_dir_all(layout.root())
            .with_context(|| format!("creating output directory {}", layout.root().display()))?;
        let fetcher = Fetcher::new(config.fetcher_options()).context("building HTTP client")?;
        let diagnostics =
            DiagnosticsLog::open(layout.diagnostics()).context("opening diagnostics log")?;
        Ok(Self::new(config, fetcher, diagnostics))
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Process `codes` one after another. A region's failure is recorded and
    /// the run moves on, unless the failure means the output tree itself is
    /// unusable.
    pub async fn run(&self, codes: &[String]) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary::default();
        let start = Instant::now();

        for code in codes {
            match self.run_region(code).await {
                Ok(RegionOutcome::Processed(_)) => summary.succeeded.push(code.clone()),
                Ok(RegionOutcome::AlreadyProcessed(_)) => summary.skipped.push(code.clone()),
                Err(err) => {
                    error!(region = %code, stage = %err.stage(), error = %err, "region failed");
                    self.record(DiagnosticRecord::from_error(code, &err));
                    if err.aborts_run() {
                        return Err(err);
                    }
                    summary.failed.push(FailedRegion {
                        code: code.clone(),
                        stage: err.stage(),
                        message: err.to_string(),
                    });
                }
            }
        }

        info!(
            succeeded = summary.succeeded.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            elapsed = ?start.elapsed(),
            "run complete"
        );
        Ok(summary)
    }

    #[instrument(level = "info", skip(self, code), fields(region = %code))]
    pub async fn run_region(&self, code: &str) -> Result<RegionOutcome, PipelineError> {
        let processed_dir = self.layout.processed_dir();
        if let Some(done) = existing_processed(&processed_dir, code) {
            info!(path = %done.display(), "already processed; skipping");
            return Ok(RegionOutcome::AlreadyProcessed(done));
        }

        let target = FetchTarget::for_code(code, &self.config.base_urls, &self.config.name_variants);
        let fetched = self.fetcher.fetch(&target, &self.layout.archive(code)).await?;
        if let FetchOrigin::Remote(url) = &fetched.origin {
            info!(%url, bytes = fetched.size_bytes, "source used");
            let pause = self.config.pause_between_downloads();
            if !pause.is_zero() {
                sleep(pause).await;
            }
        }

        let job = TableJob {
            code: code.to_string(),
            archive: fetched.path,
            table: self.layout.table(code),
            raw_csv: self
                .config
                .write_raw_csv
                .then(|| self.layout.raw_csv(code)),
            processed_dir,
            config: Arc::clone(&self.config),
        };
        let outcome = tokio::task::spawn_blocking(move || job.run()).await??;

        if !outcome.missing.is_empty() {
            self.record(DiagnosticRecord::missing_fields(code, &outcome.missing));
        }
        info!(
            path = %outcome.path.display(),
            rows = outcome.rows,
            deleted = outcome.deleted,
            version = %outcome.version,
            "region done"
        );
        Ok(RegionOutcome::Processed(outcome))
    }

    fn record(&self, rec: DiagnosticRecord) {
        if let Err(e) = self.diagnostics.append(&rec) {
            warn!(error = %e, path = %self.diagnostics.path().display(), "could not write diagnostics");
        }
    }
}

/// The synchronous part of a region, run on the blocking pool.
struct TableJob {
    code: String,
    archive: PathBuf,
    table: PathBuf,
    raw_csv: Option<PathBuf>,
    processed_dir: PathBuf,
    config: Arc<Config>,
}

impl TableJob {
    fn run(self) -> Result<TableOutcome, PipelineError> {
        let extracted = match extract_member(&self.archive, &self.config.member_suffix, &self.table) {
            Ok(extracted) => extracted,
            Err(err @ ArchiveError::CorruptArchive { .. }) => {
                // Otherwise the skip on existing archives would hand the same
                // bytes to every later run.
                warn!(archive = %self.archive.display(), "discarding corrupt archive");
                if let Err(e) = std::fs::remove_file(&self.archive) {
                    warn!(error = %e, archive = %self.archive.display(), "could not remove corrupt archive");
                }
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        };
        if !extracted.ignored.is_empty() {
            warn!(ignored = ?extracted.ignored, "extra table members ignored");
        }
        convert_table(
            &self.code,
            &extracted.path,
            self.raw_csv.as_deref(),
            &self.processed_dir,
            &self.config,
        )
    }
}

/// Single pass over `table`: every live record goes to the raw CSV (when
/// asked for) and, projected, to the processed CSV. The processed file is
/// named once the version token is known. A table with no canonical field
/// still gets an (empty) processed file, so the region counts as done.
pub fn convert_table(
    code: &str,
    table: &Path,
    raw_csv: Option<&Path>,
    processed_dir: &Path,
    config: &Config,
) -> Result<TableOutcome, PipelineError> {
    let reader = TableReader::open(table)?;
    let projection = Projection::new(reader.field_names(), config.canonical_fields.as_slice());
    let project_rows = !projection.columns().is_empty();

    let mut raw = match raw_csv {
        Some(dest) => {
            let dir = dest.parent().unwrap_or_else(|| Path::new("."));
            let mut sink = CsvSink::create(dir)?;
            sink.write_header(reader.field_names())?;
            Some((sink, dest))
        }
        None => None,
    };
    let mut processed = CsvSink::create(processed_dir)?;
    if project_rows {
        processed.write_header(projection.columns())?;
    }
    let mut tracker = VersionTracker::new(config.version_field.as_str());

    let mut records = reader.records();
    for row in records.by_ref() {
        let row = row?;
        if let Some((sink, _)) = raw.as_mut() {
            sink.write_row(row.values().iter().map(|v| v.to_string()))?;
        }
        if project_rows {
            let projected = projection.project(&row);
            tracker.observe(&projected);
            processed.write_row(projected.values())?;
        }
    }
    let deleted = records.deleted();

    if let Some((sink, dest)) = raw {
        sink.finish(dest)?;
    }
    let version = tracker.finish(&config.fallback_version);
    let dest = processed_dir.join(processed_file_name(code, &version));
    let rows = processed.finish(&dest)?;

    Ok(TableOutcome {
        path: dest,
        rows,
        deleted,
        version,
        missing: projection.missing().to_vec(),
    })
}
