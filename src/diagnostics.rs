// src/diagnostics.rs

//! Append-only JSON-lines log of per-region problems, shared by every
//! pipeline invocation in a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};
use thiserror::Error;

use crate::error::{PipelineError, Stage};

#[derive(Debug, Error)]
pub enum DiagnosticsError {
    #[error("diagnostics log {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("diagnostics record: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub timestamp: DateTime<Utc>,
    pub identifier: String,
    pub stage: Stage,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempted_sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_classification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_fields: Vec<String>,
}

impl DiagnosticRecord {
    pub fn from_error(identifier: &str, err: &PipelineError) -> Self {
        let last = err.last_failure();
        Self {
            timestamp: Utc::now(),
            identifier: identifier.to_string(),
            stage: err.stage(),
            severity: Severity::Error,
            message: err.to_string(),
            attempted_sources: err.attempted_sources().to_vec(),
            last_classification: last.map(|f| f.kind().to_string()),
            preview: last.and_then(|f| f.preview()).map(str::to_string),
            missing_fields: Vec::new(),
        }
    }

    /// Non-fatal notice that some canonical fields had no source column.
    pub fn missing_fields(identifier: &str, missing: &[String]) -> Self {
        Self {
            timestamp: Utc::now(),
            identifier: identifier.to_string(),
            stage: Stage::Project,
            severity: Severity::Warning,
            message: format!("{} canonical field(s) absent from source", missing.len()),
            attempted_sources: Vec::new(),
            last_classification: None,
            preview: None,
            missing_fields: missing.to_vec(),
        }
    }
}

pub struct DiagnosticsLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl DiagnosticsLog {
    /// Open `path` for appending, creating it and its directory if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DiagnosticsError> {
        let path = path.into();
        let io_err = |source| DiagnosticsError::Io {
            path: path.clone(),
            source,
        };
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one record as a single line.
    pub fn append(&self, record: &DiagnosticRecord) -> Result<(), DiagnosticsError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = self.file.lock().unwrap_or_else(|p| p.into_inner());
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|source| DiagnosticsError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

/// Read every record back, skipping blank lines.
pub fn read_records(path: &Path) -> Result<Vec<DiagnosticRecord>, DiagnosticsError> {
    let io_err = |source| DiagnosticsError::Io {
        path: path.to_path_buf(),
        source,
    };
    let reader = BufReader::new(File::open(path).map_err(io_err)?);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(io_err)?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(out)
}
