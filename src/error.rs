use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::archive::ArchiveError;
use crate::fetch::{CandidateFailure, FetchError};
use crate::output::OutputError;
use crate::table::DecodeError;

/// Pipeline step an error came out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Extract,
    Decode,
    Project,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Fetch => "fetch",
            Stage::Extract => "extract",
            Stage::Decode => "decode",
            Stage::Project => "project",
            Stage::Write => "write",
        })
    }
}

/// Failure of one region's pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetch: {0}")]
    Fetch(#[from] FetchError),

    #[error("extract: {0}")]
    Extract(#[from] ArchiveError),

    #[error("decode: {0}")]
    Decode(#[from] DecodeError),

    #[error("write: {0}")]
    Write(#[from] OutputError),

    #[error("decode worker stopped: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Fetch(_) => Stage::Fetch,
            PipelineError::Extract(_) => Stage::Extract,
            PipelineError::Decode(_) | PipelineError::Worker(_) => Stage::Decode,
            PipelineError::Write(_) => Stage::Write,
        }
    }

    /// True when the output tree itself is unusable, so carrying on with
    /// other regions would only fail the same way.
    pub fn aborts_run(&self) -> bool {
        matches!(
            self,
            PipelineError::Fetch(FetchError::Io { .. })
                | PipelineError::Extract(ArchiveError::Io { .. })
                | PipelineError::Write(OutputError::Io { .. })
        )
    }

    /// Sources tried before a fetch gave up.
    pub fn attempted_sources(&self) -> &[String] {
        match self {
            PipelineError::Fetch(FetchError::Exhausted { attempted, .. }) => attempted,
            _ => &[],
        }
    }

    /// Last candidate rejection of an exhausted fetch.
    pub fn last_failure(&self) -> Option<&CandidateFailure> {
        match self {
            PipelineError::Fetch(FetchError::Exhausted { last, .. }) => Some(last),
            _ => None,
        }
    }
}
