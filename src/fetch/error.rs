// src/fetch/error.rs

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Why a single candidate source was rejected. Always recoverable: the
/// fetcher moves on to the next candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateFailure {
    HttpStatus {
        status: u16,
    },
    Timeout,
    Transport {
        message: String,
    },
    InvalidUrl {
        url: String,
    },
    ErrorDocument {
        content_type: Option<String>,
        preview: String,
    },
    Unrecognized {
        content_type: Option<String>,
        preview: String,
    },
    Truncated {
        expected: u64,
        actual: u64,
    },
}

impl CandidateFailure {
    /// Short stable tag used in diagnostics records.
    pub fn kind(&self) -> &'static str {
        match self {
            CandidateFailure::HttpStatus { .. } => "http_status",
            CandidateFailure::Timeout => "timeout",
            CandidateFailure::Transport { .. } => "transport",
            CandidateFailure::InvalidUrl { .. } => "invalid_url",
            CandidateFailure::ErrorDocument { .. } => "error_document",
            CandidateFailure::Unrecognized { .. } => "unrecognized",
            CandidateFailure::Truncated { .. } => "truncated",
        }
    }

    /// Body preview, for the failures that captured one.
    pub fn preview(&self) -> Option<&str> {
        match self {
            CandidateFailure::ErrorDocument { preview, .. }
            | CandidateFailure::Unrecognized { preview, .. } => Some(preview),
            _ => None,
        }
    }

    pub(crate) fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            CandidateFailure::Timeout
        } else {
            CandidateFailure::Transport {
                message: err.to_string(),
            }
        }
    }
}

impl fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateFailure::HttpStatus { status } => write!(f, "HTTP {}", status),
            CandidateFailure::Timeout => write!(f, "timed out"),
            CandidateFailure::Transport { message } => write!(f, "transport error: {}", message),
            CandidateFailure::InvalidUrl { url } => write!(f, "invalid URL {}", url),
            CandidateFailure::ErrorDocument {
                content_type,
                preview,
            } => write!(
                f,
                "markup document instead of archive (content-type {}): {:?}",
                content_type.as_deref().unwrap_or("(missing)"),
                preview
            ),
            CandidateFailure::Unrecognized {
                content_type,
                preview,
            } => write!(
                f,
                "unrecognized content (content-type {}): {:?}",
                content_type.as_deref().unwrap_or("(missing)"),
                preview
            ),
            CandidateFailure::Truncated { expected, actual } => {
                write!(f, "body truncated: expected {} bytes, got {}", expected, actual)
            }
        }
    }
}

/// Fatal outcome of a fetch for one identifier.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no candidate sources configured for {identifier}")]
    NoCandidates { identifier: String },

    #[error("all {} sources failed for {identifier}; last: {last}", .attempted.len())]
    Exhausted {
        identifier: String,
        attempted: Vec<String>,
        last: CandidateFailure,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result of one candidate attempt, tagged so that a local failure can
/// never be mistaken for "try the next source" or the other way round.
#[derive(Debug)]
pub enum AttemptError {
    Retryable(CandidateFailure),
    Fatal(FetchError),
}

impl From<CandidateFailure> for AttemptError {
    fn from(f: CandidateFailure) -> Self {
        AttemptError::Retryable(f)
    }
}

impl From<FetchError> for AttemptError {
    fn from(e: FetchError) -> Self {
        AttemptError::Fatal(e)
    }
}
