// src/fetch/mod.rs

//! Content-validated retrieval of provider archives.
//!
//! A [`FetchTarget`] lists candidate sources in preference order; the
//! [`Fetcher`] streams each in turn, sniffs the first bytes with
//! [`validate::classify`], and commits the first genuine archive.

pub mod download;
pub mod error;
pub mod sources;
pub mod validate;

pub use download::{FetchOrigin, FetchResult, Fetcher, FetcherOptions};
pub use error::{AttemptError, CandidateFailure, FetchError};
pub use sources::{CandidateSource, FetchTarget};
pub use validate::{classify, Classification};
