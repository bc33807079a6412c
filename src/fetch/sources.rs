// src/fetch/sources.rs

use std::fmt;
use url::Url;

/// Placeholder substituted with the region code in filename variants.
pub const CODE_PLACEHOLDER: &str = "{code}";

/// One `(location, filename)` pair the fetcher may try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSource {
    pub base: String,
    pub filename: String,
}

impl CandidateSource {
    pub fn new(base: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            filename: filename.into(),
        }
    }

    /// Resolve to a full URL. A base without a trailing `/` is treated as a
    /// directory, not as a file to be replaced.
    pub fn url(&self) -> Result<Url, url::ParseError> {
        let base = if self.base.ends_with('/') {
            Url::parse(&self.base)?
        } else {
            Url::parse(&format!("{}/", self.base))?
        };
        base.join(&self.filename)
    }
}

impl fmt::Display for CandidateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.url() {
            Ok(u) => write!(f, "{}", u),
            Err(_) => write!(f, "{}{}", self.base, self.filename),
        }
    }
}

/// What to fetch for one identifier, and where it may come from.
#[derive(Debug, Clone)]
pub struct FetchTarget {
    pub identifier: String,
    pub candidates: Vec<CandidateSource>,
}

impl FetchTarget {
    /// Host-major expansion: every filename variant on the first host, then
    /// every variant on the next host.
    pub fn for_code(code: &str, base_urls: &[String], name_variants: &[String]) -> Self {
        let candidates = base_urls
            .iter()
            .flat_map(|base| {
                name_variants
                    .iter()
                    .map(move |v| CandidateSource::new(base.clone(), v.replace(CODE_PLACEHOLDER, code)))
            })
            .collect();
        Self {
            identifier: code.to_string(),
            candidates,
        }
    }
}
