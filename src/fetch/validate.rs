// src/fetch/validate.rs

use tracing::warn;

/// Local-file-header magic of the container format.
pub const ZIP_MAGIC: &[u8] = b"PK";

/// How many leading bytes (after whitespace) are searched for a markup opener.
const MARKUP_WINDOW: usize = 400;

static MARKUP_OPENERS: &[&[u8]] = &[b"<html", b"<!doctype", b"<?xml"];

/// Verdict on the first bytes of a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Valid,
    LooksLikeErrorDocument,
    Unrecognized,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Valid => "valid",
            Classification::LooksLikeErrorDocument => "error_document",
            Classification::Unrecognized => "unrecognized",
        }
    }
}

/// Classify a response body by its leading bytes.
///
/// The provider answers `200 OK` with an HTML page when a file is missing,
/// so the status line alone proves nothing. Only the magic bytes decide
/// `Valid`; `content_type` is logged when it disagrees but never changes
/// the verdict.
pub fn classify(head: &[u8], content_type: Option<&str>) -> Classification {
    if head.starts_with(ZIP_MAGIC) {
        if let Some(ct) = content_type.filter(|ct| !is_zip_content_type(ct)) {
            warn!(content_type = ct, "zip magic present despite content type");
        }
        return Classification::Valid;
    }

    if looks_like_markup(head) {
        return Classification::LooksLikeErrorDocument;
    }

    Classification::Unrecognized
}

fn looks_like_markup(head: &[u8]) -> bool {
    let trimmed = head.trim_ascii_start();
    if !trimmed.starts_with(b"<") {
        return false;
    }
    let window = trimmed[..trimmed.len().min(MARKUP_WINDOW)].to_ascii_lowercase();
    MARKUP_OPENERS
        .iter()
        .any(|opener| window.windows(opener.len()).any(|w| w == *opener))
}

fn is_zip_content_type(ct: &str) -> bool {
    let ct = ct.to_ascii_lowercase();
    ct.contains("zip") || ct.contains("octet-stream")
}

/// Short lossy-UTF-8 rendering of a body prefix for logs and diagnostics.
pub fn preview(head: &[u8], max: usize) -> String {
    String::from_utf8_lossy(&head[..head.len().min(max)]).into_owned()
}
