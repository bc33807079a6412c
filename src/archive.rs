// src/archive.rs

use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use zip::{result::ZipError, ZipArchive};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("no member ending in {suffix:?} in {archive}")]
    NoMatchingMember { archive: PathBuf, suffix: String },

    #[error("corrupt archive {archive}: {source}")]
    CorruptArchive {
        archive: PathBuf,
        #[source]
        source: ZipError,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ArchiveError {
    /// Anything the zip reader reports once the file is open, including
    /// inflate and CRC failures surfacing as `ZipError::Io`, is a property
    /// of the archive bytes.
    fn corrupt(archive: &Path, source: ZipError) -> Self {
        Self::CorruptArchive {
            archive: archive.to_path_buf(),
            source,
        }
    }
}

/// A member selected from an archive and read fully into memory.
#[derive(Debug)]
pub struct ArchiveMember {
    pub name: String,
    pub bytes: Vec<u8>,
    /// Other members that also matched the suffix and were not read.
    pub ignored: Vec<String>,
}

/// A member written out to disk.
#[derive(Debug, Clone)]
pub struct ExtractedFile {
    pub path: PathBuf,
    /// `None` when an existing extraction was reused.
    pub member_name: Option<String>,
    pub size_bytes: u64,
    pub ignored: Vec<String>,
}

/// Names of file members whose lowercased name ends with `suffix`, in
/// archive order.
pub fn matching_members<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    suffix: &str,
) -> Result<Vec<String>, ZipError> {
    let suffix = suffix.to_lowercase();
    let mut names = Vec::new();
    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i)?;
        if entry.is_file() && entry.name().to_lowercase().ends_with(&suffix) {
            names.push(entry.name().to_string());
        }
    }
    Ok(names)
}

/// Read the first member ending in `suffix` (case-insensitive).
///
/// If several members match, the first in listing order wins and the rest
/// are returned in [`ArchiveMember::ignored`]. Archives are not documented
/// to carry more than one table, so this is a fixed choice rather than a
/// judgement about which member is right.
#[instrument(level = "debug", skip(archive_path), fields(archive = %archive_path.display()))]
pub fn read_member(archive_path: &Path, suffix: &str) -> Result<ArchiveMember, ArchiveError> {
    let file = File::open(archive_path).map_err(|e| ArchiveError::Io {
        path: archive_path.to_path_buf(),
        source: e,
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|e| ArchiveError::corrupt(archive_path, e))?;

    let mut names = matching_members(&mut archive, suffix)
        .map_err(|e| ArchiveError::corrupt(archive_path, e))?;
    if names.is_empty() {
        return Err(ArchiveError::NoMatchingMember {
            archive: archive_path.to_path_buf(),
            suffix: suffix.to_string(),
        });
    }
    let name = names.remove(0);
    if !names.is_empty() {
        warn!(
            chosen = %name,
            ignored = ?names,
            "multiple members match {}; using first only",
            suffix
        );
    }

    let mut entry = archive
        .by_name(&name)
        .map_err(|e| ArchiveError::corrupt(archive_path, e))?;
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut bytes)
        .map_err(|e| ArchiveError::corrupt(archive_path, ZipError::Io(e)))?;
    debug!(member = %name, bytes = bytes.len(), "read member");

    Ok(ArchiveMember {
        name,
        bytes,
        ignored: names,
    })
}

/// Extract the first member ending in `suffix` to `dest`.
///
/// An existing non-empty `dest` is reused as-is. The member is read fully
/// before anything is written, and the write goes through a temporary file
/// renamed into place, so a corrupt archive never leaves a partial `dest`.
pub fn extract_member(
    archive_path: &Path,
    suffix: &str,
    dest: &Path,
) -> Result<ExtractedFile, ArchiveError> {
    if let Ok(meta) = fs::metadata(dest) {
        if meta.is_file() && meta.len() > 0 {
            debug!(path = %dest.display(), "extraction exists; reusing");
            return Ok(ExtractedFile {
                path: dest.to_path_buf(),
                member_name: None,
                size_bytes: meta.len(),
                ignored: Vec::new(),
            });
        }
    }

    let member = read_member(archive_path, suffix)?;

    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| ArchiveError::Io { path, source }
    };
    fs::create_dir_all(dir).map_err(io_err(dir))?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(io_err(dir))?;
    tmp.write_all(&member.bytes).map_err(io_err(tmp.path()))?;
    tmp.as_file().sync_all().map_err(io_err(tmp.path()))?;
    tmp.persist(dest).map_err(|e| ArchiveError::Io {
        path: dest.to_path_buf(),
        source: e.error,
    })?;

    info!(member = %member.name, path = %dest.display(), bytes = member.bytes.len(), "extracted");
    Ok(ExtractedFile {
        path: dest.to_path_buf(),
        member_name: Some(member.name),
        size_bytes: member.bytes.len() as u64,
        ignored: member.ignored,
    })
}
