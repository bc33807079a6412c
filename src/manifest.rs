// src/manifest.rs

//! Catalogue manifest over a directory of processed region CSVs.

use chrono::{DateTime, Local, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::{
    collections::HashSet,
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

use crate::regions::region_name;

#[allow(clippy::expect_used)]
static FILE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:pois[_-])?(?P<code>[A-Za-z]{2})(?:[_-](?P<ymd>\d{8}))?\.csv$")
        .expect("manifest file name pattern is valid")
});

const HASH_CHUNK: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("cannot list {path:?}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("duplicate region code detected: {code}")]
    DuplicateCode { code: String },

    #[error("{file}: {ymd} is not a calendar date")]
    BadDate { file: String, ymd: String },

    #[error("serialising manifest: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub code: String,
    pub name: String,
    pub version: String,
    pub bytes: u64,
    pub sha256: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    pub updated_at: String,
    pub states: Vec<ManifestEntry>,
}

impl Manifest {
    /// Pretty JSON with a trailing newline.
    pub fn to_json(&self) -> Result<String, ManifestError> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    pub fn write(&self, path: &Path) -> Result<(), ManifestError> {
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Prefix for each entry's download URL.
    pub base_url: String,
    /// Version for files whose name carries no date.
    pub default_version: Option<String>,
    /// Skip files whose code is not a known region.
    pub strict: bool,
}

/// Split a CSV file name into its region code (upper-cased) and optional
/// `YYYYMMDD` stamp.
pub fn parse_file_name(name: &str) -> Option<(String, Option<String>)> {
    let caps = FILE_NAME.captures(name)?;
    let code = caps.name("code")?.as_str().to_ascii_uppercase();
    let ymd = caps.name("ymd").map(|m| m.as_str().to_string());
    Some((code, ymd))
}

pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn build_url(base_url: &str, file_name: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), file_name)
}

fn version_from_ymd(file: &str, ymd: &str) -> Result<String, ManifestError> {
    NaiveDate::parse_from_str(ymd, "%Y%m%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| ManifestError::BadDate {
            file: file.to_string(),
            ymd: ymd.to_string(),
        })
}

fn version_from_mtime(path: &Path) -> std::io::Result<String> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(DateTime::<Local>::from(modified)
        .date_naive()
        .format("%Y-%m-%d")
        .to_string())
}

/// Build entries for every matching CSV directly inside `dir`, sorted by
/// region display name.
pub fn scan_directory(dir: &Path, opts: &ScanOptions) -> Result<Vec<ManifestEntry>, ManifestError> {
    let read_dir = std::fs::read_dir(dir).map_err(|source| ManifestError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths: Vec<PathBuf> = read_dir
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for path in paths {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((code, ymd)) = parse_file_name(file_name) else {
            debug!(file = file_name, "not a region csv; skipped");
            continue;
        };
        let known = region_name(&code);
        if opts.strict && known.is_none() {
            debug!(file = file_name, code = %code, "unknown region code; skipped");
            continue;
        }
        if !seen.insert(code.clone()) {
            return Err(ManifestError::DuplicateCode { code });
        }

        let io_err = |source| ManifestError::Io {
            path: path.clone(),
            source,
        };
        let version = match (&ymd, &opts.default_version) {
            (Some(ymd), _) => version_from_ymd(file_name, ymd)?,
            (None, Some(default)) => default.clone(),
            (None, None) => version_from_mtime(&path).map_err(io_err)?,
        };
        let bytes = std::fs::metadata(&path).map_err(io_err)?.len();
        let sha256 = sha256_file(&path).map_err(io_err)?;

        entries.push(ManifestEntry {
            name: known.map_or_else(|| code.clone(), str::to_string),
            code,
            version,
            bytes,
            sha256,
            url: build_url(&opts.base_url, file_name),
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    info!(dir = %dir.display(), states = entries.len(), "manifest scan complete");
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn opts(strict: bool) -> ScanOptions {
        ScanOptions {
            base_url: "https://cdn.example.org/packs/".into(),
            default_version: None,
            strict,
        }
    }

    #[test]
    fn file_name_forms() {
        assert_eq!(
            parse_file_name("pois_tx_20240105.csv"),
            Some(("TX".into(), Some("20240105".into())))
        );
        assert_eq!(parse_file_name("pois-CO.csv"), Some(("CO".into(), None)));
        assert_eq!(parse_file_name("NY.csv"), Some(("NY".into(), None)));
        assert_eq!(parse_file_name("pois_TX_UNKNOWN.csv"), None);
        assert_eq!(parse_file_name("TEX.csv"), None);
        assert_eq!(parse_file_name("pois_TX_20240105.CSV"), None);
    }

    #[test]
    fn known_digest() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("abc.csv");
        std::fs::write(&p, "abc").unwrap();
        assert_eq!(
            sha256_file(&p).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn url_joins_with_single_slash() {
        assert_eq!(build_url("https://h/x/", "a.csv"), "https://h/x/a.csv");
        assert_eq!(build_url("https://h/x", "a.csv"), "https://h/x/a.csv");
    }

    #[test]
    fn scan_sorts_by_name_and_derives_versions() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("pois_TX_20240105.csv"), "pid\n1\n").unwrap();
        std::fs::write(dir.path().join("pois_al_20231130.csv"), "pid\n").unwrap();
        std::fs::write(dir.path().join("pois_ZZ_20231130.csv"), "pid\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let entries = scan_directory(dir.path(), &opts(true)).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Alabama", "Texas"]);

        let tx = &entries[1];
        assert_eq!(tx.code, "TX");
        assert_eq!(tx.version, "2024-01-05");
        assert_eq!(tx.bytes, 6);
        assert_eq!(tx.url, "https://cdn.example.org/packs/pois_TX_20240105.csv");
        assert_eq!(tx.sha256.len(), 64);
    }

    #[test]
    fn non_strict_keeps_unknown_codes() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("ZZ.csv"), "x").unwrap();
        let mut o = opts(false);
        o.default_version = Some("2024-06-01".into());
        let entries = scan_directory(dir.path(), &o).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "ZZ");
        assert_eq!(entries[0].version, "2024-06-01");
    }

    #[test]
    fn missing_stamp_falls_back_to_mtime() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("CO.csv"), "x").unwrap();
        let entries = scan_directory(dir.path(), &opts(true)).unwrap();
        let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
        assert_eq!(entries[0].version, today);
    }

    #[test]
    fn duplicate_code_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("pois_TX_20240105.csv"), "a").unwrap();
        std::fs::write(dir.path().join("TX.csv"), "b").unwrap();
        let err = scan_directory(dir.path(), &opts(true)).unwrap_err();
        assert!(matches!(err, ManifestError::DuplicateCode { code } if code == "TX"));
    }

    #[test]
    fn impossible_stamp_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("pois_TX_20241399.csv"), "a").unwrap();
        let err = scan_directory(dir.path(), &opts(true)).unwrap_err();
        assert!(matches!(err, ManifestError::BadDate { .. }));
    }

    #[test]
    fn json_shape() {
        let manifest = Manifest {
            schema_version: 1,
            updated_at: "2024-02-01".into(),
            states: vec![ManifestEntry {
                code: "TX".into(),
                name: "Texas".into(),
                version: "2024-01-05".into(),
                bytes: 6,
                sha256: "00".into(),
                url: "https://h/pois_TX_20240105.csv".into(),
            }],
        };
        let json = manifest.to_json().unwrap();
        assert!(json.ends_with("}\n"));
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["schemaVersion"], 1);
        assert_eq!(v["updatedAt"], "2024-02-01");
        assert_eq!(v["states"][0]["code"], "TX");
        assert_eq!(v["states"][0]["bytes"], 6);
    }
}
