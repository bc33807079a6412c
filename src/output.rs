//! CSV writers for the raw and processed tables. Rows go to a temporary file
//! beside the destination, which only appears under its final name once
//! everything has been flushed.

use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};
use tempfile::{Builder, TempPath};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("writing CSV to {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("I/O on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl OutputError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        OutputError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A CSV file being written. Dropping it without [`CsvSink::finish`] removes
/// the partial file.
pub struct CsvSink {
    writer: csv::Writer<BufWriter<File>>,
    temp: TempPath,
    dir: PathBuf,
    rows: u64,
}

impl CsvSink {
    /// Start a new file in `dir`, creating the directory if needed.
    pub fn create(dir: &Path) -> Result<Self, OutputError> {
        std::fs::create_dir_all(dir).map_err(|e| OutputError::io(dir, e))?;
        let (file, temp) = Builder::new()
            .prefix(".")
            .suffix(".csv.part")
            .tempfile_in(dir)
            .map_err(|e| OutputError::io(dir, e))?
            .into_parts();
        Ok(Self {
            writer: csv::Writer::from_writer(BufWriter::new(file)),
            temp,
            dir: dir.to_path_buf(),
            rows: 0,
        })
    }

    pub fn write_header<I, S>(&mut self, names: I) -> Result<(), OutputError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        self.writer
            .write_record(names)
            .map_err(|source| self.csv_err(source))
    }

    pub fn write_row<I, S>(&mut self, values: I) -> Result<(), OutputError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        self.writer
            .write_record(values)
            .map_err(|source| self.csv_err(source))?;
        self.rows += 1;
        Ok(())
    }

    /// Flush everything and move the file to `dest`. Returns the number of
    /// data rows written.
    pub fn finish(self, dest: &Path) -> Result<u64, OutputError> {
        let CsvSink {
            writer, temp, rows, ..
        } = self;
        let buffered = writer.into_inner().map_err(|e| {
            let err = e.error();
            OutputError::io(dest, std::io::Error::new(err.kind(), err.to_string()))
        })?;
        let file = buffered
            .into_inner()
            .map_err(|e| OutputError::io(dest, e.into_error()))?;
        file.sync_all().map_err(|e| OutputError::io(dest, e))?;
        drop(file);

        temp.persist(dest)
            .map_err(|e| OutputError::io(dest, e.error))?;
        debug!(path = %dest.display(), rows, "csv committed");
        Ok(rows)
    }

    fn csv_err(&self, source: csv::Error) -> OutputError {
        OutputError::Csv {
            path: self.dir.clone(),
            source,
        }
    }
}

/// Name of the processed output for `code` at `version`.
pub fn processed_file_name(code: &str, version: &str) -> String {
    format!("pois_{}_{}.csv", code, version)
}

/// Glob pattern matching any processed output for `code` inside `dir`.
pub fn processed_glob(dir: &Path, code: &str) -> String {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    format!("{}/pois_{}_*.csv", escaped, code)
}

/// First existing processed output for `code`, if any.
pub fn existing_processed(dir: &Path, code: &str) -> Option<PathBuf> {
    let pattern = processed_glob(dir, code);
    let mut hits: Vec<PathBuf> = glob::glob(&pattern)
        .ok()?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    hits.sort();
    hits.into_iter().next()
}
