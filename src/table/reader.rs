// src/table/reader.rs

use std::{
    fs::File,
    io::{BufReader, ErrorKind, Read, Seek},
    path::Path,
    sync::Arc,
};
use tracing::{debug, trace, warn};

use super::header::{read_header, FieldDescriptor, TableHeader, DELETED_FLAG};
use super::value::{decode_field, FieldValue};
use super::DecodeError;

/// One live record, keyed by the field names as declared in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRow {
    names: Arc<[String]>,
    values: Vec<FieldValue>,
}

impl DecodedRow {
    /// Value for `name` (exact case). With duplicate names the last wins.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.names
            .iter()
            .rposition(|n| n == name)
            .map(|i| &self.values[i])
    }

    pub fn value_at(&self, idx: usize) -> Option<&FieldValue> {
        self.values.get(idx)
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.names.iter().map(String::as_str).zip(self.values.iter())
    }
}

/// A table whose header has been read; records have not been touched yet.
pub struct TableReader<R> {
    reader: R,
    header: TableHeader,
    fields: Arc<[FieldDescriptor]>,
    names: Arc<[String]>,
}

impl TableReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DecodeError> {
        let file = File::open(path.as_ref())?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> TableReader<R> {
    pub fn new(mut reader: R) -> Result<Self, DecodeError> {
        let (header, fields) = read_header(&mut reader)?;
        let names: Arc<[String]> = fields.iter().map(|f| f.name.clone()).collect();
        Ok(Self {
            reader,
            header,
            fields: fields.into(),
            names,
        })
    }

    pub fn header(&self) -> &TableHeader {
        &self.header
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field_names(&self) -> &[String] {
        &self.names
    }

    /// Consume the reader into a single forward pass over the records.
    pub fn records(self) -> Records<R> {
        // A zero-length record never reads short, so nothing would stop the
        // count from producing empty rows.
        let empty_records = self.header.record_length == 0;
        if empty_records && self.header.record_count > 0 {
            warn!(
                declared = self.header.record_count,
                "record length is zero; no records read"
            );
        }
        Records {
            buf: vec![0u8; self.header.record_length as usize],
            remaining: self.header.record_count,
            reader: self.reader,
            fields: self.fields,
            names: self.names,
            deleted: 0,
            done: empty_records,
        }
    }
}

/// Lazy record iterator. Deleted records are skipped; a short final read
/// ends the sequence quietly. An I/O error is yielded once, then the
/// iterator is exhausted.
pub struct Records<R> {
    reader: R,
    fields: Arc<[FieldDescriptor]>,
    names: Arc<[String]>,
    buf: Vec<u8>,
    remaining: u32,
    deleted: u64,
    done: bool,
}

impl<R> Records<R> {
    /// Deleted records skipped so far.
    pub fn deleted(&self) -> u64 {
        self.deleted
    }

    fn decode(&self) -> DecodedRow {
        let mut values = Vec::with_capacity(self.fields.len());
        let mut offset = 1usize;
        for field in self.fields.iter() {
            let len = field.length as usize;
            // Clamp so a record shorter than its descriptors degrades to
            // short or empty slices instead of panicking.
            let start = offset.min(self.buf.len());
            let end = (offset + len).min(self.buf.len());
            values.push(decode_field(&self.buf[start..end], field));
            offset += len;
        }
        DecodedRow {
            names: Arc::clone(&self.names),
            values,
        }
    }
}

impl<R: Read> Iterator for Records<R> {
    type Item = Result<DecodedRow, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done && self.remaining > 0 {
            self.remaining -= 1;

            match read_full(&mut self.reader, &mut self.buf) {
                Ok(n) if n < self.buf.len() => {
                    debug!(
                        got = n,
                        want = self.buf.len(),
                        left = self.remaining,
                        "table ends before declared record count"
                    );
                    self.done = true;
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(DecodeError::Io(e)));
                }
            }

            if self.buf.first() == Some(&DELETED_FLAG) {
                self.deleted += 1;
                trace!("skipping deleted record");
                continue;
            }

            return Some(Ok(self.decode()));
        }
        None
    }
}

/// Like `read_exact`, but reports how much was read instead of failing
/// on EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
