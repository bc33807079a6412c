// src/table/mod.rs

//! Decoder for the fixed-length-record table files (dBase III layout)
//! shipped inside the provider archives.
//!
//! Layout, all integers little-endian:
//! - 32-byte header: record count (u32 @ 4), header length (u16 @ 8),
//!   record length (u16 @ 10).
//! - 32-byte field descriptors until a block starting with `0x0D`.
//! - Records start at `header_length`; byte 0 of each record is the
//!   deletion flag (`*` = deleted), fields follow back to back.

use thiserror::Error;

pub mod header;
pub mod reader;
pub mod value;

pub use header::{read_header, FieldDescriptor, FieldType, TableHeader};
pub use reader::{DecodedRow, Records, TableReader};
pub use value::{decode_field, decode_latin1, FieldValue};

/// Structural failure of a whole table file. Individual field anomalies
/// never produce one of these.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("file shorter than the 32-byte table header")]
    TooShort,

    #[error("field descriptor block truncated after {parsed} field(s)")]
    TruncatedDescriptors { parsed: usize },

    #[error("I/O error reading table: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
pub(crate) mod fixture {
    //! Synthetic table files for tests.

    use super::header::{DELETED_FLAG, DESCRIPTOR_LEN, DESCRIPTOR_TERMINATOR, HEADER_LEN};

    pub(crate) struct TableBuilder {
        fields: Vec<(String, char, u8, u8)>,
        records: Vec<(bool, Vec<String>)>,
        padding: usize,
        declared_records: Option<u32>,
        record_length: Option<u16>,
    }

    impl TableBuilder {
        pub(crate) fn new() -> Self {
            Self {
                fields: Vec::new(),
                records: Vec::new(),
                padding: 0,
                declared_records: None,
                record_length: None,
            }
        }

        pub(crate) fn field(mut self, name: &str, ty: char, len: u8, dec: u8) -> Self {
            self.fields.push((name.to_string(), ty, len, dec));
            self
        }

        pub(crate) fn record(mut self, values: &[&str]) -> Self {
            self.records
                .push((false, values.iter().map(|v| v.to_string()).collect()));
            self
        }

        pub(crate) fn deleted(mut self, values: &[&str]) -> Self {
            self.records
                .push((true, values.iter().map(|v| v.to_string()).collect()));
            self
        }

        /// Extra bytes between the terminator and the first record.
        pub(crate) fn header_padding(mut self, n: usize) -> Self {
            self.padding = n;
            self
        }

        pub(crate) fn declared_records(mut self, n: u32) -> Self {
            self.declared_records = Some(n);
            self
        }

        pub(crate) fn record_length_override(mut self, n: u16) -> Self {
            self.record_length = Some(n);
            self
        }

        pub(crate) fn build(self) -> Vec<u8> {
            let header_len = HEADER_LEN + DESCRIPTOR_LEN * self.fields.len() + 1 + self.padding;
            let record_len = 1 + self.fields.iter().map(|f| f.2 as usize).sum::<usize>();
            let count = self
                .declared_records
                .unwrap_or(self.records.len() as u32);

            let mut out = Vec::new();
            out.push(0x03);
            out.extend_from_slice(&[124, 1, 15]);
            out.extend_from_slice(&count.to_le_bytes());
            out.extend_from_slice(&(header_len as u16).to_le_bytes());
            out.extend_from_slice(
                &self
                    .record_length
                    .unwrap_or(record_len as u16)
                    .to_le_bytes(),
            );
            out.resize(HEADER_LEN, 0);

            for (name, ty, len, dec) in &self.fields {
                let mut block = [0u8; DESCRIPTOR_LEN];
                let n = name.len().min(10);
                block[..n].copy_from_slice(&name.as_bytes()[..n]);
                block[11] = *ty as u8;
                block[16] = *len;
                block[17] = *dec;
                out.extend_from_slice(&block);
            }
            out.push(DESCRIPTOR_TERMINATOR);
            out.extend(std::iter::repeat(0u8).take(self.padding));

            for (deleted, values) in &self.records {
                out.push(if *deleted { DELETED_FLAG } else { b' ' });
                for ((_, ty, len, _), value) in self.fields.iter().zip(values) {
                    let len = *len as usize;
                    let mut cell: Vec<u8> = value.bytes().take(len).collect();
                    let pad = len - cell.len();
                    if matches!(ty, 'N' | 'F') {
                        let mut padded = vec![b' '; pad];
                        padded.append(&mut cell);
                        cell = padded;
                    } else {
                        cell.extend(std::iter::repeat(b' ').take(pad));
                    }
                    out.extend_from_slice(&cell);
                }
            }
            out.push(0x1A);
            out
        }
    }
}
