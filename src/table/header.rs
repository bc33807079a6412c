// src/table/header.rs

use chrono::NaiveDate;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use tracing::{debug, warn};

use super::DecodeError;

pub const HEADER_LEN: usize = 32;
pub const DESCRIPTOR_LEN: usize = 32;
pub const DESCRIPTOR_TERMINATOR: u8 = 0x0D;
/// Flag byte marking a logically deleted record.
pub const DELETED_FLAG: u8 = b'*';

/// Fixed 32-byte file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableHeader {
    pub version: u8,
    /// Bytes 1..4: years since 1900, month, day. `None` if not a real date.
    pub last_update: Option<NaiveDate>,
    pub record_count: u32,
    pub header_length: u16,
    pub record_length: u16,
}

impl TableHeader {
    pub fn parse(b: &[u8; HEADER_LEN]) -> Self {
        Self {
            version: b[0],
            last_update: NaiveDate::from_ymd_opt(1900 + b[1] as i32, b[2] as u32, b[3] as u32),
            record_count: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
            header_length: u16::from_le_bytes([b[8], b[9]]),
            record_length: u16::from_le_bytes([b[10], b[11]]),
        }
    }

    /// Record length implied by the descriptors: one flag byte plus every
    /// field's width.
    pub fn expected_record_length(fields: &[FieldDescriptor]) -> usize {
        1 + fields.iter().map(|f| f.length as usize).sum::<usize>()
    }

    pub fn layout_matches(&self, fields: &[FieldDescriptor]) -> bool {
        Self::expected_record_length(fields) == self.record_length as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Character,
    Numeric,
    Float,
    Logical,
    Date,
    Other(char),
}

impl FieldType {
    pub fn from_code(code: u8) -> Self {
        match code {
            b'C' => FieldType::Character,
            b'N' => FieldType::Numeric,
            b'F' => FieldType::Float,
            b'L' => FieldType::Logical,
            b'D' => FieldType::Date,
            other => FieldType::Other(char::from(other)),
        }
    }

    pub fn code(&self) -> char {
        match self {
            FieldType::Character => 'C',
            FieldType::Numeric => 'N',
            FieldType::Float => 'F',
            FieldType::Logical => 'L',
            FieldType::Date => 'D',
            FieldType::Other(c) => *c,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub length: u8,
    pub decimal_count: u8,
}

impl FieldDescriptor {
    pub fn parse(block: &[u8; DESCRIPTOR_LEN]) -> Self {
        let raw_name = &block[..11];
        let raw_name = raw_name
            .iter()
            .position(|&b| b == 0)
            .map_or(raw_name, |nul| &raw_name[..nul]);
        // 7-bit only; anything else is dropped.
        let name: String = raw_name
            .iter()
            .filter(|b| b.is_ascii())
            .map(|&b| char::from(b))
            .collect();

        Self {
            name: name.trim().to_string(),
            field_type: FieldType::from_code(block[11]),
            length: block[16],
            decimal_count: block[17],
        }
    }
}

/// Parse the file header and the field descriptor block, leaving `reader`
/// positioned at the first record (`header_length` bytes from the start).
pub fn read_header<R: Read + Seek>(
    reader: &mut R,
) -> Result<(TableHeader, Vec<FieldDescriptor>), DecodeError> {
    let mut head = [0u8; HEADER_LEN];
    reader.read_exact(&mut head).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => DecodeError::TooShort,
        _ => DecodeError::Io(e),
    })?;
    let header = TableHeader::parse(&head);

    let mut fields = Vec::new();
    loop {
        let mut block = [0u8; DESCRIPTOR_LEN];
        // The terminator may be a lone byte right before the records, so
        // look at it before committing to a full block.
        read_or_truncated(reader, &mut block[..1], fields.len())?;
        if block[0] == DESCRIPTOR_TERMINATOR {
            break;
        }
        read_or_truncated(reader, &mut block[1..], fields.len())?;
        fields.push(FieldDescriptor::parse(&block));
    }

    reader.seek(SeekFrom::Start(header.header_length as u64))?;

    if !header.layout_matches(&fields) {
        warn!(
            declared = header.record_length,
            computed = TableHeader::expected_record_length(&fields),
            "record length disagrees with field widths"
        );
    }
    debug!(
        records = header.record_count,
        fields = fields.len(),
        record_length = header.record_length,
        "parsed table header"
    );

    Ok((header, fields))
}

fn read_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8], parsed: usize) -> Result<(), DecodeError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => DecodeError::TruncatedDescriptors { parsed },
        _ => DecodeError::Io(e),
    })
}
