use chrono::NaiveDate;
use std::fmt;

use super::header::{FieldDescriptor, FieldType};

/// One decoded cell. Malformed input never errors; it degrades to `Text`
/// or `Empty`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Logical(bool),
    Date(NaiveDate),
    Empty,
}

impl FieldValue {
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Empty => true,
            FieldValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Integer(n) => write!(f, "{}", n),
            FieldValue::Float(v) => write_float(f, *v),
            FieldValue::Logical(true) => f.write_str("True"),
            FieldValue::Logical(false) => f.write_str("False"),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FieldValue::Empty => Ok(()),
        }
    }
}

// Shortest round-trip form; integral values keep a trailing `.0` so a float
// column never reads back as an integer column.
fn write_float(f: &mut fmt::Formatter<'_>, v: f64) -> fmt::Result {
    if v.is_nan() {
        f.write_str("nan")
    } else if v.is_infinite() {
        f.write_str(if v > 0.0 { "inf" } else { "-inf" })
    } else if v.fract() == 0.0 && v.abs() < 1e16 {
        write!(f, "{:.1}", v)
    } else {
        write!(f, "{}", v)
    }
}

/// Decode bytes as ISO-8859-1. Every byte maps to exactly one char, so
/// this cannot fail.
pub fn decode_latin1(raw: &[u8]) -> String {
    raw.iter().map(|&b| char::from(b)).collect()
}

/// Decode one field slice according to its descriptor.
pub fn decode_field(raw: &[u8], field: &FieldDescriptor) -> FieldValue {
    let text = decode_latin1(raw);
    match field.field_type {
        FieldType::Character => FieldValue::Text(text.trim_end().to_string()),
        FieldType::Numeric | FieldType::Float => decode_number(text.trim(), field.decimal_count),
        FieldType::Logical => decode_logical(&text),
        FieldType::Date => decode_date(text.trim()),
        FieldType::Other(_) => FieldValue::Text(text.trim().to_string()),
    }
}

fn decode_number(s: &str, decimal_count: u8) -> FieldValue {
    if s.is_empty() {
        return FieldValue::Empty;
    }
    let parsed = if s.contains('.') || decimal_count > 0 {
        s.parse::<f64>().ok().map(FieldValue::Float)
    } else {
        s.parse::<i64>().ok().map(FieldValue::Integer)
    };
    parsed.unwrap_or_else(|| FieldValue::Text(s.to_string()))
}

fn decode_logical(s: &str) -> FieldValue {
    match s.chars().next().map(|c| c.to_ascii_uppercase()) {
        Some('Y') | Some('T') => FieldValue::Logical(true),
        Some('N') | Some('F') => FieldValue::Logical(false),
        _ => FieldValue::Empty,
    }
}

fn decode_date(s: &str) -> FieldValue {
    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return FieldValue::Empty;
    }
    let (Ok(y), Ok(m), Ok(d)) = (s[..4].parse(), s[4..6].parse(), s[6..].parse()) else {
        return FieldValue::Empty;
    };
    NaiveDate::from_ymd_opt(y, m, d).map_or(FieldValue::Empty, FieldValue::Date)
}
