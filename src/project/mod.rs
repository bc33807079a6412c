// src/project/mod.rs

//! Projection of decoded rows onto the canonical output columns.

use std::{collections::HashMap, sync::Arc};
use tracing::warn;

use crate::table::DecodedRow;

/// Output columns, in output order.
pub const CANONICAL_FIELDS: &[&str] = &[
    "data_date",
    "data_srce",
    "pid",
    "name",
    "dec_lat",
    "dec_lon",
    "state",
    "county",
    "marker",
    "setting",
    "last_recv",
    "last_cond",
    "last_recby",
    "ortho_ht",
];

pub const DEFAULT_VERSION_FIELD: &str = "data_date";
pub const FALLBACK_VERSION: &str = "UNKNOWN";

/// Remove double quotes, collapse whitespace runs to one space, trim.
pub fn clean_value(raw: &str) -> String {
    raw.replace('"', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Column mapping for one source table, built once from its field names.
#[derive(Debug, Clone)]
pub struct Projection {
    columns: Arc<[String]>,
    source_idx: Vec<usize>,
    missing: Vec<String>,
}

impl Projection {
    /// Match `canonical` against `source_names` case-insensitively. When
    /// source names collide after lowercasing, the later field wins. A table
    /// sharing no field with `canonical` projects to zero columns.
    pub fn new<S: AsRef<str>>(source_names: &[String], canonical: &[S]) -> Self {
        let lookup: HashMap<String, usize> = source_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.to_lowercase(), i))
            .collect();

        let mut columns = Vec::with_capacity(canonical.len());
        let mut source_idx = Vec::with_capacity(canonical.len());
        let mut missing = Vec::new();
        for want in canonical {
            let want = want.as_ref();
            match lookup.get(&want.to_lowercase()) {
                Some(&i) => {
                    columns.push(want.to_string());
                    source_idx.push(i);
                }
                None => missing.push(want.to_string()),
            }
        }

        if columns.is_empty() {
            warn!(missing = ?missing, "no canonical field present in source");
        } else if !missing.is_empty() {
            warn!(missing = ?missing, "canonical fields absent from source; omitted");
        }

        Self {
            columns: columns.into(),
            source_idx,
            missing,
        }
    }

    /// Output header: the canonical names that were found, in canonical order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Canonical fields with no source column, in canonical order.
    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    pub fn project(&self, row: &DecodedRow) -> ProjectedRow {
        let values = self
            .source_idx
            .iter()
            .map(|&i| {
                row.value_at(i)
                    .map(|v| clean_value(&v.to_string()))
                    .unwrap_or_default()
            })
            .collect();
        ProjectedRow {
            columns: Arc::clone(&self.columns),
            values,
        }
    }
}

/// A row restricted to the canonical columns, every value cleaned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedRow {
    columns: Arc<[String]>,
    values: Vec<String>,
}

impl ProjectedRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| self.values[i].as_str())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }
}

/// Derives the output version token while rows stream past: the digits of
/// the first non-empty value of the version field.
#[derive(Debug, Clone)]
pub struct VersionTracker {
    field: String,
    token: Option<String>,
}

impl VersionTracker {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            token: None,
        }
    }

    pub fn observe(&mut self, row: &ProjectedRow) {
        if self.token.is_some() {
            return;
        }
        let digits: String = row
            .get(&self.field)
            .unwrap_or_default()
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        if !digits.is_empty() {
            self.token = Some(digits);
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn finish(self, fallback: &str) -> String {
        self.token.unwrap_or_else(|| fallback.to_string())
    }
}

/// Version token over a complete set of rows.
pub fn derive_version<'a>(
    rows: impl IntoIterator<Item = &'a ProjectedRow>,
    field: &str,
    fallback: &str,
) -> String {
    let mut tracker = VersionTracker::new(field);
    for row in rows {
        tracker.observe(row);
        if tracker.token().is_some() {
            break;
        }
    }
    tracker.finish(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::fixture::TableBuilder;
    use crate::table::TableReader;
    use std::io::Cursor;

    fn rows(builder: TableBuilder) -> (Vec<String>, Vec<DecodedRow>) {
        let reader = TableReader::new(Cursor::new(builder.build())).unwrap();
        let names = reader.field_names().to_vec();
        let rows = reader.records().collect::<Result<Vec<_>, _>>().unwrap();
        (names, rows)
    }

    #[test]
    fn cleans_quotes_and_whitespace() {
        assert_eq!(clean_value("  \"12  foo\"  "), "12 foo");
        assert_eq!(clean_value("a\t\tb\n c"), "a b c");
        assert_eq!(clean_value("\"\""), "");
        assert_eq!(clean_value(""), "");
    }

    #[test]
    fn matches_mixed_case_and_keeps_canonical_order() {
        let (names, rows) = rows(
            TableBuilder::new()
                .field("Dec_Lat", 'N', 10, 6)
                .field("PID", 'C', 6, 0)
                .field("NAME", 'C', 12, 0)
                .record(&["35.5", "AB1234", "  Bench  \"7\""]),
        );
        let projection = Projection::new(&names, CANONICAL_FIELDS);
        assert_eq!(projection.columns(), &["pid", "name", "dec_lat"]);
        assert_eq!(projection.missing().len(), CANONICAL_FIELDS.len() - 3);
        assert!(projection.missing().iter().any(|m| m == "data_date"));

        let out = projection.project(&rows[0]);
        let pairs: Vec<(&str, &str)> = out.iter().collect();
        assert_eq!(
            pairs,
            vec![("pid", "AB1234"), ("name", "Bench 7"), ("dec_lat", "35.5")]
        );
        assert_eq!(out.get("state"), None);
    }

    #[test]
    fn absent_columns_are_omitted_from_every_row() {
        let (names, rows) = rows(
            TableBuilder::new()
                .field("pid", 'C', 2, 0)
                .record(&["a1"])
                .record(&["b2"]),
        );
        let projection = Projection::new(&names, CANONICAL_FIELDS);
        for row in &rows {
            let out = projection.project(row);
            assert_eq!(out.columns(), &["pid"]);
            assert_eq!(out.values().len(), 1);
        }
    }

    #[test]
    fn no_overlap_projects_to_no_columns() {
        let (names, rows) = rows(
            TableBuilder::new()
                .field("FOO", 'C', 2, 0)
                .field("BAR", 'C', 2, 0)
                .record(&["x", "y"]),
        );
        let projection = Projection::new(&names, CANONICAL_FIELDS);
        assert!(projection.columns().is_empty());
        assert_eq!(projection.missing(), CANONICAL_FIELDS);
        assert!(projection.project(&rows[0]).values().is_empty());
    }

    #[test]
    fn version_from_first_nonempty_digits() {
        let (names, rows) = rows(
            TableBuilder::new()
                .field("DATA_DATE", 'C', 10, 0)
                .field("PID", 'C', 2, 0)
                .record(&["", "a1"])
                .record(&["n/a", "a2"])
                .record(&["2024-03-05", "a3"])
                .record(&["2023-01-01", "a4"]),
        );
        let projection = Projection::new(&names, CANONICAL_FIELDS);
        let projected: Vec<ProjectedRow> = rows.iter().map(|r| projection.project(r)).collect();
        assert_eq!(
            derive_version(&projected, DEFAULT_VERSION_FIELD, FALLBACK_VERSION),
            "20240305"
        );
    }

    #[test]
    fn version_falls_back_when_field_missing_or_blank() {
        let (names, rows) = rows(
            TableBuilder::new()
                .field("DATA_DATE", 'D', 8, 0)
                .field("PID", 'C', 2, 0)
                .record(&["        ", "a1"]),
        );
        let projection = Projection::new(&names, CANONICAL_FIELDS);
        let projected: Vec<ProjectedRow> = rows.iter().map(|r| projection.project(r)).collect();
        assert_eq!(
            derive_version(&projected, DEFAULT_VERSION_FIELD, FALLBACK_VERSION),
            "UNKNOWN"
        );

        let none: Vec<ProjectedRow> = Vec::new();
        assert_eq!(derive_version(&none, "data_date", "UNKNOWN"), "UNKNOWN");
    }
}
