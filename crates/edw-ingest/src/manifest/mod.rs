//! Manifest tables
//!
//! A manifest is tab-separated text. The first non-blank line names the
//! columns (a leading `#` on it is allowed); blank lines and `#` comments
//! elsewhere are skipped. Every data row must have exactly one value per
//! column.

pub mod checks;
pub mod validate;

use crate::error::{IngestError, Result};
use crate::models::Tags;
use std::collections::{BTreeMap, HashSet};

pub const FILE_NAME: &str = "file_name";
pub const FORMAT: &str = "format";
pub const OUTPUT_TYPE: &str = "output_type";
pub const EXPERIMENT: &str = "experiment";
pub const REPLICATE: &str = "replicate";
pub const ENRICHED_IN: &str = "enriched_in";
pub const MD5_SUM: &str = "md5_sum";
pub const SIZE: &str = "size";
pub const MODIFIED: &str = "modified";
pub const VALID_KEY: &str = "valid_key";
pub const UCSC_DB: &str = "ucsc_db";
pub const PAIRED_END: &str = "paired_end";
pub const REPLACES: &str = "replaces";
pub const REPLACE_REASON: &str = "replace_reason";

/// Columns every manifest describes, whether computed locally or submitted
pub const DESCRIPTIVE_COLUMNS: &[&str] =
    &[FILE_NAME, FORMAT, OUTPUT_TYPE, EXPERIMENT, REPLICATE, ENRICHED_IN];

/// Columns computed by a local validation run
pub const FINGERPRINT_COLUMNS: &[&str] = &[MD5_SUM, SIZE, MODIFIED, VALID_KEY];

/// Columns a submitted manifest must have
pub const SUBMIT_COLUMNS: &[&str] = &[
    FILE_NAME,
    FORMAT,
    OUTPUT_TYPE,
    EXPERIMENT,
    REPLICATE,
    ENRICHED_IN,
    MD5_SUM,
    SIZE,
    MODIFIED,
];

/// Columns consumed by the submit itself, left out of tags
const NON_TAG_COLUMNS: &[&str] = &[FILE_NAME, MD5_SUM, SIZE, MODIFIED, VALID_KEY, REPLACES, REPLACE_REASON];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRow {
    /// 1-based line in the manifest text
    pub line: usize,
    values: BTreeMap<String, String>,
}

impl ManifestRow {
    pub fn new(line: usize, values: BTreeMap<String, String>) -> Self {
        Self { line, values }
    }

    /// Value of `column`, empty when the column is absent.
    pub fn get(&self, column: &str) -> &str {
        self.values.get(column).map(String::as_str).unwrap_or("")
    }

    pub fn has(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn set(&mut self, column: &str, value: impl Into<String>) {
        self.values.insert(column.to_string(), value.into());
    }

    pub fn file_name(&self) -> &str {
        self.get(FILE_NAME)
    }

    /// Everything except the name and fingerprint columns.
    pub fn tags(&self) -> Tags {
        self.values
            .iter()
            .filter(|(k, _)| !NON_TAG_COLUMNS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestTable {
    pub columns: Vec<String>,
    pub rows: Vec<ManifestRow>,
}

impl ManifestTable {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Render back to tab-separated text with a `#` header.
    pub fn to_tsv(&self) -> String {
        let mut out = String::new();
        out.push('#');
        out.push_str(&self.columns.join("\t"));
        out.push('\n');
        for row in &self.rows {
            let values: Vec<&str> = self.columns.iter().map(|c| row.get(c)).collect();
            out.push_str(&values.join("\t"));
            out.push('\n');
        }
        out
    }

    /// Append `column` if it is not already present.
    pub fn ensure_column(&mut self, column: &str) {
        if !self.has_column(column) {
            self.columns.push(column.to_string());
        }
    }
}

/// Parse manifest text, requiring every column in `required`.
pub fn parse(text: &str, required: &[&str]) -> Result<ManifestTable> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(ix, line)| (ix + 1, line.trim_end_matches('\r')));

    let columns = loop {
        let Some((_, line)) = lines.next() else {
            return Err(IngestError::structural("Manifest is empty"));
        };
        if line.trim().is_empty() {
            continue;
        }
        // Prose comments before the header carry no tabs
        if line.starts_with('#') && !line.contains('\t') {
            continue;
        }
        break split_header(line)?;
    };

    for column in required {
        if !columns.iter().any(|c| c == column) {
            return Err(IngestError::MissingColumn(column.to_string()));
        }
    }

    let has = |name: &str| columns.iter().any(|c| c == name);
    if has(REPLACES) && !has(REPLACE_REASON) {
        return Err(IngestError::structural(format!(
            "got '{}' column without '{}' column",
            REPLACES, REPLACE_REASON
        )));
    }

    let mut rows = Vec::new();
    for (line_no, line) in lines {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != columns.len() {
            return Err(IngestError::structural(format!(
                "line {} has {} fields, expected {}",
                line_no,
                fields.len(),
                columns.len()
            )));
        }

        let values = columns
            .iter()
            .zip(fields)
            .map(|(c, v)| (c.clone(), v.trim().to_string()))
            .collect();
        rows.push(ManifestRow::new(line_no, values));
    }

    Ok(ManifestTable { columns, rows })
}

fn split_header(line: &str) -> Result<Vec<String>> {
    let header = line.strip_prefix('#').unwrap_or(line);
    let columns: Vec<String> = header.split('\t').map(|c| c.trim().to_string()).collect();

    let mut seen = HashSet::new();
    for column in &columns {
        if column.is_empty() {
            return Err(IngestError::structural("Manifest header has an empty column name"));
        }
        if !seen.insert(column.as_str()) {
            return Err(IngestError::structural(format!(
                "Manifest header repeats column '{}'",
                column
            )));
        }
    }
    Ok(columns)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const HEADER: &str = "#file_name\tformat\toutput_type\texperiment\treplicate\tenriched_in\tmd5_sum\tsize\tmodified\tlab";

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let text = format!(
            "# produced by the lab pipeline\n\n{}\n# a note\na.bed\tbed\tpeaks\tENCSR000AAA\t1\texon\t{}\t12\t1700000000\tsmith\n\n",
            HEADER,
            "0".repeat(32)
        );
        let table = parse(&text, SUBMIT_COLUMNS).unwrap();
        assert_eq!(table.columns.len(), 10);
        assert_eq!(table.rows.len(), 1);

        let row = &table.rows[0];
        assert_eq!(row.line, 5);
        assert_eq!(row.file_name(), "a.bed");
        assert_eq!(row.get("lab"), "smith");
        assert_eq!(row.get("missing"), "");

        let tags = row.tags();
        assert_eq!(tags.get("format").map(String::as_str), Some("bed"));
        assert!(!tags.contains_key("md5_sum"));
        assert!(!tags.contains_key("file_name"));
    }

    #[test]
    fn test_missing_column_is_structural() {
        let err = parse("file_name\tformat\n", SUBMIT_COLUMNS).unwrap_err();
        assert!(matches!(err, IngestError::MissingColumn(ref c) if c == "output_type"));
    }

    #[test]
    fn test_replaces_needs_reason() {
        let err = parse("file_name\treplaces\n", &[FILE_NAME]).unwrap_err();
        assert!(matches!(err, IngestError::Structural(_)));
    }

    #[test]
    fn test_ragged_row_is_structural() {
        let err = parse("file_name\tformat\na.bed\n", &[FILE_NAME]).unwrap_err();
        assert!(matches!(err, IngestError::Structural(ref m) if m.contains("line 2")));
    }

    #[test]
    fn test_round_trip_preserves_column_order() {
        let mut table = parse("file_name\tformat\na.bed\tbed\n", &[FILE_NAME]).unwrap();
        table.ensure_column(MD5_SUM);
        table.rows[0].set(MD5_SUM, "abc");
        assert_eq!(table.to_tsv(), "#file_name\tformat\tmd5_sum\na.bed\tbed\tabc\n");
    }

    #[test]
    fn test_empty_manifest() {
        assert!(matches!(parse("\n\n", &[]), Err(IngestError::Structural(_))));
    }
}
