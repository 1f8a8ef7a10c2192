//! Local validation run
//!
//! Before submitting, a lab validates its directory: every file named by the
//! manifest is hashed, keyed and format-checked, and the results are written
//! to a validated manifest. That output is fed back in as the prior run next
//! time, so files whose size and mtime have not moved are not hashed again.

use super::checks::check_descriptive_fields;
use super::{parse, ManifestRow, ManifestTable, DESCRIPTIVE_COLUMNS, FILE_NAME, FINGERPRINT_COLUMNS, MD5_SUM, MODIFIED, SIZE, VALID_KEY};
use crate::error::{IngestError, Result};
use crate::formats::{check_gzip_suffix, FormatValidator};
use edw_common::fingerprint::{compute_validation_key, file_md5, is_md5_hex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};

/// Fingerprint of one validated row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFingerprint {
    pub content_hash: String,
    pub validation_key: String,
    pub size: u64,
    pub modified: i64,
    /// Taken from the prior run instead of recomputed
    pub reused: bool,
}

#[derive(Debug, Clone)]
pub struct RowReport {
    pub line: usize,
    pub file_name: String,
    pub outcome: std::result::Result<RowFingerprint, String>,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub rows: Vec<RowReport>,
    /// Where the validated manifest was written
    pub output: PathBuf,
}

impl ValidationReport {
    pub fn failed(&self) -> impl Iterator<Item = &RowReport> {
        self.rows.iter().filter(|r| r.outcome.is_err())
    }

    pub fn all_ok(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Size and mtime (epoch seconds) of a local file
async fn stat(path: &Path) -> Result<(u64, i64)> {
    let metadata = tokio::fs::metadata(path).await?;
    let modified = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok((metadata.len(), modified))
}

/// Prior fingerprint for a row, if its size and mtime still match.
fn reusable(prior: Option<&ManifestRow>, size: u64, modified: i64) -> Option<RowFingerprint> {
    let prior = prior?;
    if prior.get(SIZE).parse::<u64>().ok()? != size || prior.get(MODIFIED).parse::<i64>().ok()? != modified {
        return None;
    }

    let content_hash = prior.get(MD5_SUM);
    let validation_key = prior.get(VALID_KEY);
    if !is_md5_hex(content_hash) || validation_key.is_empty() {
        return None;
    }

    Some(RowFingerprint {
        content_hash: content_hash.to_string(),
        validation_key: validation_key.to_string(),
        size,
        modified,
        reused: true,
    })
}

/// Validate a single row whose file lives under `dir`.
pub async fn validate_row(
    dir: &Path,
    row: &ManifestRow,
    prior: Option<&ManifestRow>,
    validator: &dyn FormatValidator,
) -> Result<RowFingerprint> {
    let format = check_descriptive_fields(row)?;
    let path = dir.join(row.file_name());
    let (size, modified) = stat(&path)
        .await
        .map_err(|e| IngestError::row(format!("Cannot read {}: {}", row.file_name(), e)))?;

    if let Some(fingerprint) = reusable(prior, size, modified) {
        debug!(file = %row.file_name(), "Unchanged since prior validation, reusing fingerprint");
        return Ok(fingerprint);
    }

    let hash_path = path.clone();
    let content_hash = tokio::task::spawn_blocking(move || file_md5(hash_path))
        .await
        .map_err(|e| IngestError::row(format!("Hashing {} aborted: {}", row.file_name(), e)))??;
    let validation_key = compute_validation_key(&content_hash, size)?;

    check_gzip_suffix(&path, row.file_name())?;
    validator.check(&format, &path).await?;

    Ok(RowFingerprint {
        content_hash,
        validation_key,
        size,
        modified,
        reused: false,
    })
}

fn load_prior(path: &Path) -> HashMap<String, ManifestRow> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "No prior validation to reuse");
            return HashMap::new();
        },
    };

    match parse(&text, &[FILE_NAME]) {
        Ok(table) => table
            .rows
            .into_iter()
            .map(|row| (row.file_name().to_string(), row))
            .collect(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable prior validation");
            HashMap::new()
        },
    }
}

/// Validate every row of `manifest` under `dir` and write the validated
/// manifest to `output`. Rows that fail are reported and left out of the
/// output. Only a structurally broken manifest is an error.
pub async fn validate_manifest(
    dir: &Path,
    manifest: &Path,
    output: &Path,
    prior: Option<&Path>,
    validator: &dyn FormatValidator,
) -> Result<ValidationReport> {
    let text = tokio::fs::read_to_string(manifest).await?;
    let table = parse(&text, DESCRIPTIVE_COLUMNS)?;
    let prior_rows = prior.map(load_prior).unwrap_or_default();

    let mut validated = ManifestTable {
        columns: table.columns.clone(),
        rows: Vec::new(),
    };
    for column in FINGERPRINT_COLUMNS {
        validated.ensure_column(column);
    }

    let mut reports = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        let outcome = validate_row(dir, row, prior_rows.get(row.file_name()), validator).await;

        match &outcome {
            Ok(fingerprint) => {
                let mut out = row.clone();
                out.set(MD5_SUM, fingerprint.content_hash.as_str());
                out.set(SIZE, fingerprint.size.to_string());
                out.set(MODIFIED, fingerprint.modified.to_string());
                out.set(VALID_KEY, fingerprint.validation_key.as_str());
                validated.rows.push(out);
            },
            Err(e) => warn!(file = %row.file_name(), line = row.line, error = %e, "Row failed validation"),
        }

        reports.push(RowReport {
            line: row.line,
            file_name: row.file_name().to_string(),
            outcome: outcome.map_err(|e| e.to_string()),
        });
    }

    let staging = output.with_extension("tmp");
    tokio::fs::write(&staging, validated.to_tsv()).await?;
    tokio::fs::rename(&staging, output).await?;

    let report = ValidationReport {
        rows: reports,
        output: output.to_path_buf(),
    };
    info!(
        rows = report.rows.len(),
        failed = report.failed().count(),
        reused = report
            .rows
            .iter()
            .filter(|r| matches!(r.outcome, Ok(RowFingerprint { reused: true, .. })))
            .count(),
        output = %output.display(),
        "Validation finished"
    );

    Ok(report)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::formats::SignatureValidator;

    const HEADER: &str = "file_name\tformat\toutput_type\texperiment\treplicate\tenriched_in\tucsc_db\n";

    #[tokio::test]
    async fn test_failed_row_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bed"), "chr1\t1\t5\n").unwrap();
        std::fs::write(dir.path().join("b.bed"), "chr1\t9\t5\n").unwrap();
        std::fs::write(
            dir.path().join("manifest.txt"),
            format!(
                "{HEADER}a.bed\tbed\tpeaks\tENCSR000AAA\t1\texon\thg19\n\
                 b.bed\tbed\tpeaks\tENCSR000AAA\t1\texon\thg19\n\
                 c.bed\tbed\tpeaks\tENCSR000AAA\t1\texon\thg19\n"
            ),
        )
        .unwrap();

        let output = dir.path().join("validated.txt");
        let report = validate_manifest(
            dir.path(),
            &dir.path().join("manifest.txt"),
            &output,
            None,
            &SignatureValidator,
        )
        .await
        .unwrap();

        assert!(!report.all_ok());
        assert_eq!(report.failed().count(), 2);

        let written = parse(&std::fs::read_to_string(&output).unwrap(), FINGERPRINT_COLUMNS).unwrap();
        assert_eq!(written.rows.len(), 1);
        assert_eq!(written.rows[0].file_name(), "a.bed");
        assert_eq!(written.rows[0].get(SIZE), "9");
    }

    #[tokio::test]
    async fn test_missing_descriptive_column_is_structural() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("manifest.txt"), "file_name\tformat\na.bed\tbed\n").unwrap();

        let err = validate_manifest(
            dir.path(),
            &dir.path().join("manifest.txt"),
            &dir.path().join("validated.txt"),
            None,
            &SignatureValidator,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IngestError::MissingColumn(_)));
    }
}
