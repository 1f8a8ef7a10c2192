//! Per-row field checks
//!
//! Each check looks at one row in isolation. A failure marks only that row
//! invalid; the caller moves on to the next one.

use super::{
    ManifestRow, ENRICHED_IN, EXPERIMENT, FORMAT, MD5_SUM, MODIFIED, OUTPUT_TYPE, PAIRED_END,
    REPLACES, REPLACE_REASON, REPLICATE, SIZE, UCSC_DB, VALID_KEY,
};
use crate::error::IngestError;
use crate::formats::FileFormat;
use crate::models::Tags;
use edw_common::fingerprint::{compute_validation_key, is_md5_hex};
use edw_common::license_plate::has_plate_shape;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Controlled vocabulary for `enriched_in`
pub const ENRICHED_IN_VOCAB: &[&str] = &[
    "exon", "intron", "promoter", "coding", "utr", "utr3", "utr5", "open", "mixed", "unknown",
    "common_snp",
];

/// Assemblies a file may be placed on
pub const KNOWN_ASSEMBLIES: &[&str] = &["hg19", "hg38", "mm9", "mm10", "dm3", "ce10"];

pub const MAX_REPLICATE: u32 = 99;

#[allow(clippy::unwrap_used)]
static EXPERIMENT_ACCESSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ENCSR[0-9]{3}[A-Z]{3}$").unwrap());

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RowCheckError {
    #[error("file_name is required and cannot be blank")]
    MissingFileName,

    #[error("Character '{ch}' not allowed in file_name '{name}'")]
    BadFileNameChar { ch: char, name: String },

    #[error("file_name '{0}' must be a relative path without '..' components")]
    UnsafePath(String),

    #[error("{0} is required and cannot be blank")]
    Blank(&'static str),

    #[error("Character '{ch}' not allowed in {column} '{value}'")]
    BadSymbol {
        column: &'static str,
        ch: char,
        value: String,
    },

    #[error("'{0}' in experiment field is not an ENCSR accession or wgEncode name")]
    BadExperiment(String),

    #[error("'{0}' is not a good value for replicate (pooled, n/a or 1-{max})", max = MAX_REPLICATE)]
    BadReplicate(String),

    #[error("enriched_in '{0}' is not supported")]
    BadEnrichment(String),

    #[error("paired_end is required for fastq and must be 1, 2 or n/a, got '{0}'")]
    PairedEndRequired(String),

    #[error("paired_end '{value}' is only allowed for fastq, not {format}")]
    PairedEndForbidden { value: String, format: String },

    #[error("ucsc_db '{0}' is not a known assembly")]
    UnknownAssembly(String),

    #[error(
        "Can't derive ucsc_db from '{0}': put the file under a top level directory named for \
         its assembly, like hg19 or mm10, or include a ucsc_db column"
    )]
    NoAssembly(String),

    #[error("md5 '{0}' is not in all lower case 32 character hexadecimal format")]
    BadHash(String),

    #[error("Invalid {column} '{value}'")]
    BadNumber { column: &'static str, value: String },

    #[error("size {0} is larger than the warehouse can record")]
    SizeTooLarge(u64),

    #[error("The valid_key {given} for {file} doesn't fit")]
    KeyMismatch { given: String, file: String },

    #[error("replaces '{given}' is not a license plate starting with {prefix}")]
    BadReplaces { given: String, prefix: String },

    #[error("replace_reason is required to replace {0}")]
    MissingReplaceReason(String),
}

impl From<RowCheckError> for IngestError {
    fn from(e: RowCheckError) -> Self {
        IngestError::RowValidation(e.to_string())
    }
}

type CheckResult<T> = std::result::Result<T, RowCheckError>;

/// Fingerprint a submitted row claims for its file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredFingerprint {
    pub content_hash: String,
    pub size: u64,
    pub modified: i64,
}

/// A request to supersede an existing file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub license_plate: String,
    pub reason: String,
}

fn is_empty_or_na(s: &str) -> bool {
    s.is_empty() || s.eq_ignore_ascii_case("n/a")
}

pub fn check_file_name(name: &str) -> CheckResult<()> {
    if name.is_empty() {
        return Err(RowCheckError::MissingFileName);
    }
    if let Some(ch) = name
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '_' | '-' | '.' | '/' | '+'))
    {
        return Err(RowCheckError::BadFileNameChar {
            ch,
            name: name.to_string(),
        });
    }
    if name.starts_with('/') || name.split('/').any(|part| part == ".." || part.is_empty()) {
        return Err(RowCheckError::UnsafePath(name.to_string()));
    }
    Ok(())
}

fn check_symbol(column: &'static str, value: &str) -> CheckResult<()> {
    if value.is_empty() {
        return Err(RowCheckError::Blank(column));
    }
    if value == "n/a" {
        return Ok(());
    }
    match value.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        Some(ch) => Err(RowCheckError::BadSymbol {
            column,
            ch,
            value: value.to_string(),
        }),
        None => Ok(()),
    }
}

fn check_experiment(value: &str) -> CheckResult<()> {
    if value.is_empty() {
        return Err(RowCheckError::Blank(EXPERIMENT));
    }
    if value.starts_with("wgEncode") || EXPERIMENT_ACCESSION.is_match(value) {
        Ok(())
    } else {
        Err(RowCheckError::BadExperiment(value.to_string()))
    }
}

fn check_replicate(value: &str) -> CheckResult<()> {
    match value {
        "" => Err(RowCheckError::Blank(REPLICATE)),
        "pooled" | "n/a" => Ok(()),
        _ => match value.parse::<u32>() {
            Ok(n) if value.bytes().all(|b| b.is_ascii_digit()) && (1..=MAX_REPLICATE).contains(&n) => {
                Ok(())
            },
            _ => Err(RowCheckError::BadReplicate(value.to_string())),
        },
    }
}

fn check_enriched_in(value: &str) -> CheckResult<()> {
    if value.is_empty() {
        return Err(RowCheckError::Blank(ENRICHED_IN));
    }
    if ENRICHED_IN_VOCAB.contains(&value) {
        Ok(())
    } else {
        Err(RowCheckError::BadEnrichment(value.to_string()))
    }
}

fn check_paired_end(format: &FileFormat, row: &ManifestRow) -> CheckResult<()> {
    let value = row.get(PAIRED_END);
    if format.is_fastq() {
        match value {
            "1" | "2" | "n/a" => Ok(()),
            other => Err(RowCheckError::PairedEndRequired(other.to_string())),
        }
    } else if is_empty_or_na(value) {
        Ok(())
    } else {
        Err(RowCheckError::PairedEndForbidden {
            value: value.to_string(),
            format: format.to_string(),
        })
    }
}

/// Assembly for a row: the `ucsc_db` column when present, otherwise the
/// top-level directory of the file name, which must name a known assembly.
/// `None` only when the column is present and empty or `n/a`.
pub fn assembly_for(row: &ManifestRow) -> CheckResult<Option<String>> {
    if row.has(UCSC_DB) {
        let db = row.get(UCSC_DB);
        if is_empty_or_na(db) {
            return Ok(None);
        }
        return if KNOWN_ASSEMBLIES.contains(&db) {
            Ok(Some(db.to_string()))
        } else {
            Err(RowCheckError::UnknownAssembly(db.to_string()))
        };
    }

    derive_assembly(row.file_name()).map(Some)
}

fn derive_assembly(file_name: &str) -> CheckResult<String> {
    let (top, _) = file_name
        .split_once('/')
        .ok_or_else(|| RowCheckError::NoAssembly(file_name.to_string()))?;
    if KNOWN_ASSEMBLIES.contains(&top) {
        Ok(top.to_string())
    } else {
        Err(RowCheckError::UnknownAssembly(top.to_string()))
    }
}

/// Tags for a row. A `ucsc_db` derived from the file name is recorded
/// alongside the manifest's own columns.
pub fn tags_for(row: &ManifestRow) -> CheckResult<Tags> {
    let mut tags = row.tags();
    if !row.has(UCSC_DB) {
        tags.insert(UCSC_DB.to_string(), derive_assembly(row.file_name())?);
    }
    Ok(tags)
}

/// Checks shared by local validation and submission. Returns the parsed format.
pub fn check_descriptive_fields(row: &ManifestRow) -> std::result::Result<FileFormat, IngestError> {
    check_file_name(row.file_name())?;

    let format_name = row.get(FORMAT);
    if format_name.is_empty() {
        return Err(RowCheckError::Blank(FORMAT).into());
    }
    let format: FileFormat = format_name.parse()?;

    check_symbol(OUTPUT_TYPE, row.get(OUTPUT_TYPE))?;
    check_experiment(row.get(EXPERIMENT))?;
    check_replicate(row.get(REPLICATE))?;
    check_enriched_in(row.get(ENRICHED_IN))?;
    check_paired_end(&format, row)?;
    assembly_for(row)?;

    Ok(format)
}

fn parse_number<T: std::str::FromStr>(column: &'static str, value: &str) -> CheckResult<T> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RowCheckError::BadNumber {
            column,
            value: value.to_string(),
        });
    }
    value.parse().map_err(|_| RowCheckError::BadNumber {
        column,
        value: value.to_string(),
    })
}

/// Hash, size and mtime a submitted row declares, with its validation key
/// checked when the manifest carries one.
pub fn check_declared_fingerprint(row: &ManifestRow) -> std::result::Result<DeclaredFingerprint, IngestError> {
    let content_hash = row.get(MD5_SUM);
    if !is_md5_hex(content_hash) {
        return Err(RowCheckError::BadHash(content_hash.to_string()).into());
    }

    let size: u64 = parse_number(SIZE, row.get(SIZE))?;
    if i64::try_from(size).is_err() {
        return Err(RowCheckError::SizeTooLarge(size).into());
    }
    let modified: i64 = parse_number(MODIFIED, row.get(MODIFIED))?;

    if row.has(VALID_KEY) {
        let expected = compute_validation_key(content_hash, size)?;
        let given = row.get(VALID_KEY);
        if given != expected {
            return Err(RowCheckError::KeyMismatch {
                given: given.to_string(),
                file: row.file_name().to_string(),
            }
            .into());
        }
    }

    Ok(DeclaredFingerprint {
        content_hash: content_hash.to_string(),
        size,
        modified,
    })
}

/// Parse the `replaces` pair. Empty or `n/a` means nothing is replaced.
pub fn check_replacement(row: &ManifestRow, plate_prefix: &str) -> CheckResult<Option<Replacement>> {
    let plate = row.get(REPLACES);
    if is_empty_or_na(plate) {
        return Ok(None);
    }
    if !has_plate_shape(plate_prefix, plate) {
        return Err(RowCheckError::BadReplaces {
            given: plate.to_string(),
            prefix: plate_prefix.to_string(),
        });
    }

    let reason = row.get(REPLACE_REASON);
    if is_empty_or_na(reason) {
        return Err(RowCheckError::MissingReplaceReason(plate.to_string()));
    }

    Ok(Some(Replacement {
        license_plate: plate.to_string(),
        reason: reason.to_string(),
    }))
}
