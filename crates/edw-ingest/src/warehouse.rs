//! Layout of the content tree and submission URLs
//!
//! Files land at `<root>/YYYY/M/D/<license plate><suffix>`, dated by the day
//! they were ingested (UTC, no zero padding).

use crate::error::{IngestError, Result};
use chrono::{DateTime, Datelike, Utc};

/// Suffixes that wrap another format and so keep the one before them too.
const WRAPPER_SUFFIXES: &[&str] = &[".gz", ".bz2"];

/// Date partition for files ingested at `now`, with trailing slash.
pub fn date_dir(now: DateTime<Utc>) -> String {
    format!("{}/{}/{}/", now.year(), now.month(), now.day())
}

/// Suffix kept from the submitted name: `reads.fastq.gz` keeps `.fastq.gz`,
/// `peaks.bigBed` keeps `.bigBed`, `README` keeps nothing.
pub fn file_suffix(name: &str) -> &str {
    let base = name.rsplit('/').next().unwrap_or(name);

    let Some(dot) = base.rfind('.') else {
        return "";
    };
    let last = &base[dot..];

    if WRAPPER_SUFFIXES.contains(&last) {
        if let Some(inner) = base[..dot].rfind('.') {
            return &base[inner..];
        }
    }
    last
}

/// Path of a payload relative to the warehouse root.
pub fn relative_path(now: DateTime<Utc>, license_plate: &str, submit_file_name: &str) -> String {
    format!("{}{}{}", date_dir(now), license_plate, file_suffix(submit_file_name))
}

/// Split a manifest URL into the submit directory (through the last `/`)
/// and the manifest file name.
pub fn split_submit_url(url: &str) -> Result<(String, String)> {
    let slash = url
        .rfind('/')
        .ok_or_else(|| IngestError::structural(format!("Submission URL '{}' has no directory", url)))?;

    let (dir, name) = url.split_at(slash + 1);
    if name.is_empty() {
        return Err(IngestError::structural(format!(
            "Submission URL '{}' names a directory, not a manifest",
            url
        )));
    }

    Ok((dir.to_string(), name.to_string()))
}

/// Host component used for health tracking. Local files share the host `localhost`.
pub fn host_of(url: &str) -> Result<String> {
    let parsed = url::Url::parse(url)
        .map_err(|e| IngestError::transport(url, format!("invalid URL: {}", e)))?;

    match parsed.scheme() {
        "file" => Ok("localhost".to_string()),
        _ => parsed
            .host_str()
            .map(str::to_string)
            .ok_or_else(|| IngestError::transport(url, "URL has no host")),
    }
}
