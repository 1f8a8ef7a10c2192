//! Error types for submission ingestion
//!
//! Errors are split by blast radius. `Structural`, `StaleLockout`,
//! `UnknownUser` and `MetadataConflict` end the whole submission. `Transport`,
//! `Integrity` and `RowValidation` raised while handling a single payload are
//! recorded on that file's row and the submission carries on.

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Remote open or read failed
    #[error("Fetch failed for {url}: {message}")]
    Transport { url: String, message: String },

    /// Transferred bytes do not match the declared hash
    #[error("md5 mismatch on {file}: manifest says {expected}, transfer gave {actual}. The file may be corrupted")]
    Integrity {
        file: String,
        expected: String,
        actual: String,
    },

    /// Manifest cannot be used at all
    #[error("Manifest structure error: {0}")]
    Structural(String),

    /// A required column is absent from the manifest header
    #[error("Manifest is missing required column '{0}'")]
    MissingColumn(String),

    /// One row failed a field or format check
    #[error("{0}")]
    RowValidation(String),

    /// Another attempt on the same URL still looks active
    #[error("Submission of {url} already in progress (submission {submission_id}); retry later or force")]
    StaleLockout { url: String, submission_id: i64 },

    #[error("No user registered with email '{0}'")]
    UnknownUser(String),

    /// Name or tags of an already ingested file differ and update was not requested
    #[error("Metadata for {file} differs from what is stored: {detail}. Resubmit with update to apply")]
    MetadataConflict { file: String, detail: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] edw_common::EdwError),

    #[error("Tag encoding error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IngestError {
    pub fn transport(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn integrity(
        file: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Integrity {
            file: file.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn row(message: impl Into<String>) -> Self {
        Self::RowValidation(message.into())
    }

    pub fn structural(message: impl Into<String>) -> Self {
        Self::Structural(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error may stay local to one file of a submission
    pub fn is_file_local(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::Integrity { .. }
                | Self::RowValidation(_)
                | Self::Common(_)
                | Self::Io(_)
        )
    }
}
