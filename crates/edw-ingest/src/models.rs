//! Rows of the warehouse tracking tables

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;

/// Manifest columns carried on a file that are not consumed elsewhere
pub type Tags = BTreeMap<String, String>;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Health record shared by hosts and submit directories
#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenHistory {
    pub last_ok_time: Option<DateTime<Utc>>,
    pub last_not_ok_time: Option<DateTime<Utc>>,
    pub open_successes: i64,
    pub open_fails: i64,
    /// Newest attempt in bit 0, set on success
    pub history_bits: i64,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    pub name: String,
    pub first_added: DateTime<Utc>,
    #[sqlx(flatten)]
    pub history: OpenHistory,
    pub parallel_streams: i64,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SubmitDir {
    pub id: i64,
    pub url: String,
    pub host_id: i64,
    pub first_added: DateTime<Utc>,
    #[sqlx(flatten)]
    pub history: OpenHistory,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub url: String,
    pub user_id: i64,
    pub submit_dir_id: Option<i64>,
    pub submit_file_id: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub file_count: i64,
    pub old_files: i64,
    pub new_files: i64,
    pub byte_count: i64,
    pub old_bytes: i64,
    pub new_bytes: i64,
    pub meta_change_count: i64,
    pub file_id_in_transit: Option<i64>,
    pub error_message: String,
}

impl Submission {
    pub fn is_terminal(&self) -> bool {
        self.end_time.is_some() || !self.error_message.is_empty()
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct IngestedFile {
    pub id: i64,
    pub submission_id: i64,
    pub submit_dir_id: Option<i64>,
    pub submit_file_name: String,
    pub license_plate: String,
    pub warehouse_path: String,
    pub content_hash: String,
    pub size: i64,
    pub modified: i64,
    #[sqlx(json)]
    pub tags: Tags,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: String,
    pub replaced_by: Option<i64>,
    pub deprecated: String,
}

impl IngestedFile {
    /// Fetched, hashed and published without error
    pub fn is_complete(&self) -> bool {
        self.end_time.is_some() && self.error_message.is_empty() && !self.content_hash.is_empty()
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: i64,
    pub name: String,
    pub run_order: i64,
    pub file_pattern: String,
    pub dir_pattern: String,
    /// JSON object of tag name to wildcard, or empty for no tag filter
    pub tag_pattern: String,
    /// Shell command; `%u` is replaced with the file id
    pub on_file_end_upload: String,
}
