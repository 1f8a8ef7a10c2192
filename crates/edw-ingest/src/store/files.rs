//! File rows: two-phase reserve then commit or fail

use super::WarehouseStore;
use crate::error::Result;
use crate::models::{IngestedFile, Tags};
use chrono::{DateTime, Utc};

const FILE_COLUMNS: &str = "id, submission_id, submit_dir_id, submit_file_name, license_plate, \
     warehouse_path, content_hash, size, modified, tags, start_time, end_time, error_message, \
     replaced_by, deprecated";

const COMPLETE: &str = "end_time IS NOT NULL AND error_message = '' AND content_hash != ''";

/// Everything known about a file once its bytes are safely in the warehouse
#[derive(Debug, Clone)]
pub struct FileCommit<'a> {
    pub content_hash: &'a str,
    pub size: i64,
    pub modified: i64,
    pub tags: &'a Tags,
}

impl WarehouseStore {
    /// Insert a placeholder row so the id, and with it the license plate, is
    /// fixed before any bytes move.
    pub async fn reserve_file(
        &self,
        submission_id: i64,
        submit_dir_id: Option<i64>,
        submit_file_name: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO files (submission_id, submit_dir_id, submit_file_name, start_time) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(submission_id)
        .bind(submit_dir_id)
        .bind(submit_file_name)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn assign_location(&self, id: i64, license_plate: &str, warehouse_path: &str) -> Result<()> {
        sqlx::query("UPDATE files SET license_plate = ?, warehouse_path = ? WHERE id = ?")
            .bind(license_plate)
            .bind(warehouse_path)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn commit_file(&self, id: i64, commit: FileCommit<'_>, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE files SET content_hash = ?, size = ?, modified = ?, tags = ?, end_time = ?, \
             error_message = '' WHERE id = ?",
        )
        .bind(commit.content_hash)
        .bind(commit.size)
        .bind(commit.modified)
        .bind(serde_json::to_string(commit.tags)?)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail_file(&self, id: i64, message: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE files SET error_message = ?, end_time = ? WHERE id = ?")
            .bind(message)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Reserve and immediately fail a row that never got as far as a fetch.
    pub async fn record_failed_file(
        &self,
        submission_id: i64,
        submit_dir_id: Option<i64>,
        submit_file_name: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let id = self
            .reserve_file(submission_id, submit_dir_id, submit_file_name, now)
            .await?;
        self.fail_file(id, message, now).await?;
        Ok(id)
    }

    pub async fn get_file(&self, id: i64) -> Result<IngestedFile> {
        let file = sqlx::query_as::<_, IngestedFile>(&format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?"))
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(file)
    }

    pub async fn find_file_by_license_plate(&self, plate: &str) -> Result<Option<IngestedFile>> {
        let file = sqlx::query_as::<_, IngestedFile>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE license_plate = ? AND {COMPLETE} \
             ORDER BY id DESC LIMIT 1"
        ))
        .bind(plate)
        .fetch_optional(&self.pool)
        .await?;
        Ok(file)
    }

    /// Most recent complete file with this content, anywhere.
    pub async fn latest_complete_by_hash(&self, content_hash: &str) -> Result<Option<IngestedFile>> {
        let file = sqlx::query_as::<_, IngestedFile>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE content_hash = ? AND {COMPLETE} \
             ORDER BY id DESC LIMIT 1"
        ))
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(file)
    }

    /// Most recent complete file submitted under this directory and name.
    pub async fn latest_complete_by_dir_name(
        &self,
        submit_dir_id: i64,
        submit_file_name: &str,
    ) -> Result<Option<IngestedFile>> {
        let file = sqlx::query_as::<_, IngestedFile>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE submit_dir_id = ? AND submit_file_name = ? \
             AND {COMPLETE} ORDER BY id DESC LIMIT 1"
        ))
        .bind(submit_dir_id)
        .bind(submit_file_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(file)
    }

    /// Complete file with this content in this directory.
    pub async fn latest_complete_in_dir_by_hash(
        &self,
        submit_dir_id: i64,
        content_hash: &str,
    ) -> Result<Option<IngestedFile>> {
        let file = sqlx::query_as::<_, IngestedFile>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE submit_dir_id = ? AND content_hash = ? \
             AND {COMPLETE} ORDER BY id DESC LIMIT 1"
        ))
        .bind(submit_dir_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(file)
    }

    /// Every error-free attempt at this directory and name, newest first.
    pub async fn clean_attempts(&self, submit_dir_id: i64, submit_file_name: &str) -> Result<Vec<IngestedFile>> {
        let files = sqlx::query_as::<_, IngestedFile>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE submit_dir_id = ? AND submit_file_name = ? \
             AND error_message = '' AND deprecated = '' ORDER BY id DESC"
        ))
        .bind(submit_dir_id)
        .bind(submit_file_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(files)
    }

    pub async fn files_for_submission(&self, submission_id: i64) -> Result<Vec<IngestedFile>> {
        let files = sqlx::query_as::<_, IngestedFile>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE submission_id = ? ORDER BY id"
        ))
        .bind(submission_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(files)
    }

    pub async fn update_file_metadata(&self, id: i64, submit_file_name: &str, tags: &Tags) -> Result<()> {
        sqlx::query("UPDATE files SET submit_file_name = ?, tags = ? WHERE id = ?")
            .bind(submit_file_name)
            .bind(serde_json::to_string(tags)?)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Point an old file at its replacement and deprecate it with `reason`.
    pub async fn mark_replaced(&self, old_id: i64, new_id: i64, reason: &str) -> Result<()> {
        sqlx::query("UPDATE files SET replaced_by = ?, deprecated = ? WHERE id = ?")
            .bind(new_id)
            .bind(reason)
            .bind(old_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
