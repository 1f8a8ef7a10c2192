//! Submission rows and their counters

use super::WarehouseStore;
use crate::error::Result;
use crate::models::Submission;
use chrono::{DateTime, Utc};

const SUBMISSION_COLUMNS: &str = "id, url, user_id, submit_dir_id, submit_file_id, start_time, \
     end_time, file_count, old_files, new_files, byte_count, old_bytes, new_bytes, \
     meta_change_count, file_id_in_transit, error_message";

impl WarehouseStore {
    pub async fn create_submission(&self, url: &str, user_id: i64, now: DateTime<Utc>) -> Result<i64> {
        let result = sqlx::query("INSERT INTO submissions (url, user_id, start_time) VALUES (?, ?, ?)")
            .bind(url)
            .bind(user_id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_submission(&self, id: i64) -> Result<Submission> {
        let submission = sqlx::query_as::<_, Submission>(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(submission)
    }

    /// Most recent submission of `url`, if any.
    pub async fn latest_submission_for_url(&self, url: &str) -> Result<Option<Submission>> {
        let submission = sqlx::query_as::<_, Submission>(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE url = ? ORDER BY id DESC LIMIT 1"
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(submission)
    }

    /// Newest start or end time over the files of a submission.
    pub async fn latest_file_activity(&self, submission_id: i64) -> Result<Option<DateTime<Utc>>> {
        let rows: Vec<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> =
            sqlx::query_as("SELECT start_time, end_time FROM files WHERE submission_id = ?")
                .bind(submission_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .flat_map(|(start, end)| [start, end])
            .flatten()
            .max())
    }

    /// Current error text; a non-empty value asks a running submission to stop.
    pub async fn submission_error(&self, id: i64) -> Result<String> {
        let message: String = sqlx::query_scalar("SELECT error_message FROM submissions WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(message)
    }

    pub async fn set_submission_dir(&self, id: i64, submit_dir_id: i64) -> Result<()> {
        sqlx::query("UPDATE submissions SET submit_dir_id = ? WHERE id = ?")
            .bind(submit_dir_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_submission_manifest(&self, id: i64, file_id: i64) -> Result<()> {
        sqlx::query("UPDATE submissions SET submit_file_id = ? WHERE id = ?")
            .bind(file_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_file_in_transit(&self, id: i64, file_id: Option<i64>) -> Result<()> {
        sqlx::query("UPDATE submissions SET file_id_in_transit = ? WHERE id = ?")
            .bind(file_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Clear the in-transit marker if it still points at `file_id`.
    pub async fn clear_file_in_transit(&self, id: i64, file_id: i64) -> Result<()> {
        sqlx::query("UPDATE submissions SET file_id_in_transit = NULL WHERE id = ? AND file_id_in_transit = ?")
            .bind(id)
            .bind(file_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_enumeration(&self, id: i64, file_count: i64, byte_count: i64) -> Result<()> {
        sqlx::query("UPDATE submissions SET file_count = ?, byte_count = ? WHERE id = ?")
            .bind(file_count)
            .bind(byte_count)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn add_old_file(&self, id: i64, bytes: i64) -> Result<()> {
        sqlx::query(
            "UPDATE submissions SET old_files = old_files + 1, old_bytes = old_bytes + ? WHERE id = ?",
        )
        .bind(bytes)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_new_file(&self, id: i64, bytes: i64) -> Result<()> {
        sqlx::query(
            "UPDATE submissions SET new_files = new_files + 1, new_bytes = new_bytes + ? WHERE id = ?",
        )
        .bind(bytes)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_meta_change(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE submissions SET meta_change_count = meta_change_count + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a fatal error. The first error wins.
    pub async fn abort_submission(&self, id: i64, message: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE submissions SET error_message = CASE WHEN error_message = '' THEN ? ELSE error_message END, \
             end_time = COALESCE(end_time, ?), file_id_in_transit = NULL WHERE id = ?",
        )
        .bind(message)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn finalize_submission(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE submissions SET end_time = ?, file_id_in_transit = NULL WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
