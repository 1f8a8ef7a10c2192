use super::WarehouseStore;
use crate::error::Result;
use crate::models::Subscriber;

impl WarehouseStore {
    pub async fn list_subscribers(&self) -> Result<Vec<Subscriber>> {
        let subscribers = sqlx::query_as::<_, Subscriber>(
            "SELECT id, name, run_order, file_pattern, dir_pattern, tag_pattern, on_file_end_upload \
             FROM subscribers ORDER BY run_order, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(subscribers)
    }

    pub async fn add_subscriber(
        &self,
        name: &str,
        run_order: i64,
        file_pattern: &str,
        dir_pattern: &str,
        tag_pattern: &str,
        command: &str,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO subscribers (name, run_order, file_pattern, dir_pattern, tag_pattern, on_file_end_upload) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(run_order)
        .bind(file_pattern)
        .bind(dir_pattern)
        .bind(tag_pattern)
        .bind(command)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }
}
