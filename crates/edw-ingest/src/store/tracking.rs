//! Host and submit directory health records

use super::WarehouseStore;
use crate::config::DEFAULT_HOST_PARALLEL_STREAMS;
use crate::error::Result;
use crate::models::{Host, SubmitDir};
use chrono::{DateTime, Utc};

const HOST_COLUMNS: &str = "id, name, first_added, last_ok_time, last_not_ok_time, \
     open_successes, open_fails, history_bits, parallel_streams";

const DIR_COLUMNS: &str = "id, url, host_id, first_added, last_ok_time, last_not_ok_time, \
     open_successes, open_fails, history_bits";

/// Only the most recent 32 attempts are kept in the shift register.
const HISTORY_MASK: i64 = 0xFFFF_FFFF;

/// Which health table an open attempt is recorded against
#[derive(Debug, Clone, Copy)]
enum Tracked {
    Host,
    SubmitDir,
}

impl Tracked {
    fn table(self) -> &'static str {
        match self {
            Tracked::Host => "hosts",
            Tracked::SubmitDir => "submit_dirs",
        }
    }
}

impl WarehouseStore {
    /// Look up a host by name, creating it on first contact.
    pub async fn get_or_create_host(&self, name: &str, now: DateTime<Utc>) -> Result<Host> {
        sqlx::query(
            "INSERT INTO hosts (name, first_added, parallel_streams) VALUES (?, ?, ?) \
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(now)
        .bind(DEFAULT_HOST_PARALLEL_STREAMS)
        .execute(&self.pool)
        .await?;

        let host = sqlx::query_as::<_, Host>(&format!("SELECT {HOST_COLUMNS} FROM hosts WHERE name = ?"))
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(host)
    }

    pub async fn get_host(&self, id: i64) -> Result<Host> {
        let host = sqlx::query_as::<_, Host>(&format!("SELECT {HOST_COLUMNS} FROM hosts WHERE id = ?"))
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(host)
    }

    /// Look up a submit directory by url, creating it on first contact.
    pub async fn get_or_create_submit_dir(
        &self,
        url: &str,
        host_id: i64,
        now: DateTime<Utc>,
    ) -> Result<SubmitDir> {
        sqlx::query(
            "INSERT INTO submit_dirs (url, host_id, first_added) VALUES (?, ?, ?) \
             ON CONFLICT(url) DO NOTHING",
        )
        .bind(url)
        .bind(host_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let dir = sqlx::query_as::<_, SubmitDir>(&format!(
            "SELECT {DIR_COLUMNS} FROM submit_dirs WHERE url = ?"
        ))
        .bind(url)
        .fetch_one(&self.pool)
        .await?;
        Ok(dir)
    }

    /// Existing submit directory, without creating one.
    pub async fn find_submit_dir(&self, url: &str) -> Result<Option<SubmitDir>> {
        let dir = sqlx::query_as::<_, SubmitDir>(&format!(
            "SELECT {DIR_COLUMNS} FROM submit_dirs WHERE url = ?"
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(dir)
    }

    pub async fn record_host_open(&self, host_id: i64, ok: bool, now: DateTime<Utc>) -> Result<()> {
        self.record_open(Tracked::Host, host_id, ok, now).await
    }

    pub async fn record_dir_open(&self, dir_id: i64, ok: bool, now: DateTime<Utc>) -> Result<()> {
        self.record_open(Tracked::SubmitDir, dir_id, ok, now).await
    }

    async fn record_open(&self, tracked: Tracked, id: i64, ok: bool, now: DateTime<Utc>) -> Result<()> {
        let sql = if ok {
            format!(
                "UPDATE {} SET history_bits = ((history_bits << 1) | 1) & ?, \
                 open_successes = open_successes + 1, last_ok_time = ? WHERE id = ?",
                tracked.table()
            )
        } else {
            format!(
                "UPDATE {} SET history_bits = (history_bits << 1) & ?, \
                 open_fails = open_fails + 1, last_not_ok_time = ? WHERE id = ?",
                tracked.table()
            )
        };

        sqlx::query(&sql)
            .bind(HISTORY_MASK)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
