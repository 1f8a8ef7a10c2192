//! Relational bookkeeping for submissions
//!
//! `WarehouseStore` is the only code that talks SQL. Counters are always
//! updated with in-place increments so concurrent per-file tasks never
//! overwrite each other.

mod files;
mod submissions;
mod subscribers;
mod tracking;

pub use files::FileCommit;

use crate::error::Result;
use crate::models::User;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

#[derive(Debug, Clone)]
pub struct WarehouseStore {
    pool: SqlitePool,
}

impl WarehouseStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT id, email, created_at FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    /// Register a user, returning the existing row if the email is known.
    pub async fn create_user(&self, email: &str, now: DateTime<Utc>) -> Result<User> {
        sqlx::query("INSERT INTO users (email, created_at) VALUES (?, ?) ON CONFLICT(email) DO NOTHING")
            .bind(email)
            .bind(now)
            .execute(&self.pool)
            .await?;

        let user = sqlx::query_as::<_, User>("SELECT id, email, created_at FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(user)
    }
}
