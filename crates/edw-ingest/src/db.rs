//! Connection pool and schema migrations

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    /// How long a writer waits on a locked database before giving up
    pub busy_timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: crate::config::DEFAULT_DATABASE_URL.to_string(),
            max_connections: 8,
            connect_timeout_secs: 30,
            busy_timeout_secs: 30,
        }
    }
}

impl DbConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Pool settings from `DB_MAX_CONNECTIONS`, `DB_CONNECT_TIMEOUT` and
    /// `DB_BUSY_TIMEOUT`, for the given database URL.
    pub fn from_env(url: impl Into<String>) -> Self {
        let defaults = Self::new(url);

        Self {
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_connections),
            connect_timeout_secs: std::env::var("DB_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.connect_timeout_secs),
            busy_timeout_secs: std::env::var("DB_BUSY_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.busy_timeout_secs),
            ..defaults
        }
    }

    fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

/// Open the pool. An in-memory database lives and dies with its connection,
/// so it gets exactly one connection that is never recycled.
pub async fn create_pool(config: &DbConfig) -> Result<SqlitePool> {
    let connect_options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

    let mut options =
        SqlitePoolOptions::new().acquire_timeout(Duration::from_secs(config.connect_timeout_secs));

    options = if config.is_in_memory() {
        options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        options.max_connections(config.max_connections)
    };

    let pool = options.connect_with(connect_options).await?;

    tracing::info!(
        max_connections = pool.options().get_max_connections(),
        "Database connection pool created"
    );

    Ok(pool)
}

/// Bring the schema up to date.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Pool plus migrations, the usual way in.
pub async fn connect(config: &DbConfig) -> Result<SqlitePool> {
    let pool = create_pool(config).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

pub async fn health_check(pool: &SqlitePool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pool_migrates() {
        let pool = connect(&DbConfig::new("sqlite::memory:")).await.unwrap();
        health_check(&pool).await.unwrap();

        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();

        for expected in ["files", "hosts", "submissions", "submit_dirs", "subscribers", "users"] {
            assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
        }
    }

    #[test]
    fn test_memory_detection() {
        assert!(DbConfig::new("sqlite::memory:").is_in_memory());
        assert!(!DbConfig::new("sqlite://edw.db?mode=rwc").is_in_memory());
    }
}
