//! CLI command implementations
//!
//! Each subcommand has its own module. Commands return `Ok(false)` when they
//! ran to completion but something they processed failed.

pub mod plate;
pub mod submit;
pub mod subscriber;
pub mod user;
pub mod validate;

use crate::config::SubmitConfig;
use crate::db::{connect, DbConfig};
use crate::store::WarehouseStore;
use anyhow::Context;

/// Configuration from the environment, with the `--database-url` flag on top.
pub fn load_config(database_url: Option<&str>) -> anyhow::Result<SubmitConfig> {
    let config = SubmitConfig::from_env()?;
    Ok(match database_url {
        Some(url) => config.with_database_url(url),
        None => config,
    })
}

pub async fn open_store(config: &SubmitConfig) -> anyhow::Result<WarehouseStore> {
    let pool = connect(&DbConfig::from_env(config.database_url.clone()))
        .await
        .with_context(|| format!("Failed to open warehouse database {}", config.database_url))?;
    Ok(WarehouseStore::new(pool))
}

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(100_000), "97.66 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
    }
}
