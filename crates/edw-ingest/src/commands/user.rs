//! `edw user` command implementation

use super::{load_config, open_store};
use chrono::Utc;
use colored::Colorize;

/// Register a submitter. Adding an existing email is a no-op.
pub async fn add(database_url: Option<&str>, email: &str) -> anyhow::Result<bool> {
    if !email.contains('@') {
        anyhow::bail!("'{}' is not an email address", email);
    }

    let config = load_config(database_url)?;
    let store = open_store(&config).await?;
    let user = store.create_user(email, Utc::now()).await?;

    println!("{} {} (user {})", "Registered".green(), user.email, user.id);
    Ok(true)
}
