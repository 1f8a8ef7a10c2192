//! `edw subscriber` command implementation

use super::{load_config, open_store};
use crate::models::Subscriber;
use crate::subscribers::SubscriberMatcher;
use colored::Colorize;

pub async fn add(
    database_url: Option<&str>,
    name: &str,
    command: &str,
    file_pattern: &str,
    dir_pattern: &str,
    tag_pattern: &str,
    order: i64,
) -> anyhow::Result<bool> {
    // Refuse patterns that would only be skipped at submit time
    SubscriberMatcher::compile(Subscriber {
        id: 0,
        name: name.to_string(),
        run_order: order,
        file_pattern: file_pattern.to_string(),
        dir_pattern: dir_pattern.to_string(),
        tag_pattern: tag_pattern.to_string(),
        on_file_end_upload: command.to_string(),
    })?;

    let config = load_config(database_url)?;
    let store = open_store(&config).await?;
    let id = store
        .add_subscriber(name, order, file_pattern, dir_pattern, tag_pattern, command)
        .await?;

    println!("{} subscriber {} ({})", "Added".green(), name, id);
    Ok(true)
}

pub async fn list(database_url: Option<&str>) -> anyhow::Result<bool> {
    let config = load_config(database_url)?;
    let store = open_store(&config).await?;
    let subscribers = store.list_subscribers().await?;

    if subscribers.is_empty() {
        println!("No subscribers.");
        return Ok(true);
    }

    for s in &subscribers {
        println!("{}", s.name.cyan().bold());
        println!("  Order:   {}", s.run_order);
        println!("  Files:   {}", s.file_pattern);
        println!("  Dirs:    {}", s.dir_pattern);
        if !s.tag_pattern.is_empty() {
            println!("  Tags:    {}", s.tag_pattern);
        }
        println!("  Command: {}", s.on_file_end_upload);
    }
    Ok(true)
}
