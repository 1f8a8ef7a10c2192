//! Post-ingest notification hooks
//!
//! A subscriber names wildcard patterns for the submit directory, the file
//! name and any tags. Each newly ingested file that matches all of them has
//! the subscriber's command run through `sh -c`, with `%u` standing for the
//! file id. Subscribers run in `run_order`; a failing command is logged and
//! never fails the file.

use crate::error::{IngestError, Result};
use crate::models::{IngestedFile, Subscriber, Tags};
use crate::store::WarehouseStore;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Translate a `*`/`?` wildcard into an anchored regex.
pub fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let body = regex::escape(pattern).replace(r"\*", ".*").replace(r"\?", ".");
    Regex::new(&format!("^{}$", body))
        .map_err(|e| IngestError::config(format!("Bad wildcard '{}': {}", pattern, e)))
}

#[derive(Debug, Clone)]
pub struct SubscriberMatcher {
    subscriber: Subscriber,
    file: Regex,
    dir: Regex,
    tags: Vec<(String, Regex)>,
}

impl SubscriberMatcher {
    pub fn compile(subscriber: Subscriber) -> Result<Self> {
        let file = wildcard_regex(&subscriber.file_pattern)?;
        let dir = wildcard_regex(&subscriber.dir_pattern)?;

        let tags = if subscriber.tag_pattern.trim().is_empty() {
            Vec::new()
        } else {
            let patterns: BTreeMap<String, String> = serde_json::from_str(&subscriber.tag_pattern)?;
            patterns
                .into_iter()
                .map(|(tag, pattern)| Ok((tag, wildcard_regex(&pattern)?)))
                .collect::<Result<Vec<_>>>()?
        };

        Ok(Self {
            subscriber,
            file,
            dir,
            tags,
        })
    }

    pub fn name(&self) -> &str {
        &self.subscriber.name
    }

    /// A tag pattern against a missing tag never matches.
    pub fn matches(&self, submit_dir: &str, file_name: &str, tags: &Tags) -> bool {
        self.dir.is_match(submit_dir)
            && self.file.is_match(file_name)
            && self
                .tags
                .iter()
                .all(|(tag, re)| tags.get(tag).is_some_and(|value| re.is_match(value)))
    }

    pub fn command_for(&self, file_id: i64) -> String {
        self.subscriber
            .on_file_end_upload
            .replace("%u", &file_id.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Subscribers {
    matchers: Vec<SubscriberMatcher>,
}

impl Subscribers {
    /// Load every subscriber. One with an unusable pattern is skipped.
    pub async fn load(store: &WarehouseStore) -> Result<Self> {
        let mut matchers = Vec::new();
        for subscriber in store.list_subscribers().await? {
            let name = subscriber.name.clone();
            match SubscriberMatcher::compile(subscriber) {
                Ok(matcher) => matchers.push(matcher),
                Err(e) => warn!(subscriber = %name, error = %e, "Skipping subscriber with bad pattern"),
            }
        }
        debug!(count = matchers.len(), "Loaded subscribers");
        Ok(Self { matchers })
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    /// Run every matching subscriber for a freshly committed file and
    /// return how many commands succeeded.
    pub async fn notify(&self, submit_dir: &str, file: &IngestedFile) -> usize {
        let mut succeeded = 0;
        for matcher in &self.matchers {
            if !matcher.matches(submit_dir, &file.submit_file_name, &file.tags) {
                continue;
            }

            let command = matcher.command_for(file.id);
            let status = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&command)
                .status()
                .await;

            match status {
                Ok(status) if status.success() => {
                    info!(subscriber = %matcher.name(), file_id = file.id, "Subscriber notified");
                    succeeded += 1;
                },
                Ok(status) => {
                    warn!(subscriber = %matcher.name(), file_id = file.id, %status, command = %command, "Subscriber command failed")
                },
                Err(e) => {
                    warn!(subscriber = %matcher.name(), file_id = file.id, error = %e, "Could not run subscriber command")
                },
            }
        }
        succeeded
    }
}
