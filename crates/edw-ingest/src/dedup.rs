//! Has this file been ingested already?
//!
//! Large files are matched on content hash alone, wherever they came from.
//! Small files collide too easily for that (empty outputs, tiny headers), so
//! they only count as seen when the same directory delivered the same name
//! with the same hash.

use crate::error::Result;
use crate::models::IngestedFile;
use crate::store::WarehouseStore;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DeduplicationIndex {
    store: WarehouseStore,
    size_threshold: u64,
}

impl DeduplicationIndex {
    pub fn new(store: WarehouseStore, size_threshold: u64) -> Self {
        Self {
            store,
            size_threshold,
        }
    }

    pub fn size_threshold(&self) -> u64 {
        self.size_threshold
    }

    /// Completed file with this content, if the warehouse already holds it.
    pub async fn already_ingested(
        &self,
        submit_dir_id: Option<i64>,
        file_name: &str,
        content_hash: &str,
        size: u64,
    ) -> Result<Option<IngestedFile>> {
        if size > self.size_threshold {
            let found = self.store.latest_complete_by_hash(content_hash).await?;
            if let Some(file) = &found {
                debug!(file = %file_name, existing = file.id, "Large file matched by hash");
            }
            return Ok(found);
        }

        let Some(dir_id) = submit_dir_id else {
            return Ok(None);
        };
        let found = self
            .store
            .latest_complete_by_dir_name(dir_id, file_name)
            .await?
            .filter(|file| file.content_hash == content_hash);
        if let Some(file) = &found {
            debug!(file = %file_name, existing = file.id, "Small file matched by directory and name");
        }
        Ok(found)
    }

    /// A clean attempt on this directory and name that is complete or was
    /// started within `window` of `now`.
    pub async fn being_ingested(
        &self,
        submit_dir_id: i64,
        file_name: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<IngestedFile>> {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        let attempts = self.store.clean_attempts(submit_dir_id, file_name).await?;

        Ok(attempts.into_iter().find(|file| {
            file.is_complete() || file.start_time.is_some_and(|started| now - started < window)
        }))
    }

    /// Identical manifest already stored for this directory.
    pub async fn manifest_copy(&self, content_hash: &str, submit_dir_id: i64) -> Result<Option<IngestedFile>> {
        self.store
            .latest_complete_in_dir_by_hash(submit_dir_id, content_hash)
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::db::{connect, DbConfig};
    use crate::models::Tags;
    use crate::store::FileCommit;

    async fn setup() -> (WarehouseStore, i64, i64, i64) {
        let pool = connect(&DbConfig::new("sqlite::memory:")).await.unwrap();
        let store = WarehouseStore::new(pool);
        let now = Utc::now();
        let user = store.create_user("lab@example.org", now).await.unwrap();
        let host = store.get_or_create_host("localhost", now).await.unwrap();
        let dir_a = store.get_or_create_submit_dir("file:///a/", host.id, now).await.unwrap();
        let dir_b = store.get_or_create_submit_dir("file:///b/", host.id, now).await.unwrap();
        let submission = store.create_submission("file:///a/m.txt", user.id, now).await.unwrap();
        (store, submission, dir_a.id, dir_b.id)
    }

    async fn ingest(store: &WarehouseStore, submission: i64, dir: i64, name: &str, hash: &str, size: i64) -> i64 {
        let now = Utc::now();
        let id = store.reserve_file(submission, Some(dir), name, now).await.unwrap();
        let tags = Tags::new();
        store
            .commit_file(
                id,
                FileCommit {
                    content_hash: hash,
                    size,
                    modified: 0,
                    tags: &tags,
                },
                now,
            )
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_large_files_match_across_directories() {
        let (store, submission, dir_a, dir_b) = setup().await;
        let hash = "a".repeat(32);
        let id = ingest(&store, submission, dir_a, "big.bam", &hash, 500_000).await;

        let index = DeduplicationIndex::new(store, 100_000);
        let found = index
            .already_ingested(Some(dir_b), "renamed.bam", &hash, 500_000)
            .await
            .unwrap();
        assert_eq!(found.map(|f| f.id), Some(id));
    }

    #[tokio::test]
    async fn test_small_files_need_same_directory_and_name() {
        let (store, submission, dir_a, dir_b) = setup().await;
        let hash = "b".repeat(32);
        let id = ingest(&store, submission, dir_a, "tiny.bed", &hash, 10).await;

        let index = DeduplicationIndex::new(store, 100_000);
        assert!(index.already_ingested(Some(dir_b), "tiny.bed", &hash, 10).await.unwrap().is_none());
        assert!(index.already_ingested(Some(dir_a), "other.bed", &hash, 10).await.unwrap().is_none());
        assert!(index
            .already_ingested(Some(dir_a), "tiny.bed", &"c".repeat(32), 10)
            .await
            .unwrap()
            .is_none());

        let found = index.already_ingested(Some(dir_a), "tiny.bed", &hash, 10).await.unwrap();
        assert_eq!(found.map(|f| f.id), Some(id));
    }

    #[tokio::test]
    async fn test_being_ingested_respects_window() {
        let (store, submission, dir_a, _) = setup().await;
        let started = Utc::now();
        let id = store.reserve_file(submission, Some(dir_a), "slow.bam", started).await.unwrap();

        let index = DeduplicationIndex::new(store.clone(), 100_000);
        let window = Duration::from_secs(3600);

        let soon = started + chrono::Duration::minutes(5);
        let found = index.being_ingested(dir_a, "slow.bam", window, soon).await.unwrap();
        assert_eq!(found.map(|f| f.id), Some(id));

        let later = started + chrono::Duration::hours(2);
        assert!(index.being_ingested(dir_a, "slow.bam", window, later).await.unwrap().is_none());

        store.fail_file(id, "connection reset", soon).await.unwrap();
        assert!(index.being_ingested(dir_a, "slow.bam", window, soon).await.unwrap().is_none());
    }
}
