//! End-to-end submission tests
//!
//! Coverage includes:
//! - Idempotent re-submission
//! - Content deduplication for large and small files
//! - Per-file failure isolation, including row checks on size and assembly
//! - Staleness lockout and forcing
//! - Metadata conflicts and updates
//! - Replacement of earlier files
//! - Host and directory health tracking

mod common;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use common::{bed, Entry, Lab, TestWarehouse, EMAIL};
use edw_ingest::formats::{FileFormat, FormatValidator};
use edw_ingest::submit::{FileOutcome, SkipReason};
use edw_ingest::{IngestError, SubmissionState, SubmitOptions, WarehouseStore};
use std::path::Path;

fn fetched_plate(outcome: &FileOutcome) -> String {
    match outcome {
        FileOutcome::Fetched { license_plate, .. } => license_plate.clone(),
        other => panic!("expected a fetched file, got {:?}", other),
    }
}

// ============================================================================
// Idempotence
// ============================================================================

#[tokio::test]
async fn test_resubmission_fetches_nothing_new() {
    let warehouse = TestWarehouse::start().await;
    let lab = Lab::new();
    let url = lab.publish(&[
        Entry::new("a.bed", bed(1, 3)),
        Entry::new("b.bed", bed(2, 3)),
        Entry::new("hg19/c.bed", bed(3, 3)),
    ]);
    let submitter = warehouse.submitter();

    let first = submitter.submit(&url, EMAIL, SubmitOptions::default()).await.unwrap();
    assert_eq!(first.state, SubmissionState::Finalized);
    assert_eq!(first.fetched(), 3);
    assert!(first.is_success());

    let published = warehouse.published();
    // three payloads plus the manifest itself
    assert_eq!(published.len(), 4);

    let second = submitter.submit(&url, EMAIL, SubmitOptions::default()).await.unwrap();
    assert_eq!(second.state, SubmissionState::Finalized);
    assert_eq!(second.fetched(), 0);
    assert_eq!(second.skipped(), 3);
    assert_eq!(second.manifest_file_id, first.manifest_file_id);
    assert_eq!(warehouse.published(), published);

    let submission = warehouse.store.get_submission(second.submission_id).await.unwrap();
    assert_eq!(submission.new_files, 0);
    assert_eq!(submission.old_files, 3);
    assert_eq!(submission.file_count, 3);
    assert!(submission.end_time.is_some());
    assert!(submission.error_message.is_empty());
}

#[tokio::test]
async fn test_published_paths_use_license_plates() {
    let warehouse = TestWarehouse::start().await;
    let lab = Lab::new();
    let url = lab.publish(&[Entry::new("reads/peaks.bed", bed(4, 2))]);

    let report = warehouse
        .submitter()
        .submit(&url, EMAIL, SubmitOptions::default())
        .await
        .unwrap();

    let plate = fetched_plate(&report.rows[0].outcome);
    // the manifest took the first id
    assert_eq!(plate, "EDWFF000AAB");

    let file = warehouse.store.find_file_by_license_plate(&plate).await.unwrap().unwrap();
    assert!(file.warehouse_path.ends_with("/EDWFF000AAB.bed"));
    assert_eq!(file.submit_file_name, "reads/peaks.bed");
    assert_eq!(file.modified, common::MODIFIED);
    assert_eq!(file.tags.get("lab").map(String::as_str), Some("smith"));
    assert_eq!(file.tags.get("ucsc_db").map(String::as_str), Some("hg19"));
    assert!(!file.tags.contains_key("md5_sum"));

    let on_disk = std::fs::read(warehouse.root.path().join(&file.warehouse_path)).unwrap();
    assert_eq!(on_disk, bed(4, 2));
}

// ============================================================================
// Deduplication
// ============================================================================

#[tokio::test]
async fn test_large_file_ingested_once_across_directories() {
    let warehouse = TestWarehouse::start().await;
    let config = warehouse.config().with_dedup_size_threshold(1_000);
    let submitter = warehouse.submitter_with(config);
    let big = bed(5, 100);
    assert!(big.len() > 1_000);

    let first_lab = Lab::new();
    let first = submitter
        .submit(&first_lab.publish(&[Entry::new("big.bed", big.clone())]), EMAIL, SubmitOptions::default())
        .await
        .unwrap();
    let FileOutcome::Fetched { file_id, .. } = first.rows[0].outcome else {
        panic!("first copy should be fetched");
    };

    let second_lab = Lab::new();
    let second = submitter
        .submit(&second_lab.publish(&[Entry::new("renamed.bed", big)]), EMAIL, SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(second.state, SubmissionState::Finalized);
    assert_eq!(
        second.rows[0].outcome,
        FileOutcome::Skipped(SkipReason::DuplicateSkip { existing: file_id })
    );
}

#[tokio::test]
async fn test_small_identical_files_from_two_directories_both_ingested() {
    let warehouse = TestWarehouse::start().await;
    let submitter = warehouse.submitter();
    let tiny = bed(6, 1);

    for _ in 0..2 {
        let lab = Lab::new();
        let report = submitter
            .submit(&lab.publish(&[Entry::new("tiny.bed", tiny.clone())]), EMAIL, SubmitOptions::default())
            .await
            .unwrap();
        assert_eq!(report.fetched(), 1);
    }
}

#[tokio::test]
async fn test_large_duplicate_within_one_manifest_fetched_once() {
    let warehouse = TestWarehouse::start().await;
    let submitter = warehouse.submitter_with(warehouse.config().with_dedup_size_threshold(1_000));
    let big = bed(7, 100);
    let lab = Lab::new();

    let report = submitter
        .submit(
            &lab.publish(&[Entry::new("one.bed", big.clone()), Entry::new("two.bed", big)]),
            EMAIL,
            SubmitOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(report.fetched(), 1);
    assert_eq!(report.skipped(), 1);
    assert!(report.is_success());
}

#[tokio::test]
async fn test_resubmitting_manifest_with_repeated_content_is_idempotent() {
    let warehouse = TestWarehouse::start().await;
    let submitter = warehouse.submitter_with(warehouse.config().with_dedup_size_threshold(1_000));
    let big = bed(23, 100);
    let lab = Lab::new();
    let url = lab.publish(&[Entry::new("one.bed", big.clone()), Entry::new("two.bed", big)]);

    let first = submitter.submit(&url, EMAIL, SubmitOptions::default()).await.unwrap();
    assert_eq!(first.fetched(), 1);
    let stored_id = first
        .rows
        .iter()
        .find_map(|r| match r.outcome {
            FileOutcome::Fetched { file_id, .. } => Some(file_id),
            _ => None,
        })
        .unwrap();
    let stored_name = warehouse.store.get_file(stored_id).await.unwrap().submit_file_name;

    let second = submitter.submit(&url, EMAIL, SubmitOptions::default()).await.unwrap();
    assert_eq!(second.state, SubmissionState::Finalized, "{:?}", second.error);
    assert_eq!(second.fetched(), 0);
    assert_eq!(second.skipped(), 2);

    let updated = submitter
        .submit(
            &url,
            EMAIL,
            SubmitOptions {
                force: false,
                update: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.state, SubmissionState::Finalized);

    let submission = warehouse.store.get_submission(updated.submission_id).await.unwrap();
    assert_eq!(submission.meta_change_count, 0);
    assert_eq!(submission.old_files, 2);
    let stored = warehouse.store.get_file(stored_id).await.unwrap();
    assert_eq!(stored.submit_file_name, stored_name);
}

// ============================================================================
// Failure isolation
// ============================================================================

#[tokio::test]
async fn test_one_corrupt_row_does_not_fail_the_rest() {
    let warehouse = TestWarehouse::start().await;
    let lab = Lab::new();

    let mut entries: Vec<Entry> = (0..10).map(|i| Entry::new(&format!("f{i}.bed"), bed(100 + i, 2))).collect();
    entries[4] = entries[4].clone().with_md5(&"0".repeat(32));
    let url = lab.publish(&entries);

    let report = warehouse
        .submitter()
        .submit(&url, EMAIL, SubmitOptions::default())
        .await
        .unwrap();

    assert_eq!(report.state, SubmissionState::Finalized);
    assert!(report.error.is_none());
    assert_eq!(report.fetched(), 9);
    assert_eq!(report.failed(), 1);
    assert!(!report.is_success());

    let FileOutcome::Failed { file_id: Some(failed_id), message } = &report.rows[4].outcome else {
        panic!("row 5 should fail");
    };
    assert!(message.contains("md5 mismatch"));

    let failed = warehouse.store.get_file(*failed_id).await.unwrap();
    assert!(failed.error_message.contains("md5 mismatch"));
    assert!(!failed.is_complete());

    let submission = warehouse.store.get_submission(report.submission_id).await.unwrap();
    assert!(submission.error_message.is_empty());
    assert_eq!(submission.new_files, 9);
    assert!(submission.file_id_in_transit.is_none());

    // nine payloads and the manifest; nothing left in scratch
    assert_eq!(warehouse.published().len(), 10);
    let scratch = warehouse.root.path().join("tmp");
    assert_eq!(std::fs::read_dir(scratch).unwrap().count(), 0);
}

#[tokio::test]
async fn test_failed_file_is_retried_on_resubmission() {
    let warehouse = TestWarehouse::start().await;
    let lab = Lab::new();
    let submitter = warehouse.submitter();

    let url = lab.publish(&[Entry::new("late.bed", bed(8, 2))]);
    std::fs::remove_file(lab.path().join("late.bed")).unwrap();

    let first = submitter.submit(&url, EMAIL, SubmitOptions::default()).await.unwrap();
    assert_eq!(first.failed(), 1);

    std::fs::write(lab.path().join("late.bed"), bed(8, 2)).unwrap();
    let second = submitter.submit(&url, EMAIL, SubmitOptions::default()).await.unwrap();
    assert_eq!(second.fetched(), 1);
    assert!(second.is_success());
}

#[tokio::test]
async fn test_invalid_rows_are_recorded_and_skipped() {
    let warehouse = TestWarehouse::start().await;
    let lab = Lab::new();
    let url = lab.publish(&[
        Entry::new("good.bed", bed(9, 2)),
        Entry::new("bad.bed", bed(10, 2)).with_experiment("EXP-1"),
    ]);

    let report = warehouse
        .submitter()
        .submit(&url, EMAIL, SubmitOptions::default())
        .await
        .unwrap();

    assert_eq!(report.state, SubmissionState::Finalized);
    assert_eq!(report.fetched(), 1);
    assert_eq!(report.failed(), 1);

    let failed = warehouse
        .store
        .files_for_submission(report.submission_id)
        .await
        .unwrap()
        .into_iter()
        .find(|f| f.submit_file_name == "bad.bed")
        .unwrap();
    assert!(!failed.error_message.is_empty());
    assert!(failed.license_plate.is_empty());
}

#[tokio::test]
async fn test_oversized_declared_sizes_fail_rows_not_submission() {
    let warehouse = TestWarehouse::start().await;
    let lab = Lab::new();
    let url = lab.publish(&[
        Entry::new("huge1.bed", bed(24, 2)).with_declared_size(u64::MAX),
        Entry::new("huge2.bed", bed(25, 2)).with_declared_size(u64::MAX),
        Entry::new("max1.bed", bed(26, 2)).with_declared_size(i64::MAX as u64),
        Entry::new("max2.bed", bed(27, 2)).with_declared_size(i64::MAX as u64),
        Entry::new("fine.bed", bed(28, 2)),
    ]);

    let report = warehouse
        .submitter()
        .submit(&url, EMAIL, SubmitOptions::default())
        .await
        .unwrap();

    assert_eq!(report.state, SubmissionState::Finalized);
    assert_eq!(report.fetched(), 1);
    assert_eq!(report.failed(), 4);
    for row in &report.rows {
        let FileOutcome::Failed { message, .. } = &row.outcome else {
            continue;
        };
        if row.file_name.starts_with("huge") {
            assert!(message.contains("larger than"), "{message}");
        } else {
            assert!(message.contains("manifest says"), "{message}");
        }
    }

    let submission = warehouse.store.get_submission(report.submission_id).await.unwrap();
    assert!(submission.end_time.is_some());
    assert!(submission.error_message.is_empty());
    assert_eq!(submission.byte_count, i64::MAX);
    assert_eq!(submission.new_bytes, bed(28, 2).len() as i64);
}

#[tokio::test]
async fn test_assembly_comes_from_top_directory_without_column() {
    let warehouse = TestWarehouse::start().await;
    let lab = Lab::new();
    let url = lab.publish(&[
        Entry::new("mm10/peaks.bed", bed(29, 2)).placed_by_directory(),
        Entry::new("hg99/x.bed", bed(30, 2)).placed_by_directory(),
        Entry::new("plain.bed", bed(31, 2)).placed_by_directory(),
    ]);
    assert!(!std::fs::read_to_string(lab.path().join("manifest.txt"))
        .unwrap()
        .contains("ucsc_db"));

    let report = warehouse
        .submitter()
        .submit(&url, EMAIL, SubmitOptions::default())
        .await
        .unwrap();

    assert_eq!(report.state, SubmissionState::Finalized);
    assert_eq!(report.fetched(), 1);
    assert_eq!(report.failed(), 2);

    let plate = fetched_plate(&report.rows.iter().find(|r| r.file_name == "mm10/peaks.bed").unwrap().outcome);
    let stored = warehouse.store.find_file_by_license_plate(&plate).await.unwrap().unwrap();
    assert_eq!(stored.tags.get("ucsc_db").map(String::as_str), Some("mm10"));

    let message = |name: &str| match &report.rows.iter().find(|r| r.file_name == name).unwrap().outcome {
        FileOutcome::Failed { message, .. } => message.clone(),
        other => panic!("{name} should fail, got {:?}", other),
    };
    assert!(message("hg99/x.bed").contains("hg99"));
    assert!(message("plain.bed").contains("ucsc_db"));
}

#[tokio::test]
async fn test_gz_name_without_gzip_bytes_fails_and_is_unpublished() {
    let warehouse = TestWarehouse::start().await;
    let lab = Lab::new();
    let url = lab.publish(&[Entry::new("peaks.bed.gz", bed(11, 2))]);

    let report = warehouse
        .submitter()
        .submit(&url, EMAIL, SubmitOptions::default())
        .await
        .unwrap();

    let FileOutcome::Failed { message, .. } = &report.rows[0].outcome else {
        panic!("non-gzip .gz file should fail");
    };
    assert!(message.contains("not gzipped"));
    // only the manifest made it
    assert_eq!(warehouse.published().len(), 1);
}

#[tokio::test]
async fn test_missing_column_aborts_submission() {
    let warehouse = TestWarehouse::start().await;
    let lab = Lab::new();
    let url = lab.write_manifest("#file_name\tformat\na.bed\tbed\n");

    let report = warehouse
        .submitter()
        .submit(&url, EMAIL, SubmitOptions::default())
        .await
        .unwrap();

    assert_eq!(report.state, SubmissionState::Aborted);
    assert!(report.error.as_deref().unwrap().contains("output_type"));
    assert!(report.manifest_file_id.is_some());

    let submission = warehouse.store.get_submission(report.submission_id).await.unwrap();
    assert!(submission.is_terminal());
    assert!(submission.error_message.contains("missing required column"));
}

#[tokio::test]
async fn test_unreachable_manifest_aborts() {
    let warehouse = TestWarehouse::start().await;
    let lab = Lab::new();

    let report = warehouse
        .submitter()
        .submit(&lab.manifest_url(), EMAIL, SubmitOptions::default())
        .await
        .unwrap();

    assert_eq!(report.state, SubmissionState::Aborted);
    assert!(report.error.as_deref().unwrap().starts_with("Fetch failed"));
    assert!(report.rows.is_empty());
}

// ============================================================================
// Submission gatekeeping
// ============================================================================

#[tokio::test]
async fn test_unknown_user_is_rejected_before_any_row() {
    let warehouse = TestWarehouse::start().await;
    let lab = Lab::new();
    let url = lab.publish(&[Entry::new("a.bed", bed(12, 1))]);

    let err = warehouse
        .submitter()
        .submit(&url, "stranger@example.org", SubmitOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::UnknownUser(_)));
    assert!(warehouse.store.latest_submission_for_url(&url).await.unwrap().is_none());
}

#[tokio::test]
async fn test_url_without_directory_is_rejected() {
    let warehouse = TestWarehouse::start().await;
    let err = warehouse
        .submitter()
        .submit("manifest.txt", EMAIL, SubmitOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Structural(_)));
}

#[tokio::test]
async fn test_active_submission_locks_out_until_forced() {
    let warehouse = TestWarehouse::start().await;
    let lab = Lab::new();
    let url = lab.publish(&[Entry::new("a.bed", bed(13, 1))]);
    let submitter = warehouse.submitter();

    let running = warehouse
        .store
        .create_submission(&url, warehouse.user_id, Utc::now())
        .await
        .unwrap();

    let err = submitter.submit(&url, EMAIL, SubmitOptions::default()).await.unwrap_err();
    assert!(matches!(err, IngestError::StaleLockout { submission_id, .. } if submission_id == running));

    let forced = submitter
        .submit(
            &url,
            EMAIL,
            SubmitOptions {
                force: true,
                update: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(forced.state, SubmissionState::Finalized);
    assert_eq!(forced.fetched(), 1);
}

#[tokio::test]
async fn test_abandoned_submission_does_not_lock_out() {
    let warehouse = TestWarehouse::start().await;
    let lab = Lab::new();
    let url = lab.publish(&[Entry::new("a.bed", bed(14, 1))]);

    warehouse
        .store
        .create_submission(&url, warehouse.user_id, Utc::now() - ChronoDuration::hours(5))
        .await
        .unwrap();

    let report = warehouse
        .submitter()
        .submit(&url, EMAIL, SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(report.state, SubmissionState::Finalized);
}

/// Records an operator stop on the running submission the first time a
/// file reaches its format check.
struct StopOnFirstCheck {
    store: WarehouseStore,
    url: String,
}

#[async_trait]
impl FormatValidator for StopOnFirstCheck {
    async fn check(&self, _format: &FileFormat, _path: &Path) -> edw_ingest::Result<()> {
        let running = self.store.latest_submission_for_url(&self.url).await?.unwrap();
        self.store
            .abort_submission(running.id, "stopped by operator", Utc::now())
            .await
    }
}

#[tokio::test]
async fn test_operator_stop_skips_remaining_files() {
    let warehouse = TestWarehouse::start().await;
    let lab = Lab::new();
    let url = lab.publish(&[
        Entry::new("a.bed", bed(15, 1)),
        Entry::new("b.bed", bed(16, 1)),
        Entry::new("c.bed", bed(17, 1)),
    ]);

    let submitter = warehouse
        .submitter_with(warehouse.config().with_max_parallel_fetches(1))
        .with_validator(Box::new(StopOnFirstCheck {
            store: warehouse.store.clone(),
            url: url.clone(),
        }));

    let report = submitter.submit(&url, EMAIL, SubmitOptions::default()).await.unwrap();

    assert_eq!(report.state, SubmissionState::Aborted);
    assert_eq!(report.error.as_deref(), Some("stopped by operator"));
    assert_eq!(report.fetched(), 1);
    assert_eq!(report.skipped(), 2);
    assert!(report
        .rows
        .iter()
        .filter(|r| matches!(r.outcome, FileOutcome::Skipped(_)))
        .all(|r| r.outcome == FileOutcome::Skipped(SkipReason::Stopped)));

    let submission = warehouse.store.get_submission(report.submission_id).await.unwrap();
    assert!(submission.is_terminal());
    assert_eq!(submission.new_files, 1);
}

// ============================================================================
// Metadata changes
// ============================================================================

#[tokio::test]
async fn test_changed_tags_conflict_unless_update() {
    let warehouse = TestWarehouse::start().await;
    let lab = Lab::new();
    let submitter = warehouse.submitter();
    let content = bed(16, 2);

    let first = submitter
        .submit(&lab.publish(&[Entry::new("a.bed", content.clone())]), EMAIL, SubmitOptions::default())
        .await
        .unwrap();
    let FileOutcome::Fetched { file_id, .. } = first.rows[0].outcome else {
        panic!("first submission should fetch");
    };

    let url = lab.publish(&[Entry::new("a.bed", content).with_lab("jones")]);
    let refused = submitter.submit(&url, EMAIL, SubmitOptions::default()).await.unwrap();
    assert_eq!(refused.state, SubmissionState::Aborted);
    let error = refused.error.unwrap();
    assert!(error.contains("a.bed"));
    assert!(error.contains("lab"));

    let stored = warehouse.store.get_file(file_id).await.unwrap();
    assert_eq!(stored.tags.get("lab").map(String::as_str), Some("smith"));

    let updated = submitter
        .submit(
            &url,
            EMAIL,
            SubmitOptions {
                force: false,
                update: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.state, SubmissionState::Finalized);
    assert_eq!(updated.fetched(), 0);

    let stored = warehouse.store.get_file(file_id).await.unwrap();
    assert_eq!(stored.tags.get("lab").map(String::as_str), Some("jones"));
    let submission = warehouse.store.get_submission(updated.submission_id).await.unwrap();
    assert_eq!(submission.meta_change_count, 1);
}

// ============================================================================
// Replacement
// ============================================================================

#[tokio::test]
async fn test_replaces_deprecates_earlier_file() {
    let warehouse = TestWarehouse::start().await;
    let lab = Lab::new();
    let submitter = warehouse.submitter();

    let first = submitter
        .submit(&lab.publish(&[Entry::new("v1.bed", bed(17, 2))]), EMAIL, SubmitOptions::default())
        .await
        .unwrap();
    let old_plate = fetched_plate(&first.rows[0].outcome);

    let second = submitter
        .submit(
            &lab.publish(&[Entry::new("v2.bed", bed(18, 2)).replacing(&old_plate, "off by one coordinates")]),
            EMAIL,
            SubmitOptions::default(),
        )
        .await
        .unwrap();
    let FileOutcome::Fetched { file_id: new_id, .. } = second.rows[0].outcome else {
        panic!("replacement should be fetched");
    };

    let old = warehouse.store.find_file_by_license_plate(&old_plate).await.unwrap().unwrap();
    assert_eq!(old.replaced_by, Some(new_id));
    assert_eq!(old.deprecated, "off by one coordinates");
}

#[tokio::test]
async fn test_stored_file_counts_as_fetched_when_later_bookkeeping_fails() {
    let warehouse = TestWarehouse::start().await;
    let lab = Lab::new();
    let submitter = warehouse.submitter();

    let first = submitter
        .submit(&lab.publish(&[Entry::new("v1.bed", bed(32, 2))]), EMAIL, SubmitOptions::default())
        .await
        .unwrap();
    let old_plate = fetched_plate(&first.rows[0].outcome);

    sqlx::query(
        "CREATE TRIGGER refuse_replacement BEFORE UPDATE OF replaced_by ON files \
         BEGIN SELECT RAISE(ABORT, 'replacement refused'); END",
    )
    .execute(warehouse.store.pool())
    .await
    .unwrap();

    let second = submitter
        .submit(
            &lab.publish(&[Entry::new("v2.bed", bed(33, 2)).replacing(&old_plate, "recalled")]),
            EMAIL,
            SubmitOptions::default(),
        )
        .await
        .unwrap();
    assert!(second.is_success());
    let FileOutcome::Fetched { file_id, .. } = second.rows[0].outcome else {
        panic!("stored file should be reported as fetched, got {:?}", second.rows[0].outcome);
    };

    let stored = warehouse.store.get_file(file_id).await.unwrap();
    assert!(stored.is_complete());
    assert!(warehouse.root.path().join(&stored.warehouse_path).exists());

    let old = warehouse.store.find_file_by_license_plate(&old_plate).await.unwrap().unwrap();
    assert_eq!(old.replaced_by, None);
    let submission = warehouse.store.get_submission(second.submission_id).await.unwrap();
    assert_eq!(submission.new_files, 1);
}

#[tokio::test]
async fn test_replacing_unknown_plate_fails_row() {
    let warehouse = TestWarehouse::start().await;
    let lab = Lab::new();

    let report = warehouse
        .submitter()
        .submit(
            &lab.publish(&[Entry::new("v2.bed", bed(19, 2)).replacing("EDWFF999ZZZ", "redo")]),
            EMAIL,
            SubmitOptions::default(),
        )
        .await
        .unwrap();

    let FileOutcome::Failed { message, .. } = &report.rows[0].outcome else {
        panic!("unknown plate should fail the row");
    };
    assert!(message.contains("not in the warehouse"));
}

// ============================================================================
// Health tracking
// ============================================================================

#[tokio::test]
async fn test_every_open_is_counted_on_host_and_directory() {
    let warehouse = TestWarehouse::start().await;
    let lab = Lab::new();
    let url = lab.publish(&[
        Entry::new("a.bed", bed(20, 1)),
        Entry::new("b.bed", bed(21, 1)),
        Entry::new("gone.bed", bed(22, 1)),
    ]);
    std::fs::remove_file(lab.path().join("gone.bed")).unwrap();

    let report = warehouse
        .submitter()
        .submit(&url, EMAIL, SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(report.fetched(), 2);
    assert_eq!(report.failed(), 1);

    let dir = warehouse.store.find_submit_dir(&lab.dir_url()).await.unwrap().unwrap();
    assert_eq!(dir.history.open_successes, 3);
    assert_eq!(dir.history.open_fails, 1);
    assert!(dir.history.last_ok_time.is_some());
    assert!(dir.history.last_not_ok_time.is_some());

    let host = warehouse.store.get_host(dir.host_id).await.unwrap();
    assert_eq!(host.name, "localhost");
    assert_eq!(host.history.open_successes + host.history.open_fails, 4);
}
