//! Fetching one payload file

use super::{FileOutcome, PlannedFile, RowOutcome, SkipReason, SubmissionRun, Submitter};
use crate::error::{IngestError, Result};
use crate::fetch::remove_partial;
use crate::formats::check_gzip_suffix;
use crate::store::FileCommit;
use crate::warehouse::relative_path;
use chrono::{DateTime, Utc};
use edw_common::license_plate::plate_for_file_id;
use std::path::Path;
use tracing::{debug, error, info, warn};

impl Submitter {
    /// Never fails: whatever goes wrong ends up in the outcome.
    pub(super) async fn fetch_file(&self, run: &SubmissionRun, file: &PlannedFile) -> RowOutcome {
        let outcome = match self.try_fetch_file(run, file).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(file = %file.file_name, error = %e, "Bookkeeping failed for file");
                FileOutcome::Failed {
                    file_id: None,
                    message: e.to_string(),
                }
            },
        };

        RowOutcome {
            line: file.line,
            file_name: file.file_name.clone(),
            outcome,
        }
    }

    /// Errors from here are database trouble; transfer problems come back
    /// as `FileOutcome::Failed` with the file row already marked.
    async fn try_fetch_file(&self, run: &SubmissionRun, file: &PlannedFile) -> Result<FileOutcome> {
        if !self.store.submission_error(run.id).await?.is_empty() {
            debug!(file = %file.file_name, "Submission stopped, not starting file");
            return Ok(FileOutcome::Skipped(SkipReason::Stopped));
        }

        let existing = self
            .dedup
            .already_ingested(
                Some(run.dir_id),
                &file.file_name,
                &file.declared.content_hash,
                file.declared.size,
            )
            .await?;
        if let Some(existing) = existing {
            debug!(file = %file.file_name, existing = existing.id, "Ingested meanwhile");
            self.store.add_old_file(run.id, file.stored_size()).await?;
            return Ok(FileOutcome::Skipped(SkipReason::DuplicateSkip { existing: existing.id }));
        }

        let now = Utc::now();
        let in_flight = self
            .dedup
            .being_ingested(run.dir_id, &file.file_name, self.config.staleness_window, now)
            .await?
            .filter(|attempt| !attempt.is_complete());
        if let Some(attempt) = in_flight {
            info!(file = %file.file_name, attempt = attempt.id, "Another attempt is fetching this file");
            return Ok(FileOutcome::Skipped(SkipReason::InFlight { attempt: attempt.id }));
        }

        let file_id = self
            .store
            .reserve_file(run.id, Some(run.dir_id), &file.file_name, now)
            .await?;
        self.store.set_file_in_transit(run.id, Some(file_id)).await?;
        let transferred = self.transfer(run, file, file_id, now).await;
        self.store.clear_file_in_transit(run.id, file_id).await?;

        let license_plate = match transferred {
            Ok(plate) => plate,
            Err(e) => {
                let message = e.to_string();
                warn!(file = %file.file_name, file_id, error = %message, "File failed");
                self.store.fail_file(file_id, &message, Utc::now()).await?;
                return Ok(FileOutcome::Failed {
                    file_id: Some(file_id),
                    message,
                });
            },
        };

        // The file is committed and published from here on; later trouble
        // is logged against it but does not undo the fetch.
        if let Err(e) = self.after_commit(run, file, file_id).await {
            error!(
                file = %file.file_name,
                file_id,
                error = %e,
                "Bookkeeping failed after file was stored"
            );
        }

        Ok(FileOutcome::Fetched {
            file_id,
            license_plate,
        })
    }

    async fn after_commit(&self, run: &SubmissionRun, file: &PlannedFile, file_id: i64) -> Result<()> {
        self.store.add_new_file(run.id, file.stored_size()).await?;

        if let Some((old_id, reason)) = &file.replaces {
            self.store.mark_replaced(*old_id, file_id, reason).await?;
            info!(file_id, replaced = old_id, reason = %reason, "Deprecated replaced file");
        }

        if !run.subscribers.is_empty() {
            let stored = self.store.get_file(file_id).await?;
            run.subscribers.notify(&run.submit_dir, &stored).await;
        }
        Ok(())
    }

    /// Move the bytes for a reserved file into the warehouse and commit it.
    /// Nothing is left in the content tree unless the commit happened.
    async fn transfer(
        &self,
        run: &SubmissionRun,
        file: &PlannedFile,
        file_id: i64,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let plate = plate_for_file_id(&self.config.license_plate_prefix, file_id)?;
        let relative = relative_path(now, &plate, &file.file_name);
        self.store.assign_location(file_id, &plate, &relative).await?;

        let url = format!("{}{}", run.submit_dir, file.file_name);
        let opened = self
            .fetcher
            .open_and_track(&run.submit_dir, &file.file_name, &url)
            .await?;
        let scratch = self.fetcher.stream_to_local_file(opened.reader, &url).await?;

        if scratch.content_hash != file.declared.content_hash {
            remove_partial(&scratch.path).await;
            return Err(IngestError::integrity(
                &file.file_name,
                &file.declared.content_hash,
                &scratch.content_hash,
            ));
        }
        if scratch.size != file.declared.size {
            remove_partial(&scratch.path).await;
            return Err(IngestError::row(format!(
                "{} is {} bytes, manifest says {}",
                file.file_name, scratch.size, file.declared.size
            )));
        }

        let published = match self.fetcher.publish(&scratch.path, &relative).await {
            Ok(path) => path,
            Err(e) => {
                remove_partial(&scratch.path).await;
                return Err(e);
            },
        };

        let committed = async {
            self.check_format(file, &published).await?;
            let commit = FileCommit {
                content_hash: &scratch.content_hash,
                size: file.stored_size(),
                modified: file.declared.modified,
                tags: &file.tags,
            };
            self.store.commit_file(file_id, commit, Utc::now()).await
        }
        .await;

        if let Err(e) = committed {
            remove_partial(&published).await;
            return Err(e);
        }

        info!(
            file = %file.file_name,
            file_id,
            license_plate = %plate,
            bytes = scratch.size,
            path = %relative,
            "File ingested"
        );
        Ok(plate)
    }

    async fn check_format(&self, file: &PlannedFile, path: &Path) -> Result<()> {
        check_gzip_suffix(path, &file.file_name)?;
        self.validator.check(&file.format, path).await
    }
}
