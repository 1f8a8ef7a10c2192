//! Submission orchestration
//!
//! [`Submitter::submit`] drives one submission from URL to a terminal state:
//!
//! 1. Created: URL split, user resolved, staleness checked, row inserted
//! 2. ManifestFetched: manifest transferred and stored (or matched to an
//!    identical earlier copy)
//! 3. ManifestParsed: header checked; rows that fail field checks are
//!    recorded as failed files
//! 4. FilesEnumerated: rows already in the warehouse counted as old, with
//!    metadata changes applied or refused
//! 5. Per file: fetched, skipped or failed, in parallel
//! 6. Finalized, or Aborted when anything above step 5 fails
//!
//! Manifest-level failures are written to the submission's `error_message`.
//! Failures of one row or payload are written to that file's row only.

mod transfer;

use crate::config::SubmitConfig;
use crate::dedup::DeduplicationIndex;
use crate::error::{IngestError, Result};
use crate::fetch::{remove_partial, RemoteFetcher, ScratchFile};
use crate::formats::{validator_for, FileFormat, FormatValidator};
use crate::manifest::checks::{
    check_declared_fingerprint, check_descriptive_fields, check_replacement, tags_for, DeclaredFingerprint,
};
use crate::manifest::{self, ManifestRow, SUBMIT_COLUMNS};
use crate::models::{IngestedFile, Tags};
use crate::store::{FileCommit, WarehouseStore};
use crate::subscribers::Subscribers;
use crate::warehouse::{relative_path, split_submit_url};
use chrono::{DateTime, Utc};
use edw_common::license_plate::plate_for_file_id;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, error, info, instrument, warn};

/// Where a submission has got to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    Created,
    ManifestFetched,
    ManifestParsed,
    FilesEnumerated,
    Finalized,
    Aborted,
}

impl SubmissionState {
    pub fn as_str(&self) -> &str {
        match self {
            SubmissionState::Created => "created",
            SubmissionState::ManifestFetched => "manifest_fetched",
            SubmissionState::ManifestParsed => "manifest_parsed",
            SubmissionState::FilesEnumerated => "files_enumerated",
            SubmissionState::Finalized => "finalized",
            SubmissionState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionState::Finalized | SubmissionState::Aborted)
    }
}

impl std::fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitOptions {
    /// Ignore an apparently active earlier submission of the same URL
    pub force: bool,
    /// Rewrite stored names and tags that differ from the manifest
    pub update: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Content already in the warehouse
    DuplicateSkip { existing: i64 },
    /// Another attempt on the same file is still running
    InFlight { attempt: i64 },
    /// The submission was stopped before this file started
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileOutcome {
    Fetched {
        file_id: i64,
        license_plate: String,
    },
    Skipped(SkipReason),
    Failed {
        file_id: Option<i64>,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RowOutcome {
    pub line: usize,
    pub file_name: String,
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReport {
    pub submission_id: i64,
    pub state: SubmissionState,
    pub error: Option<String>,
    pub manifest_file_id: Option<i64>,
    /// One entry per manifest row, in manifest order
    pub rows: Vec<RowOutcome>,
}

impl SubmissionReport {
    pub fn fetched(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Fetched { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Failed { .. }))
    }

    /// Finalized with every row fetched or skipped
    pub fn is_success(&self) -> bool {
        self.state == SubmissionState::Finalized && self.failed() == 0
    }

    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.rows.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// A row that passed its checks and may need fetching
#[derive(Debug, Clone)]
struct PlannedFile {
    line: usize,
    file_name: String,
    format: FileFormat,
    declared: DeclaredFingerprint,
    tags: Tags,
    /// Id of the file this one deprecates, with the reason
    replaces: Option<(i64, String)>,
}

impl PlannedFile {
    /// Declared size as the warehouse records it. Row checks keep it within `i64`.
    fn stored_size(&self) -> i64 {
        i64::try_from(self.declared.size).unwrap_or(i64::MAX)
    }
}

/// Per-submission context shared by the file tasks
struct SubmissionRun {
    id: i64,
    submit_dir: String,
    dir_id: i64,
    host_id: i64,
    subscribers: Subscribers,
}

struct Progress {
    submission_id: i64,
    state: SubmissionState,
    manifest_file_id: Option<i64>,
    rows: Vec<RowOutcome>,
}

impl Progress {
    fn new(submission_id: i64) -> Self {
        Self {
            submission_id,
            state: SubmissionState::Created,
            manifest_file_id: None,
            rows: Vec::new(),
        }
    }

    fn advance(&mut self, next: SubmissionState) {
        debug!(submission_id = self.submission_id, from = %self.state, to = %next, "Submission state");
        self.state = next;
    }
}

pub struct Submitter {
    store: WarehouseStore,
    config: SubmitConfig,
    fetcher: RemoteFetcher,
    dedup: DeduplicationIndex,
    validator: Box<dyn FormatValidator>,
}

impl Submitter {
    pub fn new(store: WarehouseStore, config: SubmitConfig) -> Result<Self> {
        let fetcher = RemoteFetcher::new(
            store.clone(),
            config.warehouse_root.clone(),
            config.scratch_dir(),
            config.connect_timeout,
            config.read_timeout,
        )?;
        let dedup = DeduplicationIndex::new(store.clone(), config.dedup_size_threshold);
        let validator = validator_for(config.format_validator.as_deref())?;

        Ok(Self {
            store,
            config,
            fetcher,
            dedup,
            validator,
        })
    }

    /// Swap the format checks, e.g. for a site-specific validator.
    pub fn with_validator(mut self, validator: Box<dyn FormatValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn store(&self) -> &WarehouseStore {
        &self.store
    }

    pub fn config(&self) -> &SubmitConfig {
        &self.config
    }

    /// Run a submission of the manifest at `url` on behalf of `email`.
    ///
    /// Errors are returned only when no submission row could be created
    /// (bad URL, unknown user, lockout) or bookkeeping itself fails. Once the
    /// row exists the outcome, including an abort, is in the report.
    #[instrument(skip(self, options), fields(force = options.force, update = options.update))]
    pub async fn submit(&self, url: &str, email: &str, options: SubmitOptions) -> Result<SubmissionReport> {
        let now = Utc::now();
        let (submit_dir, manifest_name) = split_submit_url(url)?;

        let user = self
            .store
            .find_user_by_email(email)
            .await?
            .ok_or_else(|| IngestError::UnknownUser(email.to_string()))?;

        if options.force {
            debug!(url = %url, "Skipping staleness check");
        } else {
            self.check_staleness(url, now).await?;
        }

        let submission_id = self.store.create_submission(url, user.id, now).await?;
        info!(submission_id, url = %url, user = %user.email, "Submission created");

        let mut progress = Progress::new(submission_id);
        let result = self
            .run(&mut progress, url, &submit_dir, &manifest_name, options)
            .await;

        let error = match result {
            Ok(()) => {
                self.store.finalize_submission(submission_id, Utc::now()).await?;
                let stored = self.store.submission_error(submission_id).await?;
                if stored.is_empty() {
                    progress.advance(SubmissionState::Finalized);
                    None
                } else {
                    warn!(submission_id, error = %stored, "Submission was stopped");
                    progress.advance(SubmissionState::Aborted);
                    Some(stored)
                }
            },
            Err(e) => {
                error!(submission_id, state = %progress.state, error = %e, "Submission aborted");
                let message = e.to_string();
                self.store.abort_submission(submission_id, &message, Utc::now()).await?;
                progress.advance(SubmissionState::Aborted);
                Some(message)
            },
        };

        progress.rows.sort_by_key(|r| r.line);
        let report = SubmissionReport {
            submission_id,
            state: progress.state,
            error,
            manifest_file_id: progress.manifest_file_id,
            rows: progress.rows,
        };

        info!(
            submission_id,
            state = %report.state,
            fetched = report.fetched(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Submission finished"
        );
        Ok(report)
    }

    /// Refuse to start while the latest submission of `url` is unfinished
    /// and has shown activity within the staleness window.
    async fn check_staleness(&self, url: &str, now: DateTime<Utc>) -> Result<()> {
        let Some(latest) = self.store.latest_submission_for_url(url).await? else {
            return Ok(());
        };
        if latest.is_terminal() {
            return Ok(());
        }

        let last_activity = match self.store.latest_file_activity(latest.id).await? {
            Some(file_time) => file_time.max(latest.start_time),
            None => latest.start_time,
        };
        let window =
            chrono::Duration::from_std(self.config.staleness_window).unwrap_or(chrono::Duration::MAX);

        if now - last_activity < window {
            return Err(IngestError::StaleLockout {
                url: url.to_string(),
                submission_id: latest.id,
            });
        }

        warn!(
            url = %url,
            submission_id = latest.id,
            last_activity = %last_activity,
            "Earlier submission looks abandoned, starting a new one"
        );
        Ok(())
    }

    async fn run(
        &self,
        progress: &mut Progress,
        url: &str,
        submit_dir: &str,
        manifest_name: &str,
        options: SubmitOptions,
    ) -> Result<()> {
        let id = progress.submission_id;

        let opened = self.fetcher.open_and_track(submit_dir, manifest_name, url).await?;
        self.store.set_submission_dir(id, opened.submit_dir_id).await?;
        let scratch = self.fetcher.stream_to_local_file(opened.reader, url).await?;

        let text = match tokio::fs::read(&scratch.path).await.map(String::from_utf8) {
            Ok(Ok(text)) => text,
            Ok(Err(_)) => {
                remove_partial(&scratch.path).await;
                return Err(IngestError::structural(format!("{} is not a text file", manifest_name)));
            },
            Err(e) => {
                remove_partial(&scratch.path).await;
                return Err(e.into());
            },
        };

        let manifest_file_id = self
            .store_manifest(id, opened.submit_dir_id, manifest_name, &scratch)
            .await?;
        self.store.set_submission_manifest(id, manifest_file_id).await?;
        progress.manifest_file_id = Some(manifest_file_id);
        progress.advance(SubmissionState::ManifestFetched);

        let table = manifest::parse(&text, SUBMIT_COLUMNS)?;
        let subscribers = if self.config.notify_subscribers {
            Subscribers::load(&self.store).await?
        } else {
            Subscribers::default()
        };
        let run = SubmissionRun {
            id,
            submit_dir: submit_dir.to_string(),
            dir_id: opened.submit_dir_id,
            host_id: opened.host_id,
            subscribers,
        };

        let planned = self.check_rows(&run, &table.rows, progress).await?;
        progress.advance(SubmissionState::ManifestParsed);

        let row_count = i64::try_from(table.rows.len()).unwrap_or(i64::MAX);
        let byte_count = planned
            .iter()
            .fold(0i64, |total, f| total.saturating_add(f.stored_size()));
        self.store.record_enumeration(id, row_count, byte_count).await?;
        let pending = self.enumerate(&run, planned, options, progress).await?;
        progress.advance(SubmissionState::FilesEnumerated);

        // Large files repeated inside one manifest are fetched once; the
        // repeats go in a second pass where they dedup against the first.
        let mut seen = HashSet::new();
        let threshold = self.dedup.size_threshold();
        let (first, repeats): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|f| f.declared.size <= threshold || seen.insert(f.declared.content_hash.clone()));

        let streams = self.parallel_streams(run.host_id).await?;
        info!(
            submission_id = id,
            to_fetch = first.len() + repeats.len(),
            streams,
            "Fetching files"
        );

        for batch in [first, repeats] {
            let outcomes: Vec<RowOutcome> = stream::iter(batch.iter())
                .map(|file| self.fetch_file(&run, file))
                .buffer_unordered(streams)
                .collect()
                .await;
            progress.rows.extend(outcomes);
        }

        Ok(())
    }

    /// Keep the manifest itself in the warehouse, unless this directory
    /// already delivered identical bytes.
    async fn store_manifest(
        &self,
        submission_id: i64,
        dir_id: i64,
        manifest_name: &str,
        scratch: &ScratchFile,
    ) -> Result<i64> {
        if let Some(existing) = self.dedup.manifest_copy(&scratch.content_hash, dir_id).await? {
            debug!(existing = existing.id, "Manifest unchanged since an earlier submission");
            remove_partial(&scratch.path).await;
            return Ok(existing.id);
        }

        let now = Utc::now();
        let file_id = self
            .store
            .reserve_file(submission_id, Some(dir_id), manifest_name, now)
            .await?;
        let no_tags = Tags::new();

        let stored = async {
            let plate = plate_for_file_id(&self.config.license_plate_prefix, file_id)?;
            let relative = relative_path(now, &plate, manifest_name);
            self.store.assign_location(file_id, &plate, &relative).await?;
            self.fetcher.publish(&scratch.path, &relative).await?;
            let commit = FileCommit {
                content_hash: &scratch.content_hash,
                size: scratch.size as i64,
                modified: now.timestamp(),
                tags: &no_tags,
            };
            self.store.commit_file(file_id, commit, Utc::now()).await
        }
        .await;

        if let Err(e) = stored {
            remove_partial(&scratch.path).await;
            self.store.fail_file(file_id, &e.to_string(), Utc::now()).await?;
            return Err(e);
        }
        Ok(file_id)
    }

    async fn check_rows(
        &self,
        run: &SubmissionRun,
        rows: &[ManifestRow],
        progress: &mut Progress,
    ) -> Result<Vec<PlannedFile>> {
        let mut names = HashSet::new();
        let mut planned = Vec::with_capacity(rows.len());

        for row in rows {
            match self.check_row(row, &mut names).await {
                Ok(file) => planned.push(file),
                Err(e) if e.is_file_local() => {
                    let message = e.to_string();
                    warn!(line = row.line, file = %row.file_name(), error = %message, "Row rejected");
                    let file_id = self
                        .store
                        .record_failed_file(run.id, Some(run.dir_id), row.file_name(), &message, Utc::now())
                        .await?;
                    progress.rows.push(RowOutcome {
                        line: row.line,
                        file_name: row.file_name().to_string(),
                        outcome: FileOutcome::Failed {
                            file_id: Some(file_id),
                            message,
                        },
                    });
                },
                Err(e) => return Err(e),
            }
        }

        Ok(planned)
    }

    async fn check_row(&self, row: &ManifestRow, names: &mut HashSet<String>) -> Result<PlannedFile> {
        let format = check_descriptive_fields(row)?;
        if !names.insert(row.file_name().to_string()) {
            return Err(IngestError::row(format!(
                "{} is listed more than once in the manifest",
                row.file_name()
            )));
        }
        let declared = check_declared_fingerprint(row)?;

        let replaces = match check_replacement(row, &self.config.license_plate_prefix)? {
            Some(replacement) => {
                let old = self
                    .store
                    .find_file_by_license_plate(&replacement.license_plate)
                    .await?
                    .ok_or_else(|| {
                        IngestError::row(format!(
                            "{} replaces {}, which is not in the warehouse",
                            row.file_name(),
                            replacement.license_plate
                        ))
                    })?;
                Some((old.id, replacement.reason))
            },
            None => None,
        };

        Ok(PlannedFile {
            line: row.line,
            file_name: row.file_name().to_string(),
            format,
            declared,
            tags: tags_for(row)?,
            replaces,
        })
    }

    /// Split rows into already ingested and still to fetch. Metadata changes
    /// on ingested files are refused before anything is downloaded unless
    /// `update` was asked for.
    async fn enumerate(
        &self,
        run: &SubmissionRun,
        planned: Vec<PlannedFile>,
        options: SubmitOptions,
        progress: &mut Progress,
    ) -> Result<Vec<PlannedFile>> {
        let mut old = Vec::new();
        let mut pending = Vec::new();
        let listed: HashSet<String> = planned.iter().map(|f| f.file_name.clone()).collect();

        for file in planned {
            let existing = self
                .dedup
                .already_ingested(
                    Some(run.dir_id),
                    &file.file_name,
                    &file.declared.content_hash,
                    file.declared.size,
                )
                .await?;
            match existing {
                Some(existing) => old.push((file, existing)),
                None => pending.push(file),
            }
        }

        let changed: Vec<_> = old
            .iter()
            .filter(|(file, existing)| metadata_differs(run.dir_id, file, existing, &listed))
            .collect();
        if let Some((file, existing)) = changed.first() {
            if !options.update {
                let mut detail = describe_change(file, existing);
                if changed.len() > 1 {
                    detail.push_str(&format!(" (and {} more files)", changed.len() - 1));
                }
                return Err(IngestError::MetadataConflict {
                    file: file.file_name.clone(),
                    detail,
                });
            }
        }

        for (file, existing) in &old {
            if metadata_differs(run.dir_id, file, existing, &listed) {
                self.store
                    .update_file_metadata(existing.id, &file.file_name, &file.tags)
                    .await?;
                self.store.add_meta_change(run.id).await?;
                info!(
                    file = %file.file_name,
                    file_id = existing.id,
                    change = %describe_change(file, existing),
                    "Updated stored metadata"
                );
            }

            self.store.add_old_file(run.id, file.stored_size()).await?;
            progress.rows.push(RowOutcome {
                line: file.line,
                file_name: file.file_name.clone(),
                outcome: FileOutcome::Skipped(SkipReason::DuplicateSkip { existing: existing.id }),
            });
        }

        debug!(old = old.len(), pending = pending.len(), "Enumerated manifest");
        Ok(pending)
    }

    async fn parallel_streams(&self, host_id: i64) -> Result<usize> {
        let host = self.store.get_host(host_id).await?;
        let allowed = usize::try_from(host.parallel_streams).unwrap_or(1).max(1);
        Ok(allowed.min(self.config.max_parallel_fetches))
    }
}

/// Only a file this directory delivered can have its name or tags changed
/// by a resubmission; content matched elsewhere is just a duplicate. So is
/// content stored under the name of another row of the same manifest.
fn metadata_differs(
    dir_id: i64,
    file: &PlannedFile,
    existing: &IngestedFile,
    listed: &HashSet<String>,
) -> bool {
    if existing.submit_dir_id != Some(dir_id) {
        return false;
    }
    if existing.submit_file_name != file.file_name {
        return !listed.contains(&existing.submit_file_name);
    }
    existing.tags != file.tags
}

fn describe_change(file: &PlannedFile, existing: &IngestedFile) -> String {
    if existing.submit_file_name != file.file_name {
        return format!(
            "stored as {}, manifest names it {}",
            existing.submit_file_name, file.file_name
        );
    }

    let keys: Vec<&str> = file
        .tags
        .keys()
        .chain(existing.tags.keys())
        .filter(|k| file.tags.get(*k) != existing.tags.get(*k))
        .map(String::as_str)
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();
    format!("changed tags: {}", keys.join(", "))
}
