//! `edw submit` command implementation

use super::{format_bytes, load_config, open_store};
use crate::submit::{FileOutcome, SkipReason, SubmissionReport, SubmitOptions, Submitter};
use colored::Colorize;

pub async fn run(
    database_url: Option<&str>,
    url: &str,
    email: &str,
    force: bool,
    update: bool,
    json: bool,
) -> anyhow::Result<bool> {
    let config = load_config(database_url)?;
    let store = open_store(&config).await?;
    let submitter = Submitter::new(store, config)?;

    let report = submitter
        .submit(url, email, SubmitOptions { force, update })
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let submission = submitter.store().get_submission(report.submission_id).await?;
        print_report(&report);
        println!(
            "  Old files: {} ({})",
            submission.old_files,
            format_bytes(submission.old_bytes.max(0) as u64)
        );
        println!(
            "  New files: {} ({})",
            submission.new_files,
            format_bytes(submission.new_bytes.max(0) as u64)
        );
        if submission.meta_change_count > 0 {
            println!("  Metadata updated: {}", submission.meta_change_count);
        }
    }

    Ok(report.is_success())
}

fn print_report(report: &SubmissionReport) {
    for row in &report.rows {
        let status = match &row.outcome {
            FileOutcome::Fetched { license_plate, .. } => format!("{} {}", "fetched".green(), license_plate),
            FileOutcome::Skipped(SkipReason::DuplicateSkip { existing }) => {
                format!("{} already ingested as file {}", "skipped".yellow(), existing)
            },
            FileOutcome::Skipped(SkipReason::InFlight { attempt }) => {
                format!("{} in flight as file {}", "skipped".yellow(), attempt)
            },
            FileOutcome::Skipped(SkipReason::Stopped) => format!("{} submission stopped", "skipped".yellow()),
            FileOutcome::Failed { message, .. } => format!("{} {}", "failed".red(), message),
        };
        println!("{:>5}  {}  {}", row.line, row.file_name, status);
    }

    println!();
    let headline = format!("Submission {} {}", report.submission_id, report.state);
    if report.is_success() {
        println!("{}", headline.green().bold());
    } else {
        println!("{}", headline.red().bold());
    }
    if let Some(error) = &report.error {
        println!("  Error: {}", error);
    }
    println!(
        "  Rows: {} fetched, {} skipped, {} failed",
        report.fetched(),
        report.skipped(),
        report.failed()
    );
}
