//! `edw validate` command implementation
//!
//! Runs entirely locally; no database is opened.

use crate::config::SubmitConfig;
use crate::formats::validator_for;
use crate::manifest::validate::validate_manifest;
use colored::Colorize;
use std::path::Path;

pub async fn run(dir: &Path, manifest: &Path, output: &Path, prior: Option<&Path>) -> anyhow::Result<bool> {
    let config = SubmitConfig::from_env()?;
    let validator = validator_for(config.format_validator.as_deref())?;

    let output = dir.join(output);
    let prior = prior.map(|p| dir.join(p)).unwrap_or_else(|| output.clone());

    let report = validate_manifest(dir, &dir.join(manifest), &output, Some(&prior), validator.as_ref()).await?;

    for row in &report.rows {
        match &row.outcome {
            Ok(fingerprint) if fingerprint.reused => {
                println!("{:>5}  {}  {} (unchanged)", row.line, row.file_name, "ok".green())
            },
            Ok(_) => println!("{:>5}  {}  {}", row.line, row.file_name, "ok".green()),
            Err(message) => println!("{:>5}  {}  {} {}", row.line, row.file_name, "failed".red(), message),
        }
    }

    let failed = report.failed().count();
    println!();
    if failed == 0 {
        println!("{}", format!("All {} rows valid", report.rows.len()).green().bold());
    } else {
        println!("{}", format!("{} of {} rows failed", failed, report.rows.len()).red().bold());
    }
    println!("  Wrote {}", report.output.display());

    Ok(report.all_ok())
}
