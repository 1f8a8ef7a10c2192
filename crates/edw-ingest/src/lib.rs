//! EDW submission ingestion
//!
//! Pulls a lab's manifest and the files it lists into the warehouse.
//!
//! # Overview
//!
//! - **Submit**: fetch a manifest by URL, check every row, fetch each file
//!   not already held and name it by license plate (`edw submit`)
//! - **Validate**: hash and check a local directory before submitting,
//!   reusing the previous run's results for unchanged files (`edw validate`)
//! - **Plates**: show the license plate for file ids (`edw plate`)
//! - **Users and subscribers**: register submitters and post-ingest hooks
//!   (`edw user add`, `edw subscriber add`)

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod commands;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod fetch;
pub mod formats;
pub mod manifest;
pub mod models;
pub mod store;
pub mod submit;
pub mod subscribers;
pub mod warehouse;

// Re-export commonly used types
pub use config::SubmitConfig;
pub use error::{IngestError, Result};
pub use store::WarehouseStore;
pub use submit::{SubmissionReport, SubmissionState, SubmitOptions, Submitter};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// EDW - genomic data warehouse submission tool
#[derive(Parser, Debug)]
#[command(name = "edw")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Database URL
    #[arg(long, env = "EDW_DATABASE_URL", global = true)]
    pub database_url: Option<String>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit the manifest at a URL and fetch the files it lists
    Submit {
        /// Manifest URL (http, https or file)
        url: String,

        /// Email of the registered submitter
        email: String,

        /// Start even if an earlier submission of this URL looks active
        #[arg(long = "now")]
        force: bool,

        /// Apply name and tag changes to files already in the warehouse
        #[arg(long)]
        update: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Hash and check a local submission directory
    Validate {
        /// Directory holding the manifest and its files
        dir: PathBuf,

        /// Manifest file, relative to the directory
        #[arg(short, long, default_value = "manifest.txt")]
        manifest: PathBuf,

        /// Validated manifest to write, relative to the directory
        #[arg(short, long, default_value = "validated.txt")]
        output: PathBuf,

        /// Earlier validated manifest to reuse (defaults to the output file)
        #[arg(short, long)]
        prior: Option<PathBuf>,
    },

    /// Print the license plate for file ids
    Plate {
        /// File ids
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Manage submitters
    User {
        #[command(subcommand)]
        command: UserCommand,
    },

    /// Manage post-ingest subscribers
    Subscriber {
        #[command(subcommand)]
        command: SubscriberCommand,
    },
}

/// User subcommands
#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Register a submitter
    Add {
        /// Email address
        email: String,
    },
}

/// Subscriber subcommands
#[derive(Subcommand, Debug)]
pub enum SubscriberCommand {
    /// Add a subscriber
    Add {
        /// Subscriber name
        name: String,

        /// Shell command run per matching file; `%u` becomes the file id
        command: String,

        /// Wildcard on the submitted file name
        #[arg(long, default_value = "*")]
        file_pattern: String,

        /// Wildcard on the submit directory URL
        #[arg(long, default_value = "*")]
        dir_pattern: String,

        /// JSON object of tag name to wildcard
        #[arg(long, default_value = "")]
        tag_pattern: String,

        /// Lower runs first
        #[arg(long, default_value = "0")]
        order: i64,
    },

    /// List subscribers in run order
    List,
}
