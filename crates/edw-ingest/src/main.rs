//! EDW CLI - Main entry point

use clap::Parser;
use edw_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use edw_ingest::{commands, Cli, Commands, SubscriberCommand, UserCommand};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(LogLevel::from_verbosity(cli.verbose))
        .output(LogOutput::Console)
        .log_file_prefix("edw")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // Keep the guard alive so buffered file logs are flushed on exit
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        },
    };

    match execute_command(&cli).await {
        Ok(true) => {},
        Ok(false) => process::exit(1),
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            process::exit(1);
        },
    }
}

/// Run the command; `Ok(false)` means it ran but something failed.
async fn execute_command(cli: &Cli) -> anyhow::Result<bool> {
    let database_url = cli.database_url.as_deref();

    match &cli.command {
        Commands::Submit {
            url,
            email,
            force,
            update,
            json,
        } => commands::submit::run(database_url, url, email, *force, *update, *json).await,

        Commands::Validate {
            dir,
            manifest,
            output,
            prior,
        } => commands::validate::run(dir, manifest, output, prior.as_deref()).await,

        Commands::Plate { ids } => commands::plate::run(ids),

        Commands::User { command } => match command {
            UserCommand::Add { email } => commands::user::add(database_url, email).await,
        },

        Commands::Subscriber { command } => match command {
            SubscriberCommand::Add {
                name,
                command,
                file_pattern,
                dir_pattern,
                tag_pattern,
                order,
            } => {
                commands::subscriber::add(
                    database_url,
                    name,
                    command,
                    file_pattern,
                    dir_pattern,
                    tag_pattern,
                    *order,
                )
                .await
            },
            SubscriberCommand::List => commands::subscriber::list(database_url).await,
        },
    }
}
