//! listmirror CLI
//!
//! Keeps a Bluesky moderation list's membership equal to another list's.
//!
//! # Commands
//!
//! - `sync` - Reconcile the mirror with the source
//! - `diff` - Show what `sync` would change without changing anything
//! - `version` - Show version information
//!
//! Exits with status 0 when the run completes or is stopped early by rate
//! limiting, and 1 on any other error.

mod commands;

use clap::{Parser, Subcommand};
use commands::sync::SyncArgs;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Mirror one list's membership into a moderation list.
#[derive(Parser)]
#[command(name = "listmirror")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(global = true, short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the mirror list with the source list
    Sync {
        #[command(flatten)]
        args: SyncArgs,

        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show the pending changes without applying them
    Diff {
        #[command(flatten)]
        args: SyncArgs,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG takes precedence over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Sync { args, dry_run } => commands::sync::run(&args, dry_run, &cli.format).await,
        Commands::Diff { args } => commands::sync::run(&args, true, &cli.format).await,
        Commands::Version => {
            println!("listmirror v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "listmirror failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_sync_flags() {
        let cli = Cli::try_parse_from([
            "listmirror",
            "--format",
            "json",
            "sync",
            "--identifier",
            "me.bsky.social",
            "--password",
            "secret",
            "--batch-size",
            "5",
            "--dry-run",
        ])
        .unwrap();

        assert_eq!(cli.format, "json");
        match cli.command {
            Commands::Sync { args, dry_run } => {
                assert!(dry_run);
                assert_eq!(args.identifier, "me.bsky.social");
                assert_eq!(args.batch_size, 5);
                assert_eq!(args.page_size, 100);
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn version_needs_no_credentials() {
        let cli = Cli::try_parse_from(["listmirror", "version"]).unwrap();
        assert!(matches!(cli.command, Commands::Version));
    }
}
