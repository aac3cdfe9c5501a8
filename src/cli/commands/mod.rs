//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod reset;
mod run;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings, LoadOptions};

#[derive(Parser)]
#[command(name = "swpics")]
#[command(about = "Find and download the best listing image for each catalog item")]
#[command(version)]
pub struct Cli {
    /// Config file path (defaults to ./swpics.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Ledger CSV file (overrides config and SWPICS_LEDGER)
    #[arg(short, long, global = true)]
    ledger: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Process pending ledger items
    Run {
        /// Image root folder (one subfolder per item code)
        #[arg(short, long)]
        images: Option<PathBuf>,
        /// Stop after this many items are downloaded (0 = unlimited)
        #[arg(short = 'n', long)]
        max_items: Option<usize>,
        /// Proxy URI to rotate through (repeatable; replaces the configured pool)
        #[arg(short, long = "proxy")]
        proxies: Vec<String>,
        /// Show the browser window
        #[arg(long)]
        headful: bool,
    },

    /// Show ledger totals and the next pending items
    Status {
        /// Number of pending codes to list
        #[arg(short, long, default_value = "10")]
        show: usize,
    },

    /// Mark items as pending again so the next run reprocesses them
    Reset {
        /// Item codes to reset
        #[arg(required = true)]
        codes: Vec<String>,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = load_settings(&LoadOptions {
        config_path: cli.config,
    })?;
    if let Some(ledger) = cli.ledger {
        settings.ledger_path = ledger;
    }

    match cli.command {
        Commands::Run {
            images,
            max_items,
            proxies,
            headful,
        } => {
            if let Some(images) = images {
                settings.image_root = images;
            }
            if let Some(max) = max_items {
                settings.max_items_per_run = max;
            }
            if !proxies.is_empty() {
                settings.proxies = proxies;
            }
            if headful {
                settings.browser.headless = false;
            }
            run::cmd_run(&settings).await
        }
        Commands::Status { show } => status::cmd_status(&settings, show),
        Commands::Reset { codes } => reset::cmd_reset(&settings, &codes),
    }
}
