//! Blocksync CLI
//!
//! Command-line tools for exercising the block sync server and client engine.
//!
//! # Commands
//!
//! - `process` - Run a batch sync request against a seeded in-memory server
//! - `simulate` - Replay an edit script through a sync session on a virtual clock

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Blocksync command-line tools.
#[derive(Parser)]
#[command(name = "blocksync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a batch sync request against an in-memory server
    Process {
        /// Batch request file (JSON, or CBOR when the extension is .cbor)
        batch: PathBuf,

        /// Pages and blocks to seed the server with
        #[arg(short, long)]
        blocks: Option<PathBuf>,

        /// Maximum operations per request
        #[arg(long)]
        max_batch_size: Option<usize>,

        /// Print the live blocks of every page afterwards
        #[arg(short, long)]
        pages: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Replay an edit script through a sync session
    Simulate {
        /// Edit script file
        script: PathBuf,

        /// Debounce window in milliseconds
        #[arg(long)]
        debounce_ms: Option<u64>,

        /// Maximum operations per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Send CBOR bodies instead of JSON
        #[arg(long)]
        cbor: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Process {
            batch,
            blocks,
            max_batch_size,
            pages,
            format,
        } => {
            let mut config = commands::process::load_config(cli.config.as_deref())?;
            if let Some(size) = max_batch_size {
                config = config.with_max_batch_size(size);
            }
            commands::process::run(&batch, blocks.as_deref(), config, pages, &format)?;
        }
        Commands::Simulate {
            script,
            debounce_ms,
            batch_size,
            cbor,
        } => {
            let mut config = commands::simulate::load_config(cli.config.as_deref())?;
            if let Some(ms) = debounce_ms {
                config = config.with_debounce(std::time::Duration::from_millis(ms));
            }
            if let Some(size) = batch_size {
                config = config.with_max_batch_size(size);
            }
            if cbor {
                config = config.with_wire_format(blocksync_protocol::WireFormat::Cbor);
            }
            commands::simulate::run(&script, config)?;
        }
        Commands::Version => {
            println!("Blocksync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
