//! # writ CLI Module
//!
//! ## Available Commands
//!
//! - `demo` - Run a reference domain against the audit database
//! - `history` - Print the recorded history of a state id
//! - `verify` - Check the hash chain of a state id
//! - `stats` - Summarize the history of a state id
//! - `export` - Export the whole audit trail in canonical format
//! - `import` - Restore a canonical export into the database
//! - `config` - Print the effective engine options

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use writ::EngineConfig;
use writ_core::WritError;

pub use commands::*;

/// Audit database used when neither `--database` nor the config names one.
pub const DEFAULT_DATABASE: &str = "writ.redb";

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// writ - policy-governed mutations with an auditable history
#[derive(Parser, Debug)]
#[command(name = "writ")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the redb audit database [default: writ.redb]
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Engine configuration file [default: ./writ.toml when present]
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Reference domains runnable through `writ demo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Demo {
    /// Per-user quotas with a ceiling and a non-negative floor
    Quota,
    /// Feature flags with approval-gated critical flags
    Flags,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a reference domain through the engine
    Demo {
        #[arg(value_enum)]
        domain: Demo,
    },

    /// Print the recorded history of a state id
    History {
        #[arg(short, long)]
        state_id: String,

        /// Only the last N entries
        #[arg(short, long, conflicts_with_all = ["from", "to"])]
        recent: Option<usize>,

        /// Range start, milliseconds since the UNIX epoch (inclusive)
        #[arg(long, requires = "to")]
        from: Option<u64>,

        /// Range end, milliseconds since the UNIX epoch (inclusive)
        #[arg(long, requires = "from")]
        to: Option<u64>,
    },

    /// Check hash chaining, timestamp order and change checksums
    Verify {
        #[arg(short, long)]
        state_id: String,
    },

    /// Summarize the history of a state id
    Stats {
        #[arg(short, long)]
        state_id: String,
    },

    /// Export every recorded entry in canonical format
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Restore a canonical export into the database
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Print the effective engine options
    Config,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), WritError> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::discover(),
    };
    let database = cli
        .database
        .clone()
        .or_else(|| config.history_path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE));
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Demo { domain }) => cmd_demo(&database, &config, json_mode, domain).await,
        Some(Commands::History {
            state_id,
            recent,
            from,
            to,
        }) => cmd_history(&database, json_mode, &state_id, recent, from.zip(to)),
        Some(Commands::Verify { state_id }) => cmd_verify(&database, json_mode, &state_id),
        Some(Commands::Stats { state_id }) => cmd_stats(&database, json_mode, &state_id),
        Some(Commands::Export { output }) => cmd_export(&database, &output),
        Some(Commands::Import { input }) => cmd_import(&database, &input),
        Some(Commands::Config) | None => cmd_config(&config, &database, json_mode),
    }
}
