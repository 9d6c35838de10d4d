//! stevedore CLI — remote file operations via protocol workers.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::error::CliError;

#[derive(Parser)]
#[command(name = "stevedore", version)]
#[command(about = "Remote file operations via out-of-process protocol workers")]
pub struct Cli {
    /// Engine configuration file (INI)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Also append logs to <DIR>/stevedore.log
    #[arg(long, global = true, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Continue past warnings instead of aborting
    #[arg(short = 'y', long, global = true)]
    pub assume_yes: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Download a target to a file or stdout
    Get {
        source: String,
        /// Write the payload here instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Buffer the first N bytes to sniff the content type first
        #[arg(long, value_name = "BYTES")]
        preview: Option<usize>,
    },
    /// Copy source to destination
    Cp { source: String, dest: String },
    /// Move source to destination
    Mv { source: String, dest: String },
    /// Delete a file or empty directory
    Rm { target: String },
    /// Create a directory
    Mkdir { target: String },
    /// List a directory
    Ls {
        target: String,
        /// Show kind, permissions, size and modification time
        #[arg(short, long)]
        long: bool,
    },
    /// Show details for a single target
    Stat { target: String },
    /// Upload a local file to a target
    Put {
        dest: String,
        input: PathBuf,
        /// Replace an existing target without warning
        #[arg(long)]
        overwrite: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let _logging_guard = match stevedore::logging::init_logging(cli.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => CliError::LoggingInit(e.to_string()).exit(),
    };

    if let Err(e) = commands::run(cli).await {
        e.exit();
    }
}
