//! jmctl - job archive maintenance
//!
//! Converts legacy job archives to the current record format and
//! summarizes the contents of an archive.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{inventory, sanitize};
use std::path::PathBuf;

/// Job archive maintenance tool
#[derive(Parser)]
#[command(name = "jmctl")]
#[command(author, version, about = "Maintenance tool for the job archive", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert a legacy archive into a new archive directory
    Sanitize {
        /// Legacy archive root
        #[arg(long, short, default_value = "./var/job-archive")]
        source: PathBuf,

        /// Destination root, must not exist yet
        #[arg(long, short, default_value = "./var/job-archive-new")]
        dest: PathBuf,
    },

    /// Show job counts and time span per cluster
    Inventory {
        /// Archive root
        #[arg(long, short, env = "JOBMON_ARCHIVE_PATH", default_value = "./var/job-archive")]
        archive: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Sanitize { source, dest } => {
            sanitize::run(&source, &dest, cli.format).await?;
        }
        Commands::Inventory { archive } => {
            inventory::run(&archive, cli.format).await?;
        }
    }

    Ok(())
}
