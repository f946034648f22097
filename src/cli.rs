use std::path::PathBuf;

use clap::Parser;

const VERSION: &str = env!("VMBACKUP_VERSION");

/// Top-level CLI definition for the `vmbackup` tool.
#[derive(Debug, Parser)]
#[command(
    name = "vmbackup",
    version = VERSION,
    about = "Incremental backups of Parallels virtual machines.",
    long_about = "Backs up every VM that has run since its last backup: suspends it just long enough\n\
                  to archive its home directory, compresses the archive, and copies it to each\n\
                  configured destination under a rotating slot number."
)]
pub struct Cli {
    /// Path to an explicit configuration file.
    #[arg(
        short,
        long = "config",
        value_name = "PATH",
        help = "Load configuration from PATH instead of ~/.vmbackup.toml or /etc/vmbackup.toml"
    )]
    pub config: Option<PathBuf>,

    /// Append log lines to this file instead of printing them.
    #[arg(
        short,
        long = "output",
        value_name = "FILE",
        help = "Append the run log to FILE instead of standard output"
    )]
    pub output: Option<PathBuf>,
}
