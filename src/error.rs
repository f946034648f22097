use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Conditions that abort an entire backup run.
///
/// Per-VM failures never surface here; they are reported as events and counted in the run
/// summary instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read configuration file at {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Configuration at {path} could not be parsed: {source}")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Configuration at {path} is invalid:\n{message}")]
    InvalidConfig { path: PathBuf, message: String },
    #[error("The configuration path {path} does not exist or is not readable.")]
    ExplicitConfigMissing { path: PathBuf },
    #[error(
        "No vmbackup configuration found (searched {}). Provide a path with --config.",
        searched.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
    )]
    ConfigDiscoveryFailed { searched: Vec<PathBuf> },
    #[error("Failed to open log file {path}: {source}")]
    OpenLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to list virtual machines with `{command}`: {message}")]
    InventoryFailed { command: String, message: String },
}
