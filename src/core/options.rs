use std::path::PathBuf;

/// Source used when resolving the backup configuration.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Look for `~/.vmbackup.toml`, then `/etc/vmbackup.toml`.
    Discover,
    /// Use an explicit path to the configuration file.
    Explicit(PathBuf),
}

/// Options for the `run` operation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Where the configuration comes from.
    pub config: ConfigSource,
    /// Version string reported in the run banner.
    pub version: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            config: ConfigSource::Discover,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
