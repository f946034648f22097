use std::path::PathBuf;

use crate::config::{BackupSettings, load_backup_config, user_home_dir};
use crate::error::{Error, Result};

use super::diagnostics::{Diagnostic, Severity};
use super::options::ConfigSource;

/// Configuration file name looked up in the home directory.
pub const HOME_CONFIG_NAME: &str = ".vmbackup.toml";
/// System-wide configuration file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/vmbackup.toml";

/// Result of loading the backup configuration.
#[derive(Debug)]
pub struct SettingsLoad {
    pub settings: BackupSettings,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn load_settings(source: &ConfigSource) -> Result<SettingsLoad> {
    let path = resolve_config_path(source, &discovery_candidates())?;
    let settings = load_backup_config(&path)?;
    let diagnostics = settings
        .warnings
        .iter()
        .map(|warning| Diagnostic::new(Severity::Warning, warning).with_path(path.clone()))
        .collect();
    Ok(SettingsLoad {
        settings,
        diagnostics,
    })
}

/// Default lookup order when no explicit path is given.
pub fn discovery_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(home) = user_home_dir() {
        candidates.push(home.join(HOME_CONFIG_NAME));
    }
    candidates.push(PathBuf::from(SYSTEM_CONFIG_PATH));
    candidates
}

pub fn resolve_config_path(source: &ConfigSource, candidates: &[PathBuf]) -> Result<PathBuf> {
    match source {
        ConfigSource::Explicit(path) => {
            if path.is_file() {
                Ok(path.clone())
            } else {
                Err(Error::ExplicitConfigMissing { path: path.clone() })
            }
        }
        ConfigSource::Discover => candidates
            .iter()
            .find(|candidate| candidate.is_file())
            .cloned()
            .ok_or_else(|| Error::ConfigDiscoveryFailed {
                searched: candidates.to_vec(),
            }),
    }
}
