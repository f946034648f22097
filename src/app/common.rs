use std::path::PathBuf;

use crate::core::options::ConfigSource;

pub fn config_source(config_override: Option<&PathBuf>) -> ConfigSource {
    match config_override {
        Some(path) => ConfigSource::Explicit(path.clone()),
        None => ConfigSource::Discover,
    }
}
