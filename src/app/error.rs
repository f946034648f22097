use std::process::ExitCode;

use crate::Error;

pub fn exit_code(err: &Error) -> ExitCode {
    match err {
        Error::ReadConfig { .. } => ExitCode::from(74),
        Error::ParseConfig { .. } => ExitCode::from(65),
        Error::InvalidConfig { .. } => ExitCode::from(65),
        Error::ExplicitConfigMissing { .. } => ExitCode::from(66),
        Error::ConfigDiscoveryFailed { .. } => ExitCode::from(66),
        Error::OpenLog { .. } => ExitCode::from(74),
        Error::InventoryFailed { .. } => ExitCode::from(70),
    }
}
