//! Core vmbackup library API surface.

pub mod diagnostics;
pub mod events;
pub mod options;
pub mod outcome;
pub mod reporter;

pub mod decision;
pub mod hooks;
pub mod inventory;
pub mod operations;
pub mod pipeline;
pub mod power;
pub mod process;
pub mod settings;
pub mod summary;

#[cfg(test)]
pub(crate) mod testing;

pub use diagnostics::{Diagnostic, Severity};
pub use events::Event;
pub use operations::{run, run_with_runner};
pub use options::{ConfigSource, RunOptions};
pub use outcome::{
    BackupOutcome, CompressionStats, OperationOutput, OperationResult, RunOutcome, TransferReport,
    VmRunOutcome,
};
pub use process::{CommandOutcome, CommandRequest, CommandRunner, ProcessRunner};
pub use reporter::Reporter;
pub use summary::RunSummary;
