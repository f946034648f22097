use std::path::PathBuf;
use std::time::Duration;

use super::decision::{BackupRecord, Decision};
use super::diagnostics::Diagnostic;
use super::events::Event;
use super::inventory::PowerState;
use super::process::CommandOutcome;
use super::summary::RunSummary;

/// Result wrapper returned by high-level operations.
pub type OperationResult<T> = crate::error::Result<OperationOutput<T>>;

/// Envelope for successful operation outcomes.
#[derive(Debug)]
pub struct OperationOutput<T> {
    /// Primary value produced by the operation.
    pub value: T,
    /// Diagnostics collected while performing the operation.
    pub diagnostics: Vec<Diagnostic>,
    /// Structured events captured during the run.
    pub events: Vec<Event>,
}

impl<T> OperationOutput<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            diagnostics: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Vec<Diagnostic>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_events(mut self, events: Vec<Event>) -> Self {
        self.events = events;
        self
    }
}

/// Outcome of a full backup run.
#[derive(Debug)]
pub struct RunOutcome {
    pub config_path: PathBuf,
    pub summary: RunSummary,
    pub vms: Vec<VmRunOutcome>,
}

/// What happened to a single VM during the run.
#[derive(Debug)]
pub struct VmRunOutcome {
    pub name: String,
    /// State from the listing, before any suspend.
    pub listed_state: PowerState,
    pub decision: Decision,
    /// Present only when the backup was due and the pipeline ran.
    pub backup: Option<BackupOutcome>,
    /// Record written at the end of the attempt, if the save succeeded.
    pub record: Option<BackupRecord>,
}

/// Result of one pass through archive, compress and distribute.
#[derive(Debug)]
pub struct BackupOutcome {
    pub slot: u32,
    pub archived: bool,
    pub artifact: PathBuf,
    pub compression: Option<CompressionStats>,
    /// One report per configured destination, in configuration order.
    pub transfers: Vec<TransferReport>,
}

impl BackupOutcome {
    pub fn failed_transfers(&self) -> usize {
        self.transfers
            .iter()
            .filter(|report| !report.succeeded())
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionStats {
    pub original_bytes: u64,
    pub compressed_bytes: u64,
    pub elapsed: Duration,
}

pub fn retained_percent(original_bytes: u64, compressed_bytes: u64) -> f64 {
    if original_bytes == 0 {
        return 100.0;
    }
    compressed_bytes as f64 * 100.0 / original_bytes as f64
}

/// Result of copying the artifact to one destination, sent from its transfer thread.
#[derive(Debug, Clone)]
pub struct TransferReport {
    /// Position of the destination in the configuration.
    pub index: usize,
    pub target: String,
    pub outcome: CommandOutcome,
    pub elapsed: Duration,
}

impl TransferReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.success()
    }
}
