use std::path::PathBuf;
use std::time::Duration;

use crate::config::HookKind;

use super::diagnostics::Severity;
use super::inventory::PowerState;
use super::summary::RunSummary;

/// Structured event emitted while a backup run progresses.
#[derive(Debug, Clone)]
pub enum Event {
    /// A textual progress update with a severity level.
    Message {
        /// Severity of the message.
        severity: Severity,
        /// Human-readable text.
        text: String,
    },
    /// The run began.
    RunStarted {
        /// Version string of the running binary.
        version: String,
    },
    /// A hook line was echoed to the log (`+text` or a logged command).
    HookLine {
        /// Hook section (VM name or the global section).
        section: String,
        /// Pipeline point the hook belongs to.
        kind: HookKind,
        /// Line as written in the configuration, without its prefix.
        line: String,
    },
    /// A VM row was read from the hypervisor listing.
    VmDiscovered {
        /// Name of the VM.
        vm: String,
        /// Power state reported by the listing.
        state: PowerState,
    },
    /// A running VM was suspended for the backup window.
    VmSuspended {
        /// Name of the VM.
        vm: String,
    },
    /// A VM suspended earlier was resumed.
    VmResumed {
        /// Name of the VM.
        vm: String,
    },
    /// The recorded uptime was ahead of the live counter and was discarded.
    StaleRecordOverridden {
        /// Name of the VM.
        vm: String,
        /// Uptime stored in the status file.
        recorded_uptime: u64,
        /// Uptime reported by the hypervisor now.
        current_uptime: u64,
    },
    /// The decision engine evaluated a VM.
    BackupDecided {
        /// Name of the VM.
        vm: String,
        /// Effective current uptime in seconds.
        uptime: u64,
        /// Effective last-backup uptime in seconds.
        last_uptime: u64,
        /// Home directory that would be archived.
        home: String,
        /// Slot used by the previous backup.
        last_slot: u32,
        /// Whether a backup runs now.
        due: bool,
    },
    /// The uncompressed archive step finished successfully.
    ArchiveCreated {
        /// Name of the VM.
        vm: String,
        /// Archive written to the scratch directory.
        path: PathBuf,
        /// Time spent archiving.
        elapsed: Duration,
    },
    /// Compression is about to start.
    CompressionStarted {
        /// Archive being compressed.
        path: PathBuf,
        /// Compression program.
        program: PathBuf,
    },
    /// Compression finished and the size reduction is known.
    Compressed {
        /// Name of the VM.
        vm: String,
        /// Archive size before compression.
        original_bytes: u64,
        /// Artifact size after compression.
        compressed_bytes: u64,
        /// Time spent compressing.
        elapsed: Duration,
    },
    /// A transfer to one destination was launched.
    TransferStarted {
        /// Local artifact path.
        source: PathBuf,
        /// Remote target specifier.
        target: String,
    },
    /// A transfer to one destination succeeded.
    TransferCompleted {
        /// Remote target specifier.
        target: String,
        /// Time the transfer took.
        elapsed: Duration,
    },
    /// A transfer to one destination failed or timed out.
    TransferFailed {
        /// Remote target specifier.
        target: String,
        /// Failure detail from the transport.
        reason: String,
        /// Time spent before the failure.
        elapsed: Duration,
    },
    /// Fan-out finished for a VM.
    CopiesCompleted {
        /// Name of the VM.
        vm: String,
        /// Configured destination count.
        copies: usize,
    },
    /// The new backup record was persisted.
    RecordSaved {
        /// Name of the VM.
        vm: String,
        /// Slot stored in the record.
        slot: u32,
        /// Uptime stored in the record.
        uptime: u64,
    },
    /// The run finished; carries the final counters.
    RunCompleted {
        /// Final run counters.
        summary: RunSummary,
    },
}

impl Event {
    pub(crate) fn info(text: impl Into<String>) -> Self {
        Event::Message {
            severity: Severity::Info,
            text: text.into(),
        }
    }

    pub(crate) fn warning(text: impl Into<String>) -> Self {
        Event::Message {
            severity: Severity::Warning,
            text: text.into(),
        }
    }

    pub(crate) fn error(text: impl Into<String>) -> Self {
        Event::Message {
            severity: Severity::Error,
            text: text.into(),
        }
    }

    /// Whether the event reports a per-VM failure.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Event::Message {
                severity: Severity::Error,
                ..
            } | Event::TransferFailed { .. }
        )
    }
}
