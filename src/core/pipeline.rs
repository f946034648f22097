//! Archive, compress and distribute one VM's storage.
//!
//! The VM is frozen only for the archive step: as soon as the uncompressed tarball exists the
//! VM is resumed, and the slower compression and transfers work from the scratch copy.

use std::fs;
use std::io;
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use crate::config::BackupSettings;

use super::events::Event;
use super::outcome::{BackupOutcome, CompressionStats, TransferReport};
use super::power::PowerController;
use super::process::{CommandRequest, CommandRunner};
use super::reporter::Reporter;
use super::summary::RunState;

/// Paths used while backing up one VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// Uncompressed archive, `<scratch>/<vm>.tar`.
    pub archive: PathBuf,
    /// Compressed artifact, `<scratch>/<vm>.tar.<ext>`.
    pub artifact: PathBuf,
}

impl ArtifactPaths {
    pub fn new(scratch: &Path, vm: &str, extension: &str) -> Self {
        Self {
            archive: scratch.join(format!("{vm}.tar")),
            artifact: scratch.join(format!("{vm}.tar.{extension}")),
        }
    }
}

/// Remote name of the artifact for `slot` under `destination`.
pub fn remote_target(destination: &str, vm: &str, slot: u32, extension: &str) -> String {
    format!("{destination}/{vm}.{slot}.tar.{extension}")
}

pub struct BackupPipeline<'a> {
    runner: &'a dyn CommandRunner,
    settings: &'a BackupSettings,
}

impl<'a> BackupPipeline<'a> {
    pub fn new(runner: &'a dyn CommandRunner, settings: &'a BackupSettings) -> Self {
        Self { runner, settings }
    }

    /// Back up `vm` from `home` into rotation `slot`.
    ///
    /// Never fails: each step reports and counts its own errors. A compression failure ends
    /// the pipeline early, in which case nothing is distributed or booked.
    pub fn run(
        &self,
        vm: &str,
        home: &str,
        slot: u32,
        power: &mut PowerController<'_>,
        reporter: &mut dyn Reporter,
        state: &mut RunState,
    ) -> BackupOutcome {
        let paths = ArtifactPaths::new(
            &self.settings.scratch_directory,
            vm,
            &self.settings.compression.extension,
        );
        let mut outcome = BackupOutcome {
            slot,
            archived: false,
            artifact: paths.artifact.clone(),
            compression: None,
            transfers: Vec::new(),
        };

        outcome.archived = self.archive(vm, home, &paths, reporter, state);

        if power.suspended_by_run(vm) {
            power.resume(vm, reporter, state);
        }

        outcome.compression = self.compress(vm, &paths, reporter, state);
        if outcome.compression.is_none() {
            remove_leftover(&paths.archive, reporter, state);
            remove_leftover(&paths.artifact, reporter, state);
            return outcome;
        }

        outcome.transfers = self.distribute(vm, slot, &paths.artifact, reporter);
        for report in &outcome.transfers {
            if !report.succeeded() {
                state.record_error();
            }
        }

        if let Err(err) = fs::remove_file(&paths.artifact) {
            reporter.report(Event::error(format!(
                "Failed to remove {}: {err}",
                paths.artifact.display()
            )));
            state.record_error();
        }

        let copies = self.settings.transfer.destinations.len();
        state.record_backup(vm, slot, copies);
        reporter.report(Event::CopiesCompleted {
            vm: vm.to_string(),
            copies,
        });

        outcome
    }

    fn archive(
        &self,
        vm: &str,
        home: &str,
        paths: &ArtifactPaths,
        reporter: &mut dyn Reporter,
        state: &mut RunState,
    ) -> bool {
        let archive = &self.settings.archive;
        let request = CommandRequest::new(&archive.program, archive.timeout)
            .args(archive.arguments.iter().cloned())
            .arg(paths.archive.display().to_string())
            .arg(home.trim_start_matches('/'))
            .current_dir("/");

        reporter.report(Event::info(format!(
            "Archiving {vm}: {}",
            request.display()
        )));
        let started = Instant::now();
        let outcome = self.runner.run(&request);
        if outcome.success() {
            reporter.report(Event::ArchiveCreated {
                vm: vm.to_string(),
                path: paths.archive.clone(),
                elapsed: started.elapsed(),
            });
            true
        } else {
            reporter.report(Event::error(format!(
                "Archiving {vm} failed: {}",
                outcome.failure_detail()
            )));
            state.record_error();
            false
        }
    }

    fn compress(
        &self,
        vm: &str,
        paths: &ArtifactPaths,
        reporter: &mut dyn Reporter,
        state: &mut RunState,
    ) -> Option<CompressionStats> {
        let compression = &self.settings.compression;
        let original_bytes = match file_size(&paths.archive) {
            Ok(bytes) => bytes,
            Err(err) => {
                reporter.report(Event::error(format!(
                    "Cannot compress {vm}: {} is unreadable: {err}",
                    paths.archive.display()
                )));
                state.record_error();
                return None;
            }
        };

        reporter.report(Event::CompressionStarted {
            path: paths.archive.clone(),
            program: compression.program.clone(),
        });
        let request = CommandRequest::new(&compression.program, compression.timeout)
            .args(compression.arguments.iter().cloned())
            .arg(paths.archive.display().to_string());
        let started = Instant::now();
        let outcome = self.runner.run(&request);
        let elapsed = started.elapsed();
        if !outcome.success() {
            reporter.report(Event::error(format!(
                "Compressing {vm} failed: {}",
                outcome.failure_detail()
            )));
            state.record_error();
            return None;
        }

        let compressed_bytes = match file_size(&paths.artifact) {
            Ok(bytes) => bytes,
            Err(err) => {
                reporter.report(Event::error(format!(
                    "Compressed artifact {} is unreadable: {err}",
                    paths.artifact.display()
                )));
                state.record_error();
                return None;
            }
        };

        let stats = CompressionStats {
            original_bytes,
            compressed_bytes,
            elapsed,
        };
        reporter.report(Event::Compressed {
            vm: vm.to_string(),
            original_bytes,
            compressed_bytes,
            elapsed,
        });
        Some(stats)
    }

    /// Copy the artifact to every destination at once. Reports come back over a channel and
    /// are forwarded from this thread; counters are left to the caller.
    fn distribute(
        &self,
        vm: &str,
        slot: u32,
        artifact: &Path,
        reporter: &mut dyn Reporter,
    ) -> Vec<TransferReport> {
        let transfer = &self.settings.transfer;
        let extension = &self.settings.compression.extension;
        let runner = self.runner;
        let (report_tx, report_rx) = mpsc::channel::<TransferReport>();
        let mut reports = Vec::with_capacity(transfer.destinations.len());

        thread::scope(|scope| {
            let mut handles = Vec::new();

            for (index, destination) in transfer.destinations.iter().enumerate() {
                let target = remote_target(destination, vm, slot, extension);
                let request = CommandRequest::new(&transfer.program, transfer.timeout)
                    .args(transfer.arguments.iter().cloned())
                    .arg(artifact.display().to_string())
                    .arg(target.clone());
                reporter.report(Event::TransferStarted {
                    source: artifact.to_path_buf(),
                    target: target.clone(),
                });

                let tx = report_tx.clone();
                handles.push(scope.spawn(move || {
                    let started = Instant::now();
                    let outcome = runner.run(&request);
                    let _ = tx.send(TransferReport {
                        index,
                        target,
                        outcome,
                        elapsed: started.elapsed(),
                    });
                }));
            }

            drop(report_tx);

            while let Ok(report) = report_rx.recv() {
                if report.succeeded() {
                    reporter.report(Event::TransferCompleted {
                        target: report.target.clone(),
                        elapsed: report.elapsed,
                    });
                } else {
                    reporter.report(Event::TransferFailed {
                        target: report.target.clone(),
                        reason: report.outcome.failure_detail(),
                        elapsed: report.elapsed,
                    });
                }
                reports.push(report);
            }

            for handle in handles {
                if let Err(payload) = handle.join() {
                    panic::resume_unwind(payload);
                }
            }
        });

        reports.sort_by_key(|report| report.index);
        reports
    }
}

fn file_size(path: &Path) -> io::Result<u64> {
    fs::metadata(path).map(|metadata| metadata.len())
}

fn remove_leftover(path: &Path, reporter: &mut dyn Reporter, state: &mut RunState) {
    match fs::remove_file(path) {
        Ok(()) => reporter.report(Event::info(format!("Removed leftover {}", path.display()))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            reporter.report(Event::error(format!(
                "Failed to remove {}: {err}",
                path.display()
            )));
            state.record_error();
        }
    }
}
