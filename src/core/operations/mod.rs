use crate::config::{BackupSettings, GLOBAL_HOOK_SECTION, HookKind};
use crate::error::Result;

use super::decision::{BackupRecord, RecordStore, decide};
use super::diagnostics::Diagnostic;
use super::events::Event;
use super::hooks::HookRunner;
use super::inventory::{PowerState, VmInventory, VmListing, parse_uptime};
use super::options::RunOptions;
use super::outcome::{OperationOutput, OperationResult, RunOutcome, VmRunOutcome};
use super::pipeline::BackupPipeline;
use super::power::PowerController;
use super::process::{CommandRunner, ProcessRunner};
use super::reporter::Reporter;
use super::settings::{SettingsLoad, load_settings};
use super::summary::RunState;

/// Load the configuration and back up every VM that accumulated uptime since its last backup.
///
/// Only configuration and inventory problems fail the run; everything that goes wrong for
/// an individual VM is reported as an event and counted in the summary.
pub fn run(
    options: RunOptions,
    reporter: Option<&mut dyn Reporter>,
) -> OperationResult<RunOutcome> {
    let SettingsLoad {
        settings,
        diagnostics,
    } = load_settings(&options.config)?;

    let runner = ProcessRunner::default();
    let mut events: Vec<Event> = Vec::new();
    let outcome = {
        let mut reporter = ReporterProxy::new(reporter, &mut events);
        execute(
            &settings,
            &runner,
            &options.version,
            &diagnostics,
            &mut reporter,
        )?
    };

    Ok(OperationOutput::new(outcome)
        .with_diagnostics(diagnostics)
        .with_events(events))
}

/// Run against already-loaded settings with a caller-provided [`CommandRunner`].
pub fn run_with_runner(
    settings: &BackupSettings,
    runner: &dyn CommandRunner,
    version: &str,
    reporter: Option<&mut dyn Reporter>,
) -> OperationResult<RunOutcome> {
    let mut events: Vec<Event> = Vec::new();
    let outcome = {
        let mut reporter = ReporterProxy::new(reporter, &mut events);
        execute(settings, runner, version, &[], &mut reporter)?
    };
    Ok(OperationOutput::new(outcome).with_events(events))
}

fn execute(
    settings: &BackupSettings,
    runner: &dyn CommandRunner,
    version: &str,
    diagnostics: &[Diagnostic],
    reporter: &mut dyn Reporter,
) -> Result<RunOutcome> {
    let mut state = RunState::default();
    reporter.report(Event::RunStarted {
        version: version.to_string(),
    });
    for diagnostic in diagnostics {
        reporter.report(Event::warning(diagnostic.message.clone()));
    }

    let hooks = HookRunner::new(runner, &settings.hooks, settings.hook_timeout);
    hooks.run(
        GLOBAL_HOOK_SECTION,
        HookKind::BeforeBackup,
        reporter,
        &mut state,
    );

    let mut engine = Engine {
        settings,
        inventory: VmInventory::new(runner, &settings.prlctl, settings.command_timeout),
        power: PowerController::new(runner, &hooks, &settings.prlctl, settings.command_timeout),
        pipeline: BackupPipeline::new(runner, settings),
        store: RecordStore::new(&settings.status_directory),
    };

    let listing = engine.inventory.list_all_vms()?;
    let vms = listing
        .into_iter()
        .map(|vm| engine.backup_vm(vm, reporter, &mut state))
        .collect();

    hooks.run(
        GLOBAL_HOOK_SECTION,
        HookKind::AfterBackup,
        reporter,
        &mut state,
    );

    let summary = state.summary();
    reporter.report(Event::RunCompleted {
        summary: summary.clone(),
    });

    Ok(RunOutcome {
        config_path: settings.file_path.clone(),
        summary,
        vms,
    })
}

struct Engine<'a> {
    settings: &'a BackupSettings,
    inventory: VmInventory<'a>,
    power: PowerController<'a>,
    pipeline: BackupPipeline<'a>,
    store: RecordStore,
}

impl Engine<'_> {
    fn backup_vm(
        &mut self,
        listing: VmListing,
        reporter: &mut dyn Reporter,
        state: &mut RunState,
    ) -> VmRunOutcome {
        let vm = listing.name.as_str();
        reporter.report(Event::VmDiscovered {
            vm: vm.to_string(),
            state: listing.state.clone(),
        });

        if listing.state == PowerState::Running {
            self.power.suspend(vm, reporter, state);
        }

        let home = self.inventory.attribute(vm, "Home", reporter, state);
        let uptime_text = self.inventory.attribute(vm, "Uptime", reporter, state);
        let uptime = parse_uptime(&uptime_text).unwrap_or_else(|| {
            reporter.report(Event::warning(format!(
                "Unrecognized uptime `{uptime_text}` for {vm}; treating it as 0"
            )));
            0
        });

        let record = self.store.load(vm).unwrap_or_else(|reason| {
            reporter.report(Event::info(format!(
                "No backup record for {vm} ({reason}); forcing a backup"
            )));
            BackupRecord::default()
        });

        let decision = decide(record, uptime, self.settings.backup_rotations);
        if decision.stale {
            reporter.report(Event::StaleRecordOverridden {
                vm: vm.to_string(),
                recorded_uptime: record.uptime,
                current_uptime: decision.uptime,
            });
        }
        reporter.report(Event::BackupDecided {
            vm: vm.to_string(),
            uptime: decision.uptime,
            last_uptime: decision.effective_last_uptime,
            home: home.clone(),
            last_slot: record.slot,
            due: decision.due,
        });

        let mut backup = None;
        let mut saved = None;
        if decision.due && home.is_empty() {
            reporter.report(Event::error(format!(
                "No home directory known for {vm}; skipping backup"
            )));
            state.record_error();
        } else if decision.due {
            backup = Some(self.pipeline.run(
                vm,
                &home,
                decision.next_slot,
                &mut self.power,
                reporter,
                state,
            ));

            let next = BackupRecord {
                slot: decision.next_slot,
                uptime: decision.uptime,
            };
            match self.store.save(vm, next) {
                Ok(_) => {
                    reporter.report(Event::RecordSaved {
                        vm: vm.to_string(),
                        slot: next.slot,
                        uptime: next.uptime,
                    });
                    saved = Some(next);
                }
                Err(err) => {
                    reporter.report(Event::error(format!(
                        "Failed to save backup record {}: {err}",
                        self.store.path_for(vm).display()
                    )));
                    state.record_error();
                }
            }
        }

        if self.power.suspended_by_run(vm) {
            self.power.resume(vm, reporter, state);
        }

        VmRunOutcome {
            name: listing.name.clone(),
            listed_state: listing.state,
            decision,
            backup,
            record: saved,
        }
    }
}

pub(super) struct ReporterProxy<'a, 'b> {
    delegate: Option<&'a mut dyn Reporter>,
    events: &'b mut Vec<Event>,
}

impl<'a, 'b> ReporterProxy<'a, 'b> {
    fn new(delegate: Option<&'a mut dyn Reporter>, events: &'b mut Vec<Event>) -> Self {
        Self { delegate, events }
    }

    fn emit(&mut self, event: Event) {
        self.events.push(event.clone());
        if let Some(reporter) = &mut self.delegate {
            reporter.report(event);
        }
    }
}

impl Reporter for ReporterProxy<'_, '_> {
    fn report(&mut self, event: Event) {
        self.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::core::options::ConfigSource;
    use crate::core::testing::{FakeHost, testing_settings};
    use crate::error::Error;

    fn run_once(settings: &BackupSettings, host: &FakeHost) -> OperationOutput<RunOutcome> {
        run_with_runner(settings, host, "test", None).unwrap()
    }

    #[test]
    fn first_run_backs_up_running_vm() {
        let root = tempfile::tempdir().unwrap();
        let settings = testing_settings(root.path(), &["nas:/a", "usb:/b"]);
        let host =
            FakeHost::new().with_vm("alpha", PowerState::Running, "/vms/alpha.pvm", "02:00:00");

        let output = run_once(&settings, &host);

        let log = host.call_log();
        let position = |p: &str| log.iter().position(|c| c.starts_with(p)).unwrap();
        assert!(position("prlctl suspend alpha") < position("tar "));
        assert!(position("tar ") < position("prlctl resume alpha"));
        assert!(position("prlctl resume alpha") < position("gzip "));
        assert!(position("gzip ") < position("scp "));

        assert_eq!(
            host.copies(),
            vec!["nas:/a/alpha.1.tar.gz", "usb:/b/alpha.1.tar.gz"]
        );
        assert!(!root.path().join("alpha.tar.gz").exists());
        assert_eq!(
            fs::read_to_string(settings.status_directory.join("alpha.last")).unwrap(),
            "1 7200\n"
        );
        assert_eq!(host.state_of("alpha"), Some(PowerState::Running));

        let summary = &output.value.summary;
        assert_eq!(summary.backups, 1);
        assert_eq!(summary.destinations, 2);
        assert_eq!(summary.errors, 0);
        assert_eq!(
            summary.to_string(),
            "Completed 1 backup to 2 destinations with 0 errors : alpha[1]"
        );
        let first = output.events.first().unwrap();
        let last = output.events.last().unwrap();
        assert!(matches!(first, Event::RunStarted { .. }));
        assert!(matches!(last, Event::RunCompleted { .. }));
    }

    #[test]
    fn second_run_with_lower_uptime_overrides_stale_record() {
        let root = tempfile::tempdir().unwrap();
        let settings = testing_settings(root.path(), &["nas:/a", "usb:/b"]);
        let host =
            FakeHost::new().with_vm("alpha", PowerState::Running, "/vms/alpha.pvm", "02:00:00");
        run_once(&settings, &host);

        host.set_uptime("alpha", "01:30:00");
        let output = run_once(&settings, &host);

        let overridden = output.events.iter().find_map(|event| match event {
            Event::StaleRecordOverridden {
                recorded_uptime,
                current_uptime,
                ..
            } => Some((*recorded_uptime, *current_uptime)),
            _ => None,
        });
        assert_eq!(overridden, Some((7200, 5400)));
        assert_eq!(
            fs::read_to_string(settings.status_directory.join("alpha.last")).unwrap(),
            "2 5400\n"
        );
        assert_eq!(output.value.summary.completed, vec!["alpha[2]"]);
    }

    #[test]
    fn unchanged_uptime_skips_backup_and_resumes() {
        let root = tempfile::tempdir().unwrap();
        let settings = testing_settings(root.path(), &["nas:/a"]);
        fs::create_dir_all(&settings.status_directory).unwrap();
        fs::write(settings.status_directory.join("alpha.last"), "1 7200\n").unwrap();
        let host =
            FakeHost::new().with_vm("alpha", PowerState::Running, "/vms/alpha.pvm", "02:00:00");

        let output = run_once(&settings, &host);

        let vm = &output.value.vms[0];
        assert!(!vm.decision.due);
        assert!(vm.backup.is_none());
        assert!(vm.record.is_none());
        assert_eq!(host.state_of("alpha"), Some(PowerState::Running));
        assert!(!host.call_log().iter().any(|call| call.starts_with("tar")));
        assert_eq!(
            fs::read_to_string(settings.status_directory.join("alpha.last")).unwrap(),
            "1 7200\n"
        );
        assert_eq!(
            output.value.summary.to_string(),
            "Completed 0 backups to 0 destinations with 0 errors : "
        );
    }

    #[test]
    fn stopped_vm_is_backed_up_without_power_changes() {
        let root = tempfile::tempdir().unwrap();
        let settings = testing_settings(root.path(), &["nas:/a"]);
        let host = FakeHost::new().with_vm(
            "Windows 11",
            PowerState::Stopped,
            "/vms/win.pvm",
            "5 days 03:04:05",
        );

        let output = run_once(&settings, &host);

        assert!(!host
            .call_log()
            .iter()
            .any(|call| call.contains("suspend") || call.contains("resume")));
        assert!(!host
            .call_log()
            .iter()
            .any(|call| call.contains("-ostatus,id,name")));
        assert_eq!(host.copies(), vec!["nas:/a/Windows 11.1.tar.gz"]);
        assert_eq!(
            fs::read_to_string(settings.status_directory.join("Windows 11.last")).unwrap(),
            "1 443045\n"
        );
        assert_eq!(output.value.summary.errors, 0);
    }

    #[test]
    fn failures_are_counted_without_failing_the_run() {
        let root = tempfile::tempdir().unwrap();
        let settings = testing_settings(root.path(), &["nas:/a", "bad:/b"]);
        let host = FakeHost::new()
            .with_vm("alpha", PowerState::Running, "/vms/alpha.pvm", "02:00:00")
            .with_vm("beta", PowerState::Running, "", "01:00:00")
            .failing_destination("bad:");

        let output = run_once(&settings, &host);

        let summary = &output.value.summary;
        assert_eq!(summary.backups, 1);
        assert_eq!(summary.errors, 2);
        assert_eq!(summary.completed, vec!["alpha[1]"]);
        assert_eq!(host.state_of("beta"), Some(PowerState::Running));
        assert!(!settings.status_directory.join("beta.last").exists());
        assert!(settings.status_directory.join("alpha.last").exists());
    }

    #[test]
    fn compression_failure_still_writes_record() {
        let root = tempfile::tempdir().unwrap();
        let settings = testing_settings(root.path(), &["nas:/a"]);
        let host = FakeHost::new()
            .with_vm("alpha", PowerState::Running, "/vms/alpha.pvm", "02:00:00")
            .failing_compression();

        let output = run_once(&settings, &host);

        assert_eq!(host.state_of("alpha"), Some(PowerState::Running));
        assert_eq!(output.value.summary.errors, 1);
        assert_eq!(output.value.summary.backups, 0);
        assert_eq!(
            fs::read_to_string(settings.status_directory.join("alpha.last")).unwrap(),
            "1 7200\n"
        );
    }

    #[test]
    fn malformed_uptime_parses_as_zero() {
        let root = tempfile::tempdir().unwrap();
        let settings = testing_settings(root.path(), &["nas:/a"]);
        fs::create_dir_all(&settings.status_directory).unwrap();
        fs::write(settings.status_directory.join("alpha.last"), "0 1\n").unwrap();
        let host = FakeHost::new().with_vm("alpha", PowerState::Stopped, "/vms/alpha.pvm", "soon");

        let output = run_once(&settings, &host);

        let vm = &output.value.vms[0];
        assert_eq!(vm.decision.uptime, 1);
        assert!(!vm.decision.due);
        assert!(output.events.iter().any(|event| matches!(
            event,
            Event::Message { text, .. } if text.contains("Unrecognized uptime")
        )));
    }

    #[test]
    fn malformed_uptime_against_stale_record_forces_backup() {
        let root = tempfile::tempdir().unwrap();
        let settings = testing_settings(root.path(), &["nas:/a"]);
        fs::create_dir_all(&settings.status_directory).unwrap();
        fs::write(settings.status_directory.join("alpha.last"), "0 7200\n").unwrap();
        let host = FakeHost::new().with_vm("alpha", PowerState::Stopped, "/vms/alpha.pvm", "soon");

        let output = run_once(&settings, &host);

        let vm = &output.value.vms[0];
        assert!(vm.decision.stale);
        assert!(vm.decision.due);
        assert_eq!(host.copies(), vec!["nas:/a/alpha.1.tar.gz"]);
        assert_eq!(
            fs::read_to_string(settings.status_directory.join("alpha.last")).unwrap(),
            "1 1\n"
        );
    }

    #[test]
    fn global_hooks_wrap_the_run() {
        let root = tempfile::tempdir().unwrap();
        let mut settings = testing_settings(root.path(), &["nas:/a"]);
        settings.hooks.insert(
            GLOBAL_HOOK_SECTION,
            HookKind::BeforeBackup,
            vec!["mount /backup".to_string()],
        );
        settings.hooks.insert(
            GLOBAL_HOOK_SECTION,
            HookKind::AfterBackup,
            vec!["umount /backup".to_string()],
        );
        let host =
            FakeHost::new().with_vm("alpha", PowerState::Stopped, "/vms/alpha.pvm", "00:10:00");

        run_once(&settings, &host);

        let log = host.call_log();
        assert_eq!(log.first().map(String::as_str), Some("sh -c mount /backup"));
        assert_eq!(log.last().map(String::as_str), Some("sh -c umount /backup"));
    }

    #[test]
    fn inventory_failure_aborts_the_run() {
        let root = tempfile::tempdir().unwrap();
        let mut settings = testing_settings(root.path(), &["nas:/a"]);
        settings.prlctl = "missing-prlctl".into();
        let host = FakeHost::new();

        let err = run_with_runner(&settings, &host, "test", None).unwrap_err();
        assert!(matches!(err, Error::InventoryFailed { .. }));
    }

    #[test]
    fn events_are_forwarded_to_the_delegate() {
        let root = tempfile::tempdir().unwrap();
        let settings = testing_settings(root.path(), &["nas:/a"]);
        let host =
            FakeHost::new().with_vm("alpha", PowerState::Stopped, "/vms/alpha.pvm", "00:10:00");
        let mut forwarded: Vec<Event> = Vec::new();

        let delegate: &mut dyn Reporter = &mut forwarded;
        let output = run_with_runner(&settings, &host, "test", Some(delegate)).unwrap();

        assert_eq!(forwarded.len(), output.events.len());
    }

    #[test]
    fn missing_explicit_config_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let options = RunOptions {
            config: ConfigSource::Explicit(dir.path().join("nope.toml")),
            ..RunOptions::default()
        };
        assert!(matches!(
            run(options, None),
            Err(Error::ExplicitConfigMissing { .. })
        ));
    }
}
