use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::HookKind;

use super::events::Event;
use super::hooks::HookRunner;
use super::inventory::{PowerState, parse_state_line};
use super::process::{CommandRequest, CommandRunner};
use super::reporter::Reporter;
use super::summary::RunState;

/// Suspends running VMs for the backup window and brings them back afterwards.
pub struct PowerController<'a> {
    runner: &'a dyn CommandRunner,
    hooks: &'a HookRunner<'a>,
    prlctl: PathBuf,
    timeout: Duration,
    suspended: HashSet<String>,
}

impl<'a> PowerController<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        hooks: &'a HookRunner<'a>,
        prlctl: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            hooks,
            prlctl: prlctl.into(),
            timeout,
            suspended: HashSet::new(),
        }
    }

    /// Query the live power state. `None` means the query failed; the failure has already
    /// been reported and counted.
    pub fn live_state(
        &self,
        vm: &str,
        reporter: &mut dyn Reporter,
        state: &mut RunState,
    ) -> Option<PowerState> {
        let request = self.command(["list", "-i", "-ostatus,id,name", vm]);
        let outcome = self.runner.run(&request);
        let parsed = outcome
            .success()
            .then(|| parse_state_line(outcome.stdout()))
            .flatten();
        if parsed.is_none() {
            reporter.report(Event::error(format!(
                "Error getting state of {vm}: {}",
                if outcome.success() {
                    "no State line in output".to_string()
                } else {
                    outcome.failure_detail()
                }
            )));
            state.record_error();
        }
        parsed
    }

    /// Suspend `vm` if it is running, running its `BeforeSuspend` hooks first.
    pub fn suspend(&mut self, vm: &str, reporter: &mut dyn Reporter, state: &mut RunState) {
        if self.live_state(vm, reporter, state) != Some(PowerState::Running) {
            return;
        }

        self.hooks.run(vm, HookKind::BeforeSuspend, reporter, state);

        let outcome = self.runner.run(&self.command(["suspend", vm]));
        if outcome.success() {
            self.suspended.insert(vm.to_string());
            reporter.report(Event::VmSuspended { vm: vm.to_string() });
        } else {
            reporter.report(Event::error(format!(
                "Failed to suspend {vm}: {}",
                outcome.failure_detail()
            )));
            state.record_error();
        }
    }

    /// Resume `vm` if it is suspended, then run its `AfterResume` hooks. A VM in any other
    /// state is left alone.
    pub fn resume(&mut self, vm: &str, reporter: &mut dyn Reporter, state: &mut RunState) {
        if self.live_state(vm, reporter, state) != Some(PowerState::Suspended) {
            return;
        }

        let outcome = self.runner.run(&self.command(["resume", vm]));
        if !outcome.success() {
            reporter.report(Event::error(format!(
                "Failed to resume {vm}: {}",
                outcome.failure_detail()
            )));
            state.record_error();
            return;
        }
        self.suspended.remove(vm);
        reporter.report(Event::VmResumed { vm: vm.to_string() });

        self.hooks.run(vm, HookKind::AfterResume, reporter, state);
    }

    /// Whether this run suspended `vm` and has not resumed it yet.
    pub fn suspended_by_run(&self, vm: &str) -> bool {
        self.suspended.contains(vm)
    }

    fn command<const N: usize>(&self, args: [&str; N]) -> CommandRequest {
        CommandRequest::new(&self.prlctl, self.timeout).args(args)
    }
}
