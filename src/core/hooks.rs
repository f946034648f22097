use std::path::PathBuf;
use std::time::Duration;

use crate::config::{HookKind, HookTable};

use super::events::Event;
use super::process::{CommandRequest, CommandRunner};
use super::reporter::Reporter;
use super::summary::RunState;

/// Shell used to execute hook lines.
pub const HOOK_SHELL: &str = "/bin/sh";

/// One non-blank hook line, classified by its prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDirective {
    /// `+text`: echoed to the log, never executed.
    Announce(String),
    /// `-cmd`: executed without echoing the command.
    Silent(String),
    /// Any other line: echoed, then executed.
    Logged(String),
}

pub fn parse_hook_lines(lines: &[String]) -> Vec<HookDirective> {
    lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(|line| {
            if let Some(text) = line.strip_prefix('+') {
                HookDirective::Announce(text.trim().to_string())
            } else if let Some(command) = line.strip_prefix('-') {
                HookDirective::Silent(command.trim().to_string())
            } else {
                HookDirective::Logged(line.to_string())
            }
        })
        .collect()
}

/// Runs the configured hook sections through a [`CommandRunner`].
pub struct HookRunner<'a> {
    runner: &'a dyn CommandRunner,
    hooks: &'a HookTable,
    timeout: Duration,
}

impl<'a> HookRunner<'a> {
    pub fn new(runner: &'a dyn CommandRunner, hooks: &'a HookTable, timeout: Duration) -> Self {
        Self {
            runner,
            hooks,
            timeout,
        }
    }

    /// Execute every directive of `section`/`kind` in order. Failures are reported and
    /// counted; later lines still run.
    pub fn run(
        &self,
        section: &str,
        kind: HookKind,
        reporter: &mut dyn Reporter,
        state: &mut RunState,
    ) {
        for directive in parse_hook_lines(self.hooks.lines(section, kind)) {
            let command = match directive {
                HookDirective::Announce(text) => {
                    reporter.report(Event::HookLine {
                        section: section.to_string(),
                        kind,
                        line: text,
                    });
                    continue;
                }
                HookDirective::Silent(command) => command,
                HookDirective::Logged(command) => {
                    reporter.report(Event::HookLine {
                        section: section.to_string(),
                        kind,
                        line: command.clone(),
                    });
                    command
                }
            };
            if command.is_empty() {
                continue;
            }

            let request = CommandRequest::new(HOOK_SHELL, self.timeout)
                .arg("-c")
                .arg(command.as_str())
                .current_dir(PathBuf::from("/"));
            let outcome = self.runner.run(&request);
            let stdout = outcome.stdout().trim();
            if !stdout.is_empty() {
                reporter.report(Event::info(stdout));
            }
            if !outcome.success() {
                reporter.report(Event::warning(format!(
                    "{} hook for {section} failed running `{command}`: {}",
                    kind.label(),
                    outcome.failure_detail()
                )));
                state.record_error();
            }
        }
    }
}
