use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

use super::events::Event;
use super::process::{CommandRequest, CommandRunner};
use super::reporter::Reporter;
use super::summary::RunState;

/// Power state as reported by the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerState {
    Running,
    Suspended,
    Stopped,
    Other(String),
}

impl PowerState {
    pub fn parse(token: &str) -> Self {
        match token.trim() {
            "running" => PowerState::Running,
            "suspended" => PowerState::Suspended,
            "stopped" => PowerState::Stopped,
            other => PowerState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PowerState::Running => "running",
            PowerState::Suspended => "suspended",
            PowerState::Stopped => "stopped",
            PowerState::Other(other) => other,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `prlctl list -a`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmListing {
    pub id: String,
    pub state: PowerState,
    pub name: String,
}

/// Hypervisor inventory for a single run, with a per-VM attribute cache.
pub struct VmInventory<'r> {
    runner: &'r dyn CommandRunner,
    prlctl: PathBuf,
    timeout: Duration,
    details: HashMap<String, Vec<String>>,
}

impl<'r> VmInventory<'r> {
    pub fn new(
        runner: &'r dyn CommandRunner,
        prlctl: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            prlctl: prlctl.into(),
            timeout,
            details: HashMap::new(),
        }
    }

    /// Enumerate every VM known to the hypervisor. Failure here is fatal for the run.
    pub fn list_all_vms(&self) -> Result<Vec<VmListing>> {
        let request = CommandRequest::new(&self.prlctl, self.timeout).args(["list", "-a"]);
        let outcome = self.runner.run(&request);
        if !outcome.success() {
            return Err(Error::InventoryFailed {
                command: request.display(),
                message: outcome.failure_detail(),
            });
        }
        Ok(parse_listing(outcome.stdout()))
    }

    /// Look up `key` in the VM's detail dump, querying the hypervisor at most once per VM.
    ///
    /// Returns an empty string when the key is absent or the query failed; a failed query
    /// is reported and counted, and is retried on the next lookup.
    pub fn attribute(
        &mut self,
        vm: &str,
        key: &str,
        reporter: &mut dyn Reporter,
        state: &mut RunState,
    ) -> String {
        if !self.details.contains_key(vm) {
            let request =
                CommandRequest::new(&self.prlctl, self.timeout).args(["list", "-i", vm]);
            let outcome = self.runner.run(&request);
            if !outcome.success() {
                reporter.report(Event::error(format!(
                    "Error getting details values from {vm}: {}",
                    outcome.failure_detail()
                )));
                state.record_error();
                return String::new();
            }
            let lines = outcome
                .stdout()
                .trim()
                .lines()
                .map(str::to_string)
                .collect();
            self.details.insert(vm.to_string(), lines);
        }

        self.details
            .get(vm)
            .and_then(|lines| lookup_attribute(lines, key))
            .unwrap_or_default()
    }
}

/// Parse the tabular `list -a` output. The VM name is the last column and may contain
/// spaces, so each row splits into at most four fields.
pub fn parse_listing(stdout: &str) -> Vec<VmListing> {
    stdout
        .trim()
        .lines()
        .filter(|line| !line.trim_end().ends_with("NAME"))
        .filter_map(|line| {
            let normalized = line.split_whitespace().collect::<Vec<_>>().join(" ");
            let mut fields = normalized.splitn(4, ' ');
            let id = fields.next()?;
            let status = fields.next()?;
            let _filler = fields.next()?;
            let name = fields.next()?;
            Some(VmListing {
                id: id.to_string(),
                state: PowerState::parse(status),
                name: name.to_string(),
            })
        })
        .collect()
}

/// Find `Key: value` among detail lines, comparing whitespace-normalized keys.
pub fn lookup_attribute(lines: &[String], key: &str) -> Option<String> {
    lines.iter().find_map(|line| {
        let normalized = line.split_whitespace().collect::<Vec<_>>().join(" ");
        let (name, value) = normalized.split_once(':')?;
        (name == key).then(|| value.trim().to_string())
    })
}

/// Extract the power state from `list -i -ostatus,id,name` output (`State: <state>`).
pub fn parse_state_line(stdout: &str) -> Option<PowerState> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("State"))
        .find_map(|line| line.split_whitespace().nth(1).map(PowerState::parse))
}

/// Convert a hypervisor uptime (`"<days> days HH:MM:SS"` or `"HH:MM:SS"`, optionally
/// followed by other text) into seconds. Returns `None` when no clock value is present or
/// the total does not fit in a `u64`.
pub fn parse_uptime(text: &str) -> Option<u64> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let (index, clock) = tokens
        .iter()
        .enumerate()
        .find_map(|(index, token)| parse_clock(token).map(|secs| (index, secs)))?;

    let days = match index.checked_sub(2).map(|start| &tokens[start..index]) {
        Some([count, unit]) if matches!(*unit, "days" | "day") => count.parse::<u64>().ok()?,
        _ => 0,
    };

    days.checked_mul(86_400)?.checked_add(clock)
}

fn parse_clock(token: &str) -> Option<u64> {
    let mut parts = token.split(':');
    let (hours, minutes, seconds) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let hours = digits(hours, 1)?;
    let minutes = digits(minutes, 2).filter(|m| *m < 60)?;
    let seconds = digits(seconds, 2).filter(|s| *s < 60)?;
    Some(hours * 3600 + minutes * 60 + seconds)
}

fn digits(field: &str, min_len: usize) -> Option<u64> {
    if field.len() < min_len || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}
