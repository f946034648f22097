use std::fmt;

/// Run-wide accumulators, owned by the control thread for the duration of one run.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    backups: u32,
    errors: u32,
    destinations: usize,
    completed: Vec<String>,
}

impl RunState {
    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    /// Book a finished backup pipeline. `destinations` is the configured destination count,
    /// not the number of transfers that succeeded.
    pub fn record_backup(&mut self, vm: &str, slot: u32, destinations: usize) {
        self.backups += 1;
        self.destinations = destinations;
        self.completed.push(format!("{vm}[{slot}]"));
    }

    pub fn errors(&self) -> u32 {
        self.errors
    }

    pub fn backups(&self) -> u32 {
        self.backups
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            backups: self.backups,
            destinations: self.destinations,
            errors: self.errors,
            completed: self.completed.clone(),
        }
    }
}

/// Final counters reported once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub backups: u32,
    pub destinations: usize,
    pub errors: u32,
    /// `<vm>[<slot>]` tokens in completion order.
    pub completed: Vec<String>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Completed {} backup{} to {} destination{} with {} error{} : {}",
            self.backups,
            plural(self.backups as usize),
            self.destinations,
            plural(self.destinations),
            self.errors,
            plural(self.errors as usize),
            self.completed.join(" ")
        )
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}
