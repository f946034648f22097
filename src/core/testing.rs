//! In-memory [`CommandRunner`] doubles shared by the engine's unit tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::config::{
    ArchiveSettings, BackupSettings, CompressionSettings, HookTable, TransferSettings,
};

use super::inventory::PowerState;
use super::process::{CommandOutcome, CommandRequest, CommandRunner};

type Matcher = Box<dyn Fn(&CommandRequest) -> bool + Send + Sync>;
type Handler = Box<dyn Fn(&CommandRequest) -> CommandOutcome + Send + Sync>;

pub fn completed(exit_code: i32, stdout: &str, stderr: &str) -> CommandOutcome {
    CommandOutcome::Completed {
        exit_code,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

/// Settings wired to [`FakeHost`] program names, with scratch and status space under `root`.
pub fn testing_settings(root: &Path, destinations: &[&str]) -> BackupSettings {
    BackupSettings {
        file_path: root.join("vmbackup.toml"),
        prlctl: PathBuf::from("prlctl"),
        command_timeout: Duration::from_secs(5),
        hook_timeout: Duration::from_secs(5),
        status_directory: root.join("status"),
        scratch_directory: root.to_path_buf(),
        backup_rotations: 3,
        archive: ArchiveSettings {
            program: PathBuf::from("tar"),
            arguments: vec!["cf".to_string()],
            timeout: Duration::from_secs(5),
        },
        compression: CompressionSettings {
            program: PathBuf::from("gzip"),
            arguments: vec!["-f".to_string()],
            extension: "gz".to_string(),
            timeout: Duration::from_secs(5),
        },
        transfer: TransferSettings {
            program: PathBuf::from("scp"),
            arguments: Vec::new(),
            destinations: destinations.iter().map(|dest| dest.to_string()).collect(),
            timeout: Duration::from_secs(5),
        },
        hooks: HookTable::default(),
        warnings: Vec::new(),
    }
}

/// Runner answering from an ordered rule list; unmatched requests succeed silently.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<(Matcher, Handler)>,
    calls: Mutex<Vec<CommandRequest>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<M, H>(mut self, matcher: M, handler: H) -> Self
    where
        M: Fn(&CommandRequest) -> bool + Send + Sync + 'static,
        H: Fn(&CommandRequest) -> CommandOutcome + Send + Sync + 'static,
    {
        self.rules.push((Box::new(matcher), Box::new(handler)));
        self
    }

    pub fn on_args(self, args: &[&str], exit_code: i32, stdout: &str) -> Self {
        let expected: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        let stdout = stdout.to_string();
        let stderr = if exit_code == 0 { "" } else { "failed" };
        self.on(
            move |request| request.args == expected,
            move |_| completed(exit_code, &stdout, stderr),
        )
    }

    pub fn calls(&self) -> Vec<CommandRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, args: &[&str]) -> usize {
        self.calls()
            .iter()
            .filter(|request| request.args == args)
            .count()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, request: &CommandRequest) -> CommandOutcome {
        self.calls.lock().unwrap().push(request.clone());
        self.rules
            .iter()
            .find(|(matcher, _)| matcher(request))
            .map(|(_, handler)| handler(request))
            .unwrap_or_else(|| completed(0, "", ""))
    }
}

#[derive(Debug, Clone)]
pub struct FakeVm {
    pub id: String,
    pub name: String,
    pub state: PowerState,
    pub home: String,
    pub uptime: String,
}

#[derive(Debug, Default)]
struct FakeHostState {
    vms: Vec<FakeVm>,
    fail_archive: bool,
    fail_compression: bool,
    failing_destinations: Vec<String>,
    timing_out_destinations: Vec<String>,
    transfer_delay: Option<Duration>,
    copies: Vec<String>,
}

/// A simulated host: `prlctl`, `tar`, `gzip`, `scp` and `sh`, with just enough behaviour
/// for the pipeline to observe real files in the scratch directory.
#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<FakeHostState>,
    calls: Mutex<Vec<CommandRequest>>,
}

pub const FAKE_ARCHIVE_BYTES: usize = 4096;
pub const FAKE_COMPRESSED_BYTES: usize = 1024;

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vm(self, name: &str, state: PowerState, home: &str, uptime: &str) -> Self {
        {
            let mut host = self.state.lock().unwrap();
            let id = format!("{{0000-{:04}}}", host.vms.len() + 1);
            host.vms.push(FakeVm {
                id,
                name: name.to_string(),
                state,
                home: home.to_string(),
                uptime: uptime.to_string(),
            });
        }
        self
    }

    pub fn failing_archive(self) -> Self {
        self.state.lock().unwrap().fail_archive = true;
        self
    }

    pub fn failing_compression(self) -> Self {
        self.state.lock().unwrap().fail_compression = true;
        self
    }

    pub fn failing_destination(self, destination: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_destinations
            .push(destination.to_string());
        self
    }

    pub fn timing_out_destination(self, destination: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .timing_out_destinations
            .push(destination.to_string());
        self
    }

    /// Every transfer sleeps for `delay` before answering.
    pub fn slow_transfers(self, delay: Duration) -> Self {
        self.state.lock().unwrap().transfer_delay = Some(delay);
        self
    }

    pub fn set_uptime(&self, vm: &str, uptime: &str) {
        let mut host = self.state.lock().unwrap();
        if let Some(entry) = host.vms.iter_mut().find(|entry| entry.name == vm) {
            entry.uptime = uptime.to_string();
        }
    }

    pub fn state_of(&self, vm: &str) -> Option<PowerState> {
        let host = self.state.lock().unwrap();
        host.vms
            .iter()
            .find(|entry| entry.name == vm)
            .map(|entry| entry.state.clone())
    }

    pub fn copies(&self) -> Vec<String> {
        let mut copies = self.state.lock().unwrap().copies.clone();
        copies.sort();
        copies
    }

    pub fn calls(&self) -> Vec<CommandRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Compact `program arg…` strings for the calls made so far, for ordering assertions.
    pub fn call_log(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|request| {
                let mut parts = vec![program_name(&request.program).to_string()];
                parts.extend(request.args.iter().cloned());
                parts.join(" ")
            })
            .collect()
    }

    fn prlctl(&self, args: &[String]) -> CommandOutcome {
        let mut host = self.state.lock().unwrap();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["list", "-a"] => {
                let mut stdout = String::from("UUID                STATUS       IP_ADDR   NAME\n");
                for vm in &host.vms {
                    stdout.push_str(&format!("{}   {}   -   {}\n", vm.id, vm.state, vm.name));
                }
                completed(0, &stdout, "")
            }
            ["list", "-i", "-ostatus,id,name", name] => match find_vm(&host.vms, name) {
                Some(vm) => completed(
                    0,
                    &format!("ID: {}\nName: {}\nState: {}\n", vm.id, vm.name, vm.state),
                    "",
                ),
                None => missing_vm(),
            },
            ["list", "-i", name] => match find_vm(&host.vms, name) {
                Some(vm) => completed(
                    0,
                    &format!(
                        "ID: {}\nName: {}\nState: {}\nHome: {}\nUptime: {}\n",
                        vm.id, vm.name, vm.state, vm.home, vm.uptime
                    ),
                    "",
                ),
                None => missing_vm(),
            },
            [verb @ ("suspend" | "resume"), name] => {
                let target = if *verb == "suspend" {
                    PowerState::Suspended
                } else {
                    PowerState::Running
                };
                match host.vms.iter_mut().find(|vm| vm.name == *name) {
                    Some(vm) => {
                        vm.state = target;
                        completed(0, "", "")
                    }
                    None => missing_vm(),
                }
            }
            _ => completed(255, "", "unsupported prlctl invocation"),
        }
    }

    fn tar(&self, args: &[String]) -> CommandOutcome {
        if self.state.lock().unwrap().fail_archive {
            return completed(2, "", "tar: Cannot open: Permission denied");
        }
        let Some(archive) = args.get(args.len().saturating_sub(2)) else {
            return completed(2, "", "tar: missing operands");
        };
        match fs::write(archive, vec![0u8; FAKE_ARCHIVE_BYTES]) {
            Ok(()) => completed(0, "", ""),
            Err(err) => completed(2, "", &err.to_string()),
        }
    }

    fn gzip(&self, args: &[String]) -> CommandOutcome {
        if self.state.lock().unwrap().fail_compression {
            return completed(1, "", "gzip: No space left on device");
        }
        let Some(input) = args.last().map(PathBuf::from) else {
            return completed(1, "", "gzip: missing operand");
        };
        if !input.exists() {
            return completed(1, "", "gzip: No such file or directory");
        }
        let output = PathBuf::from(format!("{}.gz", input.display()));
        let written = fs::write(&output, vec![1u8; FAKE_COMPRESSED_BYTES])
            .and_then(|()| fs::remove_file(&input));
        match written {
            Ok(()) => completed(0, "", ""),
            Err(err) => completed(1, "", &err.to_string()),
        }
    }

    fn scp(&self, request: &CommandRequest) -> CommandOutcome {
        let Some(target) = request.args.last() else {
            return completed(1, "", "usage: scp source target");
        };
        let delay = self.state.lock().unwrap().transfer_delay;
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        let mut host = self.state.lock().unwrap();
        if host
            .timing_out_destinations
            .iter()
            .any(|dest| target.starts_with(dest.as_str()))
        {
            return CommandOutcome::TimedOut {
                after: request.timeout,
            };
        }
        if host
            .failing_destinations
            .iter()
            .any(|dest| target.starts_with(dest.as_str()))
        {
            return completed(1, "", "ssh: connect to host: Connection refused");
        }
        host.copies.push(target.clone());
        completed(0, "", "")
    }
}

impl CommandRunner for FakeHost {
    fn run(&self, request: &CommandRequest) -> CommandOutcome {
        self.calls.lock().unwrap().push(request.clone());
        match program_name(&request.program) {
            "prlctl" => self.prlctl(&request.args),
            "tar" => self.tar(&request.args),
            "gzip" => self.gzip(&request.args),
            "scp" => self.scp(request),
            "sh" => completed(0, "", ""),
            other => CommandOutcome::LaunchFailed {
                reason: format!("Command `{other}` not found"),
            },
        }
    }
}

fn program_name(program: &Path) -> &str {
    program
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
}

fn find_vm<'a>(vms: &'a [FakeVm], name: &str) -> Option<&'a FakeVm> {
    vms.iter().find(|vm| vm.name == name)
}

fn missing_vm() -> CommandOutcome {
    completed(
        255,
        "",
        "Failed to get VM config: The virtual machine could not be found.",
    )
}
