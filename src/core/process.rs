//! Bounded execution of external commands.
//!
//! Every tool the backup engine drives (the hypervisor CLI, the archiver, the compressor,
//! the transport and user hooks) goes through [`CommandRunner`]. Runners never fail: launch
//! errors and timeouts come back as [`CommandOutcome`] variants and the call site decides
//! whether they count against the run.

use std::fmt::Write as _;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A single external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
}

impl CommandRequest {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Shell-like rendering used in log lines.
    pub fn display(&self) -> String {
        let mut rendered = self.program.display().to_string();
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                let _ = write!(rendered, " '{arg}'");
            } else {
                let _ = write!(rendered, " {arg}");
            }
        }
        rendered
    }
}

/// Result of running a [`CommandRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The process exited on its own.
    Completed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    /// The process outlived its timeout and was terminated.
    TimedOut { after: Duration },
    /// The process could not be started.
    LaunchFailed { reason: String },
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        matches!(self, CommandOutcome::Completed { exit_code: 0, .. })
    }

    /// Captured stdout; empty unless the process completed.
    pub fn stdout(&self) -> &str {
        match self {
            CommandOutcome::Completed { stdout, .. } => stdout,
            _ => "",
        }
    }

    /// Short explanation of why the command did not succeed.
    pub fn failure_detail(&self) -> String {
        match self {
            CommandOutcome::Completed {
                exit_code, stderr, ..
            } => {
                let stderr = stderr.trim();
                if stderr.is_empty() {
                    format!("exit code {exit_code}")
                } else {
                    format!("{stderr} (exit code {exit_code})")
                }
            }
            CommandOutcome::TimedOut { after } => {
                format!("Command timeout after {}s", after.as_secs())
            }
            CommandOutcome::LaunchFailed { reason } => reason.clone(),
        }
    }
}

/// Executes external commands on behalf of the backup engine.
///
/// Implementations are shared across the concurrent transfer threads, hence `Sync`.
pub trait CommandRunner: Sync {
    fn run(&self, request: &CommandRequest) -> CommandOutcome;
}

/// [`CommandRunner`] backed by real child processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    poll_interval: Duration,
    term_grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            term_grace: Duration::from_secs(5),
        }
    }
}

impl ProcessRunner {
    /// Override how long a timed-out child gets between SIGTERM and SIGKILL.
    pub fn with_term_grace(mut self, grace: Duration) -> Self {
        self.term_grace = grace;
        self
    }

    fn spawn(request: &CommandRequest) -> io::Result<Child> {
        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &request.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so a timeout reaches whatever the child spawned.
            command.process_group(0);
        }
        command.spawn()
    }

    /// SIGTERM the child's process group, wait out the grace period, then SIGKILL it.
    fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        {
            let group = -(child.id() as libc::pid_t);
            let res = unsafe { libc::kill(group, libc::SIGTERM) };
            if res == 0 {
                let deadline = Instant::now() + self.term_grace;
                while Instant::now() < deadline {
                    if matches!(child.try_wait(), Ok(Some(_))) {
                        break;
                    }
                    thread::sleep(self.poll_interval);
                }
            }
            unsafe {
                libc::kill(group, libc::SIGKILL);
            }
        }
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, request: &CommandRequest) -> CommandOutcome {
        let mut child = match Self::spawn(request) {
            Ok(child) => child,
            Err(err) => {
                return CommandOutcome::LaunchFailed {
                    reason: launch_failure_reason(&request.program, &err),
                };
            }
        };

        let stdout = child.stdout.take().map(drain_pipe);
        let stderr = child.stderr.take().map(drain_pipe);

        let deadline = Instant::now() + request.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(err) => {
                    self.terminate(&mut child);
                    return CommandOutcome::LaunchFailed {
                        reason: format!(
                            "Failed to wait for `{}`: {err}",
                            request.program.display()
                        ),
                    };
                }
            }
            if Instant::now() >= deadline {
                self.terminate(&mut child);
                return CommandOutcome::TimedOut {
                    after: request.timeout,
                };
            }
            thread::sleep(self.poll_interval);
        };

        CommandOutcome::Completed {
            exit_code: status.code().unwrap_or(-1),
            stdout: join_pipe(stdout),
            stderr: join_pipe(stderr),
        }
    }
}

fn drain_pipe<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer);
        buffer
    })
}

fn join_pipe(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn launch_failure_reason(program: &Path, err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => format!("Command `{}` not found", program.display()),
        io::ErrorKind::PermissionDenied => {
            format!("Permission denied executing `{}`", program.display())
        }
        _ => format!("Failed to execute `{}`: {err}", program.display()),
    }
}
