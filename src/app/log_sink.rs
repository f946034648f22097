use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use time::OffsetDateTime;
use time::macros::format_description;

use crate::core::diagnostics::Severity;
use crate::core::events::Event;
use crate::core::reporter::Reporter;
use crate::{Error, Result};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const RULE_WIDTH: usize = 72;

/// Timestamped line log for a run, written to stdout or appended to a file.
pub struct LogSink {
    writer: Box<dyn Write>,
    to_file: bool,
}

impl LogSink {
    pub fn stdout() -> Self {
        Self {
            writer: Box::new(io::stdout()),
            to_file: false,
        }
    }

    pub fn append_to(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| Error::OpenLog {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            writer: Box::new(file),
            to_file: true,
        })
    }

    pub fn is_file(&self) -> bool {
        self.to_file
    }

    pub fn write_line(&mut self, text: &str) {
        let _ = writeln!(self.writer, "{}: {text}", timestamp(local_now()));
        let _ = self.writer.flush();
    }
}

impl Reporter for LogSink {
    fn report(&mut self, event: Event) {
        for line in render_event(&event) {
            self.write_line(&line);
        }
    }
}

fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

pub fn timestamp(at: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    at.format(format)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// Log lines for one event, without timestamps.
pub fn render_event(event: &Event) -> Vec<String> {
    match event {
        Event::Message { severity, text } => vec![match severity {
            Severity::Info => text.clone(),
            Severity::Warning => format!("Warning: {text}"),
            Severity::Error => format!("Error: {text}"),
        }],
        Event::RunStarted { version } => vec![
            "=".repeat(RULE_WIDTH),
            format!("vmbackup {version} started"),
        ],
        Event::HookLine { line, .. } => vec![line.clone()],
        Event::VmDiscovered { vm, state } => vec![
            String::new(),
            format!("{vm} ({state})"),
            "-".repeat(vm.chars().count() + state.as_str().len() + 3),
        ],
        Event::VmSuspended { vm } => vec![format!("Suspended {vm}")],
        Event::VmResumed { vm } => vec![format!("Resumed {vm}")],
        Event::StaleRecordOverridden {
            vm,
            recorded_uptime,
            current_uptime,
        } => vec![format!(
            "Recorded uptime {recorded_uptime}s of {vm} is ahead of current uptime {current_uptime}s; starting over from 0"
        )],
        Event::BackupDecided {
            vm,
            uptime,
            last_uptime,
            home,
            last_slot,
            due,
        } => {
            let mut lines = vec![format!(
                "Uptime {uptime}s, last backup at {last_uptime}s in slot {last_slot}"
            )];
            if *due {
                lines.push(format!("Backing up {vm} from {home}"));
            } else {
                lines.push(format!("No backup needed for {vm}"));
            }
            lines
        }
        Event::ArchiveCreated { path, elapsed, .. } => vec![format!(
            "Archived to {} in {}",
            path.display(),
            seconds(*elapsed)
        )],
        Event::CompressionStarted { path, program } => vec![format!(
            "Compressing {} with {}",
            path.display(),
            program.display()
        )],
        Event::Compressed {
            original_bytes,
            compressed_bytes,
            elapsed,
            ..
        } => vec![
            compression_line(*original_bytes, *compressed_bytes),
            format!("Compression took {}", seconds(*elapsed)),
        ],
        Event::TransferStarted { source, target } => {
            vec![format!("Copying {} to {target}", source.display())]
        }
        Event::TransferCompleted { target, elapsed } => {
            vec![format!("Copied to {target} in {}", seconds(*elapsed))]
        }
        Event::TransferFailed {
            target,
            reason,
            elapsed,
        } => vec![format!(
            "Error: copy to {target} failed after {}: {reason}",
            seconds(*elapsed)
        )],
        Event::CopiesCompleted { vm, copies } => {
            vec![format!("{copies} copies of {vm} completed")]
        }
        Event::RecordSaved { vm, slot, uptime } => {
            vec![format!("Recorded slot {slot} at uptime {uptime}s for {vm}")]
        }
        Event::RunCompleted { summary } => vec![summary.to_string()],
    }
}

/// `Compressed from X.XXGb to Y.YYGb: Z.ZZ%`, sizes in GiB and the share retained.
pub fn compression_line(original_bytes: u64, compressed_bytes: u64) -> String {
    format!(
        "Compressed from {:.2}Gb to {:.2}Gb: {:.2}%",
        original_bytes as f64 / GIB,
        compressed_bytes as f64 / GIB,
        crate::core::outcome::retained_percent(original_bytes, compressed_bytes)
    )
}

fn seconds(elapsed: Duration) -> String {
    format!("{}s", elapsed.as_secs())
}
