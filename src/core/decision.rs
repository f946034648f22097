//! Backup due-ness and rotation bookkeeping.

use std::fs;
use std::io;
use std::path::PathBuf;

/// Extension of the per-VM status files.
pub const RECORD_EXTENSION: &str = "last";

/// Persisted state of the last backup of one VM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupRecord {
    pub slot: u32,
    pub uptime: u64,
}

impl BackupRecord {
    /// Parse `"<slot> <uptime>"` from the first line of a status file.
    pub fn parse(contents: &str) -> Option<Self> {
        let line = contents.lines().next()?;
        let mut fields = line.split_whitespace();
        let slot = fields.next()?.parse().ok()?;
        let uptime = fields.next()?.parse().ok()?;
        Some(Self { slot, uptime })
    }

    pub fn to_line(self) -> String {
        format!("{} {}\n", self.slot, self.uptime)
    }
}

/// Outcome of evaluating one VM against its last record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub due: bool,
    pub next_slot: u32,
    pub effective_last_uptime: u64,
    pub uptime: u64,
    /// The recorded uptime exceeded the live one and was treated as zero.
    pub stale: bool,
}

pub fn decide(record: BackupRecord, current_uptime: u64, rotations: u32) -> Decision {
    let uptime = current_uptime.max(1);
    let stale = uptime < record.uptime;
    let effective_last_uptime = if stale { 0 } else { record.uptime };
    Decision {
        due: uptime > effective_last_uptime,
        next_slot: next_slot(record.slot, rotations),
        effective_last_uptime,
        uptime,
        stale,
    }
}

/// Advance a rotation slot, wrapping to 0 once it passes `rotations`.
pub fn next_slot(slot: u32, rotations: u32) -> u32 {
    match slot.checked_add(1) {
        Some(next) if next <= rotations => next,
        _ => 0,
    }
}

/// Status files under a single directory, one per VM.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, vm: &str) -> PathBuf {
        self.dir.join(format!("{vm}.{RECORD_EXTENSION}"))
    }

    /// Load the record for `vm`. The error string explains why a zero record applies.
    pub fn load(&self, vm: &str) -> Result<BackupRecord, String> {
        let path = self.path_for(vm);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(format!("{} does not exist", path.display()));
            }
            Err(err) => return Err(format!("{} is unreadable: {err}", path.display())),
        };
        BackupRecord::parse(&contents).ok_or_else(|| format!("{} is malformed", path.display()))
    }

    pub fn save(&self, vm: &str, record: BackupRecord) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(vm);
        fs::write(&path, record.to_line())?;
        Ok(path)
    }
}
