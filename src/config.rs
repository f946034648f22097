use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_PRLCTL: &str = "/usr/local/bin/prlctl";
pub const DEFAULT_TAR: &str = "/usr/bin/tar";
pub const DEFAULT_COMPRESS_PROGRAM: &str = "/usr/bin/gzip";
pub const DEFAULT_TRANSFER_PROGRAM: &str = "scp";
pub const DEFAULT_BACKUP_ROTATIONS: u32 = 3;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_ARCHIVE_TIMEOUT_SECS: u64 = 1200;
pub const DEFAULT_HOOK_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_COMPRESS_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_TRANSFER_TIMEOUT_SECS: u64 = 7200;

/// Hook section consulted for run-wide hooks (`BeforeBackup`, `AfterBackup`).
pub const GLOBAL_HOOK_SECTION: &str = "main";

/// Validated backup configuration.
#[derive(Debug, Clone)]
pub struct BackupSettings {
    pub file_path: PathBuf,
    pub prlctl: PathBuf,
    pub command_timeout: Duration,
    pub hook_timeout: Duration,
    pub status_directory: PathBuf,
    pub scratch_directory: PathBuf,
    pub backup_rotations: u32,
    pub archive: ArchiveSettings,
    pub compression: CompressionSettings,
    pub transfer: TransferSettings,
    pub hooks: HookTable,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ArchiveSettings {
    pub program: PathBuf,
    pub arguments: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CompressionSettings {
    pub program: PathBuf,
    pub arguments: Vec<String>,
    pub extension: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub program: PathBuf,
    pub arguments: Vec<String>,
    pub destinations: Vec<String>,
    pub timeout: Duration,
}

/// Named pipeline points at which user hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HookKind {
    BeforeSuspend,
    AfterResume,
    BeforeBackup,
    AfterBackup,
}

impl HookKind {
    pub const ALL: [HookKind; 4] = [
        HookKind::BeforeSuspend,
        HookKind::AfterResume,
        HookKind::BeforeBackup,
        HookKind::AfterBackup,
    ];

    /// Key used for the hook body inside a `[hooks.<section>]` table.
    pub fn label(self) -> &'static str {
        match self {
            HookKind::BeforeSuspend => "BeforeSuspend",
            HookKind::AfterResume => "AfterResume",
            HookKind::BeforeBackup => "BeforeBackup",
            HookKind::AfterBackup => "AfterBackup",
        }
    }

    fn snake_label(self) -> &'static str {
        match self {
            HookKind::BeforeSuspend => "before_suspend",
            HookKind::AfterResume => "after_resume",
            HookKind::BeforeBackup => "before_backup",
            HookKind::AfterBackup => "after_backup",
        }
    }
}

/// Raw hook lines keyed by section (VM name or [`GLOBAL_HOOK_SECTION`]) and hook kind.
#[derive(Debug, Clone, Default)]
pub struct HookTable {
    sections: BTreeMap<String, BTreeMap<HookKind, Vec<String>>>,
}

impl HookTable {
    pub fn lines(&self, section: &str, kind: HookKind) -> &[String] {
        self.sections
            .get(section)
            .and_then(|hooks| hooks.get(&kind))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn insert(&mut self, section: impl Into<String>, kind: HookKind, lines: Vec<String>) {
        self.sections
            .entry(section.into())
            .or_default()
            .insert(kind, lines);
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

pub fn load_backup_config(path: &Path) -> Result<BackupSettings> {
    let contents = fs::read_to_string(path).map_err(|source| Error::ReadConfig {
        path: path.to_path_buf(),
        source,
    })?;

    let value: toml::Value = toml::from_str(&contents).map_err(|source| Error::ParseConfig {
        path: path.to_path_buf(),
        source,
    })?;

    let mut warnings = detect_unknown_fields(&value);

    let raw = RawConfig::deserialize(value).map_err(|source| Error::ParseConfig {
        path: path.to_path_buf(),
        source,
    })?;

    raw.into_validated(path, &mut warnings)
}

fn invalid_config(path: &Path, message: impl Into<String>) -> Error {
    Error::InvalidConfig {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

const MAIN_KEYS: &[&str] = &[
    "prlctl",
    "tar",
    "archive_arguments",
    "archive_timeout_secs",
    "command_timeout_secs",
    "hook_timeout_secs",
    "status_directory",
    "StatusDirectory",
    "scratch_directory",
    "backup_rotations",
    "backupRotations",
];

fn detect_unknown_fields(value: &toml::Value) -> Vec<String> {
    let mut warnings = Vec::new();
    let allowed_root = ["main", "transfer", "scp", "compression", "hooks"];

    let toml::Value::Table(table) = value else {
        return warnings;
    };
    warn_table(table, &allowed_root, "root", &mut warnings);

    if let Some(main) = table.get("main") {
        if let toml::Value::Table(main_table) = main {
            warn_table(main_table, MAIN_KEYS, "[main]", &mut warnings);
        } else {
            warnings.push("Expected [main] to be a table.".to_string());
        }
    }

    for name in ["transfer", "scp"] {
        if let Some(transfer) = table.get(name) {
            if let toml::Value::Table(transfer_table) = transfer {
                warn_table(
                    transfer_table,
                    &["program", "arguments", "destinations", "timeout", "timeout_secs"],
                    &format!("[{name}]"),
                    &mut warnings,
                );
            } else {
                warnings.push(format!("Expected [{name}] to be a table."));
            }
        }
    }

    if let Some(compression) = table.get("compression") {
        if let toml::Value::Table(compression_table) = compression {
            warn_table(
                compression_table,
                &[
                    "program",
                    "arguments",
                    "extension",
                    "compressedExtension",
                    "timeout",
                    "timeout_secs",
                ],
                "[compression]",
                &mut warnings,
            );
        } else {
            warnings.push("Expected [compression] to be a table.".to_string());
        }
    }

    if let Some(hooks) = table.get("hooks") {
        if let toml::Value::Table(hooks_table) = hooks {
            let allowed: Vec<&str> = HookKind::ALL
                .iter()
                .flat_map(|kind| [kind.label(), kind.snake_label()])
                .collect();
            for (section, body) in hooks_table {
                if let toml::Value::Table(section_table) = body {
                    warn_table(
                        section_table,
                        &allowed,
                        &format!("[hooks.\"{section}\"]"),
                        &mut warnings,
                    );
                } else {
                    warnings.push(format!("Expected [hooks.\"{section}\"] to be a table."));
                }
            }
        } else {
            warnings.push("Expected [hooks] to be a table.".to_string());
        }
    }

    warnings
}

fn warn_table(
    table: &toml::map::Map<String, toml::Value>,
    allowed: &[&str],
    context: &str,
    warnings: &mut Vec<String>,
) {
    for key in table.keys() {
        if !allowed.contains(&key.as_str()) {
            warnings.push(format!(
                "Unknown field `{key}` at {context}; this value will be ignored."
            ));
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    main: Option<RawMain>,
    #[serde(default, alias = "scp")]
    transfer: Option<RawTransfer>,
    #[serde(default)]
    compression: Option<RawCompression>,
    #[serde(default)]
    hooks: BTreeMap<String, RawHookSection>,
}

#[derive(Debug, Deserialize)]
struct RawMain {
    prlctl: Option<PathBuf>,
    tar: Option<PathBuf>,
    archive_arguments: Option<Vec<String>>,
    archive_timeout_secs: Option<u64>,
    command_timeout_secs: Option<u64>,
    hook_timeout_secs: Option<u64>,
    #[serde(alias = "StatusDirectory")]
    status_directory: Option<PathBuf>,
    scratch_directory: Option<PathBuf>,
    #[serde(alias = "backupRotations")]
    backup_rotations: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawTransfer {
    program: Option<PathBuf>,
    arguments: Option<Vec<String>>,
    #[serde(default)]
    destinations: Option<RawLines>,
    #[serde(alias = "timeout")]
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawCompression {
    program: Option<PathBuf>,
    arguments: Option<Vec<String>>,
    #[serde(alias = "compressedExtension")]
    extension: Option<String>,
    #[serde(alias = "timeout")]
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawHookSection {
    #[serde(rename = "BeforeSuspend", alias = "before_suspend")]
    before_suspend: Option<RawLines>,
    #[serde(rename = "AfterResume", alias = "after_resume")]
    after_resume: Option<RawLines>,
    #[serde(rename = "BeforeBackup", alias = "before_backup")]
    before_backup: Option<RawLines>,
    #[serde(rename = "AfterBackup", alias = "after_backup")]
    after_backup: Option<RawLines>,
}

/// A multi-line string or an explicit array of lines.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLines {
    Text(String),
    Lines(Vec<String>),
}

impl RawLines {
    fn into_lines(self) -> Vec<String> {
        match self {
            RawLines::Text(text) => text.lines().map(str::to_string).collect(),
            RawLines::Lines(lines) => lines,
        }
    }
}

impl RawConfig {
    fn into_validated(self, path: &Path, warnings: &mut Vec<String>) -> Result<BackupSettings> {
        let main = self.main.ok_or_else(|| {
            invalid_config(
                path,
                "Missing required table `[main]`. Example:\n\
                 [main]\n\
                 status_directory = \"/var/lib/vmbackup\"",
            )
        })?;

        let status_directory = main
            .status_directory
            .filter(|dir| !dir.as_os_str().is_empty())
            .ok_or_else(|| {
                invalid_config(
                    path,
                    "Missing required field `main.status_directory`. \
                     Example: `status_directory = \"/var/lib/vmbackup\"`.",
                )
            })?;

        let transfer = self.transfer.ok_or_else(|| {
            invalid_config(
                path,
                "Missing required table `[transfer]`. Example:\n\
                 [transfer]\n\
                 destinations = [\"nas:/backups/vms\"]",
            )
        })?;

        let destinations: Vec<String> = transfer
            .destinations
            .map(RawLines::into_lines)
            .unwrap_or_default()
            .into_iter()
            .map(|dest| dest.trim().trim_end_matches('/').to_string())
            .filter(|dest| !dest.is_empty())
            .collect();
        if destinations.is_empty() {
            return Err(invalid_config(
                path,
                "At least one entry in `transfer.destinations` is required. \
                 Example: `destinations = [\"nas:/backups/vms\"]`.",
            ));
        }

        let compression = self.compression.unwrap_or_default();
        let extension = compression.extension.unwrap_or_else(|| "gz".to_string());
        let extension = extension.trim().trim_start_matches('.').to_string();
        if extension.is_empty() {
            return Err(invalid_config(
                path,
                "`compression.extension` must not be empty. Example: `extension = \"gz\"`.",
            ));
        }

        let command_timeout = timeout(
            path,
            "main.command_timeout_secs",
            main.command_timeout_secs,
            DEFAULT_COMMAND_TIMEOUT_SECS,
        )?;
        let hook_timeout = timeout(
            path,
            "main.hook_timeout_secs",
            main.hook_timeout_secs,
            DEFAULT_HOOK_TIMEOUT_SECS,
        )?;
        let archive_timeout = timeout(
            path,
            "main.archive_timeout_secs",
            main.archive_timeout_secs,
            DEFAULT_ARCHIVE_TIMEOUT_SECS,
        )?;
        let compress_timeout = timeout(
            path,
            "compression.timeout_secs",
            compression.timeout_secs,
            DEFAULT_COMPRESS_TIMEOUT_SECS,
        )?;
        let transfer_timeout = timeout(
            path,
            "transfer.timeout_secs",
            transfer.timeout_secs,
            DEFAULT_TRANSFER_TIMEOUT_SECS,
        )?;

        let backup_rotations = main.backup_rotations.unwrap_or(DEFAULT_BACKUP_ROTATIONS);
        if backup_rotations == 0 {
            warnings.push(
                "`main.backup_rotations = 0` keeps a single backup slot per VM; \
                 every backup overwrites the previous one."
                    .to_string(),
            );
        }

        let mut hooks = HookTable::default();
        for (section, raw) in self.hooks {
            let bodies = [
                (HookKind::BeforeSuspend, raw.before_suspend),
                (HookKind::AfterResume, raw.after_resume),
                (HookKind::BeforeBackup, raw.before_backup),
                (HookKind::AfterBackup, raw.after_backup),
            ];
            for (kind, body) in bodies {
                if let Some(body) = body {
                    hooks.insert(section.clone(), kind, body.into_lines());
                }
            }
        }

        Ok(BackupSettings {
            file_path: path.to_path_buf(),
            prlctl: main.prlctl.unwrap_or_else(|| PathBuf::from(DEFAULT_PRLCTL)),
            command_timeout,
            hook_timeout,
            status_directory,
            scratch_directory: main.scratch_directory.unwrap_or_else(std::env::temp_dir),
            backup_rotations,
            archive: ArchiveSettings {
                program: main.tar.unwrap_or_else(|| PathBuf::from(DEFAULT_TAR)),
                arguments: main
                    .archive_arguments
                    .unwrap_or_else(|| vec!["cf".to_string()]),
                timeout: archive_timeout,
            },
            compression: CompressionSettings {
                program: compression
                    .program
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_COMPRESS_PROGRAM)),
                arguments: compression
                    .arguments
                    .unwrap_or_else(|| vec!["-f".to_string()]),
                extension,
                timeout: compress_timeout,
            },
            transfer: TransferSettings {
                program: transfer
                    .program
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_TRANSFER_PROGRAM)),
                arguments: transfer.arguments.unwrap_or_default(),
                destinations,
                timeout: transfer_timeout,
            },
            hooks,
            warnings: warnings.clone(),
        })
    }
}

fn timeout(path: &Path, field: &str, value: Option<u64>, default: u64) -> Result<Duration> {
    match value.unwrap_or(default) {
        0 => Err(invalid_config(
            path,
            format!("`{field}` must be at least one second."),
        )),
        secs => Ok(Duration::from_secs(secs)),
    }
}

pub(crate) fn user_home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
}
