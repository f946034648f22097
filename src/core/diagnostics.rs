use std::path::PathBuf;

/// Severity level attached to diagnostics and progress messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Informational message with no required action.
    Info,
    /// Something looked off but the run carries on unaffected.
    Warning,
    /// A per-VM step failed and was counted against the run.
    Error,
}

/// Structured diagnostic surfaced alongside operation outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// Optional path that the diagnostic refers to (configuration file, status file, etc.).
    pub path: Option<PathBuf>,
}

impl Diagnostic {
    pub fn new<S: Into<String>>(severity: Severity, message: S) -> Self {
        Self {
            severity,
            message: message.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }
}
