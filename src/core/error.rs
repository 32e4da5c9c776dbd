use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HaccpError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Timed out after {waited_ms}ms waiting for lock on {}", .path.display())]
    LockTimeout { path: PathBuf, waited_ms: u64 },
    #[error("Log schema mismatch: expected [{expected}], found [{found}]")]
    SchemaMismatch { expected: String, found: String },
    #[error("Corrupt log entry at line {line}: {reason}")]
    CorruptLog { line: u64, reason: String },
    #[error("Submission rejected: {} rule(s) violated, nothing was recorded", .0.len())]
    Rejected(Vec<String>),
    #[error("Log verification found {issues} issue(s)")]
    AuditFailed { issues: usize },
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl HaccpError {
    /// Storage-side failures. The record was not persisted; the caller may
    /// confirm presence with a lookup and retry.
    pub fn is_io_failure(&self) -> bool {
        matches!(
            self,
            HaccpError::IoError(_)
                | HaccpError::CsvError(_)
                | HaccpError::LockTimeout { .. }
                | HaccpError::SchemaMismatch { .. }
                | HaccpError::CorruptLog { .. }
        )
    }
}

/// Degraded-mode report for the employee roster. Carried as a warning, never
/// returned as an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("employee roster {} unavailable: {reason}", .path.display())]
pub struct DirectoryUnavailable {
    pub path: PathBuf,
    pub reason: String,
}
