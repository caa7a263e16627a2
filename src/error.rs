//! Error Types
//!
//! A single error enum covers every fatal condition a workflow run can hit.
//! Non-fatal conditions (invalid artifacts, cases that cannot be synced) are
//! reported through status values instead of errors.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// A single external process that exited unsuccessfully.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessFailure {
    /// Human readable label (`step:phase`)
    pub label: String,
    /// Case directory the process ran in, if any
    pub case_dir: Option<PathBuf>,
    /// Exit code, `None` when terminated by a signal
    pub exit_code: Option<i32>,
}

impl fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)?;
        if let Some(dir) = &self.case_dir {
            write!(f, " in {}", dir.display())?;
        }
        match self.exit_code {
            Some(code) => write!(f, " (exit code {})", code),
            None => write!(f, " (terminated by signal)"),
        }
    }
}

/// Fatal workflow errors.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Malformed workflow document, unknown component class, bad hierarchy.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Interpreter or solver executable could not be found.
    #[error("executable '{0}' was not found")]
    MissingExecutable(String),

    /// Executable exists but is not executable by the current user.
    #[error("executable '{0}' does not have execute permissions")]
    Permission(String),

    /// One or more external processes failed.
    #[error("{} process(es) failed: {}", .0.len(), join_failures(.0))]
    SubprocessFailure(Vec<ProcessFailure>),

    /// Filesystem failure with the path involved.
    #[error("I/O error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Accumulator bundle is malformed or inconsistent.
    #[error("accumulator error: {0}")]
    Accumulator(String),
}

impl WorkflowError {
    /// Wraps an I/O error with the path that caused it.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Shorthand for a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

fn join_failures(failures: &[ProcessFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
