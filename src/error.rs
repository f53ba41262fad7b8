use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by the sync pipeline.
///
/// Every variant reaching the orchestrator is turned into a `Failed` job
/// state carrying `to_string()` as its message, except `Cancelled`.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("cannot probe {}: {reason}", .path.display())]
    Probe { path: PathBuf, reason: String },

    #[error("degenerate time-scale ratio: {0}")]
    DegenerateRatio(String),

    #[error("unsupported time-scale ratio {0}")]
    UnsupportedRatio(f64),

    #[error("failed to launch {program}: {source}")]
    ProcessLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{}", execution_message(.exit_code, .diagnostics))]
    ProcessExecution {
        exit_code: Option<i32>,
        diagnostics: String,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("a sync job is already running")]
    JobAlreadyRunning,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn probe(path: &Path, reason: impl Into<String>) -> Self {
        Self::Probe {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

fn execution_message(exit_code: &Option<i32>, diagnostics: &str) -> String {
    let status = match exit_code {
        Some(code) => format!("ffmpeg exited with code {}", code),
        None => "ffmpeg was terminated by a signal".to_string(),
    };
    if diagnostics.trim().is_empty() {
        status
    } else {
        format!("{}:\n{}", status, diagnostics.trim_end())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
