use super::ratio::Rational;
use crate::error::{Result, SyncError};
use crate::ffmpeg::ProgressSample;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// How the audio timeline is rescaled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Pitch-preserving `atempo` chain.
    #[default]
    TimeStretch,
    /// `asetrate` + `aresample`; faster, but shifts pitch by the ratio.
    FastResample,
}

impl SyncMode {
    pub fn all() -> &'static [SyncMode] {
        &[SyncMode::TimeStretch, SyncMode::FastResample]
    }

    pub fn name(&self) -> &'static str {
        match self {
            SyncMode::TimeStretch => "Time-stretch (keep pitch)",
            SyncMode::FastResample => "Fast resample (pitch shift)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Probing,
    Building,
    Encoding,
    Stopping,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Cancelled)
    }

    /// States in which a cancel request is accepted.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, JobState::Probing | JobState::Building | JobState::Encoding)
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobState::Idle => "Ready",
            JobState::Probing => "Analyzing FPS and duration...",
            JobState::Building => "Building filter graph...",
            JobState::Encoding => "Encoding audio...",
            JobState::Stopping => "Stopping...",
            JobState::Succeeded => "Done",
            JobState::Failed => "Failed",
            JobState::Cancelled => "Cancelled",
        }
    }
}

/// Read-only snapshot handed to the UI shell.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub state: JobState,
    pub elapsed_seconds: f64,
    pub estimated_remaining_seconds: Option<f64>,
    pub progress: f32,
    /// Always present on `Failed`, never on `Cancelled`.
    pub message: Option<String>,
    pub output_path: Option<PathBuf>,
}

impl JobStatus {
    pub fn idle() -> Self {
        Self {
            state: JobState::Idle,
            elapsed_seconds: 0.0,
            estimated_remaining_seconds: None,
            progress: 0.0,
            message: None,
            output_path: None,
        }
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::idle()
    }
}

/// The single active run. Only the orchestrator writes to it.
#[derive(Debug, Clone)]
pub struct SyncJob {
    pub source_video_path: PathBuf,
    pub target_video_path: PathBuf,
    pub mode: SyncMode,
    pub state: JobState,
    pub scale_ratio: Option<Rational>,
    pub started_at: Instant,
    pub elapsed_seconds: f64,
    pub estimated_remaining_seconds: Option<f64>,
    pub progress: f32,
    pub output_path: Option<PathBuf>,
    pub failure: Option<String>,
}

impl SyncJob {
    pub fn new(source_video_path: PathBuf, target_video_path: PathBuf, mode: SyncMode) -> Self {
        Self {
            source_video_path,
            target_video_path,
            mode,
            state: JobState::Idle,
            scale_ratio: None,
            started_at: Instant::now(),
            elapsed_seconds: 0.0,
            estimated_remaining_seconds: None,
            progress: 0.0,
            output_path: None,
            failure: None,
        }
    }

    pub fn apply_progress(&mut self, sample: &ProgressSample) {
        self.elapsed_seconds = sample.elapsed_seconds;
        self.estimated_remaining_seconds = sample.estimated_remaining_seconds;
        self.progress = sample.fraction();
    }

    pub fn snapshot(&self) -> JobStatus {
        JobStatus {
            state: self.state,
            elapsed_seconds: self.elapsed_seconds,
            estimated_remaining_seconds: self.estimated_remaining_seconds,
            progress: self.progress,
            message: self.failure.clone(),
            output_path: self.output_path.clone(),
        }
    }

    pub fn description(&self) -> String {
        format!(
            "{} -> {} ({})",
            file_name(&self.source_video_path),
            file_name(&self.target_video_path),
            self.mode.name()
        )
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}

/// Both inputs must be existing, distinct files.
pub fn validate_inputs(source: &Path, target: &Path) -> Result<()> {
    for (label, path) in [("source", source), ("target", target)] {
        if path.as_os_str().is_empty() {
            return Err(SyncError::InvalidInput(format!("{} video is not set", label)));
        }
        if !path.is_file() {
            return Err(SyncError::InvalidInput(format!(
                "{} video {} does not exist",
                label,
                path.display()
            )));
        }
    }

    let same = match (source.canonicalize(), target.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => source == target,
    };
    if same {
        return Err(SyncError::InvalidInput(
            "source and target must be different files".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_classification() {
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(!JobState::Stopping.is_terminal());
        assert!(JobState::Encoding.is_cancellable());
        assert!(!JobState::Stopping.is_cancellable());
        assert!(!JobState::Idle.is_cancellable());
    }

    #[test]
    fn test_validate_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp4");
        let b = dir.path().join("b.mp4");
        std::fs::write(&a, b"x").unwrap();
        std::fs::write(&b, b"y").unwrap();

        assert!(validate_inputs(&a, &b).is_ok());
        assert!(matches!(validate_inputs(&a, &a), Err(SyncError::InvalidInput(_))));
        assert!(matches!(
            validate_inputs(&a, &dir.path().join("missing.mp4")),
            Err(SyncError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_inputs(Path::new(""), &b),
            Err(SyncError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_snapshot_carries_progress() {
        let mut job = SyncJob::new("a.mp4".into(), "b.mp4".into(), SyncMode::TimeStretch);
        job.state = JobState::Encoding;
        job.apply_progress(&ProgressSample::new(10.0, 25.0, 100.0, Some(2.5)));

        let status = job.snapshot();
        assert_eq!(status.state, JobState::Encoding);
        assert!((status.elapsed_seconds - 10.0).abs() < 1e-9);
        assert!((status.estimated_remaining_seconds.unwrap() - 30.0).abs() < 1e-9);
        assert!((status.progress - 0.25).abs() < 1e-6);
        assert!(status.message.is_none());
    }
}
