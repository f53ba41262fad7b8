use super::job::{validate_inputs, JobState, JobStatus, SyncJob, SyncMode};
use super::ratio::{compute_ratio, duration_ratio, Rational};
use super::settings::{EncodeSettings, RatioBasis};
use crate::error::{Result, SyncError};
use crate::ffmpeg::{
    output_path_for, EncodeCommand, EncodeOutcome, FFmpegWrapper, MediaProbeResult,
    ProcessSupervisor, ProgressSample, SupervisorEvent, SyncPlan, DEFAULT_GRACE_PERIOD,
};
use crate::utils::format_duration;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

/// What the UI shell renders.
#[derive(Debug, Clone)]
pub enum JobEvent {
    StateChanged {
        state: JobState,
        message: Option<String>,
    },
    Progress(ProgressSample),
    Log(String),
    /// Last event of a job.
    Finished(JobStatus),
}

/// Filled in by a background probe once ffprobe has answered.
pub type ProbeSlot = Arc<Mutex<Option<Result<MediaProbeResult>>>>;

/// Results produced by the background pipeline, applied on the control
/// thread by [`SyncOrchestrator::poll`].
#[derive(Debug)]
enum PipelineEvent {
    Stage(JobState),
    EncoderStarted,
    Probed {
        source: MediaProbeResult,
        target: MediaProbeResult,
    },
    Planned {
        ratio: Rational,
        output: PathBuf,
        command_line: String,
    },
    Progress(ProgressSample),
    Finished(EncodeOutcome),
}

impl From<SupervisorEvent> for PipelineEvent {
    fn from(event: SupervisorEvent) -> Self {
        match event {
            SupervisorEvent::Started => PipelineEvent::EncoderStarted,
            SupervisorEvent::Progress(sample) => PipelineEvent::Progress(sample),
            SupervisorEvent::Complete(outcome) => PipelineEvent::Finished(outcome),
        }
    }
}

struct PipelineRequest {
    ffmpeg: FFmpegWrapper,
    settings: EncodeSettings,
    source: PathBuf,
    target: PathBuf,
    mode: SyncMode,
}

/// Owns the single active [`SyncJob`] and drives it through
/// Probing, Building and Encoding on a background task.
///
/// All methods are called from one control thread. The background task
/// only sends values back; `poll()` applies them.
pub struct SyncOrchestrator {
    runtime: Runtime,
    ffmpeg: FFmpegWrapper,
    settings: EncodeSettings,
    grace_period: Duration,
    job: Option<SyncJob>,
    supervisor: Option<ProcessSupervisor>,
    pipeline: Option<Receiver<PipelineEvent>>,
    encode_started: bool,
    events_tx: Sender<JobEvent>,
    events_rx: Receiver<JobEvent>,
    last_status: JobStatus,
}

impl SyncOrchestrator {
    pub fn new(ffmpeg: FFmpegWrapper, settings: EncodeSettings) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("sync-pipeline")
            .enable_all()
            .build()?;
        let (events_tx, events_rx) = crossbeam_channel::unbounded();

        Ok(Self {
            runtime,
            ffmpeg,
            settings,
            grace_period: DEFAULT_GRACE_PERIOD,
            job: None,
            supervisor: None,
            pipeline: None,
            encode_started: false,
            events_tx,
            events_rx,
            last_status: JobStatus::idle(),
        })
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Settings are copied into each job when it starts.
    pub fn set_settings(&mut self, settings: EncodeSettings) {
        self.settings = settings;
    }

    pub fn settings(&self) -> &EncodeSettings {
        &self.settings
    }

    pub fn set_ffmpeg(&mut self, ffmpeg: FFmpegWrapper) {
        self.ffmpeg = ffmpeg;
    }

    pub fn ffmpeg(&self) -> &FFmpegWrapper {
        &self.ffmpeg
    }

    /// Probe `path` on the runtime and return at once. The result lands in
    /// the returned slot; the shell picks it up from its frame loop.
    pub fn spawn_probe(&self, path: PathBuf) -> ProbeSlot {
        let slot: ProbeSlot = Arc::new(Mutex::new(None));
        let result = slot.clone();
        let ffmpeg = self.ffmpeg.clone();
        self.runtime.spawn(async move {
            let probed = ffmpeg.probe(&path).await;
            *result.lock() = Some(probed);
        });
        slot
    }

    pub fn is_running(&self) -> bool {
        self.job.as_ref().map_or(false, |job| !job.state.is_terminal())
    }

    /// Stream of state transitions, progress and log lines. Receivers
    /// share one queue, so a single subscriber is expected.
    pub fn events(&self) -> Receiver<JobEvent> {
        self.events_rx.clone()
    }

    /// Snapshot of the active job, or of the last finished one.
    pub fn current_status(&self) -> JobStatus {
        match &self.job {
            Some(job) => job.snapshot(),
            None => self.last_status.clone(),
        }
    }

    pub fn start(
        &mut self,
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        mode: SyncMode,
    ) -> Result<()> {
        if self.is_running() {
            return Err(SyncError::JobAlreadyRunning);
        }

        let source = source.into();
        let target = target.into();
        validate_inputs(&source, &target)?;

        let job = SyncJob::new(source.clone(), target.clone(), mode);
        info!("Starting sync: {}", job.description());

        let supervisor = ProcessSupervisor::new(self.grace_period);
        let (tx, rx) = crossbeam_channel::unbounded();
        let request = PipelineRequest {
            ffmpeg: self.ffmpeg.clone(),
            settings: self.settings.clone(),
            source,
            target,
            mode,
        };

        self.job = Some(job);
        self.encode_started = false;
        self.supervisor = Some(supervisor.clone());
        self.pipeline = Some(rx);
        self.transition(JobState::Probing, None);

        self.runtime.spawn(run_pipeline(request, supervisor, tx));
        Ok(())
    }

    /// Stop the active job. Only acts in Probing, Building or Encoding;
    /// repeated calls have no further effect.
    pub fn cancel(&mut self) {
        let cancellable = self
            .job
            .as_ref()
            .map_or(false, |job| job.state.is_cancellable());
        if !cancellable {
            return;
        }

        self.transition(JobState::Stopping, None);
        if let Some(supervisor) = &self.supervisor {
            supervisor.stop();
        }
    }

    /// Apply everything the pipeline reported since the last call.
    /// Returns true if the job changed.
    pub fn poll(&mut self) -> bool {
        let Some(rx) = self.pipeline.as_ref() else {
            return false;
        };

        let mut pending = Vec::new();
        let mut disconnected = false;
        loop {
            match rx.try_recv() {
                Ok(event) => pending.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }

        let changed = !pending.is_empty() || disconnected;
        for event in pending {
            self.apply(event);
            if self.job.is_none() {
                return true;
            }
        }

        if disconnected && self.job.is_some() {
            self.finish(EncodeOutcome::Failed(SyncError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "sync pipeline stopped without reporting a result",
            ))));
        }
        changed
    }

    fn apply(&mut self, event: PipelineEvent) {
        let stopping = self.job.as_ref().map(|j| j.state) == Some(JobState::Stopping);

        match event {
            PipelineEvent::Stage(state) => {
                if !stopping {
                    self.transition(state, None);
                }
            }
            // from here on the output path belongs to this job
            PipelineEvent::EncoderStarted => self.encode_started = true,
            PipelineEvent::Probed { source, target } => {
                self.log_probe("Source", &source);
                self.log_probe("Target", &target);
            }
            PipelineEvent::Planned {
                ratio,
                output,
                command_line,
            } => {
                debug!("{}", command_line);
                self.log(format!("Time-scale ratio: {} ({:.6})", ratio, ratio.as_f64()));
                self.log(format!("Output: {}", output.display()));
                if let Some(job) = self.job.as_mut() {
                    job.scale_ratio = Some(ratio);
                    job.output_path = Some(output);
                }
            }
            PipelineEvent::Progress(sample) => {
                if let Some(job) = self.job.as_mut() {
                    if job.state == JobState::Encoding {
                        job.apply_progress(&sample);
                        let _ = self.events_tx.send(JobEvent::Progress(sample));
                    }
                }
            }
            PipelineEvent::Finished(outcome) => self.finish(outcome),
        }
    }

    fn finish(&mut self, outcome: EncodeOutcome) {
        let Some(mut job) = self.job.take() else {
            return;
        };
        let stopping = job.state == JobState::Stopping;

        let (state, message) = match outcome {
            EncodeOutcome::Succeeded => (JobState::Succeeded, None),
            EncodeOutcome::Cancelled => (JobState::Cancelled, None),
            // a failure racing a stop request is reported as the stop
            EncodeOutcome::Failed(err) if stopping || err.is_cancelled() => {
                (JobState::Cancelled, None)
            }
            EncodeOutcome::Failed(err) => (JobState::Failed, Some(err.to_string())),
        };

        match state {
            JobState::Succeeded => {
                job.progress = 1.0;
                job.estimated_remaining_seconds = Some(0.0);
                if let Some(output) = &job.output_path {
                    self.log(format!("Saved: {}", output.display()));
                }
                info!(
                    "Sync finished in {}",
                    format_duration(job.started_at.elapsed().as_secs_f64())
                );
            }
            JobState::Cancelled => {
                info!("Sync cancelled");
                self.discard_output(&mut job);
            }
            _ => {
                error!("Sync failed: {}", message.as_deref().unwrap_or_default());
                self.discard_output(&mut job);
            }
        }

        job.state = state;
        job.failure = message.clone();
        let _ = self.events_tx.send(JobEvent::StateChanged {
            state,
            message: message.clone(),
        });
        if let Some(message) = message {
            self.log(format!("Error: {}", message));
        }

        let status = job.snapshot();
        let _ = self.events_tx.send(JobEvent::Finished(status.clone()));
        self.last_status = status;
        self.supervisor = None;
        self.pipeline = None;
        self.encode_started = false;
    }

    /// Output of an encode that did not succeed is not playable. A file at
    /// the output path is left alone if the encoder never ran.
    fn discard_output(&self, job: &mut SyncJob) {
        let Some(output) = job.output_path.take() else {
            return;
        };
        if !self.encode_started {
            return;
        }
        match std::fs::remove_file(&output) {
            Ok(()) => debug!("Removed partial output {}", output.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove partial output {}: {}", output.display(), e),
        }
    }

    fn transition(&mut self, state: JobState, message: Option<String>) {
        let Some(job) = self.job.as_mut() else {
            return;
        };
        if job.state == state {
            return;
        }
        job.state = state;
        info!("Job state: {:?}", state);
        let _ = self.events_tx.send(JobEvent::StateChanged { state, message });
        self.log(state.label().to_string());
    }

    fn log(&self, line: String) {
        let _ = self.events_tx.send(JobEvent::Log(line));
    }

    fn log_probe(&self, role: &str, info: &MediaProbeResult) {
        self.log(format!("Loaded {} Video File: {}", role, info.filename()));
        self.log(format!(
            "FPS: {} ({:.3})",
            info.frame_rate,
            info.frame_rate.as_f64()
        ));
        self.log(format!("Duration: {}", format_duration(info.duration_seconds)));
        self.log(format!("Codec: {}", info.video_codec));
    }
}

impl Drop for SyncOrchestrator {
    fn drop(&mut self) {
        // dropping the runtime drops the pipeline task; kill_on_drop reaps ffmpeg
        if let Some(supervisor) = &self.supervisor {
            supervisor.stop();
        }
    }
}

async fn run_pipeline(
    request: PipelineRequest,
    supervisor: ProcessSupervisor,
    tx: Sender<PipelineEvent>,
) {
    let probes = async {
        tokio::try_join!(
            request.ffmpeg.probe(&request.source),
            request.ffmpeg.probe(&request.target)
        )
    };

    let (source, target) = tokio::select! {
        biased;

        _ = supervisor.stop_requested() => {
            let _ = tx.send(PipelineEvent::Finished(EncodeOutcome::Cancelled));
            return;
        }

        probed = probes => match probed {
            Ok(pair) => pair,
            Err(e) => {
                let _ = tx.send(PipelineEvent::Finished(EncodeOutcome::Failed(e)));
                return;
            }
        },
    };

    let _ = tx.send(PipelineEvent::Probed {
        source: source.clone(),
        target: target.clone(),
    });
    let _ = tx.send(PipelineEvent::Stage(JobState::Building));

    let (ratio, command) = match plan_encode(&request, &source, &target) {
        Ok(planned) => planned,
        Err(e) => {
            let _ = tx.send(PipelineEvent::Finished(EncodeOutcome::Failed(e)));
            return;
        }
    };
    let _ = tx.send(PipelineEvent::Planned {
        ratio,
        output: command.output().to_path_buf(),
        command_line: command.command_line(),
    });

    let _ = tx.send(PipelineEvent::Stage(JobState::Encoding));
    supervisor.run(&command, &tx).await;
}

fn plan_encode(
    request: &PipelineRequest,
    source: &MediaProbeResult,
    target: &MediaProbeResult,
) -> Result<(Rational, EncodeCommand)> {
    let ratio = match request.settings.ratio_basis {
        RatioBasis::FrameRate => compute_ratio(source.frame_rate, target.frame_rate)?,
        RatioBasis::Duration => duration_ratio(source.duration_seconds, target.duration_seconds)?,
    };

    let (_, language_code) = request.settings.language_tag();
    let output = output_path_for(&request.target, &language_code);
    let plan = SyncPlan {
        source,
        target,
        mode: request.mode,
        ratio,
        output: &output,
    };
    let command = request.ffmpeg.sync_command(&plan, &request.settings)?;
    Ok((ratio, command))
}
