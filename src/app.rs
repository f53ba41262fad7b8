use crate::config::AppConfig;
use crate::error::SyncError;
use crate::ffmpeg::{FFmpegWrapper, MediaProbeResult};
use crate::sync::{JobEvent, JobState, JobStatus, ProbeSlot, SyncMode, SyncOrchestrator};
use crate::utils::format_duration;
use crossbeam_channel::Receiver;
use eframe::egui;
use log::{error, info, warn};
use std::path::{Path, PathBuf};

/// Lines kept in the log panel.
const MAX_LOG_LINES: usize = 500;

/// Which input a picked or dropped file goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoSlot {
    Source,
    Target,
}

impl VideoSlot {
    fn name(&self) -> &'static str {
        match self {
            VideoSlot::Source => "Source",
            VideoSlot::Target => "Target",
        }
    }
}

/// A probe running on the runtime for a picked or dropped file.
struct PendingProbe {
    slot: VideoSlot,
    path: PathBuf,
    result: ProbeSlot,
}

pub struct FpsSyncApp {
    pub orchestrator: SyncOrchestrator,
    events: Receiver<JobEvent>,
    pub config: AppConfig,

    // Inputs
    pub source_path: String,
    pub target_path: String,
    pub source_info: Option<MediaProbeResult>,
    pub target_info: Option<MediaProbeResult>,
    pub mode: SyncMode,
    pending_probes: Vec<PendingProbe>,

    // Job display
    pub status: JobStatus,
    pub status_message: String,
    pub log_lines: Vec<String>,
    pub ffmpeg_available: bool,
}

impl FpsSyncApp {
    pub fn new(_cc: &eframe::CreationContext<'_>, config: AppConfig) -> Result<Self, SyncError> {
        let ffmpeg = FFmpegWrapper::from_tools(&config.tools);
        let ffmpeg_available = ffmpeg.is_available();
        let orchestrator = SyncOrchestrator::new(ffmpeg, config.encode.clone())?
            .with_grace_period(config.grace_period());
        let events = orchestrator.events();

        let mut app = Self {
            orchestrator,
            events,
            mode: config.default_mode,
            config,
            source_path: String::new(),
            target_path: String::new(),
            source_info: None,
            target_info: None,
            pending_probes: Vec::new(),
            status: JobStatus::idle(),
            status_message: String::from("Ready"),
            log_lines: Vec::new(),
            ffmpeg_available,
        };

        if !ffmpeg_available {
            let message = format!(
                "FFmpeg not found at '{}'. Set FFMPEG_PATH or edit {}.",
                app.config.tools.ffmpeg,
                AppConfig::CONFIG_PATH
            );
            warn!("{}", message);
            app.status_message = message.clone();
            app.log(message);
        }
        Ok(app)
    }

    pub fn is_running(&self) -> bool {
        self.orchestrator.is_running()
    }

    pub fn can_start(&self) -> bool {
        self.ffmpeg_available
            && !self.is_running()
            && !self.source_path.trim().is_empty()
            && !self.target_path.trim().is_empty()
    }

    pub fn can_stop(&self) -> bool {
        self.status.state.is_cancellable()
    }

    pub fn log(&mut self, line: String) {
        self.log_lines.push(line);
        if self.log_lines.len() > MAX_LOG_LINES {
            let excess = self.log_lines.len() - MAX_LOG_LINES;
            self.log_lines.drain(..excess);
        }
    }

    /// Set an input and probe it in the background. `poll_probes` shows
    /// what ffprobe reports about it.
    pub fn select_video(&mut self, slot: VideoSlot, path: PathBuf) {
        let text = path.to_string_lossy().to_string();
        match slot {
            VideoSlot::Source => {
                self.source_path = text;
                self.source_info = None;
            }
            VideoSlot::Target => {
                self.target_path = text;
                self.target_info = None;
            }
        }

        let result = self.orchestrator.spawn_probe(path.clone());
        self.pending_probes.push(PendingProbe { slot, path, result });
    }

    pub fn is_probing(&self) -> bool {
        !self.pending_probes.is_empty()
    }

    /// Pick up finished probes. A result for a path that is no longer
    /// selected is dropped.
    pub fn poll_probes(&mut self) {
        let mut finished = Vec::new();
        self.pending_probes.retain(|pending| match pending.result.lock().take() {
            Some(result) => {
                finished.push((pending.slot, pending.path.clone(), result));
                false
            }
            None => true,
        });

        for (slot, path, result) in finished {
            let current = match slot {
                VideoSlot::Source => &self.source_path,
                VideoSlot::Target => &self.target_path,
            };
            if Path::new(current.trim()) != path.as_path() {
                continue;
            }

            match result {
                Ok(info) => {
                    self.log(format!("Loaded {} Video File: {}", slot.name(), info.filename()));
                    self.log(format!(
                        "FPS: {} ({:.3})",
                        info.frame_rate,
                        info.frame_rate.as_f64()
                    ));
                    self.log(format!("Duration: {}", format_duration(info.duration_seconds)));
                    self.log(format!("Codec: {}", info.video_codec));
                    match slot {
                        VideoSlot::Source => self.source_info = Some(info),
                        VideoSlot::Target => self.target_info = Some(info),
                    }
                }
                Err(e) => {
                    warn!("{}", e);
                    self.log(format!("Error: {}", e));
                }
            }
        }
    }

    /// Typed paths have not been probed.
    pub fn path_edited(&mut self, slot: VideoSlot) {
        match slot {
            VideoSlot::Source => self.source_info = None,
            VideoSlot::Target => self.target_info = None,
        }
    }

    /// Dropped files fill the source first, then the target.
    pub fn handle_dropped_files(&mut self, ctx: &egui::Context) {
        if self.is_running() {
            return;
        }
        let dropped: Vec<PathBuf> = ctx.input(|i| {
            i.raw
                .dropped_files
                .iter()
                .filter_map(|f| f.path.clone())
                .collect()
        });

        for path in dropped {
            // once the source is set, drops replace the target
            let slot = if self.source_path.is_empty() {
                VideoSlot::Source
            } else {
                VideoSlot::Target
            };
            self.select_video(slot, path);
        }
    }

    pub fn start_sync(&mut self) {
        self.orchestrator.set_settings(self.config.encode.clone());
        self.config.default_mode = self.mode;
        if let Err(e) = self.config.save() {
            warn!("Could not save settings: {:#}", e);
        }

        let source = PathBuf::from(self.source_path.trim());
        let target = PathBuf::from(self.target_path.trim());
        match self.orchestrator.start(source, target, self.mode) {
            Ok(()) => {
                self.log(format!("Mode: {}", self.mode.name()));
            }
            Err(e) => {
                error!("Cannot start: {}", e);
                self.status_message = e.to_string();
                self.log(format!("Error: {}", e));
            }
        }
        self.status = self.orchestrator.current_status();
    }

    pub fn stop_sync(&mut self) {
        self.orchestrator.cancel();
        self.status = self.orchestrator.current_status();
    }

    /// Apply pipeline results and pull the events they produced.
    pub fn poll_job(&mut self) {
        self.orchestrator.poll();

        let events: Vec<JobEvent> = self.events.try_iter().collect();
        for event in events {
            match event {
                JobEvent::StateChanged { state, message } => {
                    self.status_message = match message {
                        Some(message) => format!("{}: {}", state.label(), message),
                        None => state.label().to_string(),
                    };
                }
                JobEvent::Log(line) => self.log(line),
                JobEvent::Progress(_) => {}
                JobEvent::Finished(status) => {
                    info!("Job finished: {:?}", status.state);
                    if status.state == JobState::Cancelled {
                        self.log("Cancelled.".to_string());
                    }
                }
            }
        }

        self.status = self.orchestrator.current_status();
    }

    pub fn open_output(&self) {
        if let Some(path) = &self.status.output_path {
            if let Err(e) = open::that(path) {
                warn!("Could not open {}: {}", path.display(), e);
            }
        }
    }

    pub fn open_output_folder(&self) {
        if let Some(dir) = self.status.output_path.as_deref().and_then(Path::parent) {
            if let Err(e) = open::that(dir) {
                warn!("Could not open {}: {}", dir.display(), e);
            }
        }
    }
}

impl eframe::App for FpsSyncApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_dropped_files(ctx);

        // Poll background probes
        self.poll_probes();

        // Poll the active job
        self.poll_job();

        // Render UI
        crate::ui::render_main_window(self, ctx);

        if self.is_running() || self.is_probing() {
            ctx.request_repaint_after(std::time::Duration::from_millis(100));
        }
    }
}
