use super::commands::{build_sync_command, EncodeCommand, SyncPlan};
use super::probe::{probe_media, MediaProbeResult};
use crate::config::ToolPaths;
use crate::error::Result;
use crate::sync::EncodeSettings;
use std::path::Path;
use std::process::Stdio;

/// Locations of the FFmpeg binaries, shared by the probe and encode steps.
#[derive(Debug, Clone)]
pub struct FFmpegWrapper {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl FFmpegWrapper {
    pub fn new() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }

    pub fn with_paths(ffmpeg_path: String, ffprobe_path: String) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
        }
    }

    pub fn from_tools(tools: &ToolPaths) -> Self {
        Self::with_paths(tools.ffmpeg.clone(), tools.ffprobe.clone())
    }

    pub fn ffmpeg_path(&self) -> &str {
        &self.ffmpeg_path
    }

    pub fn ffprobe_path(&self) -> &str {
        &self.ffprobe_path
    }

    /// Check if FFmpeg is available
    pub fn is_available(&self) -> bool {
        std::process::Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Probe a media file for frame rate and audio streams
    pub async fn probe(&self, path: &Path) -> Result<MediaProbeResult> {
        probe_media(&self.ffprobe_path, path).await
    }

    /// Build the encode for a planned sync job
    pub fn sync_command(&self, plan: &SyncPlan, settings: &EncodeSettings) -> Result<EncodeCommand> {
        build_sync_command(&self.ffmpeg_path, plan, settings)
    }
}

impl Default for FFmpegWrapper {
    fn default() -> Self {
        Self::new()
    }
}
