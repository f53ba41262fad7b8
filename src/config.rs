//! Settings persisted between runs in `fps_audio_sync.json`.

use crate::ffmpeg::DEFAULT_GRACE_PERIOD;
use crate::sync::{EncodeSettings, SyncMode};
use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Where the external tools live. Bare names are looked up on `PATH`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolPaths {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub tools: ToolPaths,
    /// Options for the synced audio stream
    #[serde(default)]
    pub encode: EncodeSettings,
    /// How long FFmpeg gets to quit after a stop before it is killed
    #[serde(default = "default_grace_period_ms")]
    pub stop_grace_period_ms: u64,
    #[serde(default)]
    pub default_mode: SyncMode,
}

fn default_grace_period_ms() -> u64 {
    DEFAULT_GRACE_PERIOD.as_millis() as u64
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tools: ToolPaths::default(),
            encode: EncodeSettings::default(),
            stop_grace_period_ms: default_grace_period_ms(),
            default_mode: SyncMode::default(),
        }
    }
}

impl AppConfig {
    /// Configuration file name, relative to the working directory
    pub const CONFIG_PATH: &'static str = "fps_audio_sync.json";

    /// Load the configuration file, or defaults when there is none.
    /// Tool paths from the environment win over the file.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(Path::new(Self::CONFIG_PATH))?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to(Path::new(Self::CONFIG_PATH))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// `FFMPEG_PATH` and `FFPROBE_PATH` replace the configured tool paths.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var("FFMPEG_PATH").ok(),
            std::env::var("FFPROBE_PATH").ok(),
        );
    }

    fn apply_overrides(&mut self, ffmpeg: Option<String>, ffprobe: Option<String>) {
        if let Some(path) = ffmpeg.filter(|p| !p.trim().is_empty()) {
            self.tools.ffmpeg = path;
        }
        if let Some(path) = ffprobe.filter(|p| !p.trim().is_empty()) {
            self.tools.ffprobe = path;
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.stop_grace_period_ms)
    }
}
