use crate::error::{Result, SyncError};
use crate::sync::Rational;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Stream metadata the sync pipeline needs from one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaProbeResult {
    pub path: PathBuf,
    /// Average frame rate of the first real video stream.
    pub frame_rate: Rational,
    /// Absolute stream indexes of the audio streams, in container order.
    pub audio_stream_indexes: Vec<u32>,
    /// Sample rate of the first audio stream, when reported.
    pub audio_sample_rate: Option<u32>,
    /// Informational only.
    pub duration_seconds: f64,
    pub video_codec: String,
}

impl MediaProbeResult {
    pub fn primary_audio_index(&self) -> Option<u32> {
        self.audio_stream_indexes.first().copied()
    }

    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

#[derive(Debug, Deserialize)]
struct FFProbeOutput {
    format: Option<FFProbeFormat>,
    streams: Option<Vec<FFProbeStream>>,
}

#[derive(Debug, Deserialize)]
struct FFProbeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FFProbeStream {
    index: Option<u32>,
    codec_type: Option<String>,
    codec_name: Option<String>,
    codec_long_name: Option<String>,
    avg_frame_rate: Option<String>,
    sample_rate: Option<String>,
    duration: Option<String>,
    disposition: Option<FFProbeDisposition>,
}

#[derive(Debug, Deserialize)]
struct FFProbeDisposition {
    #[serde(default)]
    attached_pic: u8,
}

impl FFProbeStream {
    fn is_cover_art(&self) -> bool {
        self.disposition
            .as_ref()
            .map_or(false, |d| d.attached_pic != 0)
    }

    fn codec_description(&self) -> String {
        let short = self.codec_name.as_deref().unwrap_or("");
        let long = self.codec_long_name.as_deref().unwrap_or("");
        match (long.is_empty(), short.is_empty()) {
            (false, false) => format!("{} ({})", long, short),
            (false, true) => long.to_string(),
            _ => short.to_string(),
        }
    }
}

/// Run ffprobe on `path`. The child is killed if the returned future is
/// dropped before it completes.
pub async fn probe_media(ffprobe_path: &str, path: &Path) -> Result<MediaProbeResult> {
    let mut cmd = Command::new(ffprobe_path);
    cmd.args([
        "-v", "error",
        "-print_format", "json",
        "-show_format",
        "-show_streams",
    ])
    .arg(path)
    .stdin(Stdio::null())
    .kill_on_drop(true);

    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    let output = cmd.output().await.map_err(|source| SyncError::ProcessLaunch {
        program: ffprobe_path.to_string(),
        source,
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SyncError::probe(
            path,
            format!("ffprobe failed ({}): {}", output.status, stderr.trim()),
        ));
    }

    let json_str = String::from_utf8_lossy(&output.stdout);
    parse_probe_output(path, &json_str)
}

/// Turn ffprobe's JSON into a [`MediaProbeResult`].
///
/// The frame rate comes from `avg_frame_rate`: `r_frame_rate` is the
/// container's nominal rate and is wrong for variable frame rate sources.
pub fn parse_probe_output(path: &Path, json_str: &str) -> Result<MediaProbeResult> {
    let probe_output: FFProbeOutput = serde_json::from_str(json_str)
        .map_err(|e| SyncError::probe(path, format!("unparseable ffprobe output: {}", e)))?;

    let streams = probe_output.streams.unwrap_or_default();
    if streams.is_empty() {
        return Err(SyncError::probe(path, "no streams found"));
    }

    let video = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video") && !s.is_cover_art())
        .ok_or_else(|| SyncError::probe(path, "no video stream"))?;

    let audio: Vec<&FFProbeStream> = streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("audio"))
        .collect();
    if audio.is_empty() {
        return Err(SyncError::probe(path, "no audio stream"));
    }

    let rate_str = video.avg_frame_rate.as_deref().unwrap_or("");
    let frame_rate = Rational::parse(rate_str)
        .filter(|r| !r.is_zero())
        .ok_or_else(|| {
            SyncError::probe(path, format!("invalid average frame rate '{}'", rate_str))
        })?;

    let mut audio_stream_indexes = Vec::with_capacity(audio.len());
    for (position, stream) in audio.iter().enumerate() {
        let index = stream.index.ok_or_else(|| {
            SyncError::probe(path, format!("audio stream #{} has no index", position))
        })?;
        audio_stream_indexes.push(index);
    }

    let audio_sample_rate = audio[0]
        .sample_rate
        .as_deref()
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|r| *r > 0);

    let duration_seconds = probe_output
        .format
        .and_then(|f| f.duration)
        .or_else(|| video.duration.clone())
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);

    Ok(MediaProbeResult {
        path: path.to_path_buf(),
        frame_rate,
        audio_stream_indexes,
        audio_sample_rate,
        duration_seconds,
        video_codec: video.codec_description(),
    })
}
