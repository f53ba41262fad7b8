use super::probe::MediaProbeResult;
use crate::error::{Result, SyncError};
use crate::sync::{EncodeSettings, Rational, SyncMode};
use std::path::{Path, PathBuf};

/// Single-stage bounds of FFmpeg's `atempo` filter.
pub const MIN_STAGE_FACTOR: f64 = 0.5;
pub const MAX_STAGE_FACTOR: f64 = 2.0;

/// Label of the synced stream inside the filter graph.
const SYNCED_LABEL: &str = "[synced]";

/// Immutable FFmpeg invocation produced by [`build_sync_command`].
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeCommand {
    program: String,
    args: Vec<String>,
    output: PathBuf,
    expected_duration: f64,
}

impl EncodeCommand {
    pub fn new(program: String, args: Vec<String>, output: PathBuf, expected_duration: f64) -> Self {
        Self {
            program,
            args,
            output,
            expected_duration,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Length of the output, used as the progress total.
    pub fn expected_duration_seconds(&self) -> f64 {
        self.expected_duration
    }

    /// Values following every occurrence of `flag`, in order.
    pub fn values_of(&self, flag: &str) -> Vec<&str> {
        self.args
            .windows(2)
            .filter(|w| w[0] == flag)
            .map(|w| w[1].as_str())
            .collect()
    }

    /// Output audio streams flagged `default`, by audio stream position.
    pub fn default_audio_streams(&self) -> Vec<usize> {
        self.args
            .windows(2)
            .filter(|w| w[1] == "default")
            .filter_map(|w| w[0].strip_prefix("-disposition:a:"))
            .filter_map(|i| i.parse().ok())
            .collect()
    }

    /// Shell-like rendering for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|a| {
                if a.contains(' ') || a.is_empty() {
                    format!("\"{}\"", a)
                } else {
                    a.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Everything the builder reads from the job.
#[derive(Debug, Clone, Copy)]
pub struct SyncPlan<'a> {
    pub source: &'a MediaProbeResult,
    pub target: &'a MediaProbeResult,
    pub mode: SyncMode,
    pub ratio: Rational,
    pub output: &'a Path,
}

/// Split a timeline scale factor into `atempo` stages.
///
/// Uses the fewest stages that keep each factor inside
/// [`MIN_STAGE_FACTOR`, `MAX_STAGE_FACTOR`], all equal: `n = ceil(|log2 r|)`,
/// each `r^(1/n)`. A ratio of 1 still yields one stage.
pub fn stretch_stages(ratio: f64) -> Result<Vec<f64>> {
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(SyncError::UnsupportedRatio(ratio));
    }

    let octaves = ratio.log2().abs();
    let count = ((octaves - 1e-9).ceil() as usize).max(1);
    let stage = ratio
        .powf(1.0 / count as f64)
        .clamp(MIN_STAGE_FACTOR, MAX_STAGE_FACTOR);
    Ok(vec![stage; count])
}

/// Audio filter chain that rescales the timeline by `ratio` and applies the
/// configured delay.
///
/// `ratio` scales duration; `atempo` takes a speed, so each stage renders
/// as its reciprocal. `input_sample_rate` is the source stream's rate, used
/// by the resample path to relabel samples.
pub fn build_audio_filter(
    mode: SyncMode,
    ratio: f64,
    input_sample_rate: u32,
    settings: &EncodeSettings,
) -> Result<Vec<String>> {
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(SyncError::UnsupportedRatio(ratio));
    }

    let mut filters = Vec::new();

    match mode {
        SyncMode::TimeStretch => {
            for stage in stretch_stages(ratio)? {
                filters.push(format!("atempo={:.8}", 1.0 / stage));
            }
        }
        SyncMode::FastResample => {
            let relabeled = (input_sample_rate as f64 / ratio).round() as u64;
            filters.push(format!("asetrate={}", relabeled.max(1)));
            filters.push(format!("aresample={}", settings.sample_rate));
        }
    }

    if settings.delay_ms > 0 {
        filters.push(format!("adelay={}:all=1", settings.delay_ms));
    } else if settings.delay_ms < 0 {
        let trim = settings.delay_ms.unsigned_abs() as f64 / 1000.0;
        filters.push(format!("atrim=start={}", trim));
        filters.push("asetpts=PTS-STARTPTS".to_string());
    }

    Ok(filters)
}

/// `<target dir>/<target stem>_audio_<lang><target ext>`
pub fn output_path_for(target: &Path, language_code: &str) -> PathBuf {
    let stem = target
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let name = match target.extension() {
        Some(ext) => format!("{}_audio_{}.{}", stem, language_code, ext.to_string_lossy()),
        None => format!("{}_audio_{}", stem, language_code),
    };
    target.with_file_name(name)
}

/// Output length the progress bar counts towards.
fn expected_duration(plan: &SyncPlan, settings: &EncodeSettings) -> f64 {
    let mut duration = plan.target.duration_seconds;
    if duration <= 0.0 {
        duration = plan.source.duration_seconds * plan.ratio.as_f64();
    }
    let delay = settings.delay_ms as f64 / 1000.0;
    (duration + delay).max(0.0)
}

/// Build the single FFmpeg invocation for a sync job.
///
/// Input 0 is the target (video and original audio, copied), input 1 the
/// source whose first audio stream is rescaled. The original audio streams
/// are mapped in order, the synced stream last; it is the only stream left
/// with the `default` disposition.
pub fn build_sync_command(
    ffmpeg_path: &str,
    plan: &SyncPlan,
    settings: &EncodeSettings,
) -> Result<EncodeCommand> {
    let source_audio = plan
        .source
        .primary_audio_index()
        .ok_or_else(|| SyncError::probe(&plan.source.path, "no audio stream"))?;
    let input_rate = plan.source.audio_sample_rate.unwrap_or(settings.sample_rate);

    let filters = build_audio_filter(plan.mode, plan.ratio.as_f64(), input_rate, settings)?;
    let graph = format!("[1:{}]{}{}", source_audio, filters.join(","), SYNCED_LABEL);

    let threads = settings.filter_threads().to_string();
    let kept = plan.target.audio_stream_indexes.len();
    let synced = kept;
    let (language_name, language_code) = settings.language_tag();

    let mut args = vec![
        "-hide_banner".to_string(),
        "-y".to_string(),
        "-filter_threads".to_string(),
        threads.clone(),
        "-filter_complex_threads".to_string(),
        threads,
        "-i".to_string(),
        plan.target.path.to_string_lossy().to_string(),
        "-i".to_string(),
        plan.source.path.to_string_lossy().to_string(),
        "-filter_complex".to_string(),
        graph,
        "-map".to_string(),
        "0:v".to_string(),
    ];

    for index in &plan.target.audio_stream_indexes {
        args.push("-map".to_string());
        args.push(format!("0:{}", index));
    }
    args.push("-map".to_string());
    args.push(SYNCED_LABEL.to_string());

    args.extend([
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "copy".to_string(),
        format!("-c:a:{}", synced),
        settings.encoder().to_string(),
        format!("-b:a:{}", synced),
        settings.audio_bitrate.clone(),
        format!("-ar:a:{}", synced),
        settings.sample_rate.to_string(),
        format!("-metadata:s:a:{}", synced),
        format!("language={}", language_code),
        format!("-metadata:s:a:{}", synced),
        format!("title={}", language_name),
    ]);

    for i in 0..kept {
        args.push(format!("-disposition:a:{}", i));
        args.push("0".to_string());
    }
    args.push(format!("-disposition:a:{}", synced));
    args.push("default".to_string());

    args.push(plan.output.to_string_lossy().to_string());

    Ok(EncodeCommand::new(
        ffmpeg_path.to_string(),
        args,
        plan.output.to_path_buf(),
        expected_duration(plan, settings),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(path: &str, rate: (u64, u64), audio: Vec<u32>, duration: f64) -> MediaProbeResult {
        MediaProbeResult {
            path: PathBuf::from(path),
            frame_rate: Rational::new(rate.0, rate.1).unwrap(),
            audio_stream_indexes: audio,
            audio_sample_rate: Some(48_000),
            duration_seconds: duration,
            video_codec: "h264".to_string(),
        }
    }

    fn tempo_values(filters: &[String]) -> Vec<f64> {
        filters
            .iter()
            .filter_map(|f| f.strip_prefix("atempo="))
            .map(|v| v.parse().unwrap())
            .collect()
    }

    #[test]
    fn test_single_stage_for_ntsc_film() {
        let ratio = 24000.0 / 1001.0 / 30.0;
        let stages = stretch_stages(ratio).unwrap();
        assert_eq!(stages.len(), 1);
        assert!((stages[0] - 800.0 / 1001.0).abs() < 1e-12);
        assert!((stages[0] - 0.7992).abs() < 1e-4);

        let filters =
            build_audio_filter(SyncMode::TimeStretch, ratio, 48_000, &EncodeSettings::default())
                .unwrap();
        let tempos = tempo_values(&filters);
        assert_eq!(tempos.len(), 1);
        assert!((tempos[0] * ratio - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_out_of_range_ratio_is_chained() {
        let stages = stretch_stages(0.2).unwrap();
        assert_eq!(stages.len(), 3);
        let product: f64 = stages.iter().product();
        assert!((product - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_stage_bounds_hold_across_ratios() {
        for ratio in [0.01, 0.1, 0.25, 0.3, 0.49, 0.5, 1.0, 1.7, 2.0, 2.01, 4.0, 7.3, 40.0] {
            let stages = stretch_stages(ratio).unwrap();
            let product: f64 = stages.iter().product();
            assert!((product / ratio - 1.0).abs() < 1e-6, "ratio {}", ratio);
            for s in &stages {
                assert!(*s >= MIN_STAGE_FACTOR && *s <= MAX_STAGE_FACTOR, "ratio {}", ratio);
            }
            if !(MIN_STAGE_FACTOR..=MAX_STAGE_FACTOR).contains(&ratio) {
                assert!(stages.len() >= 2, "ratio {}", ratio);
            } else {
                assert_eq!(stages.len(), 1, "ratio {}", ratio);
            }
        }
    }

    #[test]
    fn test_invalid_ratios_rejected() {
        for ratio in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(stretch_stages(ratio), Err(SyncError::UnsupportedRatio(_))));
            assert!(build_audio_filter(
                SyncMode::FastResample,
                ratio,
                48_000,
                &EncodeSettings::default()
            )
            .is_err());
        }
    }

    #[test]
    fn test_fast_resample_relabels_rate() {
        let filters =
            build_audio_filter(SyncMode::FastResample, 0.8, 48_000, &EncodeSettings::default())
                .unwrap();
        assert_eq!(filters, vec!["asetrate=60000", "aresample=48000"]);
    }

    #[test]
    fn test_delay_filters() {
        let mut settings = EncodeSettings::default();
        settings.delay_ms = 250;
        let filters = build_audio_filter(SyncMode::TimeStretch, 1.0, 48_000, &settings).unwrap();
        assert_eq!(filters.last().unwrap(), "adelay=250:all=1");

        settings.delay_ms = -1500;
        let filters = build_audio_filter(SyncMode::TimeStretch, 1.0, 48_000, &settings).unwrap();
        assert_eq!(
            &filters[filters.len() - 2..],
            &["atrim=start=1.5".to_string(), "asetpts=PTS-STARTPTS".to_string()]
        );
    }

    #[test]
    fn test_unity_ratio_still_filters() {
        let filters =
            build_audio_filter(SyncMode::TimeStretch, 1.0, 48_000, &EncodeSettings::default())
                .unwrap();
        assert_eq!(filters, vec!["atempo=1.00000000"]);
    }

    #[test]
    fn test_output_path() {
        assert_eq!(
            output_path_for(Path::new("/v/movie.mkv"), "el"),
            PathBuf::from("/v/movie_audio_el.mkv")
        );
        assert_eq!(
            output_path_for(Path::new("clip"), "und"),
            PathBuf::from("clip_audio_und")
        );
    }

    #[test]
    fn test_sync_command_mapping_and_disposition() {
        let source = probe("/in/source.mp4", (24000, 1001), vec![1], 100.0);
        let target = probe("/in/target.mkv", (30, 1), vec![1, 2, 4], 80.0);
        let plan = SyncPlan {
            source: &source,
            target: &target,
            mode: SyncMode::TimeStretch,
            ratio: Rational::new(800, 1001).unwrap(),
            output: Path::new("/in/target_audio_en.mkv"),
        };
        let mut settings = EncodeSettings::default();
        settings.filter_threads = Some(6);

        let cmd = build_sync_command("ffmpeg", &plan, &settings).unwrap();
        assert_eq!(cmd.program(), "ffmpeg");
        assert_eq!(cmd.output(), Path::new("/in/target_audio_en.mkv"));
        assert_eq!(cmd.args().last().unwrap(), "/in/target_audio_en.mkv");

        assert_eq!(cmd.values_of("-i"), vec!["/in/target.mkv", "/in/source.mp4"]);
        assert_eq!(
            cmd.values_of("-map"),
            vec!["0:v", "0:1", "0:2", "0:4", "[synced]"]
        );

        assert_eq!(cmd.default_audio_streams(), vec![3]);
        for i in 0..3 {
            assert_eq!(cmd.values_of(&format!("-disposition:a:{}", i)), vec!["0"]);
        }

        let graph = cmd.values_of("-filter_complex")[0];
        assert!(graph.starts_with("[1:1]atempo="));
        assert!(graph.ends_with("[synced]"));

        assert_eq!(cmd.values_of("-c:v").first().copied(), Some("copy"));
        assert_eq!(cmd.values_of("-c:a").first().copied(), Some("copy"));
        assert_eq!(cmd.values_of("-c:a:3").first().copied(), Some("aac"));
        assert_eq!(cmd.values_of("-filter_threads").first().copied(), Some("6"));
        assert_eq!(cmd.values_of("-filter_complex_threads").first().copied(), Some("6"));
        assert_eq!(cmd.values_of("-metadata:s:a:3").first().copied(), Some("language=en"));
        assert!((cmd.expected_duration_seconds() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_expected_duration_falls_back_to_scaled_source() {
        let source = probe("s.mp4", (12, 1), vec![0], 100.0);
        let target = probe("t.mp4", (60, 1), vec![1], 0.0);
        let plan = SyncPlan {
            source: &source,
            target: &target,
            mode: SyncMode::FastResample,
            ratio: Rational::new(1, 5).unwrap(),
            output: Path::new("t_audio_en.mp4"),
        };
        let mut settings = EncodeSettings::default();
        settings.delay_ms = 500;
        let cmd = build_sync_command("ffmpeg", &plan, &settings).unwrap();
        assert!((cmd.expected_duration_seconds() - 20.5).abs() < 1e-9);
        assert_eq!(cmd.default_audio_streams(), vec![1]);
    }
}
