use crate::utils::parse_time;

/// Processed-time floor used by the remaining-time estimate.
pub const PROGRESS_EPSILON: f64 = 1e-3;

/// Fields scraped from one FFmpeg status line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusReading {
    pub processed_seconds: f64,
    pub speed: Option<f64>,
}

/// One progress update for the running encode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    /// Wall clock since the encoder was launched.
    pub elapsed_seconds: f64,
    /// Media time already written.
    pub processed_duration_seconds: f64,
    pub total_duration_seconds: f64,
    pub speed: Option<f64>,
    /// `None` while processed time is at or below [`PROGRESS_EPSILON`].
    /// [`estimate_remaining`] would divide by the epsilon there and report
    /// a huge bogus figure, so no estimate is shown instead.
    pub estimated_remaining_seconds: Option<f64>,
}

impl ProgressSample {
    pub fn new(elapsed: f64, processed: f64, total: f64, speed: Option<f64>) -> Self {
        let estimated_remaining_seconds = if processed > PROGRESS_EPSILON {
            Some(estimate_remaining(elapsed, processed, total))
        } else {
            None
        };
        Self {
            elapsed_seconds: elapsed,
            processed_duration_seconds: processed,
            total_duration_seconds: total,
            speed,
            estimated_remaining_seconds,
        }
    }

    pub fn from_reading(elapsed: f64, reading: StatusReading, total: f64) -> Self {
        Self::new(elapsed, reading.processed_seconds, total, reading.speed)
    }

    /// Completed fraction in `[0, 1]`, or 0 when the total is unknown.
    pub fn fraction(&self) -> f32 {
        if self.total_duration_seconds > 0.0 {
            (self.processed_duration_seconds / self.total_duration_seconds).clamp(0.0, 1.0) as f32
        } else {
            0.0
        }
    }
}

/// Linear extrapolation: `elapsed * (total - processed) / max(processed, eps)`.
pub fn estimate_remaining(elapsed: f64, processed: f64, total: f64) -> f64 {
    let left = (total - processed).max(0.0);
    elapsed * left / processed.max(PROGRESS_EPSILON)
}

/// Parse an FFmpeg status line.
///
/// Handles the interactive stats line
/// `frame=  123 fps= 30 q=28.0 size=    1234kB time=00:00:05.00 bitrate= 2000.0kbits/s speed=1.5x`
/// as well as `-progress` style keys (`out_time_us=`, `out_time=`).
/// Lines without a usable processed time yield `None`.
pub fn parse_progress_line(line: &str) -> Option<StatusReading> {
    let processed_seconds = if let Some(us) = field_value(line, "out_time_us")
        .or_else(|| field_value(line, "out_time_ms"))
    {
        // out_time_ms is in microseconds as well
        us.parse::<i64>().ok().map(|v| v as f64 / 1_000_000.0)?
    } else {
        let value = field_value(line, "out_time").or_else(|| field_value(line, "time"))?;
        if value.starts_with('-') {
            return None;
        }
        parse_time(value)?
    };

    if !processed_seconds.is_finite() || processed_seconds < 0.0 {
        return None;
    }

    let speed = field_value(line, "speed")
        .and_then(|s| s.strip_suffix('x'))
        .and_then(|s| s.trim().parse::<f64>().ok());

    Some(StatusReading {
        processed_seconds,
        speed,
    })
}

/// Value of `key=` where the key starts a whitespace-delimited token.
/// FFmpeg pads values (`fps= 30`), so leading spaces are skipped.
fn field_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let mut offset = 0;
    while let Some(pos) = line[offset..].find(key) {
        let start = offset + pos;
        let after = &line[start + key.len()..];
        let at_boundary = line[..start]
            .chars()
            .next_back()
            .map_or(true, char::is_whitespace);

        if at_boundary {
            if let Some(rest) = after.strip_prefix('=') {
                let value = rest.trim_start().split_whitespace().next()?;
                if value == "N/A" {
                    return None;
                }
                return Some(value);
            }
        }
        offset = start + key.len();
    }
    None
}

/// Splits the encoder's stderr into lines. Status updates end in `\r`,
/// log messages in `\n`; both terminate a line here.
#[derive(Debug, Default)]
pub struct StatusLineSplitter {
    pending: Vec<u8>,
}

impl StatusLineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\r' || byte == b'\n' {
                self.take_line(&mut lines);
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Flush whatever is left after the stream closed.
    pub fn finish(&mut self) -> Option<String> {
        let mut lines = Vec::new();
        self.take_line(&mut lines);
        lines.pop()
    }

    fn take_line(&mut self, lines: &mut Vec<String>) {
        if self.pending.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        if !line.is_empty() {
            lines.push(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress_line() {
        let line = "frame=  100 fps= 30 q=28.0 size=    1024kB time=00:00:10.00 bitrate= 838.9kbits/s speed=2.5x";
        let reading = parse_progress_line(line).unwrap();
        assert!((reading.processed_seconds - 10.0).abs() < 1e-9);
        assert_eq!(reading.speed, Some(2.5));
    }

    #[test]
    fn test_parse_audio_only_line() {
        let line = "size=    2048kB time=01:02:03.50 bitrate= 192.0kbits/s speed=41.3x    ";
        let reading = parse_progress_line(line).unwrap();
        assert!((reading.processed_seconds - 3723.5).abs() < 1e-9);
        assert_eq!(reading.speed, Some(41.3));
    }

    #[test]
    fn test_parse_progress_keys() {
        let reading = parse_progress_line("out_time_us=5000000").unwrap();
        assert!((reading.processed_seconds - 5.0).abs() < 1e-9);
        assert_eq!(reading.speed, None);

        let reading = parse_progress_line("out_time=00:00:07.250000").unwrap();
        assert!((reading.processed_seconds - 7.25).abs() < 1e-9);
    }

    #[test]
    fn test_unparseable_lines() {
        assert_eq!(parse_progress_line("Input #0, matroska,webm, from 'a.mkv':"), None);
        assert_eq!(parse_progress_line("size=       0kB time=N/A bitrate=N/A speed=N/A"), None);
        assert_eq!(parse_progress_line("size=0kB time=-577014:32:22.77 bitrate=N/A"), None);
        assert_eq!(parse_progress_line("runtime=00:00:01.00"), None);
    }

    #[test]
    fn test_speed_not_available() {
        let reading = parse_progress_line("time=00:00:01.00 speed=N/A").unwrap();
        assert_eq!(reading.speed, None);
    }

    #[test]
    fn test_estimate_remaining() {
        // 20s of 100s processed in 10s -> 40s left
        assert!((estimate_remaining(10.0, 20.0, 100.0) - 40.0).abs() < 1e-9);
        assert_eq!(estimate_remaining(10.0, 120.0, 100.0), 0.0);

        let sample = ProgressSample::new(3.0, 0.0, 100.0, None);
        assert_eq!(sample.estimated_remaining_seconds, None);
        assert_eq!(sample.fraction(), 0.0);
    }

    #[test]
    fn test_splitter_handles_carriage_returns() {
        let mut splitter = StatusLineSplitter::new();
        let mut lines = splitter.push(b"Stream mapping:\n  Stream #0:0 -> #0:0 (copy)\nsize=1kB time=00:00");
        assert_eq!(lines, vec!["Stream mapping:", "Stream #0:0 -> #0:0 (copy)"]);

        lines = splitter.push(b":01.00 speed=1x\rsize=2kB time=00:00:02.00 speed=1x\r");
        assert_eq!(
            lines,
            vec!["size=1kB time=00:00:01.00 speed=1x", "size=2kB time=00:00:02.00 speed=1x"]
        );

        splitter.push(b"tail");
        assert_eq!(splitter.finish(), Some("tail".to_string()));
        assert_eq!(splitter.finish(), None);
    }
}
