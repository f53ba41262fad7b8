/// Parse time string (HH:MM:SS.mmm or MM:SS.mmm or SS.mmm) to seconds
pub fn parse_time(time_str: &str) -> Option<f64> {
    let parts: Vec<&str> = time_str.split(':').collect();

    match parts.len() {
        1 => {
            // SS.mmm or SS
            parts[0].parse::<f64>().ok()
        }
        2 => {
            // MM:SS.mmm or MM:SS
            let minutes: f64 = parts[0].parse().ok()?;
            let seconds: f64 = parts[1].parse().ok()?;
            Some(minutes * 60.0 + seconds)
        }
        3 => {
            // HH:MM:SS.mmm or HH:MM:SS
            let hours: f64 = parts[0].parse().ok()?;
            let minutes: f64 = parts[1].parse().ok()?;
            let seconds: f64 = parts[2].parse().ok()?;
            Some(hours * 3600.0 + minutes * 60.0 + seconds)
        }
        _ => None,
    }
}

/// Format seconds as `H:MM:SS`, rounding to the nearest second.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Remaining-time label; unknown until the encoder has reported progress.
pub fn format_remaining(seconds: Option<f64>) -> String {
    match seconds {
        Some(s) if s.is_finite() => format_duration(s),
        _ => "--:--:--".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("30"), Some(30.0));
        assert_eq!(parse_time("1:30"), Some(90.0));
        assert_eq!(parse_time("1:01:30"), Some(3690.0));
        assert_eq!(parse_time("00:00:07.25"), Some(7.25));
        assert_eq!(parse_time("a:b"), None);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "0:00:00");
        assert_eq!(format_duration(59.6), "0:01:00");
        assert_eq!(format_duration(3725.0), "1:02:05");
        assert_eq!(format_duration(-4.0), "0:00:00");
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(None), "--:--:--");
        assert_eq!(format_remaining(Some(f64::INFINITY)), "--:--:--");
        assert_eq!(format_remaining(Some(90.0)), "0:01:30");
    }
}
