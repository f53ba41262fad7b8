use serde::{Deserialize, Serialize};

/// Options for the synced audio stream. Stored in the config file and
/// edited from the main window while no job is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeSettings {
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub sample_rate: u32,
    /// Label as shown in the language picker, e.g. `"English (en)"`.
    pub language: String,
    /// Positive inserts silence at the start, negative trims it.
    pub delay_ms: i64,
    pub ratio_basis: RatioBasis,
    /// `None` uses every available core.
    pub filter_threads: Option<usize>,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
            sample_rate: 48_000,
            language: "English (en)".to_string(),
            delay_ms: 0,
            ratio_basis: RatioBasis::FrameRate,
            filter_threads: None,
        }
    }
}

impl EncodeSettings {
    /// Encoder name passed to `-c:a`.
    pub fn encoder(&self) -> &str {
        match self.audio_codec.to_lowercase().as_str() {
            "mp3" | "libmp3lame" => "libmp3lame",
            _ => "aac",
        }
    }

    pub fn filter_threads(&self) -> usize {
        self.filter_threads
            .filter(|n| *n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
    }

    /// Language display name and ISO code parsed from the label.
    pub fn language_tag(&self) -> (String, String) {
        parse_language_label(&self.language)
    }
}

/// How the time-scale ratio is derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RatioBasis {
    /// source fps / target fps
    #[default]
    FrameRate,
    /// target duration / source duration
    Duration,
}

/// Split a label such as `"Greek (modern, 1453-) (el, gre)"` into its
/// display name and the first 2-3 letter code found inside parentheses.
/// The code falls back to `"und"`.
pub fn parse_language_label(label: &str) -> (String, String) {
    let (name, rest) = match label.split_once('(') {
        Some((name, rest)) => (name.trim(), rest),
        None => (label.trim(), ""),
    };

    let code = rest
        .split(|c: char| c == '(' || c == ')' || c == ',' || c.is_whitespace())
        .find(|t| (2..=3).contains(&t.len()) && t.chars().all(|c| c.is_ascii_alphabetic()))
        .map(|t| t.to_lowercase())
        .unwrap_or_else(|| "und".to_string());

    let name = if name.is_empty() { label.trim() } else { name };
    (name.to_string(), code)
}

pub const AUDIO_CODECS: &[(&str, &str)] = &[("aac", "AAC"), ("mp3", "MP3")];

pub const AUDIO_BITRATES: &[&str] = &["128k", "192k", "256k", "320k"];

pub const SAMPLE_RATES: &[u32] = &[44_100, 48_000];

pub const LANGUAGES: &[&str] = &[
    "English (en)",
    "Greek (modern, 1453-) (el, gre)",
    "Spanish (es)",
    "French (fr)",
    "German (de)",
    "Italian (it)",
    "Japanese (ja)",
    "Chinese (zh)",
    "Russian (ru)",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_language_label() {
        assert_eq!(
            parse_language_label("Greek (modern, 1453-) (el, gre)"),
            ("Greek".to_string(), "el".to_string())
        );
        assert_eq!(
            parse_language_label("English (en)"),
            ("English".to_string(), "en".to_string())
        );
        assert_eq!(
            parse_language_label("Klingon"),
            ("Klingon".to_string(), "und".to_string())
        );
    }

    #[test]
    fn test_encoder_names() {
        let mut settings = EncodeSettings::default();
        assert_eq!(settings.encoder(), "aac");
        settings.audio_codec = "mp3".to_string();
        assert_eq!(settings.encoder(), "libmp3lame");
    }

    #[test]
    fn test_filter_threads_override() {
        let mut settings = EncodeSettings::default();
        assert!(settings.filter_threads() >= 1);
        settings.filter_threads = Some(3);
        assert_eq!(settings.filter_threads(), 3);
        settings.filter_threads = Some(0);
        assert!(settings.filter_threads() >= 1);
    }

    #[test]
    fn test_partial_settings_json() {
        let settings: EncodeSettings = serde_json::from_str(r#"{"delay_ms": -250}"#).unwrap();
        assert_eq!(settings.delay_ms, -250);
        assert_eq!(settings.audio_bitrate, "192k");
        assert_eq!(settings.ratio_basis, RatioBasis::FrameRate);
    }
}
