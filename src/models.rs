use serde::{Deserialize, Serialize};
use std::fmt;

/// One diary entry. `timestamp` is the local start of the entry's day in epoch millis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Option<i64>,
    pub timestamp: i64,
    pub journal_text: String,
    pub image_path: Option<String>,
    pub ai_report: Option<AiReport>,
    pub perf_metrics: Option<PerfMetrics>,
}

impl JournalEntry {
    pub fn new(timestamp: i64, journal_text: String) -> Self {
        Self {
            id: None,
            timestamp,
            journal_text,
            image_path: None,
            ai_report: None,
            perf_metrics: None,
        }
    }
}

/// Structured analysis of a journal entry, in the shape the model is asked to emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiReport {
    pub journal_title: String,
    pub journal_summary: String,
    #[serde(default)]
    pub journal_highlights: Vec<String>,
    pub mood: Vec<String>,
    pub emotion: String,
    #[serde(default)]
    pub trend: Option<f32>,
    #[serde(default)]
    pub emoji: Option<String>,
}

impl AiReport {
    pub fn emoji_category(&self) -> Option<EmojiCategory> {
        self.emoji.as_deref().and_then(EmojiCategory::parse)
    }
}

/// The five mood buckets the prompt allows for `emoji`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmojiCategory {
    Overjoyed,
    Happy,
    Neutral,
    Sad,
    Depressed,
}

impl EmojiCategory {
    /// Case-insensitive; tolerates surrounding whitespace and quotes.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().trim_matches('"').to_lowercase();
        match value.as_str() {
            "overjoyed" => Some(Self::Overjoyed),
            "happy" => Some(Self::Happy),
            "neutral" => Some(Self::Neutral),
            "sad" => Some(Self::Sad),
            "depressed" => Some(Self::Depressed),
            _ => None,
        }
    }

    pub fn glyph(self) -> &'static str {
        match self {
            Self::Overjoyed => "😄",
            Self::Happy => "🙂",
            Self::Neutral => "😐",
            Self::Sad => "🙁",
            Self::Depressed => "😞",
        }
    }
}

/// Inference telemetry recorded once per report generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfMetrics {
    pub time_to_first_token_secs: f32,
    pub prefill_speed: f32,
    pub decode_speed: f32,
    pub latency_secs: f32,
    pub accelerator: Accelerator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Accelerator {
    #[default]
    #[serde(rename = "CPU", alias = "cpu")]
    Cpu,
    #[serde(rename = "GPU", alias = "gpu")]
    Gpu,
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accelerator::Cpu => write!(f, "CPU"),
            Accelerator::Gpu => write!(f, "GPU"),
        }
    }
}

impl std::str::FromStr for Accelerator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Accelerator::Cpu),
            "gpu" => Ok(Accelerator::Gpu),
            other => Err(format!("Unknown accelerator '{}' (expected cpu or gpu)", other)),
        }
    }
}

/// Profile fields used to personalise the prompt. Unset fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub gender: String,
    pub date_of_birth: String,
    pub onboarding_completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_wire_names_are_camel_case() {
        let report = AiReport {
            journal_title: "T".to_string(),
            journal_summary: "S".to_string(),
            journal_highlights: vec!["h".to_string()],
            mood: vec!["Calm".to_string()],
            emotion: "Content".to_string(),
            trend: None,
            emoji: Some("happy".to_string()),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["journalTitle"], "T");
        assert_eq!(json["journalHighlights"][0], "h");
    }

    #[test]
    fn test_emoji_category_parse() {
        assert_eq!(EmojiCategory::parse(" Happy "), Some(EmojiCategory::Happy));
        assert_eq!(EmojiCategory::parse("\"sad\""), Some(EmojiCategory::Sad));
        assert_eq!(EmojiCategory::parse("ecstatic"), None);
    }

    #[test]
    fn test_accelerator_round_trip_names() {
        assert_eq!("gpu".parse::<Accelerator>().unwrap(), Accelerator::Gpu);
        assert_eq!(serde_json::to_string(&Accelerator::Cpu).unwrap(), "\"CPU\"");
        assert!("tpu".parse::<Accelerator>().is_err());
    }
}
