//! Extracts the report JSON from free-form model output.

use crate::models::AiReport;

/// Slice from the first `{` to the last `}` inclusive, if both exist in order.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end > start {
        Some(&raw[start..=end])
    } else {
        None
    }
}

/// Decode the report embedded in `raw`. Model output is not guaranteed to be
/// well formed, so any failure yields `None` instead of an error.
pub fn parse_report(raw: &str) -> Option<AiReport> {
    let Some(json) = extract_json_object(raw) else {
        tracing::warn!("Model output contains no JSON object");
        return None;
    };
    match serde_json::from_str::<AiReport>(json) {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::warn!("Failed to decode report JSON: {}", e);
            None
        }
    }
}
