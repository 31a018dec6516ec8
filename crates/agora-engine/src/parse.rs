//! Permissive extraction of JSON from model output.

use serde_json::Value;

/// Extract the JSON-looking span from a response that may wrap it in
/// markdown code fences or prose.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    let open = trimmed.find(['{', '[']);
    let close = trimmed.rfind(['}', ']']);
    if let (Some(start), Some(end)) = (open, close) {
        if end > start {
            return &trimmed[start..=end];
        }
    }
    trimmed
}

/// Try the raw text first, then the extracted span.
pub fn try_parse_value(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    serde_json::from_str(extract_json(trimmed)).ok()
}
