//! Pulls a JSON document out of model text that may be fenced or padded with prose.

use serde::de::DeserializeOwned;

use crate::core::error::UpstreamError;

/// Returns the outermost JSON array or object found in `text`, whichever opens first.
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed);

    let start = unfenced.find(['[', '{'])?;
    let close = if unfenced[start..].starts_with('[') { ']' } else { '}' };
    let end = unfenced.rfind(close)?;
    (end > start).then(|| &unfenced[start..=end])
}

/// Parses the JSON embedded in a model answer
pub fn parse_embedded<T: DeserializeOwned>(text: &str) -> Result<T, UpstreamError> {
    let json = extract_json(text)
        .ok_or_else(|| UpstreamError::InvalidResponse(format!("no JSON in answer: {}", preview(text))))?;
    serde_json::from_str(json).map_err(|e| UpstreamError::InvalidResponse(format!("{}: {}", e, preview(json))))
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}
