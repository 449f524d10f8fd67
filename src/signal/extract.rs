use anyhow::{bail, Result};
use serde_json::Value;

/// Pull the model's text out of a Responses API body.
///
/// Tries the `output_text` convenience field (string or list of strings),
/// then the first `output[].content[]` item of type `output_text`.
pub fn extract_text(body: &Value) -> Result<String> {
    match body.get("output_text") {
        Some(Value::String(text)) if !text.trim().is_empty() => return Ok(text.clone()),
        Some(Value::Array(parts)) => {
            let joined: String = parts.iter().filter_map(Value::as_str).collect();
            if !joined.trim().is_empty() {
                return Ok(joined);
            }
        }
        _ => {}
    }

    let items = body
        .get("output")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for item in items {
        let contents = item
            .get("content")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for content in contents {
            if content.get("type").and_then(Value::as_str) != Some("output_text") {
                continue;
            }
            if let Some(text) = content.get("text").and_then(Value::as_str) {
                if !text.is_empty() {
                    return Ok(text.to_string());
                }
            }
        }
    }

    bail!("Empty or invalid response content")
}

/// Find the JSON object or array that ends the text.
///
/// The model may reason in prose first; only the trailing balanced JSON
/// value counts. Returns `None` if the text does not end in valid JSON.
pub fn extract_trailing_json(text: &str) -> Option<Value> {
    let trimmed = text.trim_end();
    let last = trimmed.chars().last()?;
    if last != '}' && last != ']' {
        return None;
    }

    let opener = if last == '}' { '{' } else { '[' };
    trimmed
        .char_indices()
        .rev()
        .filter(|(_, c)| *c == opener)
        .find_map(|(start, _)| serde_json::from_str::<Value>(&trimmed[start..]).ok())
}
