use super::LabelAttributes;
use serde_json::Value;
use thiserror::Error;

/// Reasons a labeler response could not be turned into [`LabelAttributes`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelParseError {
    /// No JSON object could be located in the response.
    #[error("no JSON object found in labeler response")]
    NoJsonObject,
    /// A JSON object was found but did not match the label schema.
    #[error("label JSON did not match schema: {0}")]
    Schema(String),
}

/// Extract label attributes from a free-form model answer.
///
/// Markdown code fences are stripped first. When the remainder is not valid JSON on its own,
/// the first balanced `{...}` span is parsed instead.
pub fn parse_label_response(content: &str) -> Result<LabelAttributes, LabelParseError> {
    let cleaned = strip_code_fences(content);
    let value = match serde_json::from_str::<Value>(cleaned.trim()) {
        Ok(value @ Value::Object(_)) => value,
        _ => first_json_object(&cleaned).ok_or(LabelParseError::NoJsonObject)?,
    };
    serde_json::from_value(value).map_err(|err| LabelParseError::Schema(err.to_string()))
}

fn strip_code_fences(content: &str) -> String {
    content
        .trim()
        .replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "")
}

/// Scan for the first `{` whose matching `}` closes a parseable object.
fn first_json_object(content: &str) -> Option<Value> {
    let bytes = content.as_bytes();
    let mut start = 0;
    while let Some(offset) = content[start..].find('{') {
        let open = start + offset;
        if let Some(close) = matching_brace(bytes, open)
            && let Ok(value @ Value::Object(_)) = serde_json::from_str(&content[open..=close])
        {
            return Some(value);
        }
        start = open + 1;
    }
    None
}

fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, &byte) in bytes.iter().enumerate().skip(open) {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}
