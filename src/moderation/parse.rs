//! Fail-closed parsing of classifier responses.
//!
//! Each stage declares one wire schema (a `Deserialize` struct with every
//! field required). Parsing tries, in order:
//! 1. strict JSON on the extracted object
//! 2. per-field regex extraction from the raw text, re-validated through
//!    the same schema
//!
//! Anything that still fails is a `ParseFailure`, and the stage replaces
//! the whole verdict with its single most-restrictive default.

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// How a verdict's fields were recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseSource {
    /// Strict JSON parse of the response.
    Json,
    /// Regex extraction after JSON failed.
    Regex,
    /// Nothing usable; most-restrictive defaults applied.
    FailClosed,
}

/// Why a response could not be turned into a schema value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub reason: String,
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

/// A classifier response schema.
pub trait StageSchema: DeserializeOwned {
    /// Field names, in the order the regex fallback looks for them.
    const FIELDS: &'static [&'static str];
}

/// Parse a raw classifier response into a stage schema.
pub fn parse_schema<S: StageSchema>(raw: &str) -> Result<(S, ParseSource), ParseFailure> {
    if raw.trim().is_empty() {
        return Err(ParseFailure {
            reason: "empty response".into(),
        });
    }

    let json_str = extract_json_object(raw);
    let json_error = match serde_json::from_str::<S>(&json_str) {
        Ok(parsed) => return Ok((parsed, ParseSource::Json)),
        Err(e) => e,
    };

    let fields = extract_fields_by_regex(raw, S::FIELDS);
    let missing: Vec<&str> = S::FIELDS
        .iter()
        .copied()
        .filter(|f| !fields.contains_key(*f))
        .collect();
    if !missing.is_empty() {
        return Err(ParseFailure {
            reason: format!(
                "JSON parse error ({json_error}); regex fallback missing fields: {}",
                missing.join(", ")
            ),
        });
    }

    serde_json::from_value::<S>(Value::Object(fields))
        .map(|parsed| (parsed, ParseSource::Regex))
        .map_err(|e| ParseFailure {
            reason: format!("JSON parse error ({json_error}); regex fallback invalid: {e}"),
        })
}

/// Reject a confidence outside [0, 1] or non-finite.
pub fn check_confidence(confidence: f64) -> Result<f64, ParseFailure> {
    if confidence.is_finite() && (0.0..=1.0).contains(&confidence) {
        Ok(confidence)
    } else {
        Err(ParseFailure {
            reason: format!("confidence {confidence} out of range [0, 1]"),
        })
    }
}

/// Parse an enum field, naming it in the failure.
pub fn parse_field<T>(field: &str, value: &str) -> Result<T, ParseFailure>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse().map_err(|e| ParseFailure {
        reason: format!("{field}: {e}"),
    })
}

/// Pull `key: value` pairs out of free text.
///
/// Accepts quoted strings, numbers and bare words, with or without quoted
/// keys, using `:` or `=`. The first occurrence of each key wins.
fn extract_fields_by_regex(text: &str, keys: &[&str]) -> Map<String, Value> {
    let mut fields = Map::new();
    for key in keys {
        let pattern = format!(
            r#"(?i)["']?\b{}\b["']?\s*[:=]\s*(?:"([^"]*)"|'([^']*)'|([-+]?\d+(?:\.\d+)?)|([A-Za-z_][A-Za-z_\- ]*[A-Za-z_]|[A-Za-z_]))"#,
            regex::escape(key)
        );
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        let Some(caps) = re.captures(text) else {
            continue;
        };

        let value = if let Some(s) = caps.get(1).or_else(|| caps.get(2)) {
            Value::String(s.as_str().to_string())
        } else if let Some(n) = caps.get(3) {
            number_value(n.as_str())
        } else if let Some(w) = caps.get(4) {
            Value::String(w.as_str().trim().to_string())
        } else {
            continue;
        };
        fields.insert((*key).to_string(), value);
    }
    fields
}

fn number_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(Number::from(i));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
pub fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    // Already a JSON object
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return trimmed.to_string();
    }

    // Wrapped in markdown code block
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    // Try to find object bounds
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
