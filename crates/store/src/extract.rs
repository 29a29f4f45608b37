//! Field extraction from structured secret payloads.
//!
//! Shared by every backend: when a reference carries `#field`, the raw
//! payload is parsed as JSON first, then YAML, and the named top-level key
//! is selected. Scalars are coerced to their canonical textual form;
//! composites re-serialize as JSON. An unstructured payload with a field
//! request is a `Validation` error.

use serde_json::Value;
use umbra_error::{Result, UmbraError};

/// Apply the field-extraction policy to a raw payload.
///
/// With no field, the raw payload passes through untouched. `store` and
/// `path` only feed error messages.
pub fn extract_field(store: &str, path: &str, raw: &str, field: Option<&str>) -> Result<String> {
    let Some(field) = field.filter(|f| !f.is_empty()) else {
        return Ok(raw.to_string());
    };

    let Some(doc) = parse_structured(raw) else {
        return Err(UmbraError::validation_field(
            store,
            field,
            format!(
                "field '{field}' requested but the secret at '{path}' is not a structured document"
            ),
        ));
    };

    match doc.get(field) {
        Some(value) => Ok(coerce_scalar(value)),
        None => {
            let mut available: Vec<&str> = doc
                .as_object()
                .map(|m| m.keys().map(String::as_str).collect())
                .unwrap_or_default();
            available.sort_unstable();
            Err(UmbraError::validation_field(
                store,
                field,
                format!(
                    "field '{field}' not found in secret at '{path}'; available fields: {}",
                    if available.is_empty() {
                        "(none)".to_string()
                    } else {
                        available.join(", ")
                    }
                ),
            ))
        }
    }
}

/// Parse `raw` as a JSON object, falling back to a YAML mapping.
///
/// Returns `None` for anything that is not a top-level map: plain strings,
/// numbers, sequences.
fn parse_structured(raw: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        if value.is_object() {
            return Some(value);
        }
        // Valid JSON but not an object; YAML would parse it the same way.
        return None;
    }
    let yaml: serde_yaml::Value = serde_yaml::from_str(raw).ok()?;
    let value = serde_json::to_value(yaml).ok()?;
    value.is_object().then_some(value)
}

/// Canonical textual form of a selected value.
///
/// Strings pass through; integers print in decimal; floats use the shortest
/// round-trip form; booleans are `true`/`false`; null is empty; composites
/// re-serialize as JSON.
fn coerce_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        composite => serde_json::to_string(composite).unwrap_or_default(),
    }
}
