//! Coercion of loosely formatted model output into the strict data contract.
//!
//! Vision models wrap their JSON in markdown fences, prepend analysis text,
//! truncate strings and drift between field names. Everything here returns a
//! tagged result; no input, however broken, may panic or escape as an opaque
//! error.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::dto::FoodItem;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CoerceError {
    #[error("response root is not a JSON object")]
    NotAnObject,
    #[error("invalid items payload: {0}")]
    InvalidItems(String),
}

/// Repairs `raw` into a JSON object.
///
/// When a ```json fence is present only the fenced span counts; any prose
/// before it is treated as preamble. Otherwise the whole text is a
/// best-effort JSON source: exact parse first, then the first balanced
/// `{...}`/`[...]` block (repaired if needed), then a repair of the entire
/// text. A root that is not an object (bare string, array, garbage) is
/// reported as [`CoerceError::NotAnObject`], never as a default value.
pub fn coerce_object(raw: &str) -> Result<Map<String, Value>, CoerceError> {
    let text = canonical_span(raw.trim());
    let text = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return into_object(value);
    }
    if let Some(span) = extract_first_balanced(text) {
        if let Ok(value) = serde_json::from_str::<Value>(&span) {
            return into_object(value);
        }
        if let Ok(value) = json_repair::repair_json_string(&span) {
            return into_object(value);
        }
    }
    if let Ok(value) = json_repair::repair_json_string(text) {
        return into_object(value);
    }
    Err(CoerceError::NotAnObject)
}

fn into_object(value: Value) -> Result<Map<String, Value>, CoerceError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(CoerceError::NotAnObject),
    }
}

/// Returns the span the model designated as its actual answer: the content of
/// the first ```json fence when one exists, the fence-stripped text otherwise.
fn canonical_span(s: &str) -> &str {
    if let Some(idx) = s.find("```json") {
        let rest = &s[idx + "```json".len()..];
        match rest.find("```") {
            Some(end) => &rest[..end],
            None => rest,
        }
    } else {
        strip_code_fences(s)
    }
}

fn strip_code_fences(s: &str) -> &str {
    let s = s.strip_prefix("```").unwrap_or(s);
    let s = s.strip_suffix("```").unwrap_or(s);
    s
}

/// Extracts the first balanced JSON object or array, skipping string contents.
fn extract_first_balanced(s: &str) -> Option<String> {
    let mut in_str = false;
    let mut esc = false;
    let mut stack: Vec<char> = Vec::new();
    let mut start: Option<usize> = None;

    for (i, ch) in s.char_indices() {
        if in_str {
            if esc {
                esc = false;
            } else if ch == '\\' {
                esc = true;
            } else if ch == '"' {
                in_str = false;
            }
            continue;
        }

        match ch {
            '"' => in_str = true,
            '{' | '[' => {
                if start.is_none() {
                    start = Some(i);
                }
                stack.push(ch);
            }
            '}' | ']' => {
                if let Some(open) = stack.pop() {
                    let matches = (open == '{' && ch == '}') || (open == '[' && ch == ']');
                    if !matches {
                        stack.clear();
                        start = None;
                        continue;
                    }
                    if stack.is_empty() {
                        let st = start.unwrap_or(0);
                        return Some(s[st..=i].to_string());
                    }
                } else {
                    start = None;
                }
            }
            _ => {}
        }
    }
    None
}

/// Folds alternate upstream key names into the canonical ones. The canonical
/// key wins when both are present. Idempotent.
pub fn normalize_item_fields(item: &mut Map<String, Value>) {
    const ALIASES: [(&str, &str); 3] = [
        ("carbs", "carbohydrates"),
        ("calories", "kcal"),
        ("amount_grams", "grams"),
    ];
    for (alias, canonical) in ALIASES {
        if let Some(value) = item.remove(alias) {
            item.entry(canonical.to_string()).or_insert(value);
        }
    }
}

/// Clamps a confidence-like value into [0, 1]. NaN collapses to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Reads a numeric field, accepting numbers and numeric strings (models emit
/// both). Non-finite values are rejected.
pub fn as_f64_lenient(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Validates the coerced recognition payload into food items plus notes.
///
/// A missing `items` key counts as an empty list (the orchestrator decides
/// what an empty result means); a present non-list `items` is an error.
pub fn parse_food_items(
    data: &Map<String, Value>,
) -> Result<(Vec<FoodItem>, Option<String>), CoerceError> {
    let items_raw = match data.get("items") {
        None | Some(Value::Null) => &[] as &[Value],
        Some(Value::Array(list)) => list.as_slice(),
        Some(other) => {
            return Err(CoerceError::InvalidItems(format!(
                "items must be a list, got {}",
                type_name(other)
            )))
        }
    };

    let mut items = Vec::with_capacity(items_raw.len());
    for raw in items_raw {
        let Value::Object(obj) = raw else {
            return Err(CoerceError::InvalidItems(format!(
                "item must be an object, got {}",
                type_name(raw)
            )));
        };
        let mut obj = obj.clone();
        normalize_item_fields(&mut obj);

        let name = match obj.get("name") {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(other) => other.to_string(),
            None => return Err(CoerceError::InvalidItems("missing field `name`".into())),
        };
        if name.is_empty() {
            return Err(CoerceError::InvalidItems("item name is empty".into()));
        }

        items.push(FoodItem {
            name,
            grams: required_f64(&obj, "grams")?,
            kcal: required_f64(&obj, "kcal")?,
            protein: required_f64(&obj, "protein")?,
            fat: required_f64(&obj, "fat")?,
            carbohydrates: required_f64(&obj, "carbohydrates")?,
        });
    }

    let model_notes = match data.get("model_notes") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };

    Ok((items, model_notes))
}

fn required_f64(obj: &Map<String, Value>, key: &str) -> Result<f64, CoerceError> {
    let value = obj
        .get(key)
        .ok_or_else(|| CoerceError::InvalidItems(format!("missing field `{key}`")))?;
    let n = as_f64_lenient(value)
        .ok_or_else(|| CoerceError::InvalidItems(format!("field `{key}` is not numeric")))?;
    // negative macros are model noise, floor them at zero
    Ok(n.max(0.0))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
