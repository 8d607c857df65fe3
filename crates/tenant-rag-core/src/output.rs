//! Structured output contract for language-model answers.
//!
//! A response shape implements [`StructuredOutput`] by declaring its JSON
//! Schema. An [`OutputContract`] built from that shape produces
//!
//! - [`format_instructions`](OutputContract::format_instructions): text to
//!   embed in the system instruction telling the model exactly what to emit;
//! - [`convert`](OutputContract::convert): a tagged conversion from the raw
//!   model reply to either a validated instance or an [`OutputError`]
//!   listing every schema violation found.
//!
//! Conversion never fills in defaults for missing fields and never guesses
//! at JSON buried inside prose. The only leniency is stripping a single
//! markdown code fence around the whole reply.
//!
//! Supported schema keywords: `type` (single or list), `properties`,
//! `required`, `additionalProperties: false`, `items`, `enum`.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// A response shape the model must produce.
pub trait StructuredOutput: DeserializeOwned + Serialize {
    /// JSON Schema describing the shape (an object schema).
    fn json_schema() -> Value;
}

/// One place where a reply departs from the schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// JSON path of the offending value, e.g. `$.references[0].source`.
    pub path: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Why a model reply could not be converted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OutputError {
    #[error("model output is empty")]
    Empty,
    #[error("model output is not valid JSON: {0}")]
    NotJson(String),
    #[error("model output violates the response schema: {}", join_violations(.0))]
    SchemaViolation(Vec<Violation>),
    #[error("model output could not be decoded: {0}")]
    Decode(String),
}

impl OutputError {
    /// Violations carried by this error (empty for non-schema failures).
    pub fn violations(&self) -> &[Violation] {
        match self {
            OutputError::SchemaViolation(v) => v,
            _ => &[],
        }
    }
}

fn join_violations(v: &[Violation]) -> String {
    v.iter().map(|x| x.to_string()).collect::<Vec<_>>().join("; ")
}

/// Format instructions and converter for one response shape.
pub struct OutputContract<T> {
    schema: Value,
    _shape: PhantomData<fn() -> T>,
}

impl<T: StructuredOutput> Default for OutputContract<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: StructuredOutput> OutputContract<T> {
    pub fn new() -> Self {
        Self {
            schema: T::json_schema(),
            _shape: PhantomData,
        }
    }

    /// Machine-readable format specification for a model instruction.
    pub fn format_instructions(&self) -> String {
        let schema = serde_json::to_string_pretty(&self.schema).unwrap_or_else(|_| self.schema.to_string());
        format!(
            "Respond with a single JSON object and nothing else.\n\
             The object must conform to the JSON Schema below: include every required field, \
             add no other fields, and use the declared value types.\n\
             Do not wrap the JSON in markdown code fences and do not add commentary.\n\
             JSON Schema:\n{}",
            schema
        )
    }

    /// Convert a raw model reply into `T`, or report why it does not fit.
    pub fn convert(&self, raw: &str) -> Result<T, OutputError> {
        let body = strip_code_fence(raw);
        if body.is_empty() {
            return Err(OutputError::Empty);
        }

        let value: Value =
            serde_json::from_str(body).map_err(|e| OutputError::NotJson(e.to_string()))?;

        let violations = validate(&self.schema, &value);
        if !violations.is_empty() {
            return Err(OutputError::SchemaViolation(violations));
        }

        serde_json::from_value(value).map_err(|e| OutputError::Decode(e.to_string()))
    }
}

/// Remove one surrounding markdown code fence (```` ``` ```` or ```` ```json ````).
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening fence line.
    match body.find('\n') {
        Some(nl) => body[nl + 1..].trim(),
        None => body.trim(),
    }
}

/// Validate `value` against `schema`, returning every violation found.
pub fn validate(schema: &Value, value: &Value) -> Vec<Violation> {
    let mut out = Vec::new();
    validate_at(schema, value, "$", &mut out);
    out
}

fn validate_at(schema: &Value, value: &Value, path: &str, out: &mut Vec<Violation>) {
    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(s) => vec![s.as_str()],
            Value::Array(a) => a.iter().filter_map(|t| t.as_str()).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| type_matches(t, value)) {
            out.push(Violation {
                path: path.to_string(),
                message: format!(
                    "expected {}, got {}",
                    allowed.join(" or "),
                    json_type_name(value)
                ),
            });
            return;
        }
    }

    if let Some(enum_values) = schema.get("enum").and_then(|e| e.as_array()) {
        if !enum_values.contains(value) {
            let allowed: Vec<String> = enum_values.iter().map(|v| v.to_string()).collect();
            out.push(Violation {
                path: path.to_string(),
                message: format!("must be one of [{}], got {}", allowed.join(", "), value),
            });
        }
    }

    match value {
        Value::Object(obj) => {
            let properties = schema.get("properties").and_then(|p| p.as_object());

            if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
                for field in required.iter().filter_map(|f| f.as_str()) {
                    if !obj.contains_key(field) {
                        out.push(Violation {
                            path: format!("{}.{}", path, field),
                            message: "missing required field".to_string(),
                        });
                    }
                }
            }

            let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));
            for (key, child) in obj {
                match properties.and_then(|p| p.get(key)) {
                    Some(child_schema) => {
                        validate_at(child_schema, child, &format!("{}.{}", path, key), out)
                    }
                    None if closed => out.push(Violation {
                        path: format!("{}.{}", path, key),
                        message: "unexpected field".to_string(),
                    }),
                    None => {}
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    validate_at(item_schema, item, &format!("{}[{}]", path, i), out);
                }
            }
        }
        _ => {}
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
