//! Structural schemas for model output.
//!
//! A `Schema` describes the shape a structured model response must have.
//! `validate` is a pure predicate: it never mutates or repairs the candidate,
//! it only reports every place where the candidate departs from the shape.
//! The gateway treats any reported issue as a reason to regenerate.

use std::fmt::Write as _;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    String {
        allowed: Option<Vec<String>>,
    },
    /// A name: non-empty, no leading or trailing whitespace.
    Label,
    Number {
        minimum: Option<f64>,
        maximum: Option<f64>,
    },
    Integer,
    Boolean,
    Array {
        items: Box<Schema>,
        max_items: Option<usize>,
    },
    Object {
        properties: Vec<Property>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub schema: Schema,
    pub required: bool,
}

impl Property {
    pub fn required(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            required: false,
        }
    }
}

/// Every structural issue found in one candidate, with a path to each.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("response does not match schema: {}", .issues.join("; "))]
pub struct SchemaError {
    pub issues: Vec<String>,
}

impl SchemaError {
    pub fn with_issue(issue: impl Into<String>) -> Self {
        Self {
            issues: vec![issue.into()],
        }
    }
}

impl Schema {
    pub fn string() -> Self {
        Schema::String { allowed: None }
    }

    /// A string restricted to the given values.
    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Schema::String {
            allowed: Some(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn label() -> Self {
        Schema::Label
    }

    pub fn number() -> Self {
        Schema::Number {
            minimum: None,
            maximum: None,
        }
    }

    pub fn number_between(minimum: f64, maximum: f64) -> Self {
        Schema::Number {
            minimum: Some(minimum),
            maximum: Some(maximum),
        }
    }

    pub fn array(items: Schema) -> Self {
        Schema::Array {
            items: Box::new(items),
            max_items: None,
        }
    }

    pub fn array_up_to(items: Schema, max_items: usize) -> Self {
        Schema::Array {
            items: Box::new(items),
            max_items: Some(max_items),
        }
    }

    pub fn object(properties: Vec<Property>) -> Self {
        Schema::Object { properties }
    }

    /// Check `value` against this schema. Extra object keys are tolerated;
    /// missing required keys, wrong types, out-of-range numbers, values
    /// outside an enum, blank or padded labels and oversized arrays are not.
    pub fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        let mut issues = Vec::new();
        check(self, value, "$", &mut issues);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(SchemaError { issues })
        }
    }

    /// Build a synthetic instance of this schema, used in prompts as a
    /// formatting guide. Arrays get a single element unless capped at zero.
    pub fn example_instance(&self) -> Value {
        match self {
            Schema::String { allowed: Some(values) } => values
                .first()
                .map(|v| Value::String(v.clone()))
                .unwrap_or_else(|| Value::String("string".into())),
            Schema::String { allowed: None } => Value::String("string".into()),
            Schema::Label => Value::String("Label".into()),
            Schema::Number { minimum, maximum } => {
                let lo = minimum.unwrap_or(0.0);
                let hi = maximum.unwrap_or(lo + 1.0);
                json!((lo + hi) / 2.0)
            }
            Schema::Integer => json!(0),
            Schema::Boolean => json!(true),
            Schema::Array {
                max_items: Some(0),
                ..
            } => Value::Array(Vec::new()),
            Schema::Array { items, .. } => Value::Array(vec![items.example_instance()]),
            Schema::Object { properties } => {
                let mut obj = Map::new();
                for prop in properties {
                    obj.insert(prop.name.clone(), prop.schema.example_instance());
                }
                Value::Object(obj)
            }
        }
    }

    /// Render as a JSON Schema document for inclusion in prompts.
    pub fn to_json_schema(&self) -> Value {
        match self {
            Schema::String { allowed: None } => json!({"type": "string"}),
            Schema::String {
                allowed: Some(values),
            } => json!({"type": "string", "enum": values}),
            Schema::Label => json!({"type": "string", "minLength": 1, "pattern": "^\\S(.*\\S)?$"}),
            Schema::Number { minimum, maximum } => {
                let mut obj = Map::new();
                obj.insert("type".into(), json!("number"));
                if let Some(min) = minimum {
                    obj.insert("minimum".into(), json!(min));
                }
                if let Some(max) = maximum {
                    obj.insert("maximum".into(), json!(max));
                }
                Value::Object(obj)
            }
            Schema::Integer => json!({"type": "integer"}),
            Schema::Boolean => json!({"type": "boolean"}),
            Schema::Array { items, max_items } => {
                let mut obj = Map::new();
                obj.insert("type".into(), json!("array"));
                obj.insert("items".into(), items.to_json_schema());
                if let Some(max) = max_items {
                    obj.insert("maxItems".into(), json!(max));
                }
                Value::Object(obj)
            }
            Schema::Object { properties } => {
                let props: Map<String, Value> = properties
                    .iter()
                    .map(|p| (p.name.clone(), p.schema.to_json_schema()))
                    .collect();
                let required: Vec<&str> = properties
                    .iter()
                    .filter(|p| p.required)
                    .map(|p| p.name.as_str())
                    .collect();
                json!({"type": "object", "properties": props, "required": required})
            }
        }
    }
}

fn check(schema: &Schema, value: &Value, path: &str, issues: &mut Vec<String>) {
    match schema {
        Schema::String { allowed } => match value {
            Value::String(s) => {
                if let Some(values) = allowed {
                    if !values.iter().any(|v| v == s) {
                        issues.push(format!("{path}: '{s}' is not one of the allowed values"));
                    }
                }
            }
            other => issues.push(type_issue(path, "string", other)),
        },
        Schema::Label => match value {
            Value::String(s) if s.trim().is_empty() => {
                issues.push(format!("{path}: name must not be blank"))
            }
            Value::String(s) if s.trim() != s => {
                issues.push(format!("{path}: '{s}' has leading or trailing whitespace"))
            }
            Value::String(_) => {}
            other => issues.push(type_issue(path, "string", other)),
        },
        Schema::Number { minimum, maximum } => match value.as_f64() {
            Some(n) if value.is_number() => {
                if minimum.is_some_and(|min| n < min) || maximum.is_some_and(|max| n > max) {
                    issues.push(format!("{path}: {n} is out of range"));
                }
            }
            _ => issues.push(type_issue(path, "number", value)),
        },
        Schema::Integer => {
            if !(value.is_i64() || value.is_u64()) {
                issues.push(type_issue(path, "integer", value));
            }
        }
        Schema::Boolean => {
            if !value.is_boolean() {
                issues.push(type_issue(path, "boolean", value));
            }
        }
        Schema::Array { items, max_items } => match value {
            Value::Array(elements) => {
                if let Some(max) = max_items {
                    if elements.len() > *max {
                        issues.push(format!(
                            "{path}: expected at most {max} items, got {}",
                            elements.len()
                        ));
                    }
                }
                for (idx, element) in elements.iter().enumerate() {
                    check(items, element, &format!("{path}[{idx}]"), issues);
                }
            }
            other => issues.push(type_issue(path, "array", other)),
        },
        Schema::Object { properties } => match value {
            Value::Object(obj) => {
                for prop in properties {
                    let child = format!("{path}.{}", prop.name);
                    match obj.get(&prop.name) {
                        Some(v) => check(&prop.schema, v, &child, issues),
                        None if prop.required => {
                            issues.push(format!("{child}: required field is missing"))
                        }
                        None => {}
                    }
                }
            }
            other => issues.push(type_issue(path, "object", other)),
        },
    }
}

fn type_issue(path: &str, expected: &str, got: &Value) -> String {
    let kind = match got {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    format!("{path}: expected {expected}, got {kind}")
}

fn fence_regex() -> &'static Regex {
    static FENCE_RE: OnceLock<Regex> = OnceLock::new();
    FENCE_RE.get_or_init(|| {
        Regex::new(r"(?s)^```[A-Za-z0-9_-]*\s*\n?(.*?)\s*```$").expect("fence regex compiles")
    })
}

/// Remove a surrounding Markdown code fence (```` ```json … ``` ````), if any.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    match fence_regex().captures(trimmed).and_then(|caps| caps.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

/// Prompt section describing the expected output shape.
pub fn format_instructions(schema: &Schema) -> String {
    let mut out = String::new();
    out.push_str("Respond with JSON only, no commentary. The JSON must match this schema:\n");
    let _ = writeln!(out, "{}", schema.to_json_schema());
    out.push_str("Example of the expected format:\n");
    let example = serde_json::to_string_pretty(&schema.example_instance()).unwrap_or_default();
    out.push_str(&example);
    out
}
