//! Settings bag validation.
//!
//! Validates a `serde_json::Value` against a [`SettingsSchema`] and reports
//! every problem found as a [`Diagnostic`], so a user fixing their input sees
//! all of the issues at once.
//!
//! # Example
//!
//! ```
//! use resource_pipeline::schema::{Attribute, SettingsSchema};
//! use resource_pipeline::validation::validate;
//! use serde_json::json;
//!
//! let schema = SettingsSchema::new("example")
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute("count", Attribute::optional_int64());
//!
//! let diagnostics = validate(&schema, &json!({"name": "test", "count": 42}));
//! assert!(diagnostics.is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "test", "count": "not a number"}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("count".to_string()));
//! ```

use crate::error::PipelineError;
use crate::schema::{Attribute, AttributeType, Diagnostic, DiagnosticSeverity, SettingsSchema};
use serde_json::Value;
use std::collections::BTreeMap;

/// Validate a JSON value against a settings schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// # Validation Rules
///
/// - The value must be an object (null is treated as an empty object)
/// - Required keys must be present and non-null
/// - Optional keys may be absent or null
/// - Value types must match the schema
/// - Undeclared keys are rejected unless the schema allows them
pub fn validate(schema: &SettingsSchema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let empty = serde_json::Map::new();
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => {
            diagnostics.push(
                Diagnostic::error(format!("Expected object for {}", schema.name))
                    .with_detail(format!("Got {}", value_type_name(value))),
            );
            return diagnostics;
        },
    };

    for (name, attr) in &schema.attributes {
        validate_attribute(attr, obj.get(name), name, &mut diagnostics);
    }

    if !schema.allow_undeclared {
        for key in obj.keys() {
            if !schema.attributes.contains_key(key) {
                diagnostics.push(
                    Diagnostic::error(format!("Unknown key '{}' in {}", key, schema.name))
                        .with_detail(format!(
                            "Accepted keys: {}",
                            schema
                                .attributes
                                .keys()
                                .map(String::as_str)
                                .collect::<Vec<_>>()
                                .join(", ")
                        ))
                        .with_attribute(key.as_str()),
                );
            }
        }
    }

    diagnostics
}

/// Validate a JSON value against a schema, returning Ok if valid or Err with diagnostics.
///
/// This is a convenience wrapper around [`validate`] that returns a Result.
pub fn validate_result(schema: &SettingsSchema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Validate and convert failures into [`PipelineError::InvalidArgument`].
pub fn ensure_valid(schema: &SettingsSchema, value: &Value) -> Result<(), PipelineError> {
    validate_result(schema, value).map_err(|diagnostics| {
        PipelineError::invalid_with_diagnostics(
            format!(
                "{} has {} problem(s): {}",
                schema.name,
                diagnostics.len(),
                diagnostics
                    .iter()
                    .map(|d| d.summary.as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            ),
            diagnostics,
        )
    })
}

/// Check if a JSON value is valid against a schema.
pub fn is_valid(schema: &SettingsSchema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required key '{}'", path))
                        .with_detail("This key is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => {
            validate_attribute_type(&attr.attr_type, v, path, diagnostics);
        },
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        },
        AttributeType::Float64 => {
            if !value.is_number() {
                diagnostics.push(type_error(path, "float64", value));
            }
        },
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        },
        AttributeType::List(element_type) => {
            if let Some(arr) = value.as_array() {
                for (i, elem) in arr.iter().enumerate() {
                    let elem_path = format!("{}.{}", path, i);
                    validate_attribute_type(element_type, elem, &elem_path, diagnostics);
                }
            } else {
                diagnostics.push(type_error(path, "list", value));
            }
        },
        AttributeType::Map(value_type) => {
            if let Some(obj) = value.as_object() {
                for (key, val) in obj {
                    let key_path = format!("{}.{}", path, key);
                    validate_attribute_type(value_type, val, &key_path, diagnostics);
                }
            } else {
                diagnostics.push(type_error(path, "map", value));
            }
        },
        AttributeType::Object(attrs) => {
            if let Some(obj) = value.as_object() {
                validate_object_type(attrs, obj, path, diagnostics);
            } else {
                diagnostics.push(type_error(path, "object", value));
            }
        },
        AttributeType::Dynamic => {},
    }
}

fn validate_object_type(
    attrs: &BTreeMap<String, AttributeType>,
    obj: &serde_json::Map<String, Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for (name, attr_type) in attrs {
        let attr_path = format!("{}.{}", path, name);
        if let Some(value) = obj.get(name) {
            validate_attribute_type(attr_type, value, &attr_path, diagnostics);
        }
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            if n.as_i64().is_some() {
                true
            } else if let Some(f) = n.as_f64() {
                f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64
            } else {
                false
            }
        },
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic {
        severity: DiagnosticSeverity::Error,
        summary: format!("Invalid type for key '{}'", path),
        detail: Some(format!(
            "Expected {}, got {}",
            expected,
            value_type_name(got)
        )),
        attribute: Some(path.to_string()),
    }
}
