//! Schema types for declaring settings bags.
//!
//! Some resources accept loosely-structured key/value settings (extension
//! public and protected settings, for instance). Each usage site declares the
//! keys it accepts with a [`SettingsSchema`] so the payload is validated at the
//! request-building stage instead of being passed through untyped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The type of a settings value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// A string value.
    String,
    /// A 64-bit integer.
    Int64,
    /// A 64-bit floating point number.
    Float64,
    /// A boolean value.
    Bool,
    /// A list of values of a single type.
    List(Box<AttributeType>),
    /// A map from string keys to values of a single type.
    Map(Box<AttributeType>),
    /// An object with a fixed set of keys.
    Object(BTreeMap<String, AttributeType>),
    /// Any JSON value (use sparingly).
    Dynamic,
}

impl AttributeType {
    /// Create a list type.
    pub fn list(element_type: AttributeType) -> Self {
        Self::List(Box::new(element_type))
    }

    /// Create a map type.
    pub fn map(element_type: AttributeType) -> Self {
        Self::Map(Box::new(element_type))
    }

    /// Create an object type.
    pub fn object(attributes: BTreeMap<String, AttributeType>) -> Self {
        Self::Object(attributes)
    }
}

/// Describes how a key can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AttributeFlags {
    /// The key must be present.
    pub required: bool,
    /// The key may be omitted.
    pub optional: bool,
    /// The value is a secret and must never be logged or echoed back.
    pub sensitive: bool,
}

impl AttributeFlags {
    /// Create flags for a required key.
    pub fn required() -> Self {
        Self {
            required: true,
            ..Default::default()
        }
    }

    /// Create flags for an optional key.
    pub fn optional() -> Self {
        Self {
            optional: true,
            ..Default::default()
        }
    }

    /// Mark the key as sensitive.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}

/// Describes a single key of a settings bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// The type of the value.
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// Flags describing how the key can be used.
    #[serde(flatten)]
    pub flags: AttributeFlags,
    /// Human-readable description of the key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Value filled in when an optional key is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl Attribute {
    /// Create a new attribute with the given type and flags.
    pub fn new(attr_type: AttributeType, flags: AttributeFlags) -> Self {
        Self {
            attr_type,
            flags,
            description: None,
            default: None,
        }
    }

    /// Create a required string key.
    pub fn required_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::required())
    }

    /// Create an optional string key.
    pub fn optional_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional())
    }

    /// Create a required int64 key.
    pub fn required_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::required())
    }

    /// Create an optional int64 key.
    pub fn optional_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::optional())
    }

    /// Create an optional bool key.
    pub fn optional_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::optional())
    }

    /// Create an optional list-of-strings key.
    pub fn optional_string_list() -> Self {
        Self::new(
            AttributeType::list(AttributeType::String),
            AttributeFlags::optional(),
        )
    }

    /// Set the description for this key.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set a default value for this key.
    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Mark this key as sensitive.
    pub fn sensitive(mut self) -> Self {
        self.flags.sensitive = true;
        self
    }
}

/// The declared shape of one settings bag usage site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsSchema {
    /// Name of the usage site, used in diagnostics.
    pub name: String,
    /// The declared keys.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Attribute>,
    /// Whether keys that are not declared are accepted.
    #[serde(default)]
    pub allow_undeclared: bool,
}

impl SettingsSchema {
    /// Create an empty schema for the named usage site.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
            allow_undeclared: false,
        }
    }

    /// Declare a key.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    /// Accept keys that are not declared.
    pub fn allowing_undeclared(mut self) -> Self {
        self.allow_undeclared = true;
        self
    }

    /// Names of the keys whose values must be hidden.
    pub fn sensitive_keys(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .iter()
            .filter(|(_, attr)| attr.flags.sensitive)
            .map(|(name, _)| name.as_str())
    }

    /// Fill in declared defaults for absent keys.
    pub fn apply_defaults(&self, values: &mut serde_json::Map<String, serde_json::Value>) {
        for (name, attr) in &self.attributes {
            if let Some(default) = &attr.default {
                values
                    .entry(name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
    }
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    /// An error that prevents the request from being sent.
    Error,
    /// A warning that doesn't prevent the request but should be addressed.
    Warning,
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The severity of the diagnostic.
    pub severity: DiagnosticSeverity,
    /// A short summary of the issue.
    pub summary: String,
    /// A detailed description of the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// The key path where the issue occurred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Diagnostic {
    /// Create an error diagnostic.
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Create a warning diagnostic.
    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Add detail to this diagnostic.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Set the key path for this diagnostic.
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    /// Whether this diagnostic blocks the request.
    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}
