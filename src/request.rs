//! Request building blocks.
//!
//! Resource mappings turn canonical settings into a [`RequestBody`] using the
//! helpers here. Everything in this module is pure: nothing talks to the
//! management client, so a malformed request is rejected before it is sent.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PipelineError;
use crate::schema::SettingsSchema;
use crate::validation::ensure_valid;

/// The provider request body for a create or update call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestBody(serde_json::Map<String, Value>);

impl RequestBody {
    /// Create an empty body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a top-level field.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Set a top-level field when a value is present.
    pub fn with_optional(self, key: impl Into<String>, value: Option<Value>) -> Self {
        match value {
            Some(value) => self.with(key, value),
            None => self,
        }
    }

    /// Set a key inside the `properties` object.
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        let properties = self
            .0
            .entry("properties")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Value::Object(map) = properties {
            map.insert(key.into(), value);
        }
        self
    }

    /// Set a key inside the `properties` object when a value is present.
    pub fn with_optional_property(self, key: impl Into<String>, value: Option<Value>) -> Self {
        match value {
            Some(value) => self.with_property(key, value),
            None => self,
        }
    }

    /// Set the `tags` field when there are any.
    pub fn with_tags(self, tags: &BTreeMap<String, String>) -> Self {
        if tags.is_empty() {
            self
        } else {
            self.with("tags", serde_json::json!(tags))
        }
    }

    /// A top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// A key inside the `properties` object.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.0
            .get("properties")
            .and_then(Value::as_object)
            .and_then(|props| props.get(key))
    }

    /// The body as a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// A string-valued choice accepted by a provider API.
///
/// Implemented by small enums whose variants map to fixed wire strings.
pub trait Choice: Sized + Copy + 'static {
    /// Every variant with its wire name.
    const VARIANTS: &'static [(&'static str, Self)];

    /// The wire name of this variant.
    fn as_str(&self) -> &'static str;
}

/// Parse a user-supplied string into a [`Choice`], ignoring ASCII case.
///
/// # Examples
///
/// ```
/// use resource_pipeline::request::{parse_enum, Choice};
///
/// #[derive(Debug, Clone, Copy, PartialEq)]
/// enum Protocol { Http, Https }
///
/// impl Choice for Protocol {
///     const VARIANTS: &'static [(&'static str, Self)] =
///         &[("Http", Protocol::Http), ("Https", Protocol::Https)];
///     fn as_str(&self) -> &'static str {
///         match self { Protocol::Http => "Http", Protocol::Https => "Https" }
///     }
/// }
///
/// assert_eq!(parse_enum::<Protocol>("Protocol", "HTTPS").unwrap(), Protocol::Https);
/// assert!(parse_enum::<Protocol>("Protocol", "ftp").is_err());
/// ```
pub fn parse_enum<E: Choice>(parameter: &str, value: &str) -> Result<E, PipelineError> {
    E::VARIANTS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(value.trim()))
        .map(|(_, variant)| *variant)
        .ok_or_else(|| {
            PipelineError::invalid_argument(format!(
                "'{}' is not a valid value for {}; expected one of: {}",
                value,
                parameter,
                E::VARIANTS
                    .iter()
                    .map(|(name, _)| *name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
}

/// Parse a boolean-like string flag (`"true"` / `"false"`, any case).
pub fn parse_flag(parameter: &str, value: &str) -> Result<bool, PipelineError> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if trimmed.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(PipelineError::invalid_argument(format!(
            "'{}' is not a valid value for {}; expected 'true' or 'false'",
            value, parameter
        )))
    }
}

/// A key/value settings payload validated against a declared [`SettingsSchema`].
///
/// `Debug` prints only the keys so protected values never reach the logs.
#[derive(Clone, Default, PartialEq)]
pub struct SettingsBag {
    values: serde_json::Map<String, Value>,
}

impl SettingsBag {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bag from a JSON object; `null` yields an empty bag.
    pub fn from_value(value: Value) -> Result<Self, PipelineError> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            Value::Null => Ok(Self::new()),
            other => Err(PipelineError::invalid_argument(format!(
                "settings must be an object, got {}",
                other
            ))),
        }
    }

    /// Add a value.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Whether the bag has no keys.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// A value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Keys present in the bag.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Apply the schema's defaults, validate, and return the payload to send.
    pub fn validated(&self, schema: &SettingsSchema) -> Result<Value, PipelineError> {
        let mut values = self.values.clone();
        schema.apply_defaults(&mut values);
        let value = Value::Object(values);
        ensure_valid(schema, &value)?;
        Ok(value)
    }

    /// The payload with sensitive values masked.
    pub fn redacted(&self, schema: &SettingsSchema) -> Value {
        let mut values = self.values.clone();
        for key in schema.sensitive_keys() {
            if let Some(value) = values.get_mut(key) {
                *value = Value::String("***".to_string());
            }
        }
        Value::Object(values)
    }
}

impl fmt::Debug for SettingsBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsBag")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}
