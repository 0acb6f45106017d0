//! Projection of raw provider resources into presentation models.
//!
//! A [`PresentationModel`] carries every raw field unchanged, plus the
//! resource group name derived from the id and any legacy field names the
//! resource mapping still exposes for backward compatibility.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::Resource;
use crate::error::PipelineError;
use crate::identifier::ResourceIdentity;

/// A backward-compatible top-level field copied from a nested raw field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyField {
    /// The name exposed on the presentation model.
    pub name: &'static str,
    /// Dotted path into the raw resource, e.g. `properties.requestTimeout`.
    pub path: &'static str,
}

impl LegacyField {
    /// Declare a legacy field.
    pub const fn new(name: &'static str, path: &'static str) -> Self {
        Self { name, path }
    }
}

/// The output shape handed back to the command host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PresentationModel {
    /// The full resource path.
    pub id: String,
    /// The resource name.
    pub name: String,
    /// Resource group, derived from [`PresentationModel::id`].
    pub resource_group_name: String,
    /// The fully-qualified resource type.
    #[serde(rename = "Type", default)]
    pub resource_type: String,
    /// The region, when the resource has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Resource tags.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// Raw fields and legacy aliases.
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

impl PresentationModel {
    /// The identity encoded in [`PresentationModel::id`].
    pub fn identity(&self) -> Result<ResourceIdentity, PipelineError> {
        ResourceIdentity::parse(&self.id)
    }

    /// A field by top-level name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// A raw field by dotted path.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        lookup_fields(&self.fields, path)
    }
}

/// Walk a dotted path through nested objects.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|key| !key.is_empty())
        .try_fold(value, |current, key| current.as_object()?.get(key))
}

fn lookup_fields<'a>(fields: &'a serde_json::Map<String, Value>, path: &str) -> Option<&'a Value> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let value = fields.get(head)?;
    match rest {
        Some(rest) => lookup_path(value, rest),
        None => Some(value),
    }
}

/// Project a raw resource.
///
/// Fails with [`PipelineError::MalformedIdentifier`] when the raw id cannot be parsed.
pub fn project(
    resource: Resource,
    legacy_fields: &[LegacyField],
) -> Result<PresentationModel, PipelineError> {
    let identity = ResourceIdentity::parse(&resource.id)?;

    let mut fields = resource.fields;
    for legacy in legacy_fields {
        if let Some(value) = lookup_fields(&fields, legacy.path).cloned() {
            fields.insert(legacy.name.to_string(), value);
        }
    }

    Ok(PresentationModel {
        id: resource.id,
        name: resource.name,
        resource_group_name: identity.resource_group_name,
        resource_type: resource.resource_type,
        location: resource.location,
        tags: resource.tags,
        fields,
    })
}

/// Project every resource, preserving order.
pub fn project_all(
    resources: Vec<Resource>,
    legacy_fields: &[LegacyField],
) -> Result<Vec<PresentationModel>, PipelineError> {
    resources
        .into_iter()
        .map(|resource| project(resource, legacy_fields))
        .collect()
}

/// How a list result is handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListPolicy {
    /// Always return a collection.
    #[default]
    AlwaysCollection,
    /// Return a single model when exactly one item matched.
    UnwrapSingleton,
}

impl ListPolicy {
    /// Shape a list result.
    pub fn apply(self, mut items: Vec<PresentationModel>) -> Output {
        match self {
            Self::UnwrapSingleton if items.len() == 1 => match items.pop() {
                Some(item) => Output::Single(item),
                None => Output::Collection(items),
            },
            _ => Output::Collection(items),
        }
    }
}

/// The result of a pipeline operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Output {
    /// One presentation model.
    Single(PresentationModel),
    /// Zero or more presentation models.
    Collection(Vec<PresentationModel>),
}

impl Output {
    /// The single model, if this is [`Output::Single`].
    pub fn as_single(&self) -> Option<&PresentationModel> {
        match self {
            Self::Single(model) => Some(model),
            Self::Collection(_) => None,
        }
    }

    /// Number of models.
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Collection(items) => items.len(),
        }
    }

    /// Whether there are no models.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten into a list of models.
    pub fn into_vec(self) -> Vec<PresentationModel> {
        match self {
            Self::Single(model) => vec![model],
            Self::Collection(items) => items,
        }
    }
}

/// Case-insensitive name pattern where `*` matches any run of characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameFilter {
    pattern: String,
}

impl NameFilter {
    /// Create a filter from a pattern such as `web*`.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into().to_lowercase(),
        }
    }

    /// Whether `name` matches.
    pub fn matches(&self, name: &str) -> bool {
        wildcard_match(self.pattern.as_bytes(), name.to_lowercase().as_bytes())
    }

    /// Keep the models whose name matches.
    pub fn apply(&self, items: Vec<PresentationModel>) -> Vec<PresentationModel> {
        items.into_iter().filter(|item| self.matches(&item.name)).collect()
    }
}

fn wildcard_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}
