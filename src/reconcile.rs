//! Input reconciliation.
//!
//! The command host hands over one of several alternative parameter sets and
//! a map of explicitly provided parameters. [`reconcile`] normalizes them into
//! a single [`CanonicalRequest`]: a resource identity plus the resource-type
//! specific settings extracted by the [`ResourceMapping`].

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::client::CollectionScope;
use crate::error::PipelineError;
use crate::identifier::{ResourceIdentity, ResourceSegment};
use crate::invoker::OperationKind;
use crate::pipeline::ResourceMapping;
use crate::projection::PresentationModel;
use crate::request::parse_flag;

/// The declared type of the resources a mapping manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceType {
    /// Provider namespace, e.g. `Microsoft.Network`.
    pub namespace: &'static str,
    /// Ancestor type segments, outermost first.
    pub parent_types: &'static [&'static str],
    /// Leaf type segment.
    pub resource_type: &'static str,
}

impl ResourceType {
    /// A top-level resource type.
    pub const fn top_level(namespace: &'static str, resource_type: &'static str) -> Self {
        Self {
            namespace,
            parent_types: &[],
            resource_type,
        }
    }

    /// A child resource type.
    pub const fn child(
        namespace: &'static str,
        parent_types: &'static [&'static str],
        resource_type: &'static str,
    ) -> Self {
        Self {
            namespace,
            parent_types,
            resource_type,
        }
    }

    /// Fully-qualified type name.
    pub fn full_name(&self) -> String {
        let mut full = self.namespace.to_string();
        for segment in self
            .parent_types
            .iter()
            .chain(std::iter::once(&self.resource_type))
        {
            full.push('/');
            full.push_str(segment);
        }
        full
    }

    /// Whether `identity` names a resource of this type.
    pub fn matches(&self, identity: &ResourceIdentity) -> bool {
        identity.is_of_type(self.namespace, self.parent_types, self.resource_type)
    }

    /// Identity of a resource of this type.
    pub fn identity(
        &self,
        subscription_id: &str,
        resource_group: &str,
        parents: &[String],
        name: &str,
    ) -> Result<ResourceIdentity, PipelineError> {
        self.check_parents(parents)?;
        let mut identity = ResourceIdentity::resource_group(subscription_id, resource_group);
        identity.provider_namespace = Some(self.namespace.to_string());
        for (resource_type, parent) in self.parent_types.iter().zip(parents) {
            identity = identity.with_parent(*resource_type, parent.as_str());
        }
        identity.leaf = Some(ResourceSegment::new(self.resource_type, name));
        Ok(identity)
    }

    /// The collection of resources of this type under the given parents.
    pub fn collection(&self, parents: &[String]) -> Result<CollectionScope, PipelineError> {
        self.check_parents(parents)?;
        let mut scope = CollectionScope::new(self.namespace, self.resource_type);
        for (resource_type, parent) in self.parent_types.iter().zip(parents) {
            scope = scope.with_parent(*resource_type, parent.as_str());
        }
        Ok(scope)
    }

    fn check_parents(&self, parents: &[String]) -> Result<(), PipelineError> {
        if parents.len() != self.parent_types.len() {
            return Err(PipelineError::invalid_argument(format!(
                "{} requires {} parent name(s) ({}), got {}",
                self.full_name(),
                self.parent_types.len(),
                self.parent_types.join(", "),
                parents.len()
            )));
        }
        if let Some(index) = parents.iter().position(|p| p.trim().is_empty()) {
            return Err(PipelineError::invalid_argument(format!(
                "parent name for {} must not be empty",
                self.parent_types[index]
            )));
        }
        Ok(())
    }
}

/// The explicitly provided parameters of one invocation.
///
/// Keys are matched case-insensitively, like command-line parameter names.
/// A `null` value counts as not provided.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    values: serde_json::Map<String, Value>,
}

impl Parameters {
    /// Create an empty parameter map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object.
    pub fn from_value(value: Value) -> Result<Self, PipelineError> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            Value::Null => Ok(Self::new()),
            other => Err(PipelineError::invalid_argument(format!(
                "parameters must be an object, got {}",
                other
            ))),
        }
    }

    /// Add a parameter.
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Whether no parameter is provided.
    pub fn is_empty(&self) -> bool {
        self.values.values().all(Value::is_null)
    }

    /// The raw value of a parameter.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
            .filter(|value| !value.is_null())
    }

    /// Whether the parameter is provided.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// A string parameter.
    pub fn string(&self, name: &str) -> Result<Option<String>, PipelineError> {
        self.get(name).map(|v| value_as_string(name, v)).transpose()
    }

    /// An integer parameter; numeric strings are accepted.
    pub fn i64(&self, name: &str) -> Result<Option<i64>, PipelineError> {
        self.get(name).map(|v| value_as_i64(name, v)).transpose()
    }

    /// A boolean parameter; `"true"` / `"false"` strings are accepted.
    pub fn bool(&self, name: &str) -> Result<Option<bool>, PipelineError> {
        self.get(name).map(|v| value_as_bool(name, v)).transpose()
    }

    /// A list of strings; a single string is treated as a one-element list.
    pub fn string_list(&self, name: &str) -> Result<Option<Vec<String>>, PipelineError> {
        self.get(name).map(|v| value_as_string_list(name, v)).transpose()
    }

    /// A string-to-string map.
    pub fn tags(&self, name: &str) -> Result<Option<BTreeMap<String, String>>, PipelineError> {
        self.get(name).map(|v| value_as_tags(name, v)).transpose()
    }

    /// An object parameter.
    pub fn object(
        &self,
        name: &str,
    ) -> Result<Option<serde_json::Map<String, Value>>, PipelineError> {
        self.get(name)
            .map(|v| match v {
                Value::Object(map) => Ok(map.clone()),
                other => Err(type_mismatch(name, "an object", other)),
            })
            .transpose()
    }
}

fn type_mismatch(name: &str, expected: &str, found: &Value) -> PipelineError {
    PipelineError::invalid_argument(format!("{} must be {}, got {}", name, expected, found))
}

fn value_as_string(name: &str, value: &Value) -> Result<String, PipelineError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err(type_mismatch(name, "a string", other)),
    }
}

fn value_as_i64(name: &str, value: &Value) -> Result<i64, PipelineError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| type_mismatch(name, "an integer", value)),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| type_mismatch(name, "an integer", value)),
        other => Err(type_mismatch(name, "an integer", other)),
    }
}

fn value_as_bool(name: &str, value: &Value) -> Result<bool, PipelineError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => parse_flag(name, s),
        other => Err(type_mismatch(name, "a boolean", other)),
    }
}

fn value_as_string_list(name: &str, value: &Value) -> Result<Vec<String>, PipelineError> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| value_as_string(name, item))
            .collect(),
        other => Err(type_mismatch(name, "a list of strings", other)),
    }
}

fn value_as_tags(name: &str, value: &Value) -> Result<BTreeMap<String, String>, PipelineError> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(key, v)| match v {
                Value::String(s) => Ok((key.clone(), s.clone())),
                Value::Null => Ok((key.clone(), String::new())),
                other => Ok((key.clone(), other.to_string())),
            })
            .collect(),
        other => Err(type_mismatch(name, "a map of strings", other)),
    }
}

/// The alternative shapes in which a command host can identify a resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterSet {
    /// Resource group, ancestor names (outermost first) and name.
    ByName {
        /// The resource group.
        resource_group: String,
        /// Names of the ancestors, outermost first.
        parents: Vec<String>,
        /// The resource name.
        name: String,
    },
    /// A full resource path.
    ByResourceId(String),
    /// The resource itself, piped from an earlier command.
    ByInputObject(PresentationModel),
    /// The parent resource, piped from an earlier command, plus the child name.
    ByParentObject {
        /// The parent resource.
        parent: PresentationModel,
        /// The child name.
        name: String,
    },
}

impl ParameterSet {
    /// Shorthand for [`ParameterSet::ByName`] without ancestors.
    pub fn by_name(resource_group: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ByName {
            resource_group: resource_group.into(),
            parents: Vec::new(),
            name: name.into(),
        }
    }

    /// Shorthand for [`ParameterSet::ByName`] for a child resource.
    pub fn by_child_name(
        resource_group: impl Into<String>,
        parents: Vec<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::ByName {
            resource_group: resource_group.into(),
            parents,
            name: name.into(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::ByName { .. } => "by name",
            Self::ByResourceId(_) => "by resource id",
            Self::ByInputObject(_) => "by input object",
            Self::ByParentObject { .. } => "by parent object",
        }
    }
}

/// The normalized form of user input.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRequest<S> {
    /// The target resource.
    pub identity: ResourceIdentity,
    /// Resource-type specific settings.
    pub settings: S,
}

/// How a missing resource id is handled for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityPolicy {
    /// An empty id means "not provided"; other identity fields are used instead.
    FallBack,
    /// An empty id is a malformed identifier.
    Strict,
}

impl IdentityPolicy {
    /// The policy applied to `operation`.
    pub fn for_operation(operation: OperationKind) -> Self {
        if operation.is_mutating() {
            Self::Strict
        } else {
            Self::FallBack
        }
    }
}

/// Everything a [`ResourceMapping`] sees when extracting its settings.
#[derive(Debug, Clone, Copy)]
pub struct SettingsInput<'a> {
    /// The operation being prepared.
    pub operation: OperationKind,
    /// Explicitly provided parameters.
    pub parameters: &'a Parameters,
    /// The current resource: a piped input object, or the live resource on update.
    pub current: Option<&'a PresentationModel>,
    /// A piped parent resource.
    pub parent: Option<&'a PresentationModel>,
}

impl<'a> SettingsInput<'a> {
    /// Input holding explicit parameters only.
    pub fn new(operation: OperationKind, parameters: &'a Parameters) -> Self {
        Self {
            operation,
            parameters,
            current: None,
            parent: None,
        }
    }

    /// Whether the parameter was given explicitly.
    pub fn provided(&self, name: &str) -> bool {
        self.parameters.contains(name)
    }

    /// A raw field of the current resource by dotted path.
    pub fn current_value(&self, path: &str) -> Option<&'a Value> {
        self.current.and_then(|current| current.lookup(path))
    }

    /// A string from the parameter, falling back to the current resource.
    pub fn string(&self, name: &str, path: &str) -> Result<Option<String>, PipelineError> {
        match self.parameters.string(name)? {
            Some(value) => Ok(Some(value)),
            None => self.current_value(path).map(|v| value_as_string(name, v)).transpose(),
        }
    }

    /// An integer from the parameter, falling back to the current resource.
    pub fn i64(&self, name: &str, path: &str) -> Result<Option<i64>, PipelineError> {
        match self.parameters.i64(name)? {
            Some(value) => Ok(Some(value)),
            None => self.current_value(path).map(|v| value_as_i64(name, v)).transpose(),
        }
    }

    /// A boolean from the parameter, falling back to the current resource.
    pub fn bool(&self, name: &str, path: &str) -> Result<Option<bool>, PipelineError> {
        match self.parameters.bool(name)? {
            Some(value) => Ok(Some(value)),
            None => self.current_value(path).map(|v| value_as_bool(name, v)).transpose(),
        }
    }

    /// Tags from the parameter, falling back to the current resource's tags.
    pub fn tags(&self, name: &str) -> Result<BTreeMap<String, String>, PipelineError> {
        match self.parameters.tags(name)? {
            Some(tags) => Ok(tags),
            None => Ok(self.current.map(|c| c.tags.clone()).unwrap_or_default()),
        }
    }

    /// Location from the parameter, the current resource, then the piped parent.
    pub fn location(&self, name: &str) -> Result<Option<String>, PipelineError> {
        if let Some(location) = self.parameters.string(name)? {
            return Ok(Some(location));
        }
        Ok(self
            .current
            .and_then(|c| c.location.clone())
            .or_else(|| self.parent.and_then(|p| p.location.clone())))
    }
}

/// Per-invocation facts the reconciler needs.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileContext<'a> {
    /// Subscription of the injected client.
    pub subscription_id: &'a str,
    /// The operation being prepared.
    pub operation: OperationKind,
    /// The live resource, when the caller already read it.
    pub current: Option<&'a PresentationModel>,
}

/// Normalize a parameter set into a canonical request.
pub fn reconcile<M: ResourceMapping>(
    mapping: &M,
    parameter_set: &ParameterSet,
    parameters: &Parameters,
    context: ReconcileContext<'_>,
) -> Result<CanonicalRequest<M::Settings>, PipelineError> {
    let resource_type = mapping.resource_type();
    let identity = resolve_identity(
        &resource_type,
        parameter_set,
        context.subscription_id,
        context.operation,
    )?;

    let (current, parent) = match parameter_set {
        ParameterSet::ByInputObject(object) => (Some(object), None),
        ParameterSet::ByParentObject { parent, .. } => (context.current, Some(parent)),
        _ => (context.current, None),
    };
    let input = SettingsInput {
        operation: context.operation,
        parameters,
        current,
        parent,
    };
    let settings = mapping.settings(&input)?;

    debug!(
        parameter_set = parameter_set.label(),
        operation = %context.operation,
        resource_group = %identity.resource_group_name,
        name = identity.name().unwrap_or_default(),
        "Reconciled input"
    );
    Ok(CanonicalRequest { identity, settings })
}

/// Resolve the identity named by a parameter set.
pub fn resolve_identity(
    resource_type: &ResourceType,
    parameter_set: &ParameterSet,
    subscription_id: &str,
    operation: OperationKind,
) -> Result<ResourceIdentity, PipelineError> {
    let policy = IdentityPolicy::for_operation(operation);

    let identity = match parameter_set {
        ParameterSet::ByName {
            resource_group,
            parents,
            name,
        } => {
            let resource_group = required("ResourceGroupName", non_empty(resource_group))?;
            let name = required("Name", non_empty(name))?;
            resource_type.identity(subscription_id, resource_group, parents, name)?
        },
        ParameterSet::ByResourceId(path) => match policy {
            IdentityPolicy::Strict => ResourceIdentity::parse(path)?,
            IdentityPolicy::FallBack => ResourceIdentity::parse_optional(Some(path))?
                .ok_or_else(|| PipelineError::invalid_argument("ResourceId is required"))?,
        },
        ParameterSet::ByInputObject(object) => match (policy, non_empty(&object.id)) {
            (_, Some(id)) => ResourceIdentity::parse(id)?,
            (IdentityPolicy::Strict, None) => {
                return Err(PipelineError::malformed(
                    object.id.as_str(),
                    "the input object has no resource id",
                ))
            },
            (IdentityPolicy::FallBack, None) if !resource_type.parent_types.is_empty() => {
                return Err(PipelineError::invalid_argument(format!(
                    "the input object has no resource id; {} resources require one",
                    resource_type.full_name()
                )));
            },
            (IdentityPolicy::FallBack, None) => {
                let resource_group = required(
                    "InputObject.ResourceGroupName",
                    non_empty(&object.resource_group_name),
                )?;
                let name = required("InputObject.Name", non_empty(&object.name))?;
                resource_type.identity(subscription_id, resource_group, &[], name)?
            },
        },
        ParameterSet::ByParentObject { parent, name } => {
            let name = required("Name", non_empty(name))?;
            let parent_identity = match (policy, non_empty(&parent.id)) {
                (_, Some(id)) => ResourceIdentity::parse(id)?,
                (IdentityPolicy::Strict, None) => {
                    return Err(PipelineError::malformed(
                        parent.id.as_str(),
                        "the parent object has no resource id",
                    ))
                },
                (IdentityPolicy::FallBack, None) => {
                    return Err(PipelineError::invalid_argument(
                        "the parent object has no resource id",
                    ))
                },
            };
            parent_identity.child(resource_type.resource_type, name).ok_or_else(|| {
                PipelineError::invalid_argument(format!(
                    "'{}' is not a resource and cannot have children",
                    parent.id
                ))
            })?
        },
    };

    if !resource_type.matches(&identity) {
        return Err(PipelineError::invalid_argument(format!(
            "'{}' is not a {} resource",
            identity,
            resource_type.full_name()
        )));
    }
    Ok(identity)
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value).filter(|v| !v.trim().is_empty())
}

/// Fail unless a value was provided.
pub fn required<T>(name: &str, value: Option<T>) -> Result<T, PipelineError> {
    value.ok_or_else(|| PipelineError::invalid_argument(format!("{} is required", name)))
}

/// Fail when more than one of the named inputs is set.
///
/// Each entry is a parameter name and whether it was provided.
pub fn at_most_one(inputs: &[(&str, bool)]) -> Result<(), PipelineError> {
    let set: Vec<&str> = inputs
        .iter()
        .filter(|(_, set)| *set)
        .map(|(name, _)| *name)
        .collect();
    match set.as_slice() {
        [] | [_] => Ok(()),
        [first, second] => Err(PipelineError::conflict(first, second)),
        _ => Err(PipelineError::invalid_argument(format!(
            "at most one of {} may be specified",
            join_names(inputs)
        ))),
    }
}

/// Fail unless exactly one of the named inputs is set.
pub fn exactly_one(inputs: &[(&str, bool)]) -> Result<(), PipelineError> {
    let count = inputs.iter().filter(|(_, set)| *set).count();
    if count == 1 {
        Ok(())
    } else {
        Err(PipelineError::invalid_argument(format!(
            "exactly one of {} must be specified",
            join_names(inputs)
        )))
    }
}

/// Replace an absent or zero value with `default`.
pub fn default_if_unset(value: Option<i64>, default: i64) -> i64 {
    match value {
        Some(v) if v != 0 => v,
        _ => default,
    }
}

fn join_names(inputs: &[(&str, bool)]) -> String {
    let names: Vec<&str> = inputs.iter().map(|(name, _)| *name).collect();
    match names.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{} and {}", rest.join(", "), last),
        _ => names.join(""),
    }
}
