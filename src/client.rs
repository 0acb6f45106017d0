//! The management client boundary.
//!
//! Authentication, HTTP transport, retries and wire-format handling live
//! behind [`ManagementClient`]. The pipeline only calls the operations below
//! and interprets their results; a client is injected into every
//! [`ResourcePipeline`](crate::pipeline::ResourcePipeline) explicitly.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::PipelineError;
use crate::identifier::{ResourceIdentity, ResourceSegment};
use crate::request::RequestBody;

/// A fault reported by the management client (4xx/5xx or transport failure).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ClientFault {
    /// HTTP-like status, when the fault came from the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Service error code, e.g. `ResourceNotFound`.
    pub code: String,
    /// Service error message.
    pub message: String,
}

impl ClientFault {
    /// Create a fault returned by the service.
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a fault that never reached the service.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: "TransportError".to_string(),
            message: message.into(),
        }
    }

    /// Whether the service reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}

/// A raw resource as returned by the provider.
///
/// Every top-level field other than the well-known ones is kept verbatim in
/// [`Resource::fields`], including the `properties` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// The full resource path.
    pub id: String,
    /// The resource name.
    pub name: String,
    /// The fully-qualified resource type.
    #[serde(rename = "type", default)]
    pub resource_type: String,
    /// The Azure-style region, when the resource has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Resource tags.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// All other fields.
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

impl Resource {
    /// Create a resource for the given identity.
    pub fn new(identity: &ResourceIdentity) -> Self {
        Self {
            id: identity.to_string(),
            name: identity
                .name()
                .unwrap_or(identity.resource_group_name.as_str())
                .to_string(),
            resource_type: identity.full_resource_type().unwrap_or_default(),
            location: None,
            tags: BTreeMap::new(),
            fields: serde_json::Map::new(),
        }
    }

    /// Decode a resource from its JSON representation.
    pub fn from_value(value: Value) -> Result<Self, PipelineError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Encode the resource as JSON.
    pub fn to_value(&self) -> Result<Value, PipelineError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Set the location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Set a top-level field.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Set a key inside the `properties` object, creating it when absent.
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        let properties = self
            .fields
            .entry("properties")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Value::Object(map) = properties {
            map.insert(key.into(), value);
        }
        self
    }

    /// The `properties` object, if present.
    pub fn properties(&self) -> Option<&serde_json::Map<String, Value>> {
        self.fields.get("properties").and_then(Value::as_object)
    }
}

/// One page of a list operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Items on this page.
    #[serde(rename = "value", default)]
    pub items: Vec<Resource>,
    /// Link to the next page; absent or empty on the last page.
    #[serde(rename = "nextLink", default, skip_serializing_if = "Option::is_none")]
    pub next_link: Option<String>,
}

impl Page {
    /// The final page of a listing.
    pub fn last(items: Vec<Resource>) -> Self {
        Self {
            items,
            next_link: None,
        }
    }

    /// A page followed by another.
    pub fn with_next(items: Vec<Resource>, next_link: impl Into<String>) -> Self {
        Self {
            items,
            next_link: Some(next_link.into()),
        }
    }

    /// The continuation link, treating an empty string as absent.
    pub fn continuation(&self) -> Option<&str> {
        self.next_link
            .as_deref()
            .filter(|link| !link.trim().is_empty())
    }
}

/// Handle to a long-running operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    /// The status URL to poll.
    pub location: String,
    /// Service-suggested delay before the next poll.
    pub retry_after: Option<Duration>,
}

impl OperationHandle {
    /// Create a handle polling the given location.
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            retry_after: None,
        }
    }

    /// Set the suggested poll delay.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// The immediate response to a mutating call.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// The operation completed synchronously with this resource.
    Resource(Resource),
    /// The operation continues asynchronously.
    Accepted(OperationHandle),
    /// The operation completed with no body.
    NoContent,
}

/// Status of a long-running operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationStatus {
    /// Still running.
    InProgress,
    /// Finished successfully, with the final resource when there is one.
    Succeeded(Option<Resource>),
    /// Finished with a fault.
    Failed(ClientFault),
    /// Cancelled on the service side.
    Cancelled,
}

/// The collection a list operation enumerates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionScope {
    /// Provider namespace, e.g. `Microsoft.ManagedIdentity`.
    pub provider_namespace: String,
    /// Ancestors of the listed resources, outermost first.
    pub parent_chain: Vec<ResourceSegment>,
    /// The listed resource type segment.
    pub resource_type: String,
}

impl CollectionScope {
    /// Scope for a top-level resource type.
    pub fn new(provider_namespace: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            provider_namespace: provider_namespace.into(),
            parent_chain: Vec::new(),
            resource_type: resource_type.into(),
        }
    }

    /// Add an ancestor, outermost first.
    pub fn with_parent(
        mut self,
        resource_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        self.parent_chain
            .push(ResourceSegment::new(resource_type, name));
        self
    }

    /// Fully-qualified type of the listed resources.
    pub fn full_resource_type(&self) -> String {
        let mut full = self.provider_namespace.clone();
        for segment in &self.parent_chain {
            full.push('/');
            full.push_str(&segment.resource_type);
        }
        full.push('/');
        full.push_str(&self.resource_type);
        full
    }
}

/// Operations the pipeline needs from the external management client.
///
/// Implementations own authentication, transport and retries. A client handle
/// is shared read-only across invocations, so implementations must be
/// reentrant.
#[async_trait::async_trait]
pub trait ManagementClient: Send + Sync {
    /// The subscription the client is bound to.
    fn subscription_id(&self) -> &str;

    /// Read a single resource.
    async fn get(&self, id: &ResourceIdentity) -> Result<Resource, ClientFault>;

    /// Create or replace a resource.
    async fn create_or_update(
        &self,
        id: &ResourceIdentity,
        body: &RequestBody,
    ) -> Result<Response, ClientFault>;

    /// Delete a resource.
    async fn delete(&self, id: &ResourceIdentity) -> Result<Response, ClientFault>;

    /// First page of a collection within a resource group.
    async fn list_by_resource_group(
        &self,
        scope: &CollectionScope,
        resource_group: &str,
    ) -> Result<Page, ClientFault>;

    /// First page of a collection across the subscription.
    async fn list_by_subscription(&self, scope: &CollectionScope) -> Result<Page, ClientFault>;

    /// Follow a continuation link.
    async fn list_next(&self, next_link: &str) -> Result<Page, ClientFault>;

    /// Query the status of a long-running operation.
    async fn poll_operation(
        &self,
        handle: &OperationHandle,
    ) -> Result<OperationStatus, ClientFault>;
}
