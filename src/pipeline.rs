//! The composed resource pipeline.
//!
//! A [`ResourcePipeline`] wires the reconciler, a [`ResourceMapping`], the
//! invoker and the projector together for one resource type. Per-type
//! behaviour lives entirely in the mapping; the pipeline itself is generic.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use resource_pipeline::{ParameterSet, Parameters, ResourcePipeline};
//! use resource_pipeline::resources::UserAssignedIdentity;
//!
//! let pipeline = ResourcePipeline::new(UserAssignedIdentity, client);
//! let identity = pipeline
//!     .create_or_update(
//!         &ParameterSet::by_name("rg", "id1"),
//!         &Parameters::new().with("Location", "westus".into()),
//!     )
//!     .await?;
//! println!("{}", identity.id);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::client::ManagementClient;
use crate::error::PipelineError;
use crate::identifier::ResourceIdentity;
use crate::invoker::{Invoker, OperationKind, OperationTracker, PollingTracker};
use crate::projection::{
    project, project_all, LegacyField, ListPolicy, NameFilter, Output, PresentationModel,
};
use crate::reconcile::{
    reconcile, resolve_identity, CanonicalRequest, ParameterSet, Parameters, ReconcileContext,
    ResourceType, SettingsInput,
};
use crate::request::RequestBody;

/// Environment variable overriding [`PipelineOptions::poll_interval`], in seconds.
pub const POLL_INTERVAL_ENV: &str = "RESOURCE_PIPELINE_POLL_INTERVAL_SECS";

/// Environment variable overriding [`PipelineOptions::operation_timeout`], in seconds.
pub const OPERATION_TIMEOUT_ENV: &str = "RESOURCE_PIPELINE_OPERATION_TIMEOUT_SECS";

/// Resource-type specific behaviour plugged into a [`ResourcePipeline`].
///
/// `settings` and `build` are pure: they see only the reconciled input and
/// never talk to the client, so invalid input fails before any call is made.
pub trait ResourceMapping: Send + Sync {
    /// The canonical settings of this resource type.
    type Settings: fmt::Debug + Clone + PartialEq + Send + Sync;

    /// The declared resource type.
    fn resource_type(&self) -> ResourceType;

    /// Extract and validate settings from the reconciled input.
    fn settings(&self, input: &SettingsInput<'_>) -> Result<Self::Settings, PipelineError>;

    /// Build the provider request body.
    fn build(
        &self,
        request: &CanonicalRequest<Self::Settings>,
    ) -> Result<RequestBody, PipelineError>;

    /// How list results are shaped.
    fn list_policy(&self) -> ListPolicy {
        ListPolicy::AlwaysCollection
    }

    /// Backward-compatible fields added to every presentation model.
    fn legacy_fields(&self) -> &'static [LegacyField] {
        &[]
    }
}

/// Options for [`ResourcePipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Delay between polls of a long-running operation, unless the service
    /// suggests one. Default: 5 seconds.
    pub poll_interval: Duration,
    /// Upper bound on waiting for a long-running operation. Default: 30 minutes.
    pub operation_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl PipelineOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by [`POLL_INTERVAL_ENV`] and [`OPERATION_TIMEOUT_ENV`].
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the environment keys.
    ///
    /// Unparseable or zero values are ignored with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::default();
        if let Some(secs) = seconds(&lookup, POLL_INTERVAL_ENV) {
            options.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = seconds(&lookup, OPERATION_TIMEOUT_ENV) {
            options.operation_timeout = Duration::from_secs(secs);
        }
        options
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the long-running operation timeout.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }
}

fn seconds(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Some(secs),
        _ => {
            warn!(key, value = %raw, "Ignoring invalid duration override");
            None
        },
    }
}

/// Scope and filter of a list operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Resource group; `None` or empty lists across the subscription.
    pub resource_group: Option<String>,
    /// Ancestor names for child resource types, outermost first.
    pub parents: Vec<String>,
    /// Case-insensitive name pattern; `*` matches any run of characters.
    pub name_filter: Option<String>,
}

impl ListQuery {
    /// List across the subscription.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a resource group.
    pub fn in_resource_group(mut self, resource_group: impl Into<String>) -> Self {
        self.resource_group = Some(resource_group.into());
        self
    }

    /// Add an ancestor name, outermost first.
    pub fn under_parent(mut self, name: impl Into<String>) -> Self {
        self.parents.push(name.into());
        self
    }

    /// Keep only resources whose name matches `pattern`.
    pub fn with_name_filter(mut self, pattern: impl Into<String>) -> Self {
        self.name_filter = Some(pattern.into());
        self
    }
}

/// A reconciled and built request that has not been sent.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest<S> {
    /// The canonical request.
    pub request: CanonicalRequest<S>,
    /// The body that would be sent.
    pub body: RequestBody,
}

/// CRUD operations for one resource type.
pub struct ResourcePipeline<M: ResourceMapping> {
    mapping: M,
    client: Arc<dyn ManagementClient>,
    invoker: Invoker,
    options: PipelineOptions,
}

impl<M: ResourceMapping> ResourcePipeline<M> {
    /// Create a pipeline with default options.
    pub fn new(mapping: M, client: Arc<dyn ManagementClient>) -> Self {
        Self::with_options(mapping, client, PipelineOptions::default())
    }

    /// Create a pipeline that polls long-running operations with [`PollingTracker`].
    pub fn with_options(
        mapping: M,
        client: Arc<dyn ManagementClient>,
        options: PipelineOptions,
    ) -> Self {
        let tracker = Arc::new(PollingTracker::new(
            client.clone(),
            options.poll_interval,
            options.operation_timeout,
        ));
        Self::with_tracker(mapping, client, tracker, options)
    }

    /// Create a pipeline with a custom long-running operation tracker.
    pub fn with_tracker(
        mapping: M,
        client: Arc<dyn ManagementClient>,
        tracker: Arc<dyn OperationTracker>,
        options: PipelineOptions,
    ) -> Self {
        let invoker = Invoker::new(client.clone(), tracker);
        Self {
            mapping,
            client,
            invoker,
            options,
        }
    }

    /// The resource mapping.
    pub fn mapping(&self) -> &M {
        &self.mapping
    }

    /// The options in effect.
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Read one resource.
    #[instrument(
        skip_all,
        name = "pipeline.get",
        fields(resource_type = self.mapping.resource_type().resource_type)
    )]
    pub async fn get(
        &self,
        parameter_set: &ParameterSet,
    ) -> Result<PresentationModel, PipelineError> {
        let identity = self.identity(parameter_set, OperationKind::Get)?;
        let resource = self.read(&identity).await?;
        debug!(name = %resource.name, "Resource read");
        Ok(resource)
    }

    /// List resources, across the subscription or within a resource group.
    #[instrument(
        skip_all,
        name = "pipeline.list",
        fields(resource_type = self.mapping.resource_type().resource_type)
    )]
    pub async fn list(&self, query: &ListQuery) -> Result<Output, PipelineError> {
        let resource_type = self.mapping.resource_type();
        let scope = resource_type.collection(&query.parents)?;
        let resource_group = query
            .resource_group
            .as_deref()
            .filter(|group| !group.trim().is_empty());

        if resource_group.is_none() && !query.parents.is_empty() {
            return Err(PipelineError::invalid_argument(format!(
                "ResourceGroupName is required to list {}",
                resource_type.full_name()
            )));
        }

        let items = self.invoker.list(&scope, resource_group).await?;
        let mut models = project_all(items, self.mapping.legacy_fields())?;
        if let Some(pattern) = &query.name_filter {
            models = NameFilter::new(pattern.as_str()).apply(models);
        }

        info!(count = models.len(), "Listed resources");
        Ok(self.mapping.list_policy().apply(models))
    }

    /// Create a resource or replace it with the given settings.
    #[instrument(
        skip_all,
        name = "pipeline.create_or_update",
        fields(resource_type = self.mapping.resource_type().resource_type)
    )]
    pub async fn create_or_update(
        &self,
        parameter_set: &ParameterSet,
        parameters: &Parameters,
    ) -> Result<PresentationModel, PipelineError> {
        let prepared = self.prepare_with(parameter_set, parameters, None)?;
        self.send(prepared).await
    }

    /// Change the given settings of an existing resource, keeping the rest.
    #[instrument(
        skip_all,
        name = "pipeline.update",
        fields(resource_type = self.mapping.resource_type().resource_type)
    )]
    pub async fn update(
        &self,
        parameter_set: &ParameterSet,
        parameters: &Parameters,
    ) -> Result<PresentationModel, PipelineError> {
        let identity = self.identity(parameter_set, OperationKind::CreateOrUpdate)?;
        let current = self.read(&identity).await?;
        let prepared = self.prepare_with(parameter_set, parameters, Some(&current))?;
        self.send(prepared).await
    }

    /// Delete a resource.
    #[instrument(
        skip_all,
        name = "pipeline.delete",
        fields(resource_type = self.mapping.resource_type().resource_type)
    )]
    pub async fn delete(&self, parameter_set: &ParameterSet) -> Result<(), PipelineError> {
        let identity = self.identity(parameter_set, OperationKind::Delete)?;
        self.invoker.delete(&identity).await?;
        info!(
            resource_group = %identity.resource_group_name,
            name = identity.name().unwrap_or_default(),
            "Resource deleted"
        );
        Ok(())
    }

    /// Reconcile and build a create-or-update request without sending it.
    pub fn prepare(
        &self,
        parameter_set: &ParameterSet,
        parameters: &Parameters,
    ) -> Result<PreparedRequest<M::Settings>, PipelineError> {
        self.prepare_with(parameter_set, parameters, None)
    }

    fn prepare_with(
        &self,
        parameter_set: &ParameterSet,
        parameters: &Parameters,
        current: Option<&PresentationModel>,
    ) -> Result<PreparedRequest<M::Settings>, PipelineError> {
        let context = ReconcileContext {
            subscription_id: self.client.subscription_id(),
            operation: OperationKind::CreateOrUpdate,
            current,
        };
        let request = reconcile(&self.mapping, parameter_set, parameters, context)?;
        let body = self.mapping.build(&request)?;
        Ok(PreparedRequest { request, body })
    }

    fn identity(
        &self,
        parameter_set: &ParameterSet,
        operation: OperationKind,
    ) -> Result<ResourceIdentity, PipelineError> {
        resolve_identity(
            &self.mapping.resource_type(),
            parameter_set,
            self.client.subscription_id(),
            operation,
        )
    }

    async fn read(&self, identity: &ResourceIdentity) -> Result<PresentationModel, PipelineError> {
        let resource = self.invoker.get(identity).await?;
        project(resource, self.mapping.legacy_fields())
    }

    async fn send(
        &self,
        prepared: PreparedRequest<M::Settings>,
    ) -> Result<PresentationModel, PipelineError> {
        let identity = &prepared.request.identity;
        info!(
            resource_group = %identity.resource_group_name,
            name = identity.name().unwrap_or_default(),
            "Creating or updating resource"
        );

        let resource = self
            .invoker
            .create_or_update(identity, &prepared.body)
            .await?;
        project(resource, self.mapping.legacy_fields())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Resource;
    use crate::error::ErrorKind;
    use crate::testing::{assert_error_kind, assert_no_calls, MockClient};
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    /// A top-level resource with a single `size` property.
    struct Things;

    impl ResourceMapping for Things {
        type Settings = i64;

        fn resource_type(&self) -> ResourceType {
            ResourceType::top_level("Microsoft.Example", "things")
        }

        fn settings(&self, input: &SettingsInput<'_>) -> Result<i64, PipelineError> {
            crate::reconcile::required("Size", input.i64("Size", "properties.size")?)
        }

        fn build(&self, request: &CanonicalRequest<i64>) -> Result<RequestBody, PipelineError> {
            Ok(RequestBody::new().with_property("size", json!(request.settings)))
        }

        fn legacy_fields(&self) -> &'static [LegacyField] {
            const FIELDS: &[LegacyField] = &[LegacyField::new("Size", "properties.size")];
            FIELDS
        }
    }

    fn thing(rg: &str, name: &str, size: i64) -> Resource {
        Resource::new(&ResourceIdentity::new("sub", rg, "Microsoft.Example", "things", name))
            .with_property("size", json!(size))
    }

    fn pipeline(client: &Arc<MockClient>) -> ResourcePipeline<Things> {
        let options = PipelineOptions::new()
            .with_poll_interval(Duration::from_millis(1));
        ResourcePipeline::with_options(Things, client.clone(), options)
    }

    #[test]
    fn test_options_defaults_and_overrides() {
        let options = PipelineOptions::default();
        assert_eq!(options.poll_interval, Duration::from_secs(5));
        assert_eq!(options.operation_timeout, Duration::from_secs(1800));

        let options = PipelineOptions::from_lookup(|key| match key {
            POLL_INTERVAL_ENV => Some("2".to_string()),
            OPERATION_TIMEOUT_ENV => Some("soon".to_string()),
            _ => None,
        });
        assert_eq!(options.poll_interval, Duration::from_secs(2));
        assert_eq!(options.operation_timeout, Duration::from_secs(1800));
    }

    #[tokio::test]
    async fn test_get_projects_with_legacy_fields() {
        let client = Arc::new(MockClient::new("sub").with_resource(thing("rg", "t1", 3)));
        let pipeline = pipeline(&client);
        let model = assert_ok!(pipeline.get(&ParameterSet::by_name("rg", "t1")).await);

        assert_eq!(model.resource_group_name, "rg");
        assert_eq!(model.field("Size"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_create_or_update_sends_built_body() {
        let client = Arc::new(MockClient::new("sub"));
        let params = Parameters::new().with("Size", json!(5));
        let model = pipeline(&client)
            .create_or_update(&ParameterSet::by_name("rg", "t1"), &params)
            .await
            .unwrap();

        assert_eq!(model.lookup("properties.size"), Some(&json!(5)));
        assert_eq!(
            client.last_body().unwrap().property("size"),
            Some(&json!(5))
        );
        assert_eq!(client.calls().create_or_update, 1);
    }

    #[tokio::test]
    async fn test_invalid_input_makes_no_calls() {
        let client = Arc::new(MockClient::new("sub"));
        let result = pipeline(&client)
            .create_or_update(&ParameterSet::by_name("rg", "t1"), &Parameters::new())
            .await;

        assert_error_kind(&result, ErrorKind::InvalidArgument);
        assert_no_calls(&client);
    }

    #[tokio::test]
    async fn test_update_keeps_current_settings() {
        let client = Arc::new(MockClient::new("sub").with_resource(thing("rg", "t1", 3)));
        let model = pipeline(&client)
            .update(&ParameterSet::by_name("rg", "t1"), &Parameters::new())
            .await
            .unwrap();

        assert_eq!(model.field("Size"), Some(&json!(3)));
        assert_eq!(client.calls().get, 1);
        assert_eq!(client.calls().create_or_update, 1);
    }

    #[tokio::test]
    async fn test_update_missing_resource_is_a_service_error() {
        let client = Arc::new(MockClient::new("sub"));
        let params = Parameters::new().with("Size", json!(1));
        let err = assert_err!(
            pipeline(&client)
                .update(&ParameterSet::by_name("rg", "t1"), &params)
                .await
        );

        let PipelineError::Service { context, fault } = err else {
            panic!("expected a service error");
        };
        assert!(fault.is_not_found());
        assert_eq!(context.name.as_deref(), Some("t1"));
        assert_eq!(client.calls().create_or_update, 0);
    }

    #[tokio::test]
    async fn test_list_scopes_and_filters() {
        let client = Arc::new(
            MockClient::new("sub")
                .with_resource(thing("rg1", "alpha", 1))
                .with_resource(thing("rg1", "beta", 2))
                .with_resource(thing("rg2", "apex", 3)),
        );
        let pipeline = pipeline(&client);

        let all = pipeline.list(&ListQuery::new()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(client.calls().list_by_subscription, 1);

        let query = ListQuery::new()
            .in_resource_group("rg1")
            .with_name_filter("A*");
        let group = pipeline.list(&query).await.unwrap();
        let names: Vec<_> = group.into_vec().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["alpha"]);
        assert_eq!(client.calls().list_by_resource_group, 1);

        pipeline
            .list(&ListQuery::new().in_resource_group(""))
            .await
            .unwrap();
        assert_eq!(client.calls().list_by_subscription, 2);
    }

    #[tokio::test]
    async fn test_delete() {
        let client = Arc::new(MockClient::new("sub").with_resource(thing("rg", "t1", 3)));
        let pipeline = pipeline(&client);

        assert_ok!(pipeline.delete(&ParameterSet::by_name("rg", "t1")).await);
        let id = ResourceIdentity::new("sub", "rg", "Microsoft.Example", "things", "t1");
        assert!(!client.contains(&id));

        let result = pipeline
            .delete(&ParameterSet::ByResourceId(String::new()))
            .await;
        assert_error_kind(&result, ErrorKind::MalformedIdentifier);
    }

    #[tokio::test]
    async fn test_prepare_is_idempotent() {
        let client = Arc::new(MockClient::new("sub"));
        let pipeline = pipeline(&client);
        let set = ParameterSet::by_name("rg", "t1");
        let params = Parameters::new().with("Size", json!(7));

        let first = pipeline.prepare(&set, &params).unwrap();
        let second = pipeline.prepare(&set, &params).unwrap();
        assert_eq!(first, second);
        assert_no_calls(&client);
    }
}
