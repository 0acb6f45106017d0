//! The operation invoker.
//!
//! Issues one management operation, waits for long-running operations through
//! an [`OperationTracker`], and expands paginated listings into a single
//! collection. Faults are wrapped with the resource they concern and surfaced
//! as-is; nothing here retries.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::client::{
    ClientFault, CollectionScope, ManagementClient, OperationHandle, OperationStatus, Page,
    Resource, Response,
};
use crate::error::{OperationContext, PipelineError};
use crate::identifier::ResourceIdentity;
use crate::request::RequestBody;

/// Fault code used when the service cancels a long-running operation.
pub const CANCELLED_CODE: &str = "OperationCancelled";

/// The kinds of management operation the pipeline issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Read one resource.
    Get,
    /// Create or replace one resource.
    CreateOrUpdate,
    /// Delete one resource.
    Delete,
    /// List a collection within a resource group.
    ListByResourceGroup,
    /// List a collection across the subscription.
    ListBySubscription,
}

impl OperationKind {
    /// Whether the operation changes provider state.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::CreateOrUpdate | Self::Delete)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "get",
            Self::CreateOrUpdate => "create or update",
            Self::Delete => "delete",
            Self::ListByResourceGroup => "list by resource group",
            Self::ListBySubscription => "list by subscription",
        };
        f.write_str(name)
    }
}

/// Lifecycle of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Nothing has been sent yet.
    NotStarted,
    /// The initial call was issued; polling may be in progress.
    InFlight,
    /// Terminal: completed successfully.
    Succeeded,
    /// Terminal: completed with a fault or timed out.
    Failed,
    /// Terminal: cancelled on the service side.
    Cancelled,
}

impl OperationState {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: OperationState) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::InFlight)
                | (Self::InFlight, Self::Succeeded)
                | (Self::InFlight, Self::Failed)
                | (Self::InFlight, Self::Cancelled)
        )
    }
}

/// Tracks the state of a single invocation.
#[derive(Debug)]
pub struct Invocation {
    kind: OperationKind,
    state: OperationState,
}

impl Invocation {
    /// Start tracking an operation.
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            state: OperationState::NotStarted,
        }
    }

    /// The current state.
    pub fn state(&self) -> OperationState {
        self.state
    }

    /// Move to `next`. Illegal transitions are rejected and leave the state unchanged.
    pub fn advance(&mut self, next: OperationState) -> bool {
        if self.state.can_transition_to(next) {
            debug!(
                operation = %self.kind,
                from = ?self.state,
                to = ?next,
                "Operation state changed"
            );
            self.state = next;
            true
        } else {
            warn!(
                operation = %self.kind,
                from = ?self.state,
                to = ?next,
                "Rejected operation state change"
            );
            false
        }
    }

    fn finish<T>(&mut self, result: &Result<T, PipelineError>) {
        let next = match result {
            Ok(_) => OperationState::Succeeded,
            Err(PipelineError::Service { fault, .. }) if fault.code == CANCELLED_CODE => {
                OperationState::Cancelled
            },
            Err(_) => OperationState::Failed,
        };
        self.advance(next);
    }
}

/// Waits for a long-running operation to reach a terminal state.
#[async_trait::async_trait]
pub trait OperationTracker: Send + Sync {
    /// Wait on `handle`, returning the final resource when the service provides one.
    async fn wait(
        &self,
        handle: &OperationHandle,
        context: &OperationContext,
    ) -> Result<Option<Resource>, PipelineError>;
}

/// Default tracker that polls the status location at a fixed interval.
pub struct PollingTracker {
    client: Arc<dyn ManagementClient>,
    poll_interval: Duration,
    timeout: Duration,
}

impl PollingTracker {
    /// Create a tracker polling through `client`.
    pub fn new(
        client: Arc<dyn ManagementClient>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            poll_interval,
            timeout,
        }
    }

    async fn poll_until_terminal(
        &self,
        handle: &OperationHandle,
        context: &OperationContext,
    ) -> Result<Option<Resource>, PipelineError> {
        let mut polls: u32 = 0;
        loop {
            polls += 1;
            let status = self
                .client
                .poll_operation(handle)
                .await
                .map_err(|fault| PipelineError::service(context.clone(), fault))?;

            match status {
                OperationStatus::InProgress => {
                    let delay = handle.retry_after.unwrap_or(self.poll_interval);
                    debug!(
                        location = %handle.location,
                        polls,
                        ?delay,
                        "Operation still in progress"
                    );
                    tokio::time::sleep(delay).await;
                },
                OperationStatus::Succeeded(resource) => {
                    debug!(location = %handle.location, polls, "Operation succeeded");
                    return Ok(resource);
                },
                OperationStatus::Failed(fault) => {
                    return Err(PipelineError::service(context.clone(), fault));
                },
                OperationStatus::Cancelled => {
                    let fault = ClientFault {
                        status: None,
                        code: CANCELLED_CODE.to_string(),
                        message: format!("operation at {} was cancelled", handle.location),
                    };
                    return Err(PipelineError::service(context.clone(), fault));
                },
            }
        }
    }
}

#[async_trait::async_trait]
impl OperationTracker for PollingTracker {
    async fn wait(
        &self,
        handle: &OperationHandle,
        context: &OperationContext,
    ) -> Result<Option<Resource>, PipelineError> {
        let polling = self.poll_until_terminal(handle, context);
        match tokio::time::timeout(self.timeout, polling).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    location = %handle.location,
                    timeout = ?self.timeout,
                    "Operation timed out"
                );
                Err(PipelineError::Timeout {
                    context: context.clone(),
                    limit: self.timeout,
                    location: Some(handle.location.clone()),
                })
            },
        }
    }
}

/// One management operation to issue.
#[derive(Debug, Clone, Copy)]
pub enum Operation<'a> {
    /// Read one resource.
    Get(&'a ResourceIdentity),
    /// Create or replace one resource with the given body.
    CreateOrUpdate(&'a ResourceIdentity, &'a RequestBody),
    /// Delete one resource.
    Delete(&'a ResourceIdentity),
    /// List a collection within a resource group.
    ListByResourceGroup {
        /// The listed collection.
        scope: &'a CollectionScope,
        /// The resource group.
        resource_group: &'a str,
    },
    /// List a collection across the subscription.
    ListBySubscription(&'a CollectionScope),
}

impl Operation<'_> {
    /// The kind of this operation.
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Get(_) => OperationKind::Get,
            Self::CreateOrUpdate(..) => OperationKind::CreateOrUpdate,
            Self::Delete(_) => OperationKind::Delete,
            Self::ListByResourceGroup { .. } => OperationKind::ListByResourceGroup,
            Self::ListBySubscription(_) => OperationKind::ListBySubscription,
        }
    }

    /// The context attached to any error this operation raises.
    pub fn context(&self) -> OperationContext {
        let context = OperationContext::new(self.kind());
        match self {
            Self::Get(id) | Self::CreateOrUpdate(id, _) | Self::Delete(id) => {
                let context = context.with_resource_group(id.resource_group_name.as_str());
                match id.name() {
                    Some(name) => context.with_name(name),
                    None => context,
                }
            },
            Self::ListByResourceGroup { resource_group, .. } => {
                context.with_resource_group(*resource_group)
            },
            Self::ListBySubscription(_) => context,
        }
    }
}

/// The terminal result of an invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    /// A single resource.
    Resource(Resource),
    /// Every item of every page, in service order.
    Collection(Vec<Resource>),
    /// The resource was deleted.
    Deleted,
}

/// Issues operations against the management client.
pub struct Invoker {
    client: Arc<dyn ManagementClient>,
    tracker: Arc<dyn OperationTracker>,
}

impl Invoker {
    /// Create an invoker.
    pub fn new(client: Arc<dyn ManagementClient>, tracker: Arc<dyn OperationTracker>) -> Self {
        Self { client, tracker }
    }

    /// Issue `operation` and wait for its terminal result.
    pub async fn invoke(&self, operation: Operation<'_>) -> Result<OperationResult, PipelineError> {
        match operation {
            Operation::Get(id) => self.get(id).await.map(OperationResult::Resource),
            Operation::CreateOrUpdate(id, body) => self
                .create_or_update(id, body)
                .await
                .map(OperationResult::Resource),
            Operation::Delete(id) => self.delete(id).await.map(|()| OperationResult::Deleted),
            Operation::ListByResourceGroup {
                scope,
                resource_group,
            } => self
                .list(scope, Some(resource_group))
                .await
                .map(OperationResult::Collection),
            Operation::ListBySubscription(scope) => self
                .list(scope, None)
                .await
                .map(OperationResult::Collection),
        }
    }

    /// Read one resource.
    pub async fn get(&self, id: &ResourceIdentity) -> Result<Resource, PipelineError> {
        let operation = Operation::Get(id);
        let context = operation.context();
        tracked(operation, async {
            self.client
                .get(id)
                .await
                .map_err(|fault| PipelineError::service(context.clone(), fault))
        })
        .await
    }

    /// Create or replace one resource, waiting on a long-running operation.
    ///
    /// When the service completes without returning the resource, its final
    /// state is read back.
    pub async fn create_or_update(
        &self,
        id: &ResourceIdentity,
        body: &RequestBody,
    ) -> Result<Resource, PipelineError> {
        let operation = Operation::CreateOrUpdate(id, body);
        let context = operation.context();
        tracked(operation, async {
            let fault = |fault: ClientFault| PipelineError::service(context.clone(), fault);
            match self.client.create_or_update(id, body).await.map_err(fault)? {
                Response::Resource(resource) => Ok(resource),
                Response::Accepted(handle) => {
                    info!(location = %handle.location, "Waiting for long-running operation");
                    match self.tracker.wait(&handle, &context).await? {
                        Some(resource) => Ok(resource),
                        None => self.client.get(id).await.map_err(fault),
                    }
                },
                Response::NoContent => self.client.get(id).await.map_err(fault),
            }
        })
        .await
    }

    /// Delete one resource, waiting on a long-running operation.
    pub async fn delete(&self, id: &ResourceIdentity) -> Result<(), PipelineError> {
        let operation = Operation::Delete(id);
        let context = operation.context();
        tracked(operation, async {
            let response = self
                .client
                .delete(id)
                .await
                .map_err(|fault| PipelineError::service(context.clone(), fault))?;
            if let Response::Accepted(handle) = response {
                info!(location = %handle.location, "Waiting for long-running operation");
                self.tracker.wait(&handle, &context).await?;
            }
            Ok(())
        })
        .await
    }

    /// List a collection within `resource_group`, or across the subscription
    /// when no group is given, following every continuation link.
    pub async fn list(
        &self,
        scope: &CollectionScope,
        resource_group: Option<&str>,
    ) -> Result<Vec<Resource>, PipelineError> {
        let operation = match resource_group {
            Some(resource_group) => Operation::ListByResourceGroup {
                scope,
                resource_group,
            },
            None => Operation::ListBySubscription(scope),
        };
        let context = operation.context();
        tracked(operation, async {
            let first = match resource_group {
                Some(resource_group) => {
                    self.client
                        .list_by_resource_group(scope, resource_group)
                        .await
                },
                None => self.client.list_by_subscription(scope).await,
            }
            .map_err(|fault| PipelineError::service(context.clone(), fault))?;
            self.collect_pages(first, &context).await
        })
        .await
    }

    /// Follow continuation links until exhausted, keeping service order.
    async fn collect_pages(
        &self,
        first: Page,
        context: &OperationContext,
    ) -> Result<Vec<Resource>, PipelineError> {
        let mut items = Vec::new();
        let mut pages: u32 = 1;
        let mut next_link = first.continuation().map(str::to_string);
        items.extend(first.items);

        while let Some(link) = next_link {
            let page = self
                .client
                .list_next(&link)
                .await
                .map_err(|fault| PipelineError::service(context.clone(), fault))?;
            pages += 1;
            next_link = page.continuation().map(str::to_string);
            items.extend(page.items);
        }

        debug!(pages, items = items.len(), "Listing exhausted");
        Ok(items)
    }
}

/// Run `work` as one tracked invocation of `operation`.
#[instrument(skip_all, name = "invoker.invoke", fields(operation = %operation.kind()))]
async fn tracked<T, F>(operation: Operation<'_>, work: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    let context = operation.context();
    let mut invocation = Invocation::new(operation.kind());
    invocation.advance(OperationState::InFlight);

    let result = work.await;
    invocation.finish(&result);

    match &result {
        Ok(_) => debug!(%context, "Operation completed"),
        Err(e) => warn!(%context, error = %e, "Operation failed"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{MockClient, MockMethod};
    use serde_json::json;

    fn thing(name: &str) -> Resource {
        Resource::new(&ResourceIdentity::new("sub", "rg", "Microsoft.Example", "things", name))
    }

    fn scope() -> CollectionScope {
        CollectionScope::new("Microsoft.Example", "things")
    }

    fn invoker(client: &Arc<MockClient>, timeout: Duration) -> Invoker {
        let client: Arc<dyn ManagementClient> = client.clone();
        let tracker = Arc::new(PollingTracker::new(
            client.clone(),
            Duration::from_millis(1),
            timeout,
        ));
        Invoker::new(client, tracker)
    }

    #[test]
    fn test_state_transitions() {
        let mut invocation = Invocation::new(OperationKind::Get);
        assert_eq!(invocation.state(), OperationState::NotStarted);
        assert!(!invocation.advance(OperationState::Succeeded));
        assert!(invocation.advance(OperationState::InFlight));
        assert!(invocation.advance(OperationState::Cancelled));
        assert!(invocation.state().is_terminal());
        assert!(!invocation.advance(OperationState::InFlight));
        assert_eq!(invocation.state(), OperationState::Cancelled);
    }

    #[test]
    fn test_operation_kind_is_mutating() {
        assert!(OperationKind::CreateOrUpdate.is_mutating());
        assert!(OperationKind::Delete.is_mutating());
        assert!(!OperationKind::Get.is_mutating());
        assert!(!OperationKind::ListBySubscription.is_mutating());
    }

    #[tokio::test]
    async fn test_pagination_follows_next_links_in_order() {
        let client = Arc::new(MockClient::new("sub").with_pages(
            &scope(),
            vec![
                Page::with_next(vec![thing("a"), thing("b")], "page-2"),
                Page::with_next(vec![thing("c")], "page-3"),
                Page::last(vec![thing("d"), thing("e")]),
            ],
        ));

        let result = invoker(&client, Duration::from_secs(1))
            .invoke(Operation::ListBySubscription(&scope()))
            .await
            .unwrap();

        let OperationResult::Collection(items) = result else {
            panic!("expected a collection");
        };
        let names: Vec<_> = items.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(client.calls().list_next, 2);
        assert_eq!(client.calls().list_by_subscription, 1);
    }

    #[tokio::test]
    async fn test_empty_next_link_ends_listing() {
        let client = Arc::new(MockClient::new("sub").with_pages(
            &scope(),
            vec![Page::with_next(vec![thing("a")], "")],
        ));

        let result = invoker(&client, Duration::from_secs(1))
            .invoke(Operation::ListByResourceGroup {
                scope: &scope(),
                resource_group: "rg",
            })
            .await
            .unwrap();

        assert_eq!(result, OperationResult::Collection(vec![thing("a")]));
        assert_eq!(client.calls().list_next, 0);
    }

    #[tokio::test]
    async fn test_long_running_create_polls_until_success() {
        let id = ResourceIdentity::new("sub", "rg", "Microsoft.Example", "things", "t1");
        let final_resource = thing("t1").with_property("provisioningState", json!("Succeeded"));
        let client = Arc::new(
            MockClient::new("sub")
                .with_long_running_operations()
                .with_operation_statuses(vec![
                    OperationStatus::InProgress,
                    OperationStatus::InProgress,
                    OperationStatus::Succeeded(Some(final_resource.clone())),
                ]),
        );

        let result = invoker(&client, Duration::from_secs(5))
            .invoke(Operation::CreateOrUpdate(&id, &RequestBody::new()))
            .await
            .unwrap();

        assert_eq!(result, OperationResult::Resource(final_resource));
        assert_eq!(client.calls().poll_operation, 3);
    }

    #[tokio::test]
    async fn test_long_running_without_body_reads_final_state() {
        let id = ResourceIdentity::new("sub", "rg", "Microsoft.Example", "things", "t1");
        let client = Arc::new(
            MockClient::new("sub")
                .with_long_running_operations()
                .with_operation_statuses(vec![OperationStatus::Succeeded(None)]),
        );

        let body = RequestBody::new().with("location", json!("westus"));
        let result = invoker(&client, Duration::from_secs(5))
            .invoke(Operation::CreateOrUpdate(&id, &body))
            .await
            .unwrap();

        let OperationResult::Resource(resource) = result else {
            panic!("expected a resource");
        };
        assert_eq!(resource.name, "t1");
        assert_eq!(client.calls().get, 1);
    }

    #[tokio::test]
    async fn test_long_running_timeout() {
        let id = ResourceIdentity::new("sub", "rg", "Microsoft.Example", "things", "t1");
        let client = Arc::new(
            MockClient::new("sub")
                .with_resource(thing("t1"))
                .with_long_running_operations(),
        );

        let err = invoker(&client, Duration::from_millis(20))
            .invoke(Operation::Delete(&id))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        let PipelineError::Timeout { context, location, .. } = err else {
            panic!("expected a timeout");
        };
        assert_eq!(context.operation, OperationKind::Delete);
        assert!(location.is_some());
    }

    #[tokio::test]
    async fn test_long_running_failure_is_a_service_error() {
        let id = ResourceIdentity::new("sub", "rg", "Microsoft.Example", "things", "t1");
        let client = Arc::new(
            MockClient::new("sub")
                .with_long_running_operations()
                .with_operation_statuses(vec![OperationStatus::Failed(ClientFault::new(
                    409,
                    "Conflict",
                    "in use",
                ))]),
        );

        let err = invoker(&client, Duration::from_secs(1))
            .invoke(Operation::CreateOrUpdate(&id, &RequestBody::new()))
            .await
            .unwrap_err();

        let PipelineError::Service { context, fault } = err else {
            panic!("expected a service error");
        };
        assert_eq!(fault.code, "Conflict");
        assert_eq!(context.name.as_deref(), Some("t1"));
        assert_eq!(context.resource_group.as_deref(), Some("rg"));
    }

    #[tokio::test]
    async fn test_cancelled_operation() {
        let id = ResourceIdentity::new("sub", "rg", "Microsoft.Example", "things", "t1");
        let client = Arc::new(
            MockClient::new("sub")
                .with_long_running_operations()
                .with_operation_statuses(vec![OperationStatus::Cancelled]),
        );

        let err = invoker(&client, Duration::from_secs(1))
            .invoke(Operation::CreateOrUpdate(&id, &RequestBody::new()))
            .await
            .unwrap_err();

        let PipelineError::Service { fault, .. } = err else {
            panic!("expected a service error");
        };
        assert_eq!(fault.code, CANCELLED_CODE);
    }

    #[tokio::test]
    async fn test_fault_is_not_retried() {
        let id = ResourceIdentity::new("sub", "rg", "Microsoft.Example", "things", "missing");
        let client = Arc::new(MockClient::new("sub"));

        let err = invoker(&client, Duration::from_secs(1))
            .invoke(Operation::Get(&id))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Service);
        assert_eq!(client.calls().get, 1);
    }

    #[tokio::test]
    async fn test_retry_after_overrides_poll_interval() {
        let client = Arc::new(MockClient::new("sub").with_operation_statuses(vec![
            OperationStatus::InProgress,
            OperationStatus::InProgress,
            OperationStatus::Succeeded(Some(thing("t1"))),
        ]));
        let tracker = PollingTracker::new(
            client.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(5),
        );
        let handle = OperationHandle::new("https://management.example/operations/1")
            .with_retry_after(Duration::from_millis(1));

        let resource = tracker
            .wait(&handle, &OperationContext::new(OperationKind::CreateOrUpdate))
            .await
            .unwrap();

        assert_eq!(resource, Some(thing("t1")));
        assert_eq!(client.calls().poll_operation, 3);
    }

    #[tokio::test]
    async fn test_fault_while_paging_is_a_service_error() {
        let client = Arc::new(
            MockClient::new("sub")
                .with_pages(
                    &scope(),
                    vec![
                        Page::with_next(vec![thing("a")], "page-2"),
                        Page::last(vec![thing("b")]),
                    ],
                )
                .with_fault(
                    MockMethod::ListNext,
                    ClientFault::new(500, "InternalServerError", "backend unavailable"),
                ),
        );

        let err = invoker(&client, Duration::from_secs(1))
            .list(&scope(), Some("rg"))
            .await
            .unwrap_err();

        let PipelineError::Service { context, fault } = &err else {
            panic!("expected a service error, got {:?}", err);
        };
        assert_eq!(context.operation, OperationKind::ListByResourceGroup);
        assert_eq!(context.resource_group.as_deref(), Some("rg"));
        assert_eq!(fault.code, "InternalServerError");
        assert_eq!(client.calls().list_by_resource_group, 1);
        assert_eq!(client.calls().list_next, 1);
    }
}
