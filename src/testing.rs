//! Testing utilities for resource mappings and pipelines.
//!
//! [`MockClient`] is an in-memory [`ManagementClient`] that records every call,
//! so tests can assert how many requests an operation issued (including
//! none at all when input is rejected).
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use resource_pipeline::testing::{assert_no_calls, MockClient};
//!
//! #[tokio::test]
//! async fn test_conflicting_addresses() {
//!     let client = Arc::new(MockClient::new("sub"));
//!     let pipeline = ResourcePipeline::new(BackendAddressPool, client.clone());
//!
//!     let result = pipeline.create_or_update(&set, &params).await;
//!
//!     assert!(result.is_err());
//!     assert_no_calls(&client);
//! }
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use crate::client::{
    ClientFault, CollectionScope, ManagementClient, OperationHandle, OperationStatus, Page,
    Resource, Response,
};
use crate::error::{ErrorKind, PipelineError};
use crate::identifier::ResourceIdentity;
use crate::request::RequestBody;

/// The client methods a fault can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockMethod {
    /// [`ManagementClient::get`].
    Get,
    /// [`ManagementClient::create_or_update`].
    CreateOrUpdate,
    /// [`ManagementClient::delete`].
    Delete,
    /// [`ManagementClient::list_by_resource_group`].
    ListByResourceGroup,
    /// [`ManagementClient::list_by_subscription`].
    ListBySubscription,
    /// [`ManagementClient::list_next`].
    ListNext,
    /// [`ManagementClient::poll_operation`].
    PollOperation,
}

/// Number of calls made to each client method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// Calls to `get`.
    pub get: usize,
    /// Calls to `create_or_update`.
    pub create_or_update: usize,
    /// Calls to `delete`.
    pub delete: usize,
    /// Calls to `list_by_resource_group`.
    pub list_by_resource_group: usize,
    /// Calls to `list_by_subscription`.
    pub list_by_subscription: usize,
    /// Calls to `list_next`.
    pub list_next: usize,
    /// Calls to `poll_operation`.
    pub poll_operation: usize,
}

impl CallCounts {
    /// Calls across all methods.
    pub fn total(&self) -> usize {
        self.get
            + self.create_or_update
            + self.delete
            + self.list_by_resource_group
            + self.list_by_subscription
            + self.list_next
            + self.poll_operation
    }

    fn record(&mut self, method: MockMethod) {
        let counter = match method {
            MockMethod::Get => &mut self.get,
            MockMethod::CreateOrUpdate => &mut self.create_or_update,
            MockMethod::Delete => &mut self.delete,
            MockMethod::ListByResourceGroup => &mut self.list_by_resource_group,
            MockMethod::ListBySubscription => &mut self.list_by_subscription,
            MockMethod::ListNext => &mut self.list_next,
            MockMethod::PollOperation => &mut self.poll_operation,
        };
        *counter += 1;
    }
}

#[derive(Default)]
struct MockState {
    resources: BTreeMap<String, Resource>,
    first_pages: HashMap<String, Page>,
    next_pages: HashMap<String, Page>,
    statuses: VecDeque<OperationStatus>,
    faults: HashMap<MockMethod, ClientFault>,
    long_running: bool,
    operations: usize,
    calls: CallCounts,
    last_body: Option<RequestBody>,
}

/// An in-memory management client.
///
/// Resources are keyed by id, ignoring case. Listing returns the stored
/// resources of the requested type unless pages were scripted with
/// [`MockClient::with_pages`]. Mutating calls complete synchronously unless
/// [`MockClient::with_long_running_operations`] is set, in which case they
/// return a handle and `poll_operation` replays the scripted statuses,
/// reporting `InProgress` once the script is exhausted.
pub struct MockClient {
    subscription_id: String,
    state: Mutex<MockState>,
}

impl MockClient {
    /// Create an empty client bound to a subscription.
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Store a resource.
    pub fn with_resource(self, resource: Resource) -> Self {
        self.lock().resources.insert(key(&resource.id), resource);
        self
    }

    /// Script the pages returned when listing `scope`.
    ///
    /// The first page answers the initial list call; each following page is
    /// returned for the previous page's next link.
    pub fn with_pages(self, scope: &CollectionScope, pages: Vec<Page>) -> Self {
        {
            let mut state = self.lock();
            let mut pages = pages.into_iter();
            if let Some(first) = pages.next() {
                let mut link = first.next_link.clone();
                state.first_pages.insert(scope_key(scope), first);
                for page in pages {
                    let Some(current) = link.take() else { break };
                    link = page.next_link.clone();
                    state.next_pages.insert(current, page);
                }
            }
        }
        self
    }

    /// Make mutating calls return long-running operation handles.
    pub fn with_long_running_operations(self) -> Self {
        self.lock().long_running = true;
        self
    }

    /// Script the statuses returned by successive polls.
    pub fn with_operation_statuses(self, statuses: Vec<OperationStatus>) -> Self {
        self.lock().statuses.extend(statuses);
        self
    }

    /// Fail every call to `method` with `fault`.
    pub fn with_fault(self, method: MockMethod, fault: ClientFault) -> Self {
        self.lock().faults.insert(method, fault);
        self
    }

    /// Calls made so far.
    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    /// The body of the most recent create-or-update call.
    pub fn last_body(&self) -> Option<RequestBody> {
        self.lock().last_body.clone()
    }

    /// A stored resource.
    pub fn resource(&self, identity: &ResourceIdentity) -> Option<Resource> {
        self.lock().resources.get(&key(&identity.to_string())).cloned()
    }

    /// Whether a resource is stored.
    pub fn contains(&self, identity: &ResourceIdentity) -> bool {
        self.resource(identity).is_some()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self, method: MockMethod) -> Result<MutexGuard<'_, MockState>, ClientFault> {
        let mut state = self.lock();
        state.calls.record(method);
        if let Some(fault) = state.faults.get(&method).cloned() {
            return Err(fault);
        }
        Ok(state)
    }

    fn list_stored(
        state: &MockState,
        scope: &CollectionScope,
        resource_group: Option<&str>,
    ) -> Page {
        let items = state
            .resources
            .values()
            .filter(|resource| {
                let Ok(identity) = ResourceIdentity::parse(&resource.id) else {
                    return false;
                };
                let type_matches = identity
                    .full_resource_type()
                    .is_some_and(|t| t.eq_ignore_ascii_case(&scope.full_resource_type()));
                let group_matches = resource_group.map_or(true, |group| {
                    identity.resource_group_name.eq_ignore_ascii_case(group)
                });
                let parents_match = identity
                    .parent_names()
                    .iter()
                    .zip(&scope.parent_chain)
                    .all(|(name, segment)| name.eq_ignore_ascii_case(&segment.name));
                type_matches && group_matches && parents_match
            })
            .cloned()
            .collect();
        Page::last(items)
    }

    fn start_operation(state: &mut MockState) -> Response {
        state.operations += 1;
        Response::Accepted(OperationHandle::new(format!(
            "https://management.example/operations/{}",
            state.operations
        )))
    }
}

fn key(id: &str) -> String {
    id.to_ascii_lowercase()
}

fn scope_key(scope: &CollectionScope) -> String {
    let mut key = scope.full_resource_type().to_ascii_lowercase();
    for segment in &scope.parent_chain {
        key.push('|');
        key.push_str(&segment.name.to_ascii_lowercase());
    }
    key
}

fn not_found(id: &str) -> ClientFault {
    ClientFault::new(
        404,
        "ResourceNotFound",
        format!("The resource '{}' was not found", id),
    )
}

fn resource_from_body(identity: &ResourceIdentity, body: &RequestBody) -> Resource {
    let mut resource = Resource::new(identity);
    if let Value::Object(fields) = body.to_value() {
        for (name, value) in fields {
            match (name.as_str(), value) {
                ("location", Value::String(location)) => resource.location = Some(location),
                ("tags", Value::Object(tags)) => {
                    resource.tags = tags
                        .into_iter()
                        .map(|(k, v)| (k, v.as_str().unwrap_or_default().to_string()))
                        .collect();
                },
                (_, value) => {
                    resource.fields.insert(name, value);
                },
            }
        }
    }
    resource
}

#[async_trait::async_trait]
impl ManagementClient for MockClient {
    fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    async fn get(&self, id: &ResourceIdentity) -> Result<Resource, ClientFault> {
        let state = self.begin(MockMethod::Get)?;
        let path = id.to_string();
        state.resources.get(&key(&path)).cloned().ok_or_else(|| not_found(&path))
    }

    async fn create_or_update(
        &self,
        id: &ResourceIdentity,
        body: &RequestBody,
    ) -> Result<Response, ClientFault> {
        let mut state = self.begin(MockMethod::CreateOrUpdate)?;
        let resource = resource_from_body(id, body);
        state.last_body = Some(body.clone());
        state.resources.insert(key(&resource.id), resource.clone());

        if state.long_running {
            Ok(Self::start_operation(&mut state))
        } else {
            Ok(Response::Resource(resource))
        }
    }

    async fn delete(&self, id: &ResourceIdentity) -> Result<Response, ClientFault> {
        let mut state = self.begin(MockMethod::Delete)?;
        state.resources.remove(&key(&id.to_string()));

        if state.long_running {
            Ok(Self::start_operation(&mut state))
        } else {
            Ok(Response::NoContent)
        }
    }

    async fn list_by_resource_group(
        &self,
        scope: &CollectionScope,
        resource_group: &str,
    ) -> Result<Page, ClientFault> {
        let state = self.begin(MockMethod::ListByResourceGroup)?;
        Ok(match state.first_pages.get(&scope_key(scope)) {
            Some(page) => page.clone(),
            None => Self::list_stored(&state, scope, Some(resource_group)),
        })
    }

    async fn list_by_subscription(&self, scope: &CollectionScope) -> Result<Page, ClientFault> {
        let state = self.begin(MockMethod::ListBySubscription)?;
        Ok(match state.first_pages.get(&scope_key(scope)) {
            Some(page) => page.clone(),
            None => Self::list_stored(&state, scope, None),
        })
    }

    async fn list_next(&self, next_link: &str) -> Result<Page, ClientFault> {
        let state = self.begin(MockMethod::ListNext)?;
        state
            .next_pages
            .get(next_link)
            .cloned()
            .ok_or_else(|| {
                ClientFault::new(400, "InvalidNextLink", format!("unknown link '{}'", next_link))
            })
    }

    async fn poll_operation(
        &self,
        _handle: &OperationHandle,
    ) -> Result<OperationStatus, ClientFault> {
        let mut state = self.begin(MockMethod::PollOperation)?;
        Ok(state.statuses.pop_front().unwrap_or(OperationStatus::InProgress))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that the client was never called.
///
/// # Panics
///
/// Panics if any client method was called.
pub fn assert_no_calls(client: &MockClient) {
    let calls = client.calls();
    assert!(
        calls.total() == 0,
        "Expected no client calls, but got {}: {:?}",
        calls.total(),
        calls
    );
}

/// Assert that a result is an error of the given kind.
///
/// # Panics
///
/// Panics if the result is `Ok` or an error of another kind.
pub fn assert_error_kind<T: std::fmt::Debug>(result: &Result<T, PipelineError>, kind: ErrorKind) {
    match result {
        Ok(value) => panic!("Expected a {:?} error, but got Ok({:?})", kind, value),
        Err(err) => assert!(
            err.kind() == kind,
            "Expected a {:?} error, but got {:?}: {}",
            kind,
            err.kind(),
            err
        ),
    }
}

/// Assert that a result is an error whose message contains `substring`.
///
/// # Panics
///
/// Panics if the result is `Ok` or the message does not match.
pub fn assert_error_contains<T: std::fmt::Debug>(
    result: &Result<T, PipelineError>,
    substring: &str,
) {
    match result {
        Ok(value) => panic!(
            "Expected an error containing '{}', but got Ok({:?})",
            substring, value
        ),
        Err(err) => assert!(
            err.to_string().contains(substring),
            "Expected an error containing '{}', but got: {}",
            substring,
            err
        ),
    }
}
