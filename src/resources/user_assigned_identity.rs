//! User-assigned managed identities.

use std::collections::BTreeMap;

use serde_json::json;

use crate::error::PipelineError;
use crate::pipeline::ResourceMapping;
use crate::projection::{LegacyField, ListPolicy};
use crate::reconcile::{required, CanonicalRequest, ResourceType, SettingsInput};
use crate::request::RequestBody;

/// Settings of a user-assigned identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAssignedIdentitySettings {
    /// Region.
    pub location: String,
    /// Resource tags.
    pub tags: BTreeMap<String, String>,
}

/// `Microsoft.ManagedIdentity/userAssignedIdentities`.
///
/// Listing a single identity yields the identity itself rather than a
/// one-element collection.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserAssignedIdentity;

impl ResourceMapping for UserAssignedIdentity {
    type Settings = UserAssignedIdentitySettings;

    fn resource_type(&self) -> ResourceType {
        ResourceType::top_level("Microsoft.ManagedIdentity", "userAssignedIdentities")
    }

    fn settings(&self, input: &SettingsInput<'_>) -> Result<Self::Settings, PipelineError> {
        Ok(UserAssignedIdentitySettings {
            location: required("Location", input.location("Location")?)?,
            tags: input.tags("Tag")?,
        })
    }

    fn build(
        &self,
        request: &CanonicalRequest<Self::Settings>,
    ) -> Result<RequestBody, PipelineError> {
        Ok(RequestBody::new()
            .with("location", json!(request.settings.location))
            .with_tags(&request.settings.tags))
    }

    fn list_policy(&self) -> ListPolicy {
        ListPolicy::UnwrapSingleton
    }

    fn legacy_fields(&self) -> &'static [LegacyField] {
        const FIELDS: &[LegacyField] = &[
            LegacyField::new("ClientId", "properties.clientId"),
            LegacyField::new("PrincipalId", "properties.principalId"),
            LegacyField::new("TenantId", "properties.tenantId"),
        ];
        FIELDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::client::{CollectionScope, Page, Resource};
    use crate::error::ErrorKind;
    use crate::identifier::ResourceIdentity;
    use crate::pipeline::{ListQuery, ResourcePipeline};
    use crate::projection::Output;
    use crate::reconcile::{ParameterSet, Parameters};
    use crate::testing::{assert_error_kind, assert_no_calls, MockClient};

    fn identity(rg: &str, name: &str) -> Resource {
        let id = ResourceIdentity::new(
            "sub",
            rg,
            "Microsoft.ManagedIdentity",
            "userAssignedIdentities",
            name,
        );
        Resource::new(&id)
            .with_location("westus")
            .with_property("clientId", json!(format!("client-{}", name)))
            .with_property("principalId", json!(format!("principal-{}", name)))
            .with_property("tenantId", json!("tenant"))
    }

    fn pipeline(client: &Arc<MockClient>) -> ResourcePipeline<UserAssignedIdentity> {
        ResourcePipeline::new(UserAssignedIdentity, client.clone())
    }

    #[tokio::test]
    async fn test_resource_group_list_unwraps_single_item() {
        let client = Arc::new(
            MockClient::new("sub")
                .with_resource(identity("rg1", "only"))
                .with_resource(identity("rg2", "first"))
                .with_resource(identity("rg2", "second")),
        );
        let pipeline = pipeline(&client);

        let single = pipeline
            .list(&ListQuery::new().in_resource_group("rg1"))
            .await
            .unwrap();
        let model = single.as_single().expect("single identity");
        assert_eq!(model.name, "only");
        assert_eq!(model.field("ClientId"), Some(&json!("client-only")));

        let many = pipeline
            .list(&ListQuery::new().in_resource_group("rg2"))
            .await
            .unwrap();
        assert!(matches!(many, Output::Collection(ref items) if items.len() == 2));

        let none = pipeline
            .list(&ListQuery::new().in_resource_group("empty"))
            .await
            .unwrap();
        assert!(matches!(none, Output::Collection(ref items) if items.is_empty()));
    }

    #[tokio::test]
    async fn test_list_by_subscription_follows_pages() {
        let scope = CollectionScope::new("Microsoft.ManagedIdentity", "userAssignedIdentities");
        let client = Arc::new(MockClient::new("sub").with_pages(
            &scope,
            vec![
                Page::with_next(vec![identity("rg1", "a")], "https://management.example/next/2"),
                Page::with_next(
                    vec![identity("rg1", "b"), identity("rg2", "c")],
                    "https://management.example/next/3",
                ),
                Page::last(vec![identity("rg3", "d")]),
            ],
        ));

        let output = pipeline(&client).list(&ListQuery::new()).await.unwrap();

        let names: Vec<_> = output.into_vec().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["a", "b", "c", "d"]);
        assert_eq!(client.calls().list_next, 2);
    }

    #[tokio::test]
    async fn test_create_requires_location() {
        let client = Arc::new(MockClient::new("sub"));
        let result = pipeline(&client)
            .create_or_update(&ParameterSet::by_name("rg", "id1"), &Parameters::new())
            .await;

        assert_error_kind(&result, ErrorKind::InvalidArgument);
        assert_no_calls(&client);
    }

    #[tokio::test]
    async fn test_create_with_tags() {
        let client = Arc::new(MockClient::new("sub"));
        let params = Parameters::new()
            .with("location", json!("westus2"))
            .with("Tag", json!({"env": "prod"}));

        let model = pipeline(&client)
            .create_or_update(&ParameterSet::by_name("rg", "id1"), &params)
            .await
            .unwrap();

        assert_eq!(model.location.as_deref(), Some("westus2"));
        assert_eq!(model.tags["env"], "prod");
        assert_eq!(
            client.last_body().unwrap().to_value(),
            json!({"location": "westus2", "tags": {"env": "prod"}})
        );
    }

    #[tokio::test]
    async fn test_update_from_input_object_keeps_location() {
        let client = Arc::new(MockClient::new("sub").with_resource(identity("rg", "id1")));
        let pipeline = pipeline(&client);
        let current = pipeline.get(&ParameterSet::by_name("rg", "id1")).await.unwrap();

        let model = pipeline
            .update(
                &ParameterSet::ByInputObject(current),
                &Parameters::new().with("Tag", json!({"team": "infra"})),
            )
            .await
            .unwrap();

        assert_eq!(model.location.as_deref(), Some("westus"));
        assert_eq!(model.tags["team"], "infra");
    }

    #[tokio::test]
    async fn test_get_by_resource_id() {
        let client = Arc::new(MockClient::new("sub").with_resource(identity("RG1", "Thing1")));
        let id = "/subscriptions/sub/resourceGroups/RG1/providers/\
                  Microsoft.ManagedIdentity/userAssignedIdentities/Thing1";
        let model = pipeline(&client)
            .get(&ParameterSet::ByResourceId(id.to_string()))
            .await
            .unwrap();

        assert_eq!(model.resource_group_name, "RG1");
        assert_eq!(model.field("PrincipalId"), Some(&json!("principal-Thing1")));
        assert_eq!(model.field("TenantId"), Some(&json!("tenant")));
    }
}
