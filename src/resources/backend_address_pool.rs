//! Application gateway backend address pools.

use serde_json::{json, Value};

use crate::error::PipelineError;
use crate::pipeline::ResourceMapping;
use crate::projection::LegacyField;
use crate::reconcile::{at_most_one, CanonicalRequest, ResourceType, SettingsInput};
use crate::request::RequestBody;

const IP_ADDRESSES: &str = "BackendIPAddresses";
const FQDNS: &str = "BackendFqdns";

/// One member of a backend pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendAddress {
    /// An IP address.
    IpAddress(String),
    /// A fully-qualified domain name.
    Fqdn(String),
}

impl BackendAddress {
    fn to_value(&self) -> Value {
        match self {
            Self::IpAddress(ip) => json!({ "ipAddress": ip }),
            Self::Fqdn(fqdn) => json!({ "fqdn": fqdn }),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        if let Some(ip) = value.get("ipAddress").and_then(Value::as_str) {
            return Some(Self::IpAddress(ip.to_string()));
        }
        value
            .get("fqdn")
            .and_then(Value::as_str)
            .map(|fqdn| Self::Fqdn(fqdn.to_string()))
    }
}

/// Settings of a backend address pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendAddressPoolSettings {
    /// Pool members, in the order given.
    pub addresses: Vec<BackendAddress>,
}

/// `Microsoft.Network/applicationGateways/backendAddressPools`.
///
/// Members are given either as `BackendIPAddresses` or as `BackendFqdns`,
/// never both.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendAddressPool;

impl ResourceMapping for BackendAddressPool {
    type Settings = BackendAddressPoolSettings;

    fn resource_type(&self) -> ResourceType {
        ResourceType::child("Microsoft.Network", &["applicationGateways"], "backendAddressPools")
    }

    fn settings(&self, input: &SettingsInput<'_>) -> Result<Self::Settings, PipelineError> {
        let ip_addresses = input.parameters.string_list(IP_ADDRESSES)?;
        let fqdns = input.parameters.string_list(FQDNS)?;
        at_most_one(&[(IP_ADDRESSES, ip_addresses.is_some()), (FQDNS, fqdns.is_some())])?;

        let addresses = match (ip_addresses, fqdns) {
            (Some(ips), _) => ips.into_iter().map(BackendAddress::IpAddress).collect(),
            (_, Some(fqdns)) => fqdns.into_iter().map(BackendAddress::Fqdn).collect(),
            (None, None) => input
                .current_value("properties.backendAddresses")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(BackendAddress::from_value).collect())
                .unwrap_or_default(),
        };
        Ok(BackendAddressPoolSettings { addresses })
    }

    fn build(
        &self,
        request: &CanonicalRequest<Self::Settings>,
    ) -> Result<RequestBody, PipelineError> {
        let addresses: Vec<Value> = request
            .settings
            .addresses
            .iter()
            .map(BackendAddress::to_value)
            .collect();
        Ok(RequestBody::new()
            .with("name", json!(request.identity.name()))
            .with_property("backendAddresses", Value::Array(addresses)))
    }

    fn legacy_fields(&self) -> &'static [LegacyField] {
        const FIELDS: &[LegacyField] = &[
            LegacyField::new("BackendAddresses", "properties.backendAddresses"),
            LegacyField::new("ProvisioningState", "properties.provisioningState"),
        ];
        FIELDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::client::Resource;
    use crate::error::ErrorKind;
    use crate::identifier::ResourceIdentity;
    use crate::pipeline::{ListQuery, ResourcePipeline};
    use crate::projection::project;
    use crate::reconcile::{ParameterSet, Parameters};
    use crate::testing::{assert_error_contains, assert_error_kind, assert_no_calls, MockClient};

    fn pool_set() -> ParameterSet {
        ParameterSet::by_child_name("rg", vec!["gw".to_string()], "pool1")
    }

    fn pool(name: &str, addresses: Value) -> Resource {
        let gateway =
            ResourceIdentity::new("sub", "rg", "Microsoft.Network", "applicationGateways", "gw");
        let id = gateway.child("backendAddressPools", name).unwrap();
        Resource::new(&id).with_property("backendAddresses", addresses)
    }

    #[tokio::test]
    async fn test_ip_addresses_and_fqdns_are_exclusive() {
        let client = Arc::new(MockClient::new("sub"));
        let pipeline = ResourcePipeline::new(BackendAddressPool, client.clone());
        let params = Parameters::new()
            .with(IP_ADDRESSES, json!(["10.0.0.4"]))
            .with(FQDNS, json!(["app.contoso.com"]));

        let result = pipeline.create_or_update(&pool_set(), &params).await;

        assert_error_kind(&result, ErrorKind::InvalidArgument);
        assert_error_contains(&result, "at most one of BackendIPAddresses and BackendFqdns");
        assert_no_calls(&client);
    }

    #[tokio::test]
    async fn test_create_with_ip_addresses() {
        let client = Arc::new(MockClient::new("sub"));
        let pipeline = ResourcePipeline::new(BackendAddressPool, client.clone());
        let params = Parameters::new().with(IP_ADDRESSES, json!(["10.0.0.4", "10.0.0.5"]));

        let model = pipeline.create_or_update(&pool_set(), &params).await.unwrap();

        assert_eq!(
            model.field("BackendAddresses"),
            Some(&json!([{"ipAddress": "10.0.0.4"}, {"ipAddress": "10.0.0.5"}]))
        );
        assert_eq!(model.resource_group_name, "rg");
        assert_eq!(client.calls().create_or_update, 1);
    }

    #[tokio::test]
    async fn test_update_keeps_current_members() {
        let client = Arc::new(
            MockClient::new("sub").with_resource(pool("pool1", json!([{"fqdn": "a.contoso.com"}]))),
        );
        let pipeline = ResourcePipeline::new(BackendAddressPool, client.clone());

        let model = pipeline.update(&pool_set(), &Parameters::new()).await.unwrap();

        assert_eq!(
            model.lookup("properties.backendAddresses"),
            Some(&json!([{"fqdn": "a.contoso.com"}]))
        );
    }

    #[tokio::test]
    async fn test_list_under_gateway() {
        let client = Arc::new(
            MockClient::new("sub")
                .with_resource(pool("pool1", json!([])))
                .with_resource(pool("pool2", json!([]))),
        );
        let pipeline = ResourcePipeline::new(BackendAddressPool, client.clone());

        let output = pipeline
            .list(&ListQuery::new().in_resource_group("rg").under_parent("gw"))
            .await
            .unwrap();
        assert_eq!(output.len(), 2);

        let result = pipeline.list(&ListQuery::new().under_parent("gw")).await;
        assert_error_kind(&result, ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_get_from_input_object_needs_its_id() {
        let client = Arc::new(MockClient::new("sub").with_resource(pool("pool1", json!([]))));
        let pipeline = ResourcePipeline::new(BackendAddressPool, client.clone());
        let piped = project(pool("pool1", json!([])), &[]).unwrap();

        let model = pipeline
            .get(&ParameterSet::ByInputObject(piped.clone()))
            .await
            .unwrap();
        assert_eq!(model.name, "pool1");
        assert_eq!(client.calls().get, 1);

        let mut without_id = piped;
        without_id.id = String::new();
        let result = pipeline.get(&ParameterSet::ByInputObject(without_id)).await;
        assert_error_kind(&result, ErrorKind::InvalidArgument);
        assert_error_contains(&result, "the input object has no resource id");
        assert_eq!(client.calls().get, 1);
    }

    #[test]
    fn test_single_fqdn_string_is_accepted() {
        let params = Parameters::new().with(FQDNS, json!("app.contoso.com"));
        let input = SettingsInput::new(crate::invoker::OperationKind::CreateOrUpdate, &params);
        let settings = BackendAddressPool.settings(&input).unwrap();
        assert_eq!(
            settings.addresses,
            vec![BackendAddress::Fqdn("app.contoso.com".to_string())]
        );
    }
}
