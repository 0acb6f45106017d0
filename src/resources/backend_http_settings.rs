//! Application gateway backend HTTP settings.

use serde_json::json;

use crate::error::PipelineError;
use crate::pipeline::ResourceMapping;
use crate::projection::LegacyField;
use crate::reconcile::{
    at_most_one, default_if_unset, required, CanonicalRequest, ResourceType, SettingsInput,
};
use crate::request::{parse_enum, Choice, RequestBody};

/// Request timeout, in seconds, used when none (or zero) is given.
pub const DEFAULT_REQUEST_TIMEOUT: i64 = 30;

/// Protocol used to reach the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Plain HTTP.
    Http,
    /// HTTP over TLS.
    Https,
}

impl Choice for Protocol {
    const VARIANTS: &'static [(&'static str, Self)] =
        &[("Http", Self::Http), ("Https", Self::Https)];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "Http",
            Self::Https => "Https",
        }
    }
}

/// Whether requests from one client stick to one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieBasedAffinity {
    /// Sticky sessions.
    Enabled,
    /// No affinity.
    Disabled,
}

impl Choice for CookieBasedAffinity {
    const VARIANTS: &'static [(&'static str, Self)] =
        &[("Enabled", Self::Enabled), ("Disabled", Self::Disabled)];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "Enabled",
            Self::Disabled => "Disabled",
        }
    }
}

/// Settings of a backend HTTP settings collection entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendHttpSettingsConfig {
    /// Backend port.
    pub port: i64,
    /// Backend protocol.
    pub protocol: Protocol,
    /// Session affinity.
    pub cookie_based_affinity: CookieBasedAffinity,
    /// Request timeout in seconds.
    pub request_timeout: i64,
    /// Take the host header from the backend address.
    pub pick_host_name_from_backend_address: bool,
    /// Explicit host header.
    pub host_name: Option<String>,
    /// Resource id of the health probe.
    pub probe_id: Option<String>,
    /// Name of the affinity cookie.
    pub affinity_cookie_name: Option<String>,
}

/// `Microsoft.Network/applicationGateways/backendHttpSettingsCollection`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendHttpSettings;

impl ResourceMapping for BackendHttpSettings {
    type Settings = BackendHttpSettingsConfig;

    fn resource_type(&self) -> ResourceType {
        ResourceType::child(
            "Microsoft.Network",
            &["applicationGateways"],
            "backendHttpSettingsCollection",
        )
    }

    fn settings(&self, input: &SettingsInput<'_>) -> Result<Self::Settings, PipelineError> {
        let port = required("Port", input.i64("Port", "properties.port")?)?;
        if !(1..=65535).contains(&port) {
            return Err(PipelineError::invalid_argument(format!(
                "Port must be between 1 and 65535, got {}",
                port
            )));
        }

        let protocol = required("Protocol", input.string("Protocol", "properties.protocol")?)?;
        let affinity = required(
            "CookieBasedAffinity",
            input.string("CookieBasedAffinity", "properties.cookieBasedAffinity")?,
        )?;

        // Only explicit parameters can conflict; an explicit mode replaces the inherited one.
        let explicit_host_name = input.parameters.string("HostName")?;
        let explicit_pick = input.parameters.bool("PickHostNameFromBackendAddress")?;
        at_most_one(&[
            ("HostName", explicit_host_name.is_some()),
            ("PickHostNameFromBackendAddress", explicit_pick == Some(true)),
        ])?;

        let pick_host_name = match (explicit_pick, &explicit_host_name) {
            (Some(pick), _) => pick,
            (None, Some(_)) => false,
            (None, None) => input
                .bool(
                    "PickHostNameFromBackendAddress",
                    "properties.pickHostNameFromBackendAddress",
                )?
                .unwrap_or(false),
        };
        let host_name = match explicit_host_name {
            Some(host_name) => Some(host_name),
            None if pick_host_name => None,
            None => input.string("HostName", "properties.hostName")?,
        };

        Ok(BackendHttpSettingsConfig {
            port,
            protocol: parse_enum("Protocol", &protocol)?,
            cookie_based_affinity: parse_enum("CookieBasedAffinity", &affinity)?,
            request_timeout: default_if_unset(
                input.i64("RequestTimeout", "properties.requestTimeout")?,
                DEFAULT_REQUEST_TIMEOUT,
            ),
            pick_host_name_from_backend_address: pick_host_name,
            host_name,
            probe_id: input.string("ProbeId", "properties.probe.id")?,
            affinity_cookie_name: input
                .string("AffinityCookieName", "properties.affinityCookieName")?,
        })
    }

    fn build(
        &self,
        request: &CanonicalRequest<Self::Settings>,
    ) -> Result<RequestBody, PipelineError> {
        let settings = &request.settings;
        Ok(RequestBody::new()
            .with("name", json!(request.identity.name()))
            .with_property("port", json!(settings.port))
            .with_property("protocol", json!(settings.protocol.as_str()))
            .with_property("cookieBasedAffinity", json!(settings.cookie_based_affinity.as_str()))
            .with_property("requestTimeout", json!(settings.request_timeout))
            .with_property(
                "pickHostNameFromBackendAddress",
                json!(settings.pick_host_name_from_backend_address),
            )
            .with_optional_property("hostName", settings.host_name.as_ref().map(|h| json!(h)))
            .with_optional_property(
                "probe",
                settings.probe_id.as_ref().map(|id| json!({ "id": id })),
            )
            .with_optional_property(
                "affinityCookieName",
                settings.affinity_cookie_name.as_ref().map(|name| json!(name)),
            ))
    }

    fn legacy_fields(&self) -> &'static [LegacyField] {
        const FIELDS: &[LegacyField] = &[
            LegacyField::new("Port", "properties.port"),
            LegacyField::new("Protocol", "properties.protocol"),
            LegacyField::new("RequestTimeout", "properties.requestTimeout"),
            LegacyField::new("ProvisioningState", "properties.provisioningState"),
        ];
        FIELDS
    }
}
