//! Virtual machine extensions.
//!
//! Extension settings are free-form key/value payloads. Each known extension
//! type declares the keys it accepts through a pair of [`SettingsSchema`]s
//! (public and protected); unknown extension types accept any keys.

use serde_json::{json, Value};
use tracing::debug;

use crate::error::PipelineError;
use crate::pipeline::ResourceMapping;
use crate::projection::LegacyField;
use crate::reconcile::{exactly_one, required, CanonicalRequest, ResourceType, SettingsInput};
use crate::request::{RequestBody, SettingsBag};
use crate::schema::{Attribute, AttributeFlags, AttributeType, SettingsSchema};

const CUSTOM_SCRIPT_PUBLISHER: &str = "Microsoft.Compute";
const CUSTOM_SCRIPT_TYPE: &str = "CustomScriptExtension";

/// Declared public and protected settings of one extension type.
#[derive(Debug, Clone)]
pub struct ExtensionSchemas {
    /// Keys of `settings`.
    pub public: SettingsSchema,
    /// Keys of `protectedSettings`.
    pub protected: SettingsSchema,
    /// Keys of which exactly one must be given across both bags.
    pub one_of: &'static [&'static str],
}

/// The schemas for an extension type, matched ignoring case.
pub fn extension_schemas(publisher: &str, extension_type: &str) -> ExtensionSchemas {
    if publisher.eq_ignore_ascii_case(CUSTOM_SCRIPT_PUBLISHER)
        && extension_type.eq_ignore_ascii_case(CUSTOM_SCRIPT_TYPE)
    {
        return ExtensionSchemas {
            public: SettingsSchema::new("CustomScriptExtension settings")
                .with_attribute(
                    "fileUris",
                    Attribute::optional_string_list()
                        .with_description("Files downloaded before the command runs"),
                )
                .with_attribute("commandToExecute", Attribute::optional_string())
                .with_attribute("timestamp", Attribute::optional_int64()),
            protected: SettingsSchema::new("CustomScriptExtension protected settings")
                .with_attribute("commandToExecute", Attribute::optional_string().sensitive())
                .with_attribute("storageAccountName", Attribute::optional_string())
                .with_attribute("storageAccountKey", Attribute::optional_string().sensitive())
                .with_attribute(
                    "managedIdentity",
                    Attribute::new(AttributeType::Dynamic, AttributeFlags::optional()),
                ),
            one_of: &["commandToExecute"],
        };
    }

    ExtensionSchemas {
        public: SettingsSchema::new(format!("{} settings", extension_type))
            .allowing_undeclared(),
        protected: SettingsSchema::new(format!("{} protected settings", extension_type))
            .allowing_undeclared(),
        one_of: &[],
    }
}

/// Settings of a virtual machine extension.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualMachineExtensionSettings {
    /// Region; defaults to the piped virtual machine's.
    pub location: String,
    /// Extension publisher.
    pub publisher: String,
    /// Extension type.
    pub extension_type: String,
    /// Handler version, e.g. `1.10`.
    pub type_handler_version: String,
    /// Whether minor versions are picked up automatically.
    pub auto_upgrade_minor_version: bool,
    /// Force the extension to run again even when unchanged.
    pub force_update_tag: Option<String>,
    /// Public settings.
    pub settings: SettingsBag,
    /// Protected settings; never returned by the service.
    pub protected_settings: SettingsBag,
}

/// `Microsoft.Compute/virtualMachines/extensions`.
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtualMachineExtension;

impl ResourceMapping for VirtualMachineExtension {
    type Settings = VirtualMachineExtensionSettings;

    fn resource_type(&self) -> ResourceType {
        ResourceType::child("Microsoft.Compute", &["virtualMachines"], "extensions")
    }

    fn settings(&self, input: &SettingsInput<'_>) -> Result<Self::Settings, PipelineError> {
        let settings = match input.parameters.object("Settings")? {
            Some(map) => SettingsBag::from_value(Value::Object(map))?,
            None => SettingsBag::from_value(
                input.current_value("properties.settings").cloned().unwrap_or(Value::Null),
            )?,
        };
        let protected_settings = match input.parameters.object("ProtectedSettings")? {
            Some(map) => SettingsBag::from_value(Value::Object(map))?,
            None => SettingsBag::new(),
        };

        Ok(VirtualMachineExtensionSettings {
            location: required("Location", input.location("Location")?)?,
            publisher: required("Publisher", input.string("Publisher", "properties.publisher")?)?,
            extension_type: required(
                "ExtensionType",
                input.string("ExtensionType", "properties.type")?,
            )?,
            type_handler_version: required(
                "TypeHandlerVersion",
                input.string("TypeHandlerVersion", "properties.typeHandlerVersion")?,
            )?,
            auto_upgrade_minor_version: input
                .bool("AutoUpgradeMinorVersion", "properties.autoUpgradeMinorVersion")?
                .unwrap_or(true),
            force_update_tag: input.string("ForceUpdateTag", "properties.forceUpdateTag")?,
            settings,
            protected_settings,
        })
    }

    fn build(
        &self,
        request: &CanonicalRequest<Self::Settings>,
    ) -> Result<RequestBody, PipelineError> {
        let settings = &request.settings;
        let schemas = extension_schemas(&settings.publisher, &settings.extension_type);

        for key in schemas.one_of {
            exactly_one(&[
                (*key, settings.settings.get(key).is_some()),
                (*key, settings.protected_settings.get(key).is_some()),
            ])
            .map_err(|_| {
                PipelineError::invalid_argument(format!(
                    "{} must be given in exactly one of Settings and ProtectedSettings",
                    key
                ))
            })?;
        }

        let public = bag_payload(&settings.settings, &schemas.public)?;
        let protected = bag_payload(&settings.protected_settings, &schemas.protected)?;
        debug!(
            extension_type = %settings.extension_type,
            protected = %settings.protected_settings.redacted(&schemas.protected),
            "Built extension settings"
        );

        Ok(RequestBody::new()
            .with("location", json!(settings.location))
            .with_property("publisher", json!(settings.publisher))
            .with_property("type", json!(settings.extension_type))
            .with_property("typeHandlerVersion", json!(settings.type_handler_version))
            .with_property("autoUpgradeMinorVersion", json!(settings.auto_upgrade_minor_version))
            .with_optional_property(
                "forceUpdateTag",
                settings.force_update_tag.as_ref().map(|t| json!(t)),
            )
            .with_optional_property("settings", public)
            .with_optional_property("protectedSettings", protected))
    }

    fn legacy_fields(&self) -> &'static [LegacyField] {
        const FIELDS: &[LegacyField] = &[
            LegacyField::new("Publisher", "properties.publisher"),
            LegacyField::new("ExtensionType", "properties.type"),
            LegacyField::new("TypeHandlerVersion", "properties.typeHandlerVersion"),
            LegacyField::new("PublicSettings", "properties.settings"),
            LegacyField::new("ProvisioningState", "properties.provisioningState"),
        ];
        FIELDS
    }
}

fn bag_payload(bag: &SettingsBag, schema: &SettingsSchema) -> Result<Option<Value>, PipelineError> {
    if bag.is_empty() {
        Ok(None)
    } else {
        bag.validated(schema).map(Some)
    }
}
