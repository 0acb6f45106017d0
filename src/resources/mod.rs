//! Resource mappings for the supported resource types.
//!
//! Each mapping plugs into a [`ResourcePipeline`](crate::pipeline::ResourcePipeline):
//!
//! | Mapping | Resource type |
//! |---------|---------------|
//! | [`BackendAddressPool`] | `Microsoft.Network/applicationGateways/backendAddressPools` |
//! | [`BackendHttpSettings`] | `Microsoft.Network/applicationGateways/backendHttpSettingsCollection` |
//! | [`VirtualMachineExtension`] | `Microsoft.Compute/virtualMachines/extensions` |
//! | [`UserAssignedIdentity`] | `Microsoft.ManagedIdentity/userAssignedIdentities` |

mod backend_address_pool;
mod backend_http_settings;
mod user_assigned_identity;
mod vm_extension;

pub use backend_address_pool::{BackendAddress, BackendAddressPool, BackendAddressPoolSettings};
pub use backend_http_settings::{
    BackendHttpSettings, BackendHttpSettingsConfig, CookieBasedAffinity, Protocol,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use user_assigned_identity::{UserAssignedIdentity, UserAssignedIdentitySettings};
pub use vm_extension::{
    extension_schemas, ExtensionSchemas, VirtualMachineExtension, VirtualMachineExtensionSettings,
};
