//! Resource Pipeline
//!
//! A generic, parameter-driven CRUD pipeline for cloud resource-management
//! commands. A command host hands over already-parsed parameters; the pipeline
//! resolves the resource identity, builds the provider request, invokes the
//! management operation (following pages and waiting on long-running
//! operations) and projects the raw response into a stable presentation shape.
//!
//! # Overview
//!
//! - **Identifier resolution** ([`identifier`]): resource paths to structured identities
//! - **Input reconciliation** ([`reconcile`]): alternative parameter sets to one canonical request
//! - **Request building** ([`request`], [`schema`], [`validation`]): provider bodies
//! - **Operation invocation** ([`invoker`], [`client`]): calls to an injected [`ManagementClient`]
//! - **Result projection** ([`projection`]): raw resources to [`PresentationModel`]s
//! - **Composition** ([`pipeline`]): one [`ResourcePipeline`] per [`ResourceMapping`]
//! - **Resource mappings** ([`resources`]): the supported resource types
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use resource_pipeline::resources::BackendHttpSettings;
//! use resource_pipeline::{
//!     init_logging, ParameterSet, Parameters, PipelineOptions, ResourcePipeline,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!
//!     let client = Arc::new(MyManagementClient::connect().await?);
//!     let pipeline = ResourcePipeline::with_options(
//!         BackendHttpSettings,
//!         client,
//!         PipelineOptions::from_env(),
//!     );
//!
//!     let settings = pipeline
//!         .create_or_update(
//!             &ParameterSet::by_child_name("rg", vec!["gateway".into()], "http-settings"),
//!             &Parameters::new()
//!                 .with("Port", json!(80))
//!                 .with("Protocol", json!("Http"))
//!                 .with("CookieBasedAffinity", json!("Disabled")),
//!         )
//!         .await?;
//!
//!     println!("{}", serde_json::to_string_pretty(&settings)?);
//!     Ok(())
//! }
//! ```
//!
//! # Errors
//!
//! Every operation returns [`PipelineError`]. Input problems
//! ([`ErrorKind::MalformedIdentifier`], [`ErrorKind::InvalidArgument`]) are
//! detected before the client is called; client faults are surfaced
//! unchanged as [`ErrorKind::Service`] with the operation, resource group and
//! name attached, and are never retried.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod error;
pub mod identifier;
pub mod invoker;
pub mod logging;
pub mod pipeline;
pub mod projection;
pub mod reconcile;
pub mod request;
pub mod resources;
pub mod schema;
pub mod testing;
pub mod validation;

// Re-export main types at crate root
pub use client::{ClientFault, ManagementClient, Resource};
pub use error::{ErrorKind, OperationContext, PipelineError};
pub use identifier::ResourceIdentity;
pub use invoker::{OperationKind, OperationTracker, PollingTracker};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use pipeline::{ListQuery, PipelineOptions, ResourceMapping, ResourcePipeline};
pub use projection::{ListPolicy, Output, PresentationModel};
pub use reconcile::{CanonicalRequest, ParameterSet, Parameters};
pub use request::{RequestBody, SettingsBag};

// Re-export async_trait for client implementations
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
