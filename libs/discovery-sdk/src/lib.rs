//! Discovery SDK
//!
//! Shared vocabulary of the service discovery subsystem:
//!
//! - [`Service`], [`ServiceType`], [`InstanceName`], [`Namespace`] - identity model
//! - [`key`] - codec between identities and store keys
//! - [`DiscoveryValue`], [`AdminValue`], [`MonitoringValue`], [`ExportedEntity`] - stored payloads
//! - [`DiscoveryProvider`], [`Locator`] - capability traits
//! - [`DiscoveryError`] - error types
//!
//! ## Usage
//!
//! ```ignore
//! use discovery_sdk::{EndpointType, Locator, LocatorFilter};
//!
//! let locations = locator
//!     .get("bob_api", EndpointType::AppMain, &LocatorFilter::default())
//!     .await?;
//! ```

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod api;
pub mod error;
pub mod key;
pub mod models;
pub mod service;
pub mod values;

// Re-export main types at crate root
pub use api::{DiscoveryProvider, Locator};
pub use error::{DiscoveryError, KeyParseError, ValidationError};
pub use models::{
    EndpointType, Event, EventType, KeyFilter, Kv, Location, LocationEvent, LocatorFilter,
    validate_kvs,
};
pub use service::{
    DEFAULT_CLUSTER_TYPE, DEFAULT_OWNER, InstanceName, Namespace, ROLLOUT_STABLE, Service,
    ServiceType,
};
pub use values::{
    AdminValue, DiscoveryValue, ExportedEntity, MetricsTag, MonitoringValue, VersionInfo,
};
