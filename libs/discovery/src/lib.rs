//! Service discovery runtime.
//!
//! Built on the vocabulary of `discovery_sdk`:
//!
//! - [`provider`] - coordination store clients (in-memory, etcd, dummy, mock)
//! - [`registration`] - builders of the values an instance publishes
//! - [`Registrator`] - two-phase registration lifecycle
//! - [`ServiceLocator`] - typed lookups and watches of service locations
//! - [`RolloutWatcher`] - segregation id to rollout type mapping
//! - [`DiscoveryConfig`] - layered configuration
//!
//! ## Usage
//!
//! ```ignore
//! let config = DiscoveryConfig::load(Some(Path::new("discovery.yaml")))?;
//! let provider = discovery::provider::connect(&config).await?;
//!
//! let info = AppRegistrationInfo::new(params)?;
//! let registrator = Registrator::new(provider.clone(), Arc::new(info));
//! registrator.register()?;
//! registrator.enable_discovery()?;
//!
//! let locator = ServiceLocator::new(provider);
//! let locations = locator
//!     .get("bob_api", EndpointType::AppMain, &LocatorFilter::default())
//!     .await?;
//! ```

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod config;
pub mod locator;
pub mod provider;
pub mod registration;
pub mod registrator;
pub mod rollout;

pub use config::{ConfigError, DEFAULT_WATCH_BUFFER, DiscoveryConfig, EtcdConfig, ProviderKind};
pub use locator::{MockLocator, ServiceLocator};
pub use registration::{
    AppRegistrationInfo, AppRegistrationParams, RegistrationInfo, ResourceRegistrationInfo,
    ResourceRegistrationParams,
};
pub use registrator::Registrator;
pub use rollout::{RolloutError, RolloutWatcher};
