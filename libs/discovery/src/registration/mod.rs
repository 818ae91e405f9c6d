//! Registration payload builders.
//!
//! A registration info splits what an instance publishes into two sets:
//! [`RegistrationInfo::registration_data`] stays in the store for as long as
//! the instance is registered, while [`RegistrationInfo::discovery_data`] is
//! published only while the instance accepts traffic.

use discovery_sdk::{DiscoveryError, Kv};
use serde::Serialize;

mod app;
mod endpoints;
mod monitoring;
mod resource;

pub use app::{AppRegistrationInfo, AppRegistrationParams};
pub use resource::{ResourceRegistrationInfo, ResourceRegistrationParams};

/// Values a registrator publishes for one instance.
pub trait RegistrationInfo: Send + Sync {
    /// KVs published on registration: admin and monitoring info.
    fn registration_data(&self) -> Vec<Kv>;

    /// KVs published while discovery is enabled: the discovery value and
    /// exported entity pointers.
    fn discovery_data(&self) -> Vec<Kv>;
}

fn encode<T: Serialize>(value: &T) -> Result<String, DiscoveryError> {
    serde_json::to_string(value).map_err(DiscoveryError::ValueEncode)
}
