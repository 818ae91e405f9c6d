//! Store-facing and consumer-facing data models.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::service::{Namespace, Service, ServiceType};

/// Query over the store key space.
///
/// Unset fields match anything, but only a contiguous leading run of set
/// fields narrows the query: the key prefix stops at the first unset field.
/// A non-empty `prefix` replaces the structured fields entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFilter {
    pub prefix: Option<String>,
    pub namespace: Option<Namespace>,
    pub service_type: Option<ServiceType>,
    pub name: Option<String>,
    pub rollout_type: Option<String>,
    pub owner: Option<String>,
    pub cluster_type: Option<String>,
}

impl KeyFilter {
    /// Filter over a whole namespace.
    #[must_use]
    pub fn namespace(namespace: Namespace) -> Self {
        Self {
            namespace: Some(namespace),
            ..Self::default()
        }
    }

    /// Filter matching a raw key prefix.
    #[must_use]
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_type(mut self, service_type: ServiceType) -> Self {
        self.service_type = Some(service_type);
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_rollout_type(mut self, rollout_type: impl Into<String>) -> Self {
        self.rollout_type = Some(rollout_type.into());
        self
    }

    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    #[must_use]
    pub fn with_cluster_type(mut self, cluster_type: impl Into<String>) -> Self {
        self.cluster_type = Some(cluster_type.into());
        self
    }
}

/// The unit exchanged with the store.
///
/// Service KVs are addressed by `{namespace, service}`. KVs with a
/// `raw_key` are written to that key verbatim and carry no service identity
/// (exported entity pointers, rollout mappings).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kv {
    pub namespace: Namespace,
    pub service: Option<Service>,
    pub raw_key: Option<String>,
    pub value: String,
}

impl Kv {
    /// A KV addressed by service identity.
    #[must_use]
    pub fn new(namespace: Namespace, service: Service, value: impl Into<String>) -> Self {
        Self {
            namespace,
            service: Some(service),
            raw_key: None,
            value: value.into(),
        }
    }

    /// A KV addressed by a raw key.
    #[must_use]
    pub fn raw(namespace: Namespace, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            namespace,
            service: None,
            raw_key: Some(key.into()),
            value: value.into(),
        }
    }

    /// Checks that the KV can be published.
    ///
    /// Raw-key KVs are accepted as they are. Service KVs need a valid
    /// service identity and a non-empty value.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for the first violated rule.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.raw_key.as_deref().is_some_and(|k| !k.is_empty()) {
            return Ok(());
        }
        let Some(service) = &self.service else {
            return Err(ValidationError::new("KV", "neither RawKey nor Service is set"));
        };
        service.validate()?;
        if self.value.is_empty() {
            return Err(ValidationError::new("KV", "empty Value"));
        }
        Ok(())
    }
}

/// Validates a batch of KVs before registration.
///
/// # Errors
///
/// Returns [`ValidationError`] if the batch is empty or any KV is invalid.
pub fn validate_kvs(kvs: &[Kv]) -> Result<(), ValidationError> {
    if kvs.is_empty() {
        return Err(ValidationError::new("KV list", "no values to register"));
    }
    kvs.iter().try_for_each(Kv::validate)
}

/// Kind of change carried by an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Put,
    Delete,
    Unknown,
}

impl EventType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A batch of coincident changes delivered by a watch.
///
/// All KVs of one event come from the same store revision. Deleted KVs carry
/// an empty value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub event_type: EventType,
    pub kvs: Vec<Kv>,
}

/// Which logical endpoint of a discovery entry the caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointType {
    /// Main endpoint of an application.
    AppMain,
    /// Additional (gRPC) endpoint of an application.
    AppAdditional,
    /// Legacy alias of [`EndpointType::SystemMain`].
    System,
    /// Main endpoint of a system resource.
    SystemMain,
    /// Additional endpoint of a system resource.
    SystemAdditional,
    /// Endpoint of an external resource.
    External,
}

impl EndpointType {
    /// The service type whose entries this endpoint type resolves.
    #[must_use]
    pub const fn service_type(self) -> ServiceType {
        match self {
            Self::AppMain | Self::AppAdditional => ServiceType::App,
            Self::System | Self::SystemMain | Self::SystemAdditional => ServiceType::System,
            Self::External => ServiceType::External,
        }
    }

    /// Whether the endpoint is read from `endpoint_additional`.
    #[must_use]
    pub const fn is_additional(self) -> bool {
        matches!(self, Self::AppAdditional | Self::SystemAdditional)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AppMain => "app-main",
            Self::AppAdditional => "app-additional",
            Self::System => "system",
            Self::SystemMain => "system-main",
            Self::SystemAdditional => "system-additional",
            Self::External => "external",
        }
    }
}

impl fmt::Display for EndpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndpointType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app-main" => Ok(Self::AppMain),
            "app-additional" => Ok(Self::AppAdditional),
            "system" => Ok(Self::System),
            "system-main" => Ok(Self::SystemMain),
            "system-additional" => Ok(Self::SystemAdditional),
            "external" => Ok(Self::External),
            other => Err(format!("unknown endpoint type '{other}'")),
        }
    }
}

/// Optional narrowing of a locator query beyond the service name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollout_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_type: Option<String>,
}

impl LocatorFilter {
    /// Builds the store filter for `service_name` resolved as `endpoint_type`.
    #[must_use]
    pub fn key_filter(&self, service_name: &str, endpoint_type: EndpointType) -> KeyFilter {
        KeyFilter {
            prefix: None,
            namespace: Some(Namespace::Discovery),
            service_type: Some(endpoint_type.service_type()),
            name: Some(service_name.to_owned()),
            rollout_type: self.rollout_type.clone(),
            owner: self.owner.clone(),
            cluster_type: self.cluster_type.clone(),
        }
    }
}

/// Consumer-facing result of a locator query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Location {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<Service>,
    pub endpoint: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub login: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
}

/// A translated watch event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationEvent {
    pub event_type: EventType,
    pub locations: Vec<Location>,
}
