//! Service identity model.
//!
//! A [`Service`] describes one registered listener. Every identity field
//! except the type becomes a segment of the store key, so none of them may
//! contain the `/` separator.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

/// Owner used when a service does not belong to a particular team.
pub const DEFAULT_OWNER: &str = "shared";

/// Cluster type used when a service runs in the common cluster.
pub const DEFAULT_CLUSTER_TYPE: &str = "common";

/// Rollout type of the stable cohort.
pub const ROLLOUT_STABLE: &str = "stable";

/// Maximum length of a service name.
pub const MAX_SERVICE_NAME_LEN: usize = 30;

pub(crate) const KEY_SEPARATOR: char = '/';

#[allow(clippy::expect_used)] // good regex, it doesn't panic
static ROLLOUT_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(stable|unstable\d{1,2})$").expect("static regex should not panic")
});

/// Top-level key space partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    /// Admin interface and version info; published for the whole process lifetime.
    Admin,
    /// Traffic endpoints; published only while the instance accepts traffic.
    Discovery,
    /// Metrics scraping targets.
    Metrics,
    /// Rollout cohort mappings.
    Rollout,
    /// Pointers from exported entity names to the endpoints serving them.
    ExportedEntities,
}

impl Namespace {
    /// Returns the wire token of the namespace.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Discovery => "discovery",
            Self::Metrics => "metrics",
            Self::Rollout => "rollout",
            Self::ExportedEntities => "exported_entities",
        }
    }

    /// Namespaces whose keys are not service keys and are kept as raw keys.
    #[must_use]
    pub const fn holds_raw_keys(self) -> bool {
        matches!(self, Self::Rollout | Self::ExportedEntities)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "discovery" => Ok(Self::Discovery),
            "metrics" => Ok(Self::Metrics),
            "rollout" => Ok(Self::Rollout),
            "exported_entities" => Ok(Self::ExportedEntities),
            other => Err(other.to_owned()),
        }
    }
}

/// Category of a registered entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// An application owned by a product team.
    App,
    /// An infrastructure service (database, cache, queue).
    System,
    /// A service running outside the managed infrastructure.
    External,
}

impl ServiceType {
    /// Returns the wire token of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::App => "app",
            Self::System => "system",
            Self::External => "external",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a service type token is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown service type '{0}'")]
pub struct UnknownServiceType(pub String);

impl FromStr for ServiceType {
    type Err = UnknownServiceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app" => Ok(Self::App),
            "system" => Ok(Self::System),
            "external" => Ok(Self::External),
            other => Err(UnknownServiceType(other.to_owned())),
        }
    }
}

/// Identifier of one physical listener, `host:port`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct InstanceName(String);

impl InstanceName {
    /// Builds the instance name from a host and port.
    ///
    /// Returns an empty name when the host is empty or the port is zero,
    /// which [`Service::validate`] rejects.
    #[must_use]
    pub fn new(host: &str, port: u16) -> Self {
        if host.is_empty() || port == 0 {
            return Self::default();
        }
        Self(format!("{host}:{port}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for InstanceName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for InstanceName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for InstanceName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for InstanceName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self)
    }
}

/// Identity of a registered service instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Service {
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub name: String,
    pub rollout_type: String,
    #[serde(default = "default_owner")]
    pub owner: String,
    #[serde(default = "default_cluster_type")]
    pub cluster_type: String,
    pub instance_name: InstanceName,
}

fn default_owner() -> String {
    DEFAULT_OWNER.to_owned()
}

fn default_cluster_type() -> String {
    DEFAULT_CLUSTER_TYPE.to_owned()
}

impl Service {
    /// Creates a service with the default owner and cluster type.
    #[must_use]
    pub fn new(
        service_type: ServiceType,
        name: impl Into<String>,
        rollout_type: impl Into<String>,
        instance_name: InstanceName,
    ) -> Self {
        Self {
            service_type,
            name: name.into(),
            rollout_type: rollout_type.into(),
            owner: default_owner(),
            cluster_type: default_cluster_type(),
            instance_name,
        }
    }

    /// Checks that the identity can be encoded into a store key.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for the first empty key segment, a segment
    /// containing `/`, a name longer than [`MAX_SERVICE_NAME_LEN`], or a
    /// rollout type other than `stable` or `unstable<N>`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let segments = [
            ("Name", self.name.as_str()),
            ("Owner", self.owner.as_str()),
            ("ClusterType", self.cluster_type.as_str()),
            ("InstanceName", self.instance_name.as_str()),
        ];
        for (field, value) in segments {
            if value.is_empty() {
                return Err(invalid(format!("empty {field}")));
            }
            if value.contains(KEY_SEPARATOR) {
                return Err(invalid(format!("{field} contains forbidden '/' char")));
            }
        }

        if self.name.chars().count() > MAX_SERVICE_NAME_LEN {
            return Err(invalid(format!(
                "Name is longer than {MAX_SERVICE_NAME_LEN} chars"
            )));
        }

        if !ROLLOUT_TYPE_RE.is_match(&self.rollout_type) {
            return Err(invalid(format!(
                "RolloutType '{}' must be 'stable' or 'unstable<N>'",
                self.rollout_type
            )));
        }

        Ok(())
    }
}

fn invalid(reason: String) -> ValidationError {
    ValidationError::new("Service info", reason)
}
