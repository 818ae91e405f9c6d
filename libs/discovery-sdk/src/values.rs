//! JSON payloads stored under the `discovery`, `admin`, `metrics` and
//! `exported_entities` namespaces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{KeyParseError, ValidationError};
use crate::models::Kv;
use crate::service::{KEY_SEPARATOR, Namespace};

/// Endpoints of a service, published under the `discovery` namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryValue {
    #[serde(default)]
    pub endpoint_main: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint_additional: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub login: String,
    #[serde(default, rename = "pass", skip_serializing_if = "String::is_empty")]
    pub password: String,
}

impl DiscoveryValue {
    /// Parses a stored discovery value.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if `s` is not a discovery value.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// # Errors
    ///
    /// Returns [`ValidationError`] if `endpoint_main` is empty.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.endpoint_main.is_empty() {
            return Err(ValidationError::new(
                "discovery value",
                "EndpointMain is empty",
            ));
        }
        Ok(())
    }
}

/// Build metadata published with the admin interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub app_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub git_describe: String,
    /// Toolchain the binary was built with.
    #[serde(default, rename = "go_version", skip_serializing_if = "String::is_empty")]
    pub toolchain_version: String,
}

impl VersionInfo {
    /// # Errors
    ///
    /// Returns [`ValidationError`] if `app_version` is empty.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.app_version.is_empty() {
            return Err(ValidationError::new("version info", "AppVersion is empty"));
        }
        Ok(())
    }
}

/// Admin interface location, published under the `admin` namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminValue {
    #[serde(rename = "admin_interface")]
    pub admin_interface_uri: String,
    pub version: VersionInfo,
}

impl AdminValue {
    /// Parses a stored admin value.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if `s` is not an admin value.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// # Errors
    ///
    /// Returns [`ValidationError`] if the interface URI or the app version
    /// is empty.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.admin_interface_uri.is_empty() {
            return Err(ValidationError::new(
                "admin info",
                "AdminInterfaceURI is empty",
            ));
        }
        self.version.validate()
    }
}

/// One metrics label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsTag {
    pub key: String,
    pub value: String,
}

impl MetricsTag {
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Scraping target, published under the `metrics` namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringValue {
    pub url: String,
    pub tags: Vec<MetricsTag>,
}

impl MonitoringValue {
    /// Parses a stored monitoring value.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if `s` is not a monitoring value.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Pointer from an exported entity name to the endpoint serving it.
///
/// Stored under the raw key `/exported_entities/{name}/{endpoint}` with an
/// empty value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExportedEntity {
    pub name: String,
    pub endpoint: String,
}

impl ExportedEntity {
    const KEY_PARTS: usize = 4;

    /// Decodes an exported entity key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyParseError`] if the key does not have four parts or is
    /// not in the `exported_entities` namespace.
    pub fn from_key(key: &str) -> Result<Self, KeyParseError> {
        let parts: Vec<&str> = key.split(KEY_SEPARATOR).collect();
        if parts.len() != Self::KEY_PARTS {
            return Err(KeyParseError::PartsMismatch {
                key: key.to_owned(),
                expected: Self::KEY_PARTS,
            });
        }
        if parts[1] != Namespace::ExportedEntities.as_str() {
            return Err(KeyParseError::UnknownNamespace {
                key: key.to_owned(),
                namespace: parts[1].to_owned(),
            });
        }
        Ok(Self {
            name: parts[2].to_owned(),
            endpoint: parts[3].to_owned(),
        })
    }

    /// The raw store key of the pointer.
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "/{}/{}/{}",
            Namespace::ExportedEntities,
            self.name,
            self.endpoint
        )
    }

    /// The KV that publishes the pointer.
    #[must_use]
    pub fn kv(&self) -> Kv {
        Kv::raw(Namespace::ExportedEntities, self.key(), String::new())
    }
}
