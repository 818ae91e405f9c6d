use discovery_sdk::{
    AdminValue, DiscoveryError, DiscoveryValue, Kv, Namespace, Service, VersionInfo,
};
use serde::{Deserialize, Serialize};

use super::endpoints::DiscoveryInfo;
use super::monitoring::MonitoringInfo;
use super::{RegistrationInfo, encode};

/// Registration of a system or external resource, e.g. a database or a
/// third-party API, published on its behalf with a preset discovery value.
///
/// Admin and monitoring info are optional: they are published only when the
/// corresponding port is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRegistrationParams {
    pub service: Service,
    pub discovery_value: DiscoveryValue,

    /// Common host of the admin and monitoring endpoints.
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub admin_port: u16,
    #[serde(default)]
    pub version: VersionInfo,

    #[serde(default)]
    pub monitoring_port: u16,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub venture: String,
}

/// Validated, pre-encoded registration values of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRegistrationInfo {
    service: Service,
    discovery: String,
    admin: Option<String>,
    monitoring: Option<String>,
}

impl ResourceRegistrationInfo {
    /// # Errors
    ///
    /// Returns `DiscoveryError::Validation` if the service identity or the
    /// preset discovery value is invalid, or if admin or monitoring info is
    /// requested but incomplete.
    pub fn new(params: ResourceRegistrationParams) -> Result<Self, DiscoveryError> {
        params.service.validate()?;
        let discovery = DiscoveryInfo::preset(params.discovery_value);
        discovery.validate()?;

        let admin = if params.admin_port == 0 {
            None
        } else {
            let admin = AdminValue {
                admin_interface_uri: format!("http://{}:{}", params.host, params.admin_port),
                version: params.version,
            };
            admin.validate()?;
            Some(encode(&admin)?)
        };

        let monitoring = if params.monitoring_port == 0 {
            None
        } else {
            let monitoring = MonitoringInfo {
                host: params.host,
                port: params.monitoring_port,
                environment: params.environment,
                venture: params.venture,
                service_name: params.service.name.clone(),
                rollout_type: params.service.rollout_type.clone(),
            };
            monitoring.validate()?;
            Some(encode(&monitoring.value())?)
        };

        Ok(Self {
            discovery: encode(&discovery.value())?,
            service: params.service,
            admin,
            monitoring,
        })
    }

    #[must_use]
    pub fn service(&self) -> &Service {
        &self.service
    }
}

impl RegistrationInfo for ResourceRegistrationInfo {
    fn registration_data(&self) -> Vec<Kv> {
        let admin = self
            .admin
            .as_ref()
            .map(|value| Kv::new(Namespace::Admin, self.service.clone(), value.clone()));
        let monitoring = self
            .monitoring
            .as_ref()
            .map(|value| Kv::new(Namespace::Metrics, self.service.clone(), value.clone()));
        admin.into_iter().chain(monitoring).collect()
    }

    fn discovery_data(&self) -> Vec<Kv> {
        vec![Kv::new(
            Namespace::Discovery,
            self.service.clone(),
            self.discovery.clone(),
        )]
    }
}
