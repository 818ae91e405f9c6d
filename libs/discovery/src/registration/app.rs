use discovery_sdk::{
    AdminValue, DiscoveryError, ExportedEntity, InstanceName, Kv, Namespace, Service, ServiceType,
    ValidationError, VersionInfo,
};
use serde::{Deserialize, Serialize};

use super::endpoints::DiscoveryInfo;
use super::monitoring::MonitoringInfo;
use super::{RegistrationInfo, encode};

/// Everything an application instance publishes about itself.
///
/// Ports set to `0` are treated as not configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppRegistrationParams {
    pub service_name: String,
    pub rollout_type: String,
    pub host: String,
    pub http_port: u16,
    pub grpc_port: u16,

    pub admin_port: u16,
    pub version: VersionInfo,

    pub monitoring_port: u16,
    pub environment: String,
    pub venture: String,

    /// Entity names served over gRPC by this instance.
    pub exported_entities: Vec<String>,
}

/// Validated, pre-encoded registration values of an application instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRegistrationInfo {
    service: Service,
    admin: String,
    monitoring: String,
    discovery: String,
    exported_entities: Vec<ExportedEntity>,
}

impl AppRegistrationInfo {
    /// Validates `params` and encodes every value the instance publishes.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::Validation` for the first invalid part, checked
    /// in order: service identity, endpoints, admin info, monitoring info and
    /// exported entities.
    pub fn new(params: AppRegistrationParams) -> Result<Self, DiscoveryError> {
        let discovery = DiscoveryInfo {
            host: params.host.clone(),
            http_port: params.http_port,
            grpc_port: params.grpc_port,
            preset: None,
        };
        let service = Service::new(
            ServiceType::App,
            params.service_name.clone(),
            params.rollout_type.clone(),
            InstanceName::new(&params.host, discovery.main_port()),
        );
        let admin = AdminValue {
            admin_interface_uri: format!("http://{}:{}", params.host, params.admin_port),
            version: params.version,
        };
        let monitoring = MonitoringInfo {
            host: params.host,
            port: params.monitoring_port,
            environment: params.environment,
            venture: params.venture,
            service_name: params.service_name,
            rollout_type: params.rollout_type,
        };

        service.validate()?;
        discovery.validate()?;
        admin.validate()?;
        monitoring.validate()?;
        validate_exported_names(&params.exported_entities, params.grpc_port)?;

        let grpc_endpoint = discovery.grpc_value();
        let exported_entities = params
            .exported_entities
            .into_iter()
            .map(|name| ExportedEntity {
                name,
                endpoint: grpc_endpoint.clone(),
            })
            .collect();

        Ok(Self {
            admin: encode(&admin)?,
            monitoring: encode(&monitoring.value())?,
            discovery: encode(&discovery.value())?,
            service,
            exported_entities,
        })
    }

    /// Identity every KV of this instance is keyed by.
    #[must_use]
    pub fn service(&self) -> &Service {
        &self.service
    }

    #[must_use]
    pub fn exported_entities(&self) -> &[ExportedEntity] {
        &self.exported_entities
    }
}

impl RegistrationInfo for AppRegistrationInfo {
    fn registration_data(&self) -> Vec<Kv> {
        vec![
            Kv::new(Namespace::Admin, self.service.clone(), self.admin.clone()),
            Kv::new(Namespace::Metrics, self.service.clone(), self.monitoring.clone()),
        ]
    }

    fn discovery_data(&self) -> Vec<Kv> {
        self.exported_entities
            .iter()
            .map(ExportedEntity::kv)
            .chain(std::iter::once(Kv::new(
                Namespace::Discovery,
                self.service.clone(),
                self.discovery.clone(),
            )))
            .collect()
    }
}

fn validate_exported_names(names: &[String], grpc_port: u16) -> Result<(), ValidationError> {
    for name in names {
        if name.is_empty() {
            return Err(ValidationError::new("ExportedEntity", "empty name"));
        }
        if name.contains('/') {
            return Err(ValidationError::new(
                "ExportedEntity",
                format!("name '{name}' contains forbidden '/' char"),
            ));
        }
    }
    if !names.is_empty() && grpc_port == 0 {
        return Err(ValidationError::new(
            "ExportedEntity",
            "exported entities are served over gRPC, GRPCPort is not set",
        ));
    }
    Ok(())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use discovery_sdk::key::kv_key;
    use discovery_sdk::{DiscoveryValue, MonitoringValue};

    fn params() -> AppRegistrationParams {
        AppRegistrationParams {
            service_name: "goblin".to_owned(),
            rollout_type: "stable".to_owned(),
            host: "go1.dc".to_owned(),
            http_port: 8080,
            monitoring_port: 8081,
            venture: "vn".to_owned(),
            environment: "dev".to_owned(),
            admin_port: 8081,
            version: VersionInfo {
                app_version: "N/A".to_owned(),
                ..VersionInfo::default()
            },
            ..AppRegistrationParams::default()
        }
    }

    fn validation_subject(err: DiscoveryError) -> &'static str {
        match err {
            DiscoveryError::Validation(e) => e.subject,
            other => panic!("expected a validation error, got {other}"),
        }
    }

    #[test]
    fn typical_app_is_valid() {
        let info = AppRegistrationInfo::new(params()).unwrap();
        assert_eq!(info.service().instance_name.as_str(), "go1.dc:8080");
        assert_eq!(info.service().service_type, ServiceType::App);
    }

    #[test]
    fn missing_monitoring_is_rejected() {
        let err = AppRegistrationInfo::new(AppRegistrationParams {
            monitoring_port: 0,
            venture: String::new(),
            environment: String::new(),
            ..params()
        })
        .unwrap_err();
        assert_eq!(validation_subject(err), "monitoring info");
    }

    #[test]
    fn missing_version_is_rejected() {
        let err = AppRegistrationInfo::new(AppRegistrationParams {
            version: VersionInfo::default(),
            ..params()
        })
        .unwrap_err();
        assert_eq!(validation_subject(err), "version info");
    }

    #[test]
    fn service_is_checked_first() {
        let err = AppRegistrationInfo::new(AppRegistrationParams {
            rollout_type: "beta".to_owned(),
            http_port: 0,
            ..params()
        })
        .unwrap_err();
        assert_eq!(validation_subject(err), "Service info");
    }

    #[test]
    fn exported_names_are_checked() {
        let err = AppRegistrationInfo::new(AppRegistrationParams {
            exported_entities: vec!["name/with/slash".to_owned()],
            grpc_port: 666,
            ..params()
        })
        .unwrap_err();
        assert_eq!(validation_subject(err), "ExportedEntity");

        let err = AppRegistrationInfo::new(AppRegistrationParams {
            exported_entities: vec!["foo".to_owned()],
            ..params()
        })
        .unwrap_err();
        assert_eq!(validation_subject(err), "ExportedEntity");
    }

    #[test]
    fn registration_data_is_admin_and_metrics() {
        let info = AppRegistrationInfo::new(params()).unwrap();
        let kvs = info.registration_data();

        assert_eq!(kvs.len(), 2);
        assert_eq!(kvs[0].namespace, Namespace::Admin);
        assert_eq!(kvs[1].namespace, Namespace::Metrics);
        assert!(kvs.iter().all(|kv| kv.service.as_ref() == Some(info.service())));

        let admin = AdminValue::from_json(&kvs[0].value).unwrap();
        assert_eq!(admin.admin_interface_uri, "http://go1.dc:8081");
        assert_eq!(admin.version.app_version, "N/A");

        let metrics = MonitoringValue::from_json(&kvs[1].value).unwrap();
        assert_eq!(metrics.url, "http://go1.dc:8081/metrics");
    }

    #[test]
    fn discovery_data_without_exported_entities() {
        let info = AppRegistrationInfo::new(params()).unwrap();
        let kvs = info.discovery_data();

        assert_eq!(kvs.len(), 1);
        assert_eq!(kvs[0].namespace, Namespace::Discovery);
        assert_eq!(
            DiscoveryValue::from_json(&kvs[0].value).unwrap().endpoint_main,
            "http://go1.dc:8080"
        );
    }

    #[test]
    fn discovery_data_with_exported_entities() {
        let info = AppRegistrationInfo::new(AppRegistrationParams {
            host: "go1.iddc".to_owned(),
            grpc_port: 666,
            exported_entities: vec!["foo".to_owned(), "bar".to_owned()],
            ..params()
        })
        .unwrap();
        let kvs = info.discovery_data();

        assert_eq!(kvs.len(), 3);
        assert_eq!(kvs[0].namespace, Namespace::ExportedEntities);
        assert_eq!(kvs[0].value, "");
        assert_eq!(
            kv_key(&kvs[0]).unwrap(),
            "/exported_entities/foo/go1-pub.iddc:666"
        );
        assert_eq!(
            kv_key(&kvs[1]).unwrap(),
            "/exported_entities/bar/go1-pub.iddc:666"
        );
        assert_eq!(kvs[2].namespace, Namespace::Discovery);
        assert_eq!(
            kv_key(&kvs[2]).unwrap(),
            "/discovery/app/goblin/stable/shared/common/go1.iddc:8080"
        );
    }

    #[test]
    fn params_deserialize_with_defaults() {
        let params: AppRegistrationParams = serde_json::from_str(
            r#"{
                "service_name": "bob_api",
                "rollout_type": "stable",
                "host": "node1.iddc",
                "http_port": 8080
            }"#,
        )
        .unwrap();
        assert_eq!(params.grpc_port, 0);
        assert!(params.exported_entities.is_empty());

        let err = serde_json::from_str::<AppRegistrationParams>(r#"{"http_prot":8080}"#);
        assert!(err.is_err());
    }
}
