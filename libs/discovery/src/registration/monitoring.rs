use discovery_sdk::{MetricsTag, MonitoringValue, ValidationError};

/// Metrics scraping target of an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitoringInfo {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub venture: String,
    pub service_name: String,
    pub rollout_type: String,
}

impl MonitoringInfo {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let reason = if self.host.is_empty() {
            "Host is empty"
        } else if self.port == 0 {
            "Port is not set"
        } else if self.environment.is_empty() {
            "Environment is empty"
        } else if self.venture.is_empty() {
            "Venture is empty"
        } else if self.service_name.is_empty() {
            "ServiceName is empty"
        } else if self.rollout_type.is_empty() {
            "RolloutType is empty"
        } else {
            return Ok(());
        };
        Err(ValidationError::new("monitoring info", reason))
    }

    pub fn value(&self) -> MonitoringValue {
        MonitoringValue {
            url: format!("http://{}/metrics", join_host_port(&self.host, self.port)),
            tags: vec![
                MetricsTag::new("venture", &self.venture),
                MetricsTag::new("env", &self.environment),
                MetricsTag::new("service", &self.service_name),
                MetricsTag::new("rollout_type", &self.rollout_type),
            ],
        }
    }
}

/// `host:port`, with IPv6 literals bracketed.
fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
