use discovery_sdk::{DiscoveryValue, ValidationError};

/// Datacenter suffixes whose hosts have a public twin.
const DC_SUFFIXES: [&str; 3] = [".iddc", ".sgdc", ".hkdc"];
const PUB_MARKER: &str = "-pub";

/// Network endpoints of an instance, or a preset value that replaces them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryInfo {
    pub host: String,
    pub http_port: u16,
    pub grpc_port: u16,
    pub preset: Option<DiscoveryValue>,
}

impl DiscoveryInfo {
    pub fn preset(value: DiscoveryValue) -> Self {
        Self {
            preset: Some(value),
            ..Self::default()
        }
    }

    /// Port the instance is identified by: HTTP when set, gRPC otherwise.
    pub fn main_port(&self) -> u16 {
        if self.http_port != 0 {
            self.http_port
        } else {
            self.grpc_port
        }
    }

    /// Host as published to consumers.
    ///
    /// `node1.iddc` becomes `node1-pub.iddc`; hosts that already carry the
    /// marker or sit in another datacenter are left alone.
    pub fn host_value(&self) -> String {
        if self.host.contains(PUB_MARKER) {
            return self.host.clone();
        }
        DC_SUFFIXES
            .iter()
            .find_map(|suffix| self.host.rfind(suffix))
            .map_or_else(
                || self.host.clone(),
                |at| format!("{}{PUB_MARKER}{}", &self.host[..at], &self.host[at..]),
            )
    }

    pub fn http_value(&self) -> String {
        format!("http://{}:{}", self.host_value(), self.http_port)
    }

    pub fn grpc_value(&self) -> String {
        format!("{}:{}", self.host_value(), self.grpc_port)
    }

    pub fn value(&self) -> DiscoveryValue {
        if let Some(preset) = &self.preset {
            return preset.clone();
        }
        if self.http_port == 0 {
            return DiscoveryValue {
                endpoint_main: self.grpc_value(),
                ..DiscoveryValue::default()
            };
        }
        DiscoveryValue {
            endpoint_main: self.http_value(),
            endpoint_additional: if self.grpc_port == 0 {
                String::new()
            } else {
                self.grpc_value()
            },
            ..DiscoveryValue::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(preset) = &self.preset {
            return preset.validate();
        }
        if self.host.is_empty() {
            return Err(ValidationError::new("discovery info", "Host is empty"));
        }
        if self.http_port == 0 && self.grpc_port == 0 {
            return Err(ValidationError::new(
                "discovery info",
                "neither HTTPPort nor GRPCPort is set",
            ));
        }
        Ok(())
    }
}
