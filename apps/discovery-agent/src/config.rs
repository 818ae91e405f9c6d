use std::path::Path;

use anyhow::{Context, Result};
use discovery::{AppRegistrationParams, DiscoveryConfig};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

/// Environment prefix of agent settings, e.g.
/// `DISCOVERY_AGENT__REGISTRATION__HTTP_PORT=8080`.
pub const ENV_PREFIX: &str = "DISCOVERY_AGENT__";

/// Agent configuration: the store to talk to and the instance to register.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub discovery: DiscoveryConfig,
    pub registration: AppRegistrationParams,
}

impl AgentConfig {
    /// Layered load: defaults, then the YAML file (if any), then environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            if !path.is_file() {
                anyhow::bail!("config file does not exist: {}", path.display());
            }
            figment = figment.merge(Yaml::file(path));
        }
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let mut config: Self = figment
            .extract()
            .context("failed to load agent configuration")?;
        config.discovery.validate()?;
        if config.registration.version.app_version.is_empty() {
            config.registration.version.app_version = env!("CARGO_PKG_VERSION").to_owned();
        }
        Ok(config)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use discovery::ProviderKind;
    use std::io::Write;

    const AGENT_YAML: &str = "\
discovery:
  provider: none
registration:
  service_name: bob_api
  rollout_type: stable
  host: node1.iddc
  http_port: 8080
";

    #[test]
    fn yaml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(AGENT_YAML.as_bytes()).unwrap();

        let config = AgentConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.discovery.provider, ProviderKind::None);
        assert_eq!(config.registration.service_name, "bob_api");
        assert_eq!(config.registration.http_port, 8080);
        assert_eq!(
            config.registration.version.app_version,
            env!("CARGO_PKG_VERSION")
        );
    }

    #[test]
    fn unknown_sections_are_rejected() {
        let figment = Figment::new()
            .merge(Serialized::defaults(AgentConfig::default()))
            .merge(Serialized::default("regisration.host", "x"));
        assert!(AgentConfig::from_figment(figment).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = AgentConfig::load(Some(Path::new("/nonexistent/agent.yaml"))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
