//! Discovery configuration.
//!
//! Loaded in layers: built-in defaults, then an optional YAML file, then
//! `DISCOVERY__*` environment variables (`DISCOVERY__ETCD__KEY_TTL=5s` maps
//! to `etcd.key_ttl`).

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

/// Environment prefix of discovery settings.
pub const ENV_PREFIX: &str = "DISCOVERY__";

/// Default capacity of watch delivery channels.
pub const DEFAULT_WATCH_BUFFER: usize = 64;

/// Configuration error
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("config file does not exist: {path}")]
    MissingFile { path: String },
    #[error("failed to load discovery config: {source}")]
    Load {
        #[source]
        source: Box<figment::Error>,
    },
    #[error("invalid discovery config: {reason}")]
    Invalid { reason: String },
}

/// Which coordination store client to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Discovery compiled in but inert.
    None,
    /// Process-local store.
    #[default]
    Memory,
    /// etcd v3 cluster (requires the `etcd` feature).
    Etcd,
}

impl ProviderKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Memory => "memory",
            Self::Etcd => "etcd",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level discovery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    pub provider: ProviderKind,

    /// Capacity of every watch delivery channel.
    pub watch_buffer: usize,

    pub etcd: EtcdConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            watch_buffer: DEFAULT_WATCH_BUFFER,
            etcd: EtcdConfig::default(),
        }
    }
}

/// etcd client settings. Durations use humantime notation (`10s`, `20m 30s`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,

    /// TTL of registration leases.
    #[serde(with = "humantime_serde")]
    pub key_ttl: Duration,

    /// Minimum pause between registration attempts.
    #[serde(with = "humantime_serde")]
    pub register_retry_interval: Duration,

    /// Pause before re-establishing a failed watch.
    #[serde(with = "humantime_serde")]
    pub watch_retry_interval: Duration,

    /// A watch with no response for this long is considered stuck.
    /// etcd sends progress notifications at least every 20 minutes.
    #[serde(with = "humantime_serde")]
    pub progress_timeout: Duration,

    /// A watch not confirmed as created within this time is restarted.
    #[serde(with = "humantime_serde")]
    pub watch_create_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub get_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub register_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub revoke_timeout: Duration,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".to_owned()],
            username: None,
            password: None,
            dial_timeout: Duration::from_secs(5),
            key_ttl: Duration::from_secs(10),
            register_retry_interval: Duration::from_secs(1),
            watch_retry_interval: Duration::from_secs(1),
            progress_timeout: Duration::from_secs(20 * 60 + 30),
            watch_create_timeout: Duration::from_secs(30),
            get_timeout: Duration::from_secs(10),
            register_timeout: Duration::from_secs(10),
            revoke_timeout: Duration::from_secs(10),
        }
    }
}

impl DiscoveryConfig {
    /// Loads the configuration: defaults, then `path` (if any), then the
    /// `DISCOVERY__*` environment.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file is missing, cannot be parsed, or the
    /// result fails [`DiscoveryConfig::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            if !path.is_file() {
                return Err(ConfigError::MissingFile {
                    path: path.to_string_lossy().into_owned(),
                });
            }
            figment = figment.merge(Yaml::file(path));
        }
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extracts and validates the configuration from a prepared figment.
    ///
    /// # Errors
    /// Returns `ConfigError` if extraction or validation fails.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::Load {
            source: Box::new(e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns `ConfigError::Invalid` for a zero watch buffer, an etcd
    /// provider without endpoints or without the `etcd` feature, or a zero
    /// lease TTL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch_buffer == 0 {
            return Err(invalid("watch_buffer must be positive"));
        }
        if self.provider == ProviderKind::Etcd {
            if !cfg!(feature = "etcd") {
                return Err(invalid("etcd provider requires the 'etcd' feature"));
            }
            if self.etcd.endpoints.is_empty() {
                return Err(invalid("etcd.endpoints is empty"));
            }
            if self.etcd.key_ttl.as_secs() == 0 {
                return Err(invalid("etcd.key_ttl must be at least 1s"));
            }
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.to_owned(),
    }
}
