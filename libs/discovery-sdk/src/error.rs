//! Error types for the discovery SDK.

use thiserror::Error;

/// A required field is missing or malformed.
///
/// `subject` names the validated entity (`Service`, `admin info`, ...) and
/// `reason` describes the first violated rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {subject}: {reason}")]
pub struct ValidationError {
    /// The entity that failed validation.
    pub subject: &'static str,
    /// The first violated rule.
    pub reason: String,
}

impl ValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(subject: &'static str, reason: impl Into<String>) -> Self {
        Self {
            subject,
            reason: reason.into(),
        }
    }
}

/// A raw store key could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyParseError {
    /// The key does not split into the expected number of `/`-separated parts.
    #[error("can't parse key '{key}': parts number mismatch, {expected} parts expected")]
    PartsMismatch { key: String, expected: usize },

    /// A non-leading segment of the key is empty.
    #[error("can't parse key '{key}': empty part found")]
    EmptyPart { key: String },

    /// The namespace segment is not one of the known namespaces.
    #[error("can't parse key '{key}': unknown namespace '{namespace}'")]
    UnknownNamespace { key: String, namespace: String },

    /// The service type segment is not one of the known types.
    #[error("can't parse key '{key}': invalid service type '{token}'")]
    UnknownServiceType { key: String, token: String },
}

/// Errors produced by discovery providers, registrators and locators.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    KeyParse(#[from] KeyParseError),

    /// A stored value is not valid JSON for the expected payload.
    #[error("can't parse value of '{key}': {source}")]
    ValueParse {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A payload could not be serialized.
    #[error("can't encode value: {0}")]
    ValueEncode(#[source] serde_json::Error),

    /// The coordination store is unavailable or rejected the request.
    #[error("store error: {0}")]
    Store(String),

    /// `register` was called while a registration is still active.
    #[error("already registered")]
    AlreadyRegistered,

    /// `enable_discovery` was called while discovery is still enabled.
    #[error("discovery already enabled")]
    DiscoveryAlreadyEnabled,
}
