//! Store key codec.
//!
//! Service keys have the fixed layout
//! `/{namespace}/{type}/{name}/{rollout_type}/{owner}/{cluster_type}/{instance}`,
//! i.e. eight parts when split on `/`. Query prefixes follow the same layout
//! and stop at the first unset field.

use crate::error::{KeyParseError, ValidationError};
use crate::models::{KeyFilter, Kv};
use crate::service::{InstanceName, KEY_SEPARATOR, Namespace, Service, ServiceType};

/// Number of parts a service key splits into, including the empty leading one.
pub const SERVICE_KEY_PARTS: usize = 8;

/// Encodes the store key of `service` in `namespace`.
#[must_use]
pub fn service_key(namespace: Namespace, service: &Service) -> String {
    format!(
        "/{namespace}/{}/{}/{}/{}/{}/{}",
        service.service_type,
        service.name,
        service.rollout_type,
        service.owner,
        service.cluster_type,
        service.instance_name,
    )
}

/// Decodes a service key.
///
/// # Errors
///
/// Returns [`KeyParseError`] if the key does not have eight parts, has an
/// empty segment, or names an unknown namespace or service type.
pub fn parse_service_key(key: &str) -> Result<(Namespace, Service), KeyParseError> {
    let parts: Vec<&str> = key.split(KEY_SEPARATOR).collect();
    if parts.len() != SERVICE_KEY_PARTS {
        return Err(KeyParseError::PartsMismatch {
            key: key.to_owned(),
            expected: SERVICE_KEY_PARTS,
        });
    }
    if parts.iter().skip(1).any(|part| part.is_empty()) {
        return Err(KeyParseError::EmptyPart {
            key: key.to_owned(),
        });
    }

    let namespace = parts[1]
        .parse::<Namespace>()
        .map_err(|namespace| KeyParseError::UnknownNamespace {
            key: key.to_owned(),
            namespace,
        })?;
    let service_type = parts[2]
        .parse()
        .map_err(|_| KeyParseError::UnknownServiceType {
            key: key.to_owned(),
            token: parts[2].to_owned(),
        })?;

    let service = Service {
        service_type,
        name: parts[3].to_owned(),
        rollout_type: parts[4].to_owned(),
        owner: parts[5].to_owned(),
        cluster_type: parts[6].to_owned(),
        instance_name: InstanceName::from(parts[7]),
    };
    Ok((namespace, service))
}

/// Builds the key prefix selected by `filter`.
///
/// A non-empty `prefix` is returned verbatim. Otherwise the structured fields
/// are joined in key order up to the first unset one, and the result always
/// ends with `/`.
#[must_use]
pub fn key_prefix(filter: &KeyFilter) -> String {
    if let Some(prefix) = filter.prefix.as_deref().filter(|p| !p.is_empty()) {
        return prefix.to_owned();
    }

    let fields = [
        filter.namespace.map(Namespace::as_str),
        filter.service_type.map(ServiceType::as_str),
        filter.name.as_deref(),
        filter.rollout_type.as_deref(),
        filter.owner.as_deref(),
        filter.cluster_type.as_deref(),
    ];

    let mut prefix = String::from(KEY_SEPARATOR);
    for field in fields {
        match field {
            Some(value) if !value.is_empty() => {
                prefix.push_str(value);
                prefix.push(KEY_SEPARATOR);
            }
            _ => break,
        }
    }
    prefix
}

/// Returns the key a KV is stored under.
///
/// # Errors
///
/// Returns [`ValidationError`] when the KV has neither a raw key nor a
/// service identity.
pub fn kv_key(kv: &Kv) -> Result<String, ValidationError> {
    if let Some(raw) = kv.raw_key.as_deref().filter(|k| !k.is_empty()) {
        return Ok(raw.to_owned());
    }
    kv.service
        .as_ref()
        .map(|service| service_key(kv.namespace, service))
        .ok_or_else(|| ValidationError::new("KV", "neither RawKey nor Service is set"))
}

/// Decodes a key read from the store into a KV.
///
/// The KV keeps the key it was read from as its raw key. Keys in namespaces
/// that hold raw keys (`rollout`, `exported_entities`) are accepted even when
/// they are not service keys; the KV then carries no service identity.
///
/// # Errors
///
/// Returns [`KeyParseError`] for any other undecodable key.
pub fn kv_from_store(key: &str, value: String) -> Result<Kv, KeyParseError> {
    match parse_service_key(key) {
        Ok((namespace, service)) => Ok(Kv {
            namespace,
            service: Some(service),
            raw_key: Some(key.to_owned()),
            value,
        }),
        Err(err) => match raw_key_namespace(key) {
            Some(namespace) => Ok(Kv::raw(namespace, key, value)),
            None => Err(err),
        },
    }
}

fn raw_key_namespace(key: &str) -> Option<Namespace> {
    key.split(KEY_SEPARATOR)
        .nth(1)
        .and_then(|token| token.parse::<Namespace>().ok())
        .filter(|namespace| namespace.holds_raw_keys())
}
