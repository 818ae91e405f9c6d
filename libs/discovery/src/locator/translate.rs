use discovery_sdk::{
    DiscoveryError, DiscoveryValue, EndpointType, Event, Kv, Location, LocationEvent,
};

/// Maps a stored discovery KV to the location of `endpoint_type`.
///
/// An empty value (delete events carry no value) yields a location with the
/// service identity only.
pub fn location_from_kv(kv: Kv, endpoint_type: EndpointType) -> Result<Location, DiscoveryError> {
    if kv.value.is_empty() {
        return Ok(Location {
            service: kv.service,
            ..Location::default()
        });
    }

    let value = DiscoveryValue::from_json(&kv.value).map_err(|source| {
        DiscoveryError::ValueParse {
            key: kv.raw_key.clone().unwrap_or_default(),
            source,
        }
    })?;
    let endpoint = if endpoint_type.is_additional() {
        value.endpoint_additional
    } else {
        value.endpoint_main
    };

    Ok(Location {
        service: kv.service,
        endpoint,
        login: value.login,
        password: value.password,
    })
}

pub fn locations_from_kvs(
    kvs: Vec<Kv>,
    endpoint_type: EndpointType,
) -> Result<Vec<Location>, DiscoveryError> {
    kvs.into_iter()
        .map(|kv| location_from_kv(kv, endpoint_type))
        .collect()
}

/// Translates a store event, keeping its type. Fails on the first KV that
/// does not hold a discovery value.
pub fn translate_event(
    event: Event,
    endpoint_type: EndpointType,
) -> Result<LocationEvent, DiscoveryError> {
    Ok(LocationEvent {
        event_type: event.event_type,
        locations: locations_from_kvs(event.kvs, endpoint_type)?,
    })
}
