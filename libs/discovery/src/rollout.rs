//! Segregation id to rollout type mapping.
//!
//! Release tooling publishes `/rollout/segregation/{id} = {rollout_type}`
//! entries. The watcher mirrors them in memory so request routing can pick a
//! rollout cohort without a store round trip.

use std::collections::HashMap;
use std::num::ParseIntError;
use std::sync::Arc;

use discovery_sdk::{DiscoveryProvider, Event, EventType, KeyFilter, ROLLOUT_STABLE};
use parking_lot::RwLock;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Key prefix of the rollout mapping.
pub const ROLLOUT_PREFIX: &str = "/rollout/segregation/";

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("empty segregation id")]
    EmptySegregationId,

    #[error("can't parse segregation id '{id}': {source}")]
    InvalidSegregationId {
        id: String,
        #[source]
        source: ParseIntError,
    },

    #[error("can't parse key '{key}': rollout prefix not found")]
    UnexpectedKey { key: String },
}

type RolloutTypes = Arc<RwLock<HashMap<i64, String>>>;

/// Watches the rollout mapping for as long as it is not stopped.
#[derive(Debug)]
pub struct RolloutWatcher {
    types: RolloutTypes,
    cancel: CancellationToken,
}

impl RolloutWatcher {
    /// Starts watching the mapping published through `provider`.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn new(provider: &dyn DiscoveryProvider) -> Self {
        let cancel = CancellationToken::new();
        let types = RolloutTypes::default();
        let mut events = provider.watch(cancel.clone(), KeyFilter::prefix(ROLLOUT_PREFIX));

        let task = {
            let types = Arc::clone(&types);
            let cancel = cancel.clone();
            async move {
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            tracing::debug!("rollout watch is stopped");
                            return;
                        }
                        event = events.recv() => match event {
                            Some(event) => apply(&types, event),
                            None => {
                                if !cancel.is_cancelled() {
                                    tracing::error!("rollout watch channel closed unexpectedly");
                                }
                                return;
                            }
                        },
                    }
                }
            }
        };
        tokio::spawn(task.in_current_span());

        Self { types, cancel }
    }

    /// Returns the rollout type of `segregation_id`, or `stable` when no
    /// mapping is published for it.
    ///
    /// # Errors
    ///
    /// Returns [`RolloutError`] if the id is empty or not an integer.
    pub fn rollout_type(&self, segregation_id: &str) -> Result<String, RolloutError> {
        if segregation_id.is_empty() {
            return Err(RolloutError::EmptySegregationId);
        }
        let id = segregation_id
            .parse::<i64>()
            .map_err(|source| RolloutError::InvalidSegregationId {
                id: segregation_id.to_owned(),
                source,
            })?;

        Ok(self
            .types
            .read()
            .get(&id)
            .cloned()
            .unwrap_or_else(|| ROLLOUT_STABLE.to_owned()))
    }

    /// Stops watching. The last known mapping stays readable.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for RolloutWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn apply(types: &RwLock<HashMap<i64, String>>, event: Event) {
    let mut types = types.write();
    for kv in event.kvs {
        let key = kv.raw_key.unwrap_or_default();
        let id = match parse_segregation_id(&key) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "skipping rollout entry");
                continue;
            }
        };
        match event.event_type {
            EventType::Put => {
                types.insert(id, kv.value);
            }
            EventType::Delete => {
                types.remove(&id);
            }
            EventType::Unknown => {}
        }
    }
}

fn parse_segregation_id(key: &str) -> Result<i64, RolloutError> {
    let id = key
        .strip_prefix(ROLLOUT_PREFIX)
        .ok_or_else(|| RolloutError::UnexpectedKey {
            key: key.to_owned(),
        })?;
    id.parse().map_err(|source| RolloutError::InvalidSegregationId {
        id: id.to_owned(),
        source,
    })
}
