//! Process-local coordination store.
//!
//! Values are bound to a lease per `register_values` call and disappear when
//! that call is cancelled. Watches see the same `Put`/`Delete` stream a
//! remote store would deliver. A watcher that lets its channel fill up is
//! closed instead of buffering without bound.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use discovery_sdk::key::{key_prefix, kv_from_store, kv_key};
use discovery_sdk::{
    DiscoveryError, DiscoveryProvider, Event, EventType, KeyFilter, Kv, validate_kvs,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_WATCH_BUFFER;

type LeaseId = u64;

#[derive(Debug)]
struct Entry {
    value: String,
    lease: LeaseId,
}

struct Subscriber {
    id: u64,
    prefix: String,
    tx: mpsc::Sender<Event>,
    /// Fired when the store drops the subscriber.
    dropped: CancellationToken,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    next_lease: LeaseId,
    next_subscriber: u64,
    subscribers: Vec<Subscriber>,
}

impl State {
    /// Queues one event per subscriber with the changes under its prefix.
    ///
    /// Never blocks: a subscriber whose channel is full is dropped, which
    /// closes its watch.
    fn notify(&mut self, event_type: EventType, changes: &[(String, String)]) {
        self.subscribers.retain(|sub| {
            let kvs: Vec<Kv> = changes
                .iter()
                .filter(|(key, _)| key.starts_with(&sub.prefix))
                .filter_map(|(key, value)| decode(key, value.clone()))
                .collect();
            if kvs.is_empty() {
                return !sub.tx.is_closed();
            }
            match sub.tx.try_send(Event { event_type, kvs }) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(prefix = %sub.prefix, "watcher lags behind, closing its watch");
                    sub.dropped.cancel();
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    sub.dropped.cancel();
                    false
                }
            }
        });
    }

    fn unsubscribe(&mut self, id: u64) {
        self.subscribers.retain(|sub| sub.id != id);
    }
}

fn decode(key: &str, value: String) -> Option<Kv> {
    match kv_from_store(key, value) {
        Ok(kv) => Some(kv),
        Err(e) => {
            tracing::warn!(error = %e, "skipping undecodable key");
            None
        }
    }
}

/// In-memory [`DiscoveryProvider`].
#[derive(Clone)]
pub struct MemoryProvider {
    state: Arc<Mutex<State>>,
    watch_buffer: usize,
}

impl MemoryProvider {
    /// Creates an empty store whose watch channels hold `watch_buffer` events.
    #[must_use]
    pub fn new(watch_buffer: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            watch_buffer: watch_buffer.max(1),
        }
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn put(&self, kvs: &[Kv]) -> Result<LeaseId, DiscoveryError> {
        let mut changes = Vec::with_capacity(kvs.len());
        for kv in kvs {
            changes.push((kv_key(kv)?, kv.value.clone()));
        }

        let mut state = self.state.lock();
        state.next_lease += 1;
        let lease = state.next_lease;
        for (key, value) in &changes {
            state.entries.insert(
                key.clone(),
                Entry {
                    value: value.clone(),
                    lease,
                },
            );
        }
        state.notify(EventType::Put, &changes);
        Ok(lease)
    }

    fn revoke(&self, lease: LeaseId) {
        let mut state = self.state.lock();
        let mut removed = Vec::new();
        state.entries.retain(|key, entry| {
            if entry.lease == lease {
                removed.push((key.clone(), String::new()));
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            state.notify(EventType::Delete, &removed);
        }
        tracing::debug!(lease, removed = removed.len(), "lease revoked");
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new(DEFAULT_WATCH_BUFFER)
    }
}

#[async_trait]
impl DiscoveryProvider for MemoryProvider {
    async fn register_values(
        &self,
        cancel: CancellationToken,
        kvs: Vec<Kv>,
    ) -> Result<(), DiscoveryError> {
        validate_kvs(&kvs)?;
        let lease = self.put(&kvs)?;
        tracing::debug!(lease, count = kvs.len(), "values registered");

        cancel.cancelled().await;
        self.revoke(lease);
        Ok(())
    }

    async fn get(&self, filter: &KeyFilter) -> Result<Vec<Kv>, DiscoveryError> {
        let prefix = key_prefix(filter);
        let state = self.state.lock();
        state
            .entries
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, entry)| kv_from_store(key, entry.value.clone()).map_err(Into::into))
            .collect()
    }

    fn watch(&self, cancel: CancellationToken, filter: KeyFilter) -> mpsc::Receiver<Event> {
        let prefix = key_prefix(&filter);
        let (tx, rx) = mpsc::channel(self.watch_buffer);
        let dropped = CancellationToken::new();

        // Snapshot and subscription happen under one lock so no change is lost
        // between them.
        let id = {
            let mut state = self.state.lock();
            let snapshot: Vec<Kv> = state
                .entries
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix))
                .filter_map(|(key, entry)| decode(key, entry.value.clone()))
                .collect();
            if !snapshot.is_empty() {
                let event = Event {
                    event_type: EventType::Put,
                    kvs: snapshot,
                };
                // The channel is fresh and holds at least one event.
                if tx.try_send(event).is_err() {
                    tracing::warn!(prefix = %prefix, "snapshot not delivered");
                }
            }
            state.next_subscriber += 1;
            let id = state.next_subscriber;
            state.subscribers.push(Subscriber {
                id,
                prefix: prefix.clone(),
                tx: tx.clone(),
                dropped: dropped.clone(),
            });
            id
        };
        tracing::debug!(prefix = %prefix, "watching by prefix");

        // Holds a sender until the watch ends, so the receiver closes only
        // after the subscriber is gone.
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = dropped.cancelled() => {}
                () = tx.closed() => {}
            }
            state.lock().unsubscribe(id);
            tracing::debug!(prefix = %prefix, "done watching");
        });

        rx
    }
}
