//! etcd v3 provider.
//!
//! Registration grants a lease, writes every KV of the call in one
//! transaction bound to that lease and keeps the lease alive until
//! cancelled. Watches resume from the last seen revision after failures.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use discovery_sdk::key::{key_prefix, kv_from_store, kv_key};
use discovery_sdk::{
    DiscoveryError, DiscoveryProvider, Event, EventType, KeyFilter, Kv, validate_kvs,
};
use etcd_client::{
    Client, ConnectOptions, GetOptions, KeyValue, LeaseKeepAliveResponse, LeaseKeepAliveStream,
    LeaseKeeper, PutOptions, ResponseHeader, SortOrder, SortTarget, Txn, TxnOp, WatchOptions,
};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tokio_util::sync::CancellationToken;

use crate::config::EtcdConfig;

type LeaseId = i64;

/// How one registration attempt ended.
#[derive(Debug)]
enum Attempt {
    /// The caller cancelled; the lease (if granted) must be revoked.
    Cancelled(Option<LeaseId>),
    /// The attempt failed and should be retried.
    Failed(DiscoveryError),
}

/// [`DiscoveryProvider`] backed by an etcd v3 cluster.
#[derive(Clone)]
pub struct EtcdProvider {
    client: Client,
    config: EtcdConfig,
    watch_buffer: usize,
}

impl EtcdProvider {
    /// Connects to the cluster described by `config`.
    ///
    /// # Errors
    /// Returns `DiscoveryError::Store` if the connection cannot be established.
    pub async fn connect(
        config: &EtcdConfig,
        watch_buffer: usize,
    ) -> Result<Self, DiscoveryError> {
        let mut options = ConnectOptions::new()
            .with_connect_timeout(config.dial_timeout)
            .with_keep_alive(config.dial_timeout, config.dial_timeout);
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            options = options.with_user(user.clone(), password.clone());
        }

        let client = Client::connect(config.endpoints.as_slice(), Some(options))
            .await
            .map_err(|e| DiscoveryError::Store(format!("failed to connect to etcd: {e}")))?;
        tracing::info!(endpoints = ?config.endpoints, "connected to etcd");

        Ok(Self::with_client(client, config.clone(), watch_buffer))
    }

    /// Wraps an already connected client.
    #[must_use]
    pub fn with_client(client: Client, config: EtcdConfig, watch_buffer: usize) -> Self {
        Self {
            client,
            config,
            watch_buffer: watch_buffer.max(1),
        }
    }

    async fn register_once(
        &self,
        cancel: &CancellationToken,
        entries: &[(String, String)],
    ) -> Attempt {
        let mut client = self.client.clone();
        let ttl = i64::try_from(self.config.key_ttl.as_secs()).unwrap_or(i64::MAX);

        let grant = match step(
            cancel,
            self.config.register_timeout,
            "lease grant",
            client.lease_grant(ttl, None),
        )
        .await
        {
            Ok(Some(grant)) => grant,
            Ok(None) => return Attempt::Cancelled(None),
            Err(e) => return Attempt::Failed(e),
        };
        let lease = grant.id();

        let ops: Vec<TxnOp> = entries
            .iter()
            .map(|(key, value)| {
                TxnOp::put(
                    key.as_str(),
                    value.as_str(),
                    Some(PutOptions::new().with_lease(lease)),
                )
            })
            .collect();
        match step(
            cancel,
            self.config.register_timeout,
            "transaction",
            client.txn(Txn::new().and_then(ops)),
        )
        .await
        {
            Ok(Some(_)) => {}
            Ok(None) => return Attempt::Cancelled(Some(lease)),
            Err(e) => return Attempt::Failed(e),
        }
        tracing::debug!(lease, count = entries.len(), "values registered");

        match step(
            cancel,
            self.config.register_timeout,
            "lease keep alive",
            client.lease_keep_alive(lease),
        )
        .await
        {
            Ok(Some((keeper, stream))) => self.keep_alive(cancel, lease, keeper, stream).await,
            Ok(None) => Attempt::Cancelled(Some(lease)),
            Err(e) => {
                self.revoke(lease).await;
                Attempt::Failed(e)
            }
        }
    }

    /// Refreshes the lease every third of its TTL until cancelled or the
    /// lease is lost.
    async fn keep_alive(
        &self,
        cancel: &CancellationToken,
        lease: LeaseId,
        mut keeper: LeaseKeeper,
        mut stream: LeaseKeepAliveStream,
    ) -> Attempt {
        let period = (self.config.key_ttl / 3).max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Attempt::Cancelled(Some(lease)),
                _ = ticker.tick() => {
                    if let Err(e) = keeper.keep_alive().await {
                        return Attempt::Failed(store("lease keep alive", &e));
                    }
                    match timeout(self.config.register_timeout, stream.message()).await {
                        Ok(Ok(resp)) => {
                            let ttl = resp.as_ref().map(LeaseKeepAliveResponse::ttl);
                            if let Some(attempt) = keep_alive_response(lease, ttl) {
                                return attempt;
                            }
                        }
                        Ok(Err(e)) => return Attempt::Failed(store("lease keep alive", &e)),
                        Err(_) => {
                            return Attempt::Failed(DiscoveryError::Store(format!(
                                "lease {lease} keepalive response timed out"
                            )));
                        }
                    }
                }
            }
        }
    }

    /// Revokes the lease, deleting every key bound to it.
    async fn revoke(&self, lease: LeaseId) {
        let mut client = self.client.clone();
        match timeout(self.config.revoke_timeout, client.lease_revoke(lease)).await {
            Ok(Ok(_)) => tracing::debug!(lease, "lease revoked"),
            Ok(Err(e)) => tracing::warn!(lease, error = %e, "can't revoke lease"),
            Err(_) => tracing::warn!(lease, "lease revoke timed out"),
        }
    }

    async fn run_watch(self, cancel: CancellationToken, prefix: String, tx: mpsc::Sender<Event>) {
        tracing::debug!(prefix = %prefix, "watching by prefix");
        let Some(mut revision) = self.fetch_existing(&cancel, &prefix, &tx).await else {
            tracing::debug!(prefix = %prefix, "done watching");
            return;
        };

        loop {
            let err = self.watch_from(&cancel, &prefix, &mut revision, &tx).await;
            if cancel.is_cancelled() || tx.is_closed() {
                break;
            }
            tracing::warn!(prefix = %prefix, revision, error = %err, "client watch failed");
            tokio::select! {
                () = cancel.cancelled() => break,
                () = sleep(self.config.watch_retry_interval) => {}
            }
        }
        tracing::debug!(prefix = %prefix, "done watching");
    }

    /// Sends the values existing under `prefix` as one `Put` event and
    /// returns the store revision they were read at. `None` when cancelled.
    async fn fetch_existing(
        &self,
        cancel: &CancellationToken,
        prefix: &str,
        tx: &mpsc::Sender<Event>,
    ) -> Option<i64> {
        let mut client = self.client.clone();
        loop {
            let options = GetOptions::new().with_prefix();
            let get = client.get(prefix, Some(options));
            match step(cancel, self.config.get_timeout, "get", get).await {
                Ok(Some(resp)) => {
                    let revision = resp.header().map_or(0, ResponseHeader::revision);
                    let decoded = resp.kvs().iter().map(decode_kv);
                    let snapshot = Snapshot::new(prefix, revision, decoded);
                    let Some(event) = snapshot.event else {
                        tracing::debug!(prefix = %prefix, "no existing values found");
                        return Some(snapshot.revision);
                    };
                    if !send(cancel, tx, event).await {
                        return None;
                    }
                    return Some(snapshot.revision);
                }
                Ok(None) => return None,
                Err(e) => {
                    tracing::warn!(prefix = %prefix, error = %e, "failed to fetch existing values");
                }
            }
            tokio::select! {
                () = cancel.cancelled() => return None,
                () = sleep(self.config.watch_retry_interval) => {}
            }
        }
    }

    /// Streams changes after `revision` until the watch fails. Returns the
    /// failure; `revision` is advanced to the last revision seen.
    async fn watch_from(
        &self,
        cancel: &CancellationToken,
        prefix: &str,
        revision: &mut i64,
        tx: &mpsc::Sender<Event>,
    ) -> DiscoveryError {
        let mut client = self.client.clone();
        // Start from the next revision, the current one was already delivered.
        let options = WatchOptions::new()
            .with_prefix()
            .with_start_revision(*revision + 1)
            .with_progress_notify();

        let (_watcher, mut stream) = match step(
            cancel,
            self.config.watch_create_timeout,
            "watch create",
            client.watch(prefix, Some(options)),
        )
        .await
        {
            Ok(Some(pair)) => pair,
            Ok(None) => return cancelled(),
            Err(e) => return e,
        };
        tracing::debug!(prefix = %prefix, revision = *revision, "watcher created");

        loop {
            let deadline = Instant::now() + self.config.progress_timeout;
            let resp = tokio::select! {
                () = cancel.cancelled() => return cancelled(),
                () = sleep_until(deadline) => {
                    return DiscoveryError::Store("progress notify timeout".to_owned());
                }
                msg = stream.message() => match msg {
                    Ok(Some(resp)) => resp,
                    Ok(None) => {
                        return DiscoveryError::Store("watch stream closed unexpectedly".to_owned());
                    }
                    Err(e) => return store("watch", &e),
                },
            };

            if resp.canceled() {
                return DiscoveryError::Store(format!("watch canceled: {}", resp.cancel_reason()));
            }
            *revision = next_revision(
                *revision,
                resp.header().map(ResponseHeader::revision),
                resp.events()
                    .iter()
                    .filter_map(etcd_client::Event::kv)
                    .map(KeyValue::mod_revision),
            );
            if resp.events().is_empty() {
                tracing::trace!(prefix = %prefix, revision = *revision, "progress notify");
            }

            for event in resp.events() {
                let Some(kv) = event.kv() else {
                    tracing::warn!(prefix = %prefix, "watch event without kv");
                    continue;
                };
                let kv = match decode_kv(kv) {
                    Ok(kv) => kv,
                    Err(e) => {
                        tracing::warn!(prefix = %prefix, error = %e, "event parse error");
                        continue;
                    }
                };
                let event_type = event_type(event.event_type());
                tracing::debug!(prefix = %prefix, event = %event_type, "watch event");
                let event = Event {
                    event_type,
                    kvs: vec![kv],
                };
                if !send(cancel, tx, event).await {
                    return cancelled();
                }
            }
        }
    }
}

#[async_trait]
impl DiscoveryProvider for EtcdProvider {
    async fn register_values(
        &self,
        cancel: CancellationToken,
        kvs: Vec<Kv>,
    ) -> Result<(), DiscoveryError> {
        validate_kvs(&kvs)?;
        let entries = kvs
            .iter()
            .map(|kv| Ok((kv_key(kv)?, kv.value.clone())))
            .collect::<Result<Vec<_>, DiscoveryError>>()?;

        loop {
            let retry_at = Instant::now() + self.config.register_retry_interval;
            match self.register_once(&cancel, &entries).await {
                Attempt::Cancelled(lease) => {
                    if let Some(lease) = lease {
                        self.revoke(lease).await;
                    }
                    tracing::debug!("register loop exit");
                    return Ok(());
                }
                Attempt::Failed(e) => {
                    tracing::warn!(error = %e, "could not register values");
                }
            }
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("register loop exit");
                    return Ok(());
                }
                () = sleep_until(retry_at) => {}
            }
        }
    }

    async fn get(&self, filter: &KeyFilter) -> Result<Vec<Kv>, DiscoveryError> {
        let prefix = key_prefix(filter);
        let mut client = self.client.clone();
        let options = GetOptions::new()
            .with_prefix()
            .with_sort(SortTarget::Key, SortOrder::Ascend);
        let get = client.get(prefix, Some(options));
        let resp = match timeout(self.config.get_timeout, get).await {
            Ok(res) => res.map_err(|e| store("get", &e))?,
            Err(_) => return Err(DiscoveryError::Store("get: timed out".to_owned())),
        };
        resp.kvs().iter().map(decode_kv).collect()
    }

    fn watch(&self, cancel: CancellationToken, filter: KeyFilter) -> mpsc::Receiver<Event> {
        let prefix = key_prefix(&filter);
        let (tx, rx) = mpsc::channel(self.watch_buffer);
        tokio::spawn(self.clone().run_watch(cancel, prefix, tx));
        rx
    }
}

/// Runs one store call bounded by `limit`. `Ok(None)` when cancelled first.
async fn step<T, F>(
    cancel: &CancellationToken,
    limit: Duration,
    what: &str,
    fut: F,
) -> Result<Option<T>, DiscoveryError>
where
    F: Future<Output = Result<T, etcd_client::Error>>,
{
    tokio::select! {
        () = cancel.cancelled() => Ok(None),
        res = timeout(limit, fut) => match res {
            Ok(Ok(value)) => Ok(Some(value)),
            Ok(Err(e)) => Err(store(what, &e)),
            Err(_) => Err(DiscoveryError::Store(format!("{what}: timed out"))),
        },
    }
}

async fn send(cancel: &CancellationToken, tx: &mpsc::Sender<Event>, event: Event) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        res = tx.send(event) => res.is_ok(),
    }
}

/// Values found when a watch starts and the revision they were read at.
struct Snapshot {
    revision: i64,
    event: Option<Event>,
}

impl Snapshot {
    /// Undecodable values are skipped. The revision is kept either way, so
    /// the watch resumes right after it.
    fn new(
        prefix: &str,
        revision: i64,
        decoded: impl IntoIterator<Item = Result<Kv, DiscoveryError>>,
    ) -> Self {
        let kvs: Vec<Kv> = decoded
            .into_iter()
            .filter_map(|kv| match kv {
                Ok(kv) => Some(kv),
                Err(e) => {
                    tracing::warn!(prefix = %prefix, error = %e, "skipping undecodable value");
                    None
                }
            })
            .collect();
        let event = (!kvs.is_empty()).then(|| Event {
            event_type: EventType::Put,
            kvs,
        });
        Self { revision, event }
    }
}

/// Last revision delivered after a watch response. Progress notifications
/// only carry the header revision; it never moves backwards.
fn next_revision(seen: i64, header: Option<i64>, events: impl IntoIterator<Item = i64>) -> i64 {
    events.into_iter().chain(header).fold(seen, i64::max)
}

/// Judges one keep-alive reply. `None` keeps the lease loop running.
fn keep_alive_response(lease: LeaseId, ttl: Option<i64>) -> Option<Attempt> {
    let reason = match ttl {
        Some(ttl) if ttl > 0 => return None,
        Some(_) => format!("lease {lease} keepalive timeout, TTL reached"),
        None => format!("lease {lease} keepalive stream closed"),
    };
    Some(Attempt::Failed(DiscoveryError::Store(reason)))
}

const fn event_type(kind: etcd_client::EventType) -> EventType {
    match kind {
        etcd_client::EventType::Put => EventType::Put,
        etcd_client::EventType::Delete => EventType::Delete,
    }
}

fn decode_kv(kv: &KeyValue) -> Result<Kv, DiscoveryError> {
    let key = kv.key_str().map_err(|e| store("key", &e))?;
    let value = kv.value_str().map_err(|e| store("value", &e))?;
    Ok(kv_from_store(key, value.to_owned())?)
}

fn store(what: &str, err: &etcd_client::Error) -> DiscoveryError {
    DiscoveryError::Store(format!("{what}: {err}"))
}

fn cancelled() -> DiscoveryError {
    DiscoveryError::Store("watch cancelled".to_owned())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use discovery_sdk::{InstanceName, Namespace, Service, ServiceType};
    use tracing_test::traced_test;

    fn kv(port: u16) -> Kv {
        Kv::new(
            Namespace::Discovery,
            Service::new(
                ServiceType::System,
                "redis",
                "stable",
                InstanceName::new("db1.iddc", port),
            ),
            r#"{"endpoint_main":"db1.iddc:6379"}"#,
        )
    }

    #[test]
    fn revision_follows_header_and_events() {
        assert_eq!(next_revision(10, Some(15), [12, 13]), 15);
        assert_eq!(next_revision(10, None, [12, 13]), 13);
        // Progress notify without events.
        assert_eq!(next_revision(10, Some(20), []), 20);
        assert_eq!(next_revision(10, Some(5), [7]), 10);
    }

    #[test]
    fn keep_alive_replies() {
        assert!(keep_alive_response(7, Some(3)).is_none());

        let Some(Attempt::Failed(DiscoveryError::Store(reason))) = keep_alive_response(7, Some(0))
        else {
            panic!("expired lease must fail the attempt");
        };
        assert_eq!(reason, "lease 7 keepalive timeout, TTL reached");

        let Some(Attempt::Failed(DiscoveryError::Store(reason))) = keep_alive_response(7, None)
        else {
            panic!("closed stream must fail the attempt");
        };
        assert!(reason.contains("stream closed"));
    }

    #[test]
    fn snapshot_of_existing_values() {
        let snapshot = Snapshot::new("/discovery/", 42, vec![Ok(kv(1)), Ok(kv(2))]);
        assert_eq!(snapshot.revision, 42);
        assert_eq!(
            snapshot.event,
            Some(Event {
                event_type: EventType::Put,
                kvs: vec![kv(1), kv(2)],
            })
        );

        let empty = Snapshot::new("/discovery/", 42, Vec::new());
        assert_eq!(empty.revision, 42);
        assert!(empty.event.is_none());
    }

    #[test]
    #[traced_test]
    fn snapshot_keeps_revision_when_values_are_undecodable() {
        let bad = || Err(DiscoveryError::Store("value: invalid utf-8".to_owned()));

        let partial = Snapshot::new("/discovery/", 42, vec![bad(), Ok(kv(1))]);
        assert_eq!(partial.revision, 42);
        assert_eq!(partial.event.map(|e| e.kvs), Some(vec![kv(1)]));

        let broken = Snapshot::new("/discovery/", 42, vec![bad()]);
        assert_eq!(broken.revision, 42);
        assert!(broken.event.is_none());
        assert!(logs_contain("skipping undecodable value"));
    }

    #[test]
    fn store_event_types() {
        assert_eq!(event_type(etcd_client::EventType::Put), EventType::Put);
        assert_eq!(event_type(etcd_client::EventType::Delete), EventType::Delete);
    }

    #[tokio::test]
    async fn step_bounds_store_calls() {
        let cancel = CancellationToken::new();
        let limit = Duration::from_millis(20);

        let done = step(&cancel, limit, "get", async { Ok::<_, etcd_client::Error>(5) }).await;
        assert_eq!(done.unwrap(), Some(5));

        let hung = std::future::pending::<Result<(), etcd_client::Error>>();
        let err = step(&cancel, limit, "watch create", hung).await.unwrap_err();
        assert_eq!(err.to_string(), "store error: watch create: timed out");

        cancel.cancel();
        let hung = std::future::pending::<Result<(), etcd_client::Error>>();
        assert_eq!(step(&cancel, limit, "get", hung).await.unwrap(), None);
    }
}
