//! Capability traits of the discovery subsystem.
//!
//! [`DiscoveryProvider`] is implemented once per coordination store. The
//! [`Locator`] sits on top of a provider and translates raw KVs into
//! [`Location`]s for a requested endpoint type.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::DiscoveryError;
use crate::models::{EndpointType, Event, KeyFilter, Kv, Location, LocationEvent, LocatorFilter};

/// Client of a watch-capable key-value coordination store.
///
/// Implementations are shared as `Arc<dyn DiscoveryProvider>` between the
/// registrator, locators and any other watchers in the process.
///
/// ```ignore
/// let provider: Arc<dyn DiscoveryProvider> = discovery::provider::connect(&config).await?;
///
/// let cancel = CancellationToken::new();
/// tokio::spawn({
///     let provider = provider.clone();
///     let cancel = cancel.child_token();
///     async move { provider.register_values(cancel, info.registration_data()).await }
/// });
///
/// let filter = KeyFilter::namespace(Namespace::Discovery);
/// let mut events = provider.watch(cancel.child_token(), filter);
/// while let Some(event) = events.recv().await {
///     // ...
/// }
/// ```
#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    /// Publishes `kvs` under a lease and keeps the lease alive until `cancel`
    /// fires. The lease is then revoked, which deletes the values.
    ///
    /// Returns only after the values have been removed (or the store became
    /// unreachable). Multi-KV atomicity is backend specific and must not be
    /// relied upon.
    ///
    /// # Errors
    ///
    /// - `Validation` if the list is empty or any KV is malformed
    /// - `Store` if the store rejects the registration and the
    ///   implementation gives up retrying
    async fn register_values(
        &self,
        cancel: CancellationToken,
        kvs: Vec<Kv>,
    ) -> Result<(), DiscoveryError>;

    /// Point-in-time read of every KV under the filter's key prefix, sorted
    /// by key. Returns an empty vector when nothing matches.
    ///
    /// # Errors
    ///
    /// - `Store` if the read fails
    /// - `KeyParse` if a stored key cannot be decoded
    async fn get(&self, filter: &KeyFilter) -> Result<Vec<Kv>, DiscoveryError>;

    /// Subscribes to changes under the filter's key prefix.
    ///
    /// The first event is a `Put` snapshot of the values that exist when the
    /// subscription starts. The receiver is closed exactly once, when
    /// `cancel` fires or the store ends the stream.
    ///
    /// Must be called within a Tokio runtime.
    fn watch(&self, cancel: CancellationToken, filter: KeyFilter) -> mpsc::Receiver<Event>;
}

/// Resolves service names into endpoint locations.
#[async_trait]
pub trait Locator: Send + Sync {
    /// Returns the locations of every registered instance of `service_name`.
    ///
    /// # Errors
    ///
    /// - `Store` / `KeyParse` from the underlying provider
    /// - `ValueParse` for the first value that is not a discovery value
    async fn get(
        &self,
        service_name: &str,
        endpoint_type: EndpointType,
        filter: &LocatorFilter,
    ) -> Result<Vec<Location>, DiscoveryError>;

    /// Subscribes to location changes of `service_name`.
    ///
    /// A batch containing an unparseable value is dropped as a whole; the
    /// subscription stays open.
    fn watch(
        &self,
        cancel: CancellationToken,
        service_name: &str,
        endpoint_type: EndpointType,
        filter: &LocatorFilter,
    ) -> mpsc::Receiver<LocationEvent>;
}
