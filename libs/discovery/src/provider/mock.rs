use std::sync::Arc;

use async_trait::async_trait;
use discovery_sdk::{DiscoveryError, DiscoveryProvider, Event, KeyFilter, Kv};
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::DummyProvider;

pub type RegisterFn = Arc<
    dyn Fn(CancellationToken, Vec<Kv>) -> BoxFuture<'static, Result<(), DiscoveryError>>
        + Send
        + Sync,
>;
pub type GetFn = Arc<dyn Fn(&KeyFilter) -> Result<Vec<Kv>, DiscoveryError> + Send + Sync>;
pub type WatchFn = Arc<dyn Fn(CancellationToken, KeyFilter) -> mpsc::Receiver<Event> + Send + Sync>;

/// Provider whose operations delegate to injected callbacks.
///
/// Operations without a callback behave like [`DummyProvider`].
///
/// ```ignore
/// let provider = MockProvider::new().on_get(|filter| {
///     assert_eq!(key_prefix(filter), "/discovery/app/bob_api/");
///     Ok(vec![kv])
/// });
/// ```
#[derive(Clone, Default)]
pub struct MockProvider {
    register: Option<RegisterFn>,
    get: Option<GetFn>,
    watch: Option<WatchFn>,
}

impl MockProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_register<F>(mut self, f: F) -> Self
    where
        F: Fn(CancellationToken, Vec<Kv>) -> BoxFuture<'static, Result<(), DiscoveryError>>
            + Send
            + Sync
            + 'static,
    {
        self.register = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_get<F>(mut self, f: F) -> Self
    where
        F: Fn(&KeyFilter) -> Result<Vec<Kv>, DiscoveryError> + Send + Sync + 'static,
    {
        self.get = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_watch<F>(mut self, f: F) -> Self
    where
        F: Fn(CancellationToken, KeyFilter) -> mpsc::Receiver<Event> + Send + Sync + 'static,
    {
        self.watch = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProvider")
            .field("register", &self.register.is_some())
            .field("get", &self.get.is_some())
            .field("watch", &self.watch.is_some())
            .finish()
    }
}

#[async_trait]
impl DiscoveryProvider for MockProvider {
    async fn register_values(
        &self,
        cancel: CancellationToken,
        kvs: Vec<Kv>,
    ) -> Result<(), DiscoveryError> {
        match &self.register {
            Some(f) => f(cancel, kvs).await,
            None => DummyProvider.register_values(cancel, kvs).await,
        }
    }

    async fn get(&self, filter: &KeyFilter) -> Result<Vec<Kv>, DiscoveryError> {
        match &self.get {
            Some(f) => f(filter),
            None => Ok(Vec::new()),
        }
    }

    fn watch(&self, cancel: CancellationToken, filter: KeyFilter) -> mpsc::Receiver<Event> {
        match &self.watch {
            Some(f) => f(cancel, filter),
            None => DummyProvider.watch(cancel, filter),
        }
    }
}
