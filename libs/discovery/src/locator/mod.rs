//! Service locator: resolves service names into endpoint locations.

use std::sync::Arc;

use async_trait::async_trait;
use discovery_sdk::{
    DiscoveryError, DiscoveryProvider, EndpointType, Location, LocationEvent, Locator,
    LocatorFilter,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::DEFAULT_WATCH_BUFFER;
use crate::provider::DummyProvider;

mod mock;
mod translate;

pub use mock::{LocatorGetFn, LocatorWatchFn, MockLocator};
pub use translate::{location_from_kv, locations_from_kvs, translate_event};

/// [`Locator`] over the `discovery` namespace of a provider.
#[derive(Clone)]
pub struct ServiceLocator {
    provider: Arc<dyn DiscoveryProvider>,
    watch_buffer: usize,
}

impl ServiceLocator {
    #[must_use]
    pub fn new(provider: Arc<dyn DiscoveryProvider>) -> Self {
        Self {
            provider,
            watch_buffer: DEFAULT_WATCH_BUFFER,
        }
    }

    /// Locator that never finds anything, for processes running without a
    /// coordination store.
    #[must_use]
    pub fn dummy() -> Self {
        Self::new(Arc::new(DummyProvider::new()))
    }

    /// Capacity of the channels returned by [`Locator::watch`].
    #[must_use]
    pub fn with_watch_buffer(mut self, watch_buffer: usize) -> Self {
        self.watch_buffer = watch_buffer.max(1);
        self
    }
}

impl std::fmt::Debug for ServiceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceLocator")
            .field("watch_buffer", &self.watch_buffer)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Locator for ServiceLocator {
    async fn get(
        &self,
        service_name: &str,
        endpoint_type: EndpointType,
        filter: &LocatorFilter,
    ) -> Result<Vec<Location>, DiscoveryError> {
        let key_filter = filter.key_filter(service_name, endpoint_type);
        let kvs = self.provider.get(&key_filter).await?;
        locations_from_kvs(kvs, endpoint_type)
    }

    fn watch(
        &self,
        cancel: CancellationToken,
        service_name: &str,
        endpoint_type: EndpointType,
        filter: &LocatorFilter,
    ) -> mpsc::Receiver<LocationEvent> {
        let key_filter = filter.key_filter(service_name, endpoint_type);
        let mut events = self.provider.watch(cancel.clone(), key_filter);
        let (tx, rx) = mpsc::channel(self.watch_buffer);
        let service_name = service_name.to_owned();

        let task = async move {
            tracing::debug!(
                service = %service_name,
                %endpoint_type,
                "watching for service discovery updates"
            );
            while let Some(event) = events.recv().await {
                let event = match translate_event(event, endpoint_type) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(
                            service = %service_name,
                            error = %e,
                            "dropping discovery event"
                        );
                        continue;
                    }
                };
                tokio::select! {
                    () = cancel.cancelled() => break,
                    res = tx.send(event) => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(service = %service_name, "finished watching service");
        };
        tokio::spawn(task.in_current_span());
        rx
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::provider::MockProvider;
    use discovery_sdk::key::key_prefix;
    use discovery_sdk::{Event, EventType, InstanceName, Kv, Namespace, Service, ServiceType};
    use std::time::Duration;
    use tracing_test::traced_test;

    fn kv(instance: &str, value: &str) -> Kv {
        Kv::new(
            Namespace::Discovery,
            Service::new(ServiceType::App, "bob_api", "stable", InstanceName::from(instance)),
            value,
        )
    }

    #[test]
    fn watch_buffer_defaults_and_floor() {
        let locator = ServiceLocator::dummy();
        assert_eq!(locator.watch_buffer, DEFAULT_WATCH_BUFFER);
        assert_eq!(locator.with_watch_buffer(0).watch_buffer, 1);
    }

    #[tokio::test]
    async fn get_builds_filter_and_translates() {
        let provider = MockProvider::new().on_get(|filter| {
            assert_eq!(key_prefix(filter), "/discovery/app/bob_api/unstable1/");
            Ok(vec![
                kv("a:1", r#"{"endpoint_main":"http://a:1","endpoint_additional":"a:2"}"#),
                kv("b:1", ""),
            ])
        });
        let locator = ServiceLocator::new(Arc::new(provider));
        let filter = LocatorFilter {
            rollout_type: Some("unstable1".to_owned()),
            ..LocatorFilter::default()
        };

        let locations = locator
            .get("bob_api", EndpointType::AppAdditional, &filter)
            .await
            .unwrap();
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[0].endpoint, "a:2");
        assert_eq!(locations[1].endpoint, "");
    }

    #[tokio::test]
    async fn get_fails_on_first_bad_value() {
        let provider = MockProvider::new().on_get(|_| Ok(vec![kv("a:1", "not json")]));
        let locator = ServiceLocator::new(Arc::new(provider));
        let err = locator
            .get("bob_api", EndpointType::AppMain, &LocatorFilter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::ValueParse { .. }));
    }

    #[tokio::test]
    async fn get_propagates_store_errors() {
        let provider =
            MockProvider::new().on_get(|_| Err(DiscoveryError::Store("unavailable".to_owned())));
        let locator = ServiceLocator::new(Arc::new(provider));
        let err = locator
            .get("bob_api", EndpointType::AppMain, &LocatorFilter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Store(_)));
    }

    #[tokio::test]
    #[traced_test]
    async fn watch_skips_bad_batches() {
        let provider = MockProvider::new().on_watch(|_, _| {
            let (tx, rx) = mpsc::channel(4);
            tx.try_send(Event {
                event_type: EventType::Put,
                kvs: vec![kv("a:1", "{")],
            })
            .unwrap();
            tx.try_send(Event {
                event_type: EventType::Delete,
                kvs: vec![kv("a:1", "")],
            })
            .unwrap();
            rx
        });
        let locator = ServiceLocator::new(Arc::new(provider));

        let mut rx = locator.watch(
            CancellationToken::new(),
            "bob_api",
            EndpointType::AppMain,
            &LocatorFilter::default(),
        );
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::Delete);
        assert_eq!(event.locations.len(), 1);
        assert!(rx.recv().await.is_none(), "closes when the provider stream ends");
        assert!(logs_contain("dropping discovery event"));
    }

    #[tokio::test]
    async fn dummy_watch_closes_on_cancel() {
        let cancel = CancellationToken::new();
        let mut rx = ServiceLocator::dummy().watch(
            cancel.clone(),
            "bob_api",
            EndpointType::AppMain,
            &LocatorFilter::default(),
        );
        cancel.cancel();
        let closed = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert!(closed.is_none());

        let found = ServiceLocator::dummy()
            .get("bob_api", EndpointType::AppMain, &LocatorFilter::default())
            .await
            .unwrap();
        assert!(found.is_empty());
    }
}
