use std::sync::Arc;

use async_trait::async_trait;
use discovery_sdk::{
    DiscoveryError, EndpointType, Location, LocationEvent, Locator, LocatorFilter,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type LocatorGetFn = Arc<
    dyn Fn(&str, EndpointType, &LocatorFilter) -> Result<Vec<Location>, DiscoveryError>
        + Send
        + Sync,
>;
pub type LocatorWatchFn = Arc<
    dyn Fn(CancellationToken, &str, EndpointType, &LocatorFilter) -> mpsc::Receiver<LocationEvent>
        + Send
        + Sync,
>;

/// Locator whose operations delegate to injected callbacks, for tests of
/// code that consumes locations.
///
/// Without a callback `get` finds nothing and `watch` closes on cancel.
#[derive(Clone, Default)]
pub struct MockLocator {
    get: Option<LocatorGetFn>,
    watch: Option<LocatorWatchFn>,
}

impl MockLocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_get<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, EndpointType, &LocatorFilter) -> Result<Vec<Location>, DiscoveryError>
            + Send
            + Sync
            + 'static,
    {
        self.get = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_watch<F>(mut self, f: F) -> Self
    where
        F: Fn(
                CancellationToken,
                &str,
                EndpointType,
                &LocatorFilter,
            ) -> mpsc::Receiver<LocationEvent>
            + Send
            + Sync
            + 'static,
    {
        self.watch = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for MockLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLocator")
            .field("get", &self.get.is_some())
            .field("watch", &self.watch.is_some())
            .finish()
    }
}

#[async_trait]
impl Locator for MockLocator {
    async fn get(
        &self,
        service_name: &str,
        endpoint_type: EndpointType,
        filter: &LocatorFilter,
    ) -> Result<Vec<Location>, DiscoveryError> {
        match &self.get {
            Some(f) => f(service_name, endpoint_type, filter),
            None => Ok(Vec::new()),
        }
    }

    fn watch(
        &self,
        cancel: CancellationToken,
        service_name: &str,
        endpoint_type: EndpointType,
        filter: &LocatorFilter,
    ) -> mpsc::Receiver<LocationEvent> {
        if let Some(f) = &self.watch {
            return f(cancel, service_name, endpoint_type, filter);
        }
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            cancel.cancelled().await;
            drop(tx);
        });
        rx
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use discovery_sdk::EventType;

    #[tokio::test]
    async fn delegates_to_callbacks() {
        let locator = MockLocator::new()
            .on_get(|name, endpoint_type, _| {
                assert_eq!(name, "bob_api");
                assert_eq!(endpoint_type, EndpointType::AppMain);
                Ok(vec![Location {
                    endpoint: "http://node1-pub.iddc:8080".to_owned(),
                    ..Location::default()
                }])
            })
            .on_watch(|_, _, _, _| {
                let (tx, rx) = mpsc::channel(1);
                tx.try_send(LocationEvent {
                    event_type: EventType::Delete,
                    locations: Vec::new(),
                })
                .unwrap();
                rx
            });

        let found = locator
            .get("bob_api", EndpointType::AppMain, &LocatorFilter::default())
            .await
            .unwrap();
        assert_eq!(found[0].endpoint, "http://node1-pub.iddc:8080");

        let mut rx = locator.watch(
            CancellationToken::new(),
            "bob_api",
            EndpointType::AppMain,
            &LocatorFilter::default(),
        );
        assert_eq!(rx.recv().await.unwrap().event_type, EventType::Delete);
    }

    #[tokio::test]
    async fn defaults_are_inert() {
        let locator = MockLocator::new();
        let found = locator
            .get("x", EndpointType::External, &LocatorFilter::default())
            .await
            .unwrap();
        assert!(found.is_empty());

        let cancel = CancellationToken::new();
        let mut rx = locator.watch(
            cancel.clone(),
            "x",
            EndpointType::External,
            &LocatorFilter::default(),
        );
        cancel.cancel();
        assert!(rx.recv().await.is_none());
    }
}
