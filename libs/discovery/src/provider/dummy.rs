use async_trait::async_trait;
use discovery_sdk::{DiscoveryError, DiscoveryProvider, Event, KeyFilter, Kv};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Inert provider: nothing is stored and nothing is ever delivered.
///
/// `register_values` holds until cancelled, so registrators behave the same
/// way they do against a real store.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyProvider;

impl DummyProvider {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DiscoveryProvider for DummyProvider {
    async fn register_values(
        &self,
        cancel: CancellationToken,
        _kvs: Vec<Kv>,
    ) -> Result<(), DiscoveryError> {
        cancel.cancelled().await;
        Ok(())
    }

    async fn get(&self, _filter: &KeyFilter) -> Result<Vec<Kv>, DiscoveryError> {
        Ok(Vec::new())
    }

    fn watch(&self, cancel: CancellationToken, _filter: KeyFilter) -> mpsc::Receiver<Event> {
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
    use std::time::Duration;

    #[tokio::test]
    async fn get_is_empty() {
        let kvs = DummyProvider::new().get(&KeyFilter::default()).await.unwrap();
        assert!(kvs.is_empty());
    }

    #[tokio::test]
    async fn watch_closes_on_cancel() {
        let cancel = CancellationToken::new();
        let mut rx = DummyProvider::new().watch(cancel.clone(), KeyFilter::default());

        let pending = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(pending.is_err(), "nothing is delivered before cancel");

        cancel.cancel();
        let closed = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn register_holds_until_cancel() {
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { DummyProvider::new().register_values(cancel, Vec::new()).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
