//! Coordination store clients.

use std::sync::Arc;

use discovery_sdk::{DiscoveryError, DiscoveryProvider};

use crate::config::{DiscoveryConfig, ProviderKind};

mod dummy;
#[cfg(feature = "etcd")]
mod etcd;
mod memory;
mod mock;

pub use dummy::DummyProvider;
#[cfg(feature = "etcd")]
pub use etcd::EtcdProvider;
pub use memory::MemoryProvider;
pub use mock::{GetFn, MockProvider, RegisterFn, WatchFn};

/// Builds the provider selected by `config`.
///
/// # Errors
/// Returns `DiscoveryError::Store` if the store cannot be reached, or if the
/// etcd provider is requested without the `etcd` feature.
#[cfg_attr(not(feature = "etcd"), allow(clippy::unused_async))]
pub async fn connect(
    config: &DiscoveryConfig,
) -> Result<Arc<dyn DiscoveryProvider>, DiscoveryError> {
    let provider: Arc<dyn DiscoveryProvider> = match config.provider {
        ProviderKind::None => Arc::new(DummyProvider::new()),
        ProviderKind::Memory => Arc::new(MemoryProvider::new(config.watch_buffer)),
        #[cfg(feature = "etcd")]
        ProviderKind::Etcd => {
            Arc::new(EtcdProvider::connect(&config.etcd, config.watch_buffer).await?)
        }
        #[cfg(not(feature = "etcd"))]
        ProviderKind::Etcd => {
            return Err(DiscoveryError::Store(
                "etcd support is not compiled in".to_owned(),
            ));
        }
    };
    tracing::info!(provider = %config.provider, "discovery provider ready");
    Ok(provider)
}
