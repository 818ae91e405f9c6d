//! Two-phase registration lifecycle.
//!
//! An instance is first *registered* (admin and monitoring info become
//! visible) and later made *discoverable* (its endpoints become visible to
//! locators). Either phase is one background `register_values` call that
//! holds its lease until the phase is stopped.

use std::sync::Arc;

use discovery_sdk::{DiscoveryError, DiscoveryProvider, Kv};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::registration::RegistrationInfo;

/// A running publication phase.
struct Phase {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Phase {
    /// Cancels the lease and waits until the values are withdrawn.
    async fn stop(self, name: &'static str) {
        self.cancel.cancel();
        if let Some(handle) = self.handle
            && let Err(e) = handle.await
        {
            tracing::warn!(phase = name, error = %e, "publication task failed");
        }
    }
}

/// Drives the registration and discovery phases of one instance.
///
/// Dropping the registrator cancels both phases without waiting; call
/// [`Registrator::unregister`] to wait until the values are withdrawn.
pub struct Registrator {
    provider: Arc<dyn DiscoveryProvider>,
    info: Arc<dyn RegistrationInfo>,
    root: CancellationToken,
    registration: Mutex<Option<Phase>>,
    discovery: Mutex<Option<Phase>>,
}

impl Registrator {
    #[must_use]
    pub fn new(provider: Arc<dyn DiscoveryProvider>, info: Arc<dyn RegistrationInfo>) -> Self {
        Self {
            provider,
            info,
            root: CancellationToken::new(),
            registration: Mutex::new(None),
            discovery: Mutex::new(None),
        }
    }

    /// Starts publishing the registration data in the background.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::AlreadyRegistered` if the registration phase
    /// is already running.
    pub fn register(&self) -> Result<(), DiscoveryError> {
        let mut slot = self.registration.lock();
        if slot.is_some() {
            return Err(DiscoveryError::AlreadyRegistered);
        }
        *slot = Some(self.spawn("registration", self.info.registration_data()));
        tracing::info!("registration started");
        Ok(())
    }

    /// Withdraws the discovery data, then the registration data, and waits
    /// for both. Does nothing when not registered.
    pub async fn unregister(&self) {
        let Some(phase) = self.registration.lock().take() else {
            return;
        };
        self.disable_discovery().await;
        phase.stop("registration").await;
        tracing::info!("service registration canceled");
    }

    /// Starts publishing the discovery data in the background, making the
    /// instance visible to locators.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::DiscoveryAlreadyEnabled` if the discovery
    /// phase is already running.
    pub fn enable_discovery(&self) -> Result<(), DiscoveryError> {
        let mut slot = self.discovery.lock();
        if slot.is_some() {
            return Err(DiscoveryError::DiscoveryAlreadyEnabled);
        }
        *slot = Some(self.spawn("discovery", self.info.discovery_data()));
        tracing::info!("discovery enabled");
        Ok(())
    }

    /// Withdraws the discovery data and waits until it is gone. The
    /// registration data stays published. Does nothing when discovery is
    /// not enabled.
    pub async fn disable_discovery(&self) {
        let Some(phase) = self.discovery.lock().take() else {
            return;
        };
        phase.stop("discovery").await;
        tracing::info!("discovery disabled");
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registration.lock().is_some()
    }

    #[must_use]
    pub fn is_discovery_enabled(&self) -> bool {
        self.discovery.lock().is_some()
    }

    fn spawn(&self, name: &'static str, kvs: Vec<Kv>) -> Phase {
        let cancel = self.root.child_token();
        if kvs.is_empty() {
            tracing::debug!(phase = name, "nothing to publish");
            return Phase { cancel, handle: None };
        }

        let provider = Arc::clone(&self.provider);
        let token = cancel.clone();
        let handle = tokio::spawn(
            async move {
                if let Err(e) = provider.register_values(token, kvs).await {
                    tracing::error!(phase = name, error = %e, "registration error");
                }
            }
            .in_current_span(),
        );
        Phase {
            cancel,
            handle: Some(handle),
        }
    }
}

impl Drop for Registrator {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl std::fmt::Debug for Registrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registrator")
            .field("registered", &self.is_registered())
            .field("discovery_enabled", &self.is_discovery_enabled())
            .finish_non_exhaustive()
    }
}
