// Client-owned cache of the TLS configuration derived from a TrustStore.
//
// Reads after the first build are a lock-free `ArcSwapOption` load. Store
// mutation and cache rebuild/reset are serialised by the store mutex, so a
// configuration is never built from a half-updated store.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;
use rustls::ClientConfig;
use rustls_pki_types::CertificateDer;
use tracing::debug;

use super::{TrustDecision, TrustStore};
use crate::error::Error;
use crate::profile::DeviceProfile;

/// Trust store plus its lazily built, explicitly invalidated TLS config.
#[derive(Debug)]
pub struct TrustCache {
    store: Mutex<TrustStore>,
    config: ArcSwapOption<ClientConfig>,
}

impl TrustCache {
    pub fn new(store: TrustStore) -> Self {
        Self {
            store: Mutex::new(store),
            config: ArcSwapOption::empty(),
        }
    }

    /// Cache seeded from a device profile's certificate and policy.
    pub fn for_profile(profile: &DeviceProfile) -> Result<Self, Error> {
        Ok(Self::new(TrustStore::for_profile(profile)?))
    }

    /// The TLS client config, building it on first use.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>, Error> {
        if let Some(config) = self.config.load_full() {
            return Ok(config);
        }

        let store = self.store.lock().expect("trust store lock poisoned");
        // Another caller may have built it while we waited for the lock.
        if let Some(config) = self.config.load_full() {
            return Ok(config);
        }
        let config = Arc::new(store.client_config()?);
        self.config.store(Some(Arc::clone(&config)));
        debug!("TLS client configuration built");
        Ok(config)
    }

    /// Trust one more PEM certificate and drop the cached config.
    pub fn add_certificate(&self, pem: &str) -> Result<(), Error> {
        let mut store = self.store.lock().expect("trust store lock poisoned");
        store.add_certificate(pem)?;
        self.config.store(None);
        Ok(())
    }

    /// Force the next exchange to rebuild its TLS configuration.
    pub fn invalidate(&self) {
        let _store = self.store.lock().expect("trust store lock poisoned");
        self.config.store(None);
        debug!("TLS client configuration invalidated");
    }

    /// Whether a configuration is currently cached.
    pub fn is_cached(&self) -> bool {
        self.config.load().is_some()
    }

    pub fn evaluate(&self, chain: &[CertificateDer<'_>]) -> TrustDecision {
        self.store
            .lock()
            .expect("trust store lock poisoned")
            .evaluate(chain)
    }

    pub fn allow_untrusted(&self) -> bool {
        self.store
            .lock()
            .expect("trust store lock poisoned")
            .allow_untrusted()
    }
}
