//! The certificate manager: caching and renewal policy around a supplier.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;
use tokio::sync::Mutex;
use tokio_rustls::rustls::sign::CertifiedKey;
use tracing::{debug, info};

use super::error::CertificateResult;
use super::store::{Store, StoreKey};
use super::supplier::{CertificateProvider, Supplier};

/// Wraps a [`Supplier`] with a persistent store and a renewal policy.
///
/// Each request is resolved against the store first: a certificate that
/// is valid for at least `min_cert_validity` and whose staple is fresh
/// for at least `min_ocsp_validity` is served as-is. A valid certificate
/// with a stale staple gets a staple refresh only; anything else is
/// reissued. All transitions are serialised through a single mutex:
/// renewal is not latency-sensitive, and this keeps store updates
/// sequential per key.
pub struct CertificateManager {
    supplier: Arc<dyn Supplier>,
    store: Arc<Store>,
    min_cert_validity: TimeDelta,
    min_ocsp_validity: TimeDelta,

    /// Certified keys currently being served, by store key. Guarantees
    /// that repeated requests for an unchanged certificate hand back the
    /// same object, so in-flight handshakes and installed routes share it.
    serving: Mutex<HashMap<StoreKey, Arc<CertifiedKey>>>,
}

impl CertificateManager {
    /// Create a manager around the given supplier and store.
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        supplier: Arc<dyn Supplier>,
        min_cert_validity: TimeDelta,
        min_ocsp_validity: TimeDelta,
    ) -> Self {
        Self {
            supplier,
            store,
            min_cert_validity,
            min_ocsp_validity,
            serving: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CertificateProvider for CertificateManager {
    async fn get_certificate(
        &self,
        _preferred_supplier: &str,
        subject: &str,
        alt_names: &[String],
    ) -> CertificateResult<Arc<CertifiedKey>> {
        let key = StoreKey::new(self.supplier.name(), subject, alt_names);
        let mut serving = self.serving.lock().await;

        if let Some(mut cached) = self.store.get(&key) {
            if cached.valid_for(self.min_cert_validity) {
                if cached.staple_valid_for(self.min_ocsp_validity) {
                    if let Some(existing) = serving.get(&key) {
                        return Ok(Arc::clone(existing));
                    }
                    let built = Arc::new(cached.certified_key()?);
                    serving.insert(key, Arc::clone(&built));
                    return Ok(built);
                }

                debug!(
                    supplier = self.supplier.name(),
                    subject, "OCSP staple below minimum validity, refreshing"
                );
                let staple = self.supplier.refresh_staple(&cached).await?;
                let changed = staple.response != cached.ocsp_staple;
                cached.ocsp_staple = staple.response;
                cached.ocsp_next_update = staple.next_update;
                self.store.put(cached.clone())?;

                if !changed {
                    if let Some(existing) = serving.get(&key) {
                        return Ok(Arc::clone(existing));
                    }
                }
                let built = Arc::new(cached.certified_key()?);
                serving.insert(key, Arc::clone(&built));
                return Ok(built);
            }

            debug!(
                supplier = self.supplier.name(),
                subject,
                not_after = %cached.not_after,
                "Certificate below minimum validity, reissuing"
            );
        }

        info!(
            supplier = self.supplier.name(),
            subject, "Obtaining certificate"
        );
        let issued = self.supplier.issue(subject, alt_names).await?;
        self.store.put(issued.clone())?;

        let built = Arc::new(issued.certified_key()?);
        serving.insert(key, Arc::clone(&built));
        Ok(built)
    }
}

impl std::fmt::Debug for CertificateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateManager")
            .field("supplier", &self.supplier.name())
            .field("min_cert_validity", &self.min_cert_validity)
            .field("min_ocsp_validity", &self.min_ocsp_validity)
            .finish()
    }
}
