//! Supplier traits: how certificates are asked for and produced.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_rustls::rustls::sign::CertifiedKey;

use super::error::CertificateResult;
use super::store::Certificate;

/// A source of certificates for the proxy manager.
///
/// This is the surface the route manager talks to; the concrete chain
/// behind it is the wildcard resolver wrapping a certificate manager
/// wrapping a supplier.
#[async_trait]
pub trait CertificateProvider: Send + Sync {
    /// Obtain a certificate covering `subject` and every name in
    /// `alt_names`.
    ///
    /// `preferred_supplier` is advisory: an implementation aggregating
    /// several backends consults it first but may fall back. Calls are
    /// idempotent while a fresh certificate is not yet required; the
    /// returned certificate is always currently valid under the
    /// implementation's own policy.
    async fn get_certificate(
        &self,
        preferred_supplier: &str,
        subject: &str,
        alt_names: &[String],
    ) -> CertificateResult<Arc<CertifiedKey>>;
}

/// A freshly produced OCSP staple.
#[derive(Debug, Clone)]
pub struct OcspStaple {
    /// DER-encoded OCSP response; empty when the issuer has none.
    pub response: Vec<u8>,

    /// When this staple stops being fresh.
    pub next_update: DateTime<Utc>,
}

/// A concrete certificate issuer wrapped by the certificate manager.
///
/// Suppliers do the slow work: ACME exchanges, key generation, OCSP
/// fetches. The manager decides *when* to call them.
#[async_trait]
pub trait Supplier: Send + Sync {
    /// Stable name of this supplier; part of every store key.
    fn name(&self) -> &'static str;

    /// Issue a certificate covering `subject` and `alt_names`.
    async fn issue(&self, subject: &str, alt_names: &[String])
        -> CertificateResult<Certificate>;

    /// Produce a fresh OCSP staple for a still-valid certificate.
    async fn refresh_staple(&self, certificate: &Certificate)
        -> CertificateResult<OcspStaple>;
}
