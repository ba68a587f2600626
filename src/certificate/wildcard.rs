//! Wildcard certificate resolution.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_rustls::rustls::sign::CertifiedKey;
use tracing::debug;

use super::error::CertificateResult;
use super::supplier::CertificateProvider;

/// Rewrites certificate requests to reuse wildcard certificates.
///
/// Configured with a list of base names: with `example.com` as a base,
/// a request for `www.example.com` becomes a request for
/// `*.example.com`, so one wildcard certificate serves every single-label
/// subdomain instead of one certificate each. Deeper subdomains and the
/// base name itself are left alone.
///
/// Decorates any [`CertificateProvider`]; requests it does not touch are
/// passed through unchanged.
pub struct WildcardResolver {
    inner: Arc<dyn CertificateProvider>,
    bases: Vec<String>,
}

impl WildcardResolver {
    /// Wrap a provider with the given wildcard base names.
    ///
    /// Empty entries are discarded; bases are matched case-insensitively
    /// against the (already lowercased) requested names.
    #[must_use]
    pub fn new(inner: Arc<dyn CertificateProvider>, bases: Vec<String>) -> Self {
        Self {
            inner,
            bases: bases
                .into_iter()
                .filter(|base| !base.is_empty())
                .map(|base| base.to_ascii_lowercase())
                .collect(),
        }
    }

    /// Rewrite a single name if it is a direct subdomain of a base.
    fn rewrite(&self, name: &str) -> Option<String> {
        let (label, parent) = name.split_once('.')?;
        if label.is_empty() || !self.bases.iter().any(|base| base == parent) {
            return None;
        }
        Some(format!("*.{parent}"))
    }
}

#[async_trait]
impl CertificateProvider for WildcardResolver {
    async fn get_certificate(
        &self,
        preferred_supplier: &str,
        subject: &str,
        alt_names: &[String],
    ) -> CertificateResult<Arc<CertifiedKey>> {
        let mut names: Vec<String> = std::iter::once(subject.to_string())
            .chain(alt_names.iter().cloned())
            .collect();

        let mut rewritten = false;
        for name in &mut names {
            if let Some(wildcard) = self.rewrite(name) {
                debug!(name = %name, wildcard = %wildcard, "Using wildcard certificate");
                *name = wildcard;
                rewritten = true;
            }
        }

        if !rewritten {
            return self
                .inner
                .get_certificate(preferred_supplier, subject, alt_names)
                .await;
        }

        // Sort so the supplier key stays stable however the config file
        // orders the domains; the first name becomes the subject.
        names.sort();
        names.dedup();
        self.inner
            .get_certificate(preferred_supplier, &names[0], &names[1..])
            .await
    }
}

impl std::fmt::Debug for WildcardResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WildcardResolver")
            .field("bases", &self.bases)
            .finish()
    }
}
