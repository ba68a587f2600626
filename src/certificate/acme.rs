//! ACME DNS-01 certificate supplier.
//!
//! Obtains certificates from an ACME directory (Let's Encrypt by default)
//! using DNS-01 challenges, so certificates can be issued for hosts that
//! are not reachable from the CA, including wildcards. Challenge TXT
//! records are published through a [`DnsProvider`]; the account key is
//! created on first use and persisted to the user-data path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use instant_acme::{
    Account, AuthorizationStatus, ChallengeType, Identifier, NewAccount, NewOrder, Order,
    OrderStatus,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::dns::{normalize_domain, DnsProvider, ACME_CHALLENGE_RECORD};
use super::error::{CertificateError, CertificateResult};
use super::store::Certificate;
use super::supplier::{OcspStaple, Supplier};

/// How long to wait for an order to become ready after validation.
const ORDER_TIMEOUT: Duration = Duration::from_secs(120);

/// How long to wait for the certificate after finalization.
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for the ACME supplier.
#[derive(Clone)]
pub struct AcmeSupplierConfig {
    /// ACME directory URL.
    pub directory_url: String,

    /// Contact email registered with the account, if any.
    pub email: Option<String>,

    /// Where account credentials are persisted.
    pub credentials_path: PathBuf,

    /// DNS provider used to publish challenge records.
    pub dns_provider: Arc<dyn DnsProvider>,

    /// Time to allow challenge records to propagate before validation.
    pub propagation_delay: Duration,
}

/// A TXT record published for a pending challenge, kept for cleanup.
struct PublishedChallenge {
    domain: String,
    url: String,
    record_id: String,
}

/// Issues certificates via ACME DNS-01.
pub struct AcmeSupplier {
    config: AcmeSupplierConfig,
    account: RwLock<Option<Account>>,
}

impl AcmeSupplier {
    /// Create a supplier with the given configuration.
    #[must_use]
    pub fn new(config: AcmeSupplierConfig) -> Self {
        Self {
            config,
            account: RwLock::new(None),
        }
    }

    /// Load or create the ACME account.
    ///
    /// Credentials persisted by an earlier run are reused; otherwise a
    /// new account is registered and its credentials written out.
    async fn ensure_account(&self) -> CertificateResult<()> {
        if self.account.read().await.is_some() {
            return Ok(());
        }

        let mut guard = self.account.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let path = &self.config.credentials_path;
        if path.exists() {
            info!(path = %path.display(), "Loading ACME account credentials");
            let content = std::fs::read_to_string(path).map_err(|e| {
                CertificateError::Account(format!("failed to read credentials: {e}"))
            })?;
            let credentials: instant_acme::AccountCredentials = serde_json::from_str(&content)
                .map_err(|e| {
                    CertificateError::Account(format!("failed to parse credentials: {e}"))
                })?;

            let account = Account::builder()
                .map_err(|e| CertificateError::Account(e.to_string()))?
                .from_credentials(credentials)
                .await
                .map_err(|e| CertificateError::Account(e.to_string()))?;

            *guard = Some(account);
            return Ok(());
        }

        info!(
            directory = %self.config.directory_url,
            "Creating new ACME account"
        );

        let contact: Vec<String> = self
            .config
            .email
            .iter()
            .map(|email| format!("mailto:{email}"))
            .collect();
        let contact_refs: Vec<&str> = contact.iter().map(String::as_str).collect();

        let (account, credentials) = Account::builder()
            .map_err(|e| CertificateError::Account(e.to_string()))?
            .create(
                &NewAccount {
                    contact: &contact_refs,
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                self.config.directory_url.clone(),
                None,
            )
            .await
            .map_err(|e| CertificateError::Account(e.to_string()))?;

        let serialized = serde_json::to_string_pretty(&credentials)
            .map_err(|e| CertificateError::Account(format!("failed to serialize: {e}")))?;
        std::fs::write(path, serialized).map_err(|e| {
            CertificateError::Account(format!("failed to persist credentials: {e}"))
        })?;

        *guard = Some(account);
        Ok(())
    }

    /// Publish a TXT record for every pending authorization.
    async fn publish_challenges(
        &self,
        order: &mut Order,
        published: &mut Vec<PublishedChallenge>,
    ) -> CertificateResult<()> {
        let mut authorizations = order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result
                .map_err(|e| CertificateError::Issuance(format!("authorization: {e}")))?;

            let identifier = authz.identifier();
            let domain = match &identifier.identifier {
                Identifier::Dns(domain) => domain.clone(),
                _ => continue,
            };

            if authz.status == AuthorizationStatus::Valid {
                debug!(domain = %domain, "Authorization already valid");
                continue;
            }

            let challenge = authz
                .challenge(ChallengeType::Dns01)
                .ok_or_else(|| {
                    CertificateError::Issuance(format!(
                        "no DNS-01 challenge offered for {domain}"
                    ))
                })?;

            let value = challenge.key_authorization().dns_value();
            let url = challenge.url.clone();

            let record_id = self
                .config
                .dns_provider
                .create_txt_record(normalize_domain(&domain), ACME_CHALLENGE_RECORD, &value)
                .await?;

            debug!(domain = %domain, record_id = %record_id, "Published challenge record");
            published.push(PublishedChallenge {
                domain,
                url,
                record_id,
            });
        }

        Ok(())
    }

    /// Tell the CA a challenge is ready, locating it by URL.
    async fn set_challenge_ready(
        order: &mut Order,
        challenge_url: &str,
    ) -> CertificateResult<()> {
        let mut authorizations = order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result
                .map_err(|e| CertificateError::Issuance(format!("authorization: {e}")))?;

            let matching_type = authz
                .challenges
                .iter()
                .find(|challenge| challenge.url == challenge_url)
                .map(|challenge| challenge.r#type.clone());

            if let Some(challenge_type) = matching_type {
                if let Some(mut challenge) = authz.challenge(challenge_type) {
                    challenge
                        .set_ready()
                        .await
                        .map_err(|e| CertificateError::Issuance(format!("set ready: {e}")))?;
                    return Ok(());
                }
            }
        }

        Err(CertificateError::Issuance(format!(
            "challenge not found for URL {challenge_url}"
        )))
    }

    /// Poll the order until every challenge has been validated.
    async fn wait_for_order_ready(order: &mut Order) -> CertificateResult<()> {
        let deadline = tokio::time::Instant::now() + ORDER_TIMEOUT;
        loop {
            let state = order
                .refresh()
                .await
                .map_err(|e| CertificateError::Issuance(format!("order refresh: {e}")))?;

            match state.status {
                OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
                OrderStatus::Invalid => {
                    return Err(CertificateError::Issuance(
                        "order became invalid during validation".to_string(),
                    ));
                }
                OrderStatus::Pending | OrderStatus::Processing => {
                    if tokio::time::Instant::now() > deadline {
                        return Err(CertificateError::Issuance(
                            "timed out waiting for order to become ready".to_string(),
                        ));
                    }
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    }

    /// Validate challenges, finalize the order and download the chain.
    ///
    /// Returns the certificate chain PEM, the private key PEM and the
    /// certificate expiry.
    async fn validate_and_finalize(
        &self,
        order: &mut Order,
        published: &[PublishedChallenge],
        names: &[String],
    ) -> CertificateResult<(String, String, DateTime<Utc>)> {
        if !published.is_empty() {
            debug!(
                records = published.len(),
                delay = ?self.config.propagation_delay,
                "Waiting for DNS propagation"
            );
            tokio::time::sleep(self.config.propagation_delay).await;

            for challenge in published {
                Self::set_challenge_ready(order, &challenge.url).await?;
            }
        }

        Self::wait_for_order_ready(order).await?;

        // CSR over all requested names.
        let key = rcgen::KeyPair::generate()
            .map_err(|e| CertificateError::InvalidMaterial(e.to_string()))?;
        let params = rcgen::CertificateParams::new(names.to_vec())
            .map_err(|e| CertificateError::Issuance(format!("CSR params: {e}")))?;
        let csr = params
            .serialize_request(&key)
            .map_err(|e| CertificateError::Issuance(format!("CSR: {e}")))?
            .der()
            .to_vec();

        order
            .finalize_csr(&csr)
            .await
            .map_err(|e| CertificateError::Issuance(format!("finalize: {e}")))?;

        let deadline = tokio::time::Instant::now() + FINALIZE_TIMEOUT;
        let chain_pem = loop {
            let state = order
                .refresh()
                .await
                .map_err(|e| CertificateError::Issuance(format!("order refresh: {e}")))?;

            match state.status {
                OrderStatus::Valid => {
                    let chain = order
                        .certificate()
                        .await
                        .map_err(|e| {
                            CertificateError::Issuance(format!("download certificate: {e}"))
                        })?;
                    break chain.ok_or_else(|| {
                        CertificateError::Issuance("no certificate in response".to_string())
                    })?;
                }
                OrderStatus::Invalid => {
                    return Err(CertificateError::Issuance(
                        "order became invalid during finalization".to_string(),
                    ));
                }
                _ => {
                    if tokio::time::Instant::now() > deadline {
                        return Err(CertificateError::Issuance(
                            "timed out waiting for certificate".to_string(),
                        ));
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        };

        let not_after = parse_certificate_expiry(&chain_pem)?;
        Ok((chain_pem, key.serialize_pem(), not_after))
    }

    /// Remove the challenge records we created, best-effort.
    async fn cleanup_records(&self, published: &[PublishedChallenge]) {
        for challenge in published {
            if let Err(e) = self
                .config
                .dns_provider
                .delete_txt_record(normalize_domain(&challenge.domain), &challenge.record_id)
                .await
            {
                warn!(
                    domain = %challenge.domain,
                    record_id = %challenge.record_id,
                    error = %e,
                    "Failed to clean up challenge record"
                );
            }
        }
    }
}

#[async_trait]
impl Supplier for AcmeSupplier {
    fn name(&self) -> &'static str {
        "acme"
    }

    async fn issue(
        &self,
        subject: &str,
        alt_names: &[String],
    ) -> CertificateResult<Certificate> {
        self.ensure_account().await?;

        let names: Vec<String> = std::iter::once(subject.to_string())
            .chain(alt_names.iter().cloned())
            .collect();
        let identifiers: Vec<Identifier> = names
            .iter()
            .map(|domain| Identifier::Dns(domain.clone()))
            .collect();

        info!(subject, alt_names = ?alt_names, "Ordering ACME certificate");

        let mut order = {
            let guard = self.account.read().await;
            let account = guard.as_ref().ok_or_else(|| {
                CertificateError::Account("ACME account unavailable".to_string())
            })?;
            account
                .new_order(&NewOrder::new(&identifiers))
                .await
                .map_err(|e| CertificateError::Issuance(format!("new order: {e}")))?
        };

        let mut published = Vec::new();
        let result = match self.publish_challenges(&mut order, &mut published).await {
            Ok(()) => {
                self.validate_and_finalize(&mut order, &published, &names)
                    .await
            }
            Err(e) => Err(e),
        };
        self.cleanup_records(&published).await;
        let (certificate_pem, private_key_pem, not_after) = result?;

        info!(subject, expires = %not_after, "ACME certificate issued");

        Ok(Certificate {
            supplier: self.name().to_string(),
            subject: subject.to_string(),
            alt_names: alt_names.to_vec(),
            not_after,
            // Public CAs no longer operate OCSP responders, so there is
            // no staple window to track; renewal is driven by notAfter.
            ocsp_next_update: not_after,
            certificate_pem,
            private_key_pem,
            ocsp_staple: Vec::new(),
        })
    }

    async fn refresh_staple(
        &self,
        certificate: &Certificate,
    ) -> CertificateResult<OcspStaple> {
        Ok(OcspStaple {
            response: certificate.ocsp_staple.clone(),
            next_update: certificate.not_after,
        })
    }
}

impl std::fmt::Debug for AcmeSupplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeSupplier")
            .field("directory_url", &self.config.directory_url)
            .field("dns_provider", &self.config.dns_provider.name())
            .finish()
    }
}

/// Extract the expiry date from a PEM certificate chain.
fn parse_certificate_expiry(chain_pem: &str) -> CertificateResult<DateTime<Utc>> {
    use x509_parser::prelude::*;

    let (_, pem) = x509_parser::pem::parse_x509_pem(chain_pem.as_bytes())
        .map_err(|e| CertificateError::InvalidMaterial(format!("PEM: {e}")))?;
    let (_, cert) = X509Certificate::from_der(&pem.contents)
        .map_err(|e| CertificateError::InvalidMaterial(format!("certificate: {e}")))?;

    let timestamp = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(timestamp, 0).ok_or_else(|| {
        CertificateError::InvalidMaterial("certificate expiry out of range".to_string())
    })
}
