//! Self-signed certificate supplier.
//!
//! Issues short-lived self-signed certificates for deployments where a
//! public CA is unavailable or unwanted (internal hostnames, test rigs).
//! There is no OCSP responder for these, so the staple is empty and
//! stamped already-expired: every renewal pass re-checks the certificate
//! instead of trusting a staple window.

use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

use super::error::{CertificateError, CertificateResult};
use super::store::Certificate;
use super::supplier::{OcspStaple, Supplier};

/// How long issued certificates are valid, in days.
const VALIDITY_DAYS: i64 = 30;

/// Issues self-signed certificates on demand.
#[derive(Debug, Default)]
pub struct SelfSignedSupplier;

impl SelfSignedSupplier {
    /// Create a new self-signed supplier.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Supplier for SelfSignedSupplier {
    fn name(&self) -> &'static str {
        "selfsigned"
    }

    async fn issue(
        &self,
        subject: &str,
        alt_names: &[String],
    ) -> CertificateResult<Certificate> {
        let key = KeyPair::generate()
            .map_err(|e| CertificateError::InvalidMaterial(e.to_string()))?;

        let names: Vec<String> = std::iter::once(subject.to_string())
            .chain(alt_names.iter().cloned())
            .collect();

        let not_before = Utc::now();
        let not_after = not_before + TimeDelta::days(VALIDITY_DAYS);

        let mut params = CertificateParams::new(names)
            .map_err(|e| CertificateError::Issuance(e.to_string()))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, subject);
        params.distinguished_name = dn;
        params.not_before = SystemTime::from(not_before).into();
        params.not_after = SystemTime::from(not_after).into();

        let cert = params
            .self_signed(&key)
            .map_err(|e| CertificateError::Issuance(e.to_string()))?;

        Ok(Certificate {
            supplier: self.name().to_string(),
            subject: subject.to_string(),
            alt_names: alt_names.to_vec(),
            not_after,
            // No responder exists, so the staple starts out stale.
            ocsp_next_update: not_before,
            certificate_pem: cert.pem(),
            private_key_pem: key.serialize_pem(),
            ocsp_staple: Vec::new(),
        })
    }

    async fn refresh_staple(
        &self,
        _certificate: &Certificate,
    ) -> CertificateResult<OcspStaple> {
        Ok(OcspStaple {
            response: Vec::new(),
            next_update: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use x509_parser::prelude::{FromDer, GeneralName, ParsedExtension, X509Certificate};

    use super::*;

    #[tokio::test]
    async fn test_issues_certificate_covering_all_names() {
        let supplier = SelfSignedSupplier::new();
        let cert = supplier
            .issue("example.com", &["www.example.com".to_string()])
            .await
            .unwrap();

        assert_eq!(cert.supplier, "selfsigned");
        assert_eq!(cert.subject, "example.com");
        assert_eq!(cert.alt_names, vec!["www.example.com"]);
        assert!(cert.covers(&[
            "example.com".to_string(),
            "www.example.com".to_string()
        ]));

        // The encoded certificate carries both names as SANs.
        let der = rustls_pemfile::certs(&mut cert.certificate_pem.as_bytes())
            .next()
            .unwrap()
            .unwrap();
        let (_, parsed) = X509Certificate::from_der(der.as_ref()).unwrap();
        let sans: Vec<String> = parsed
            .extensions()
            .iter()
            .filter_map(|ext| match ext.parsed_extension() {
                ParsedExtension::SubjectAlternativeName(san) => Some(san),
                _ => None,
            })
            .flat_map(|san| san.general_names.iter())
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some((*dns).to_string()),
                _ => None,
            })
            .collect();
        assert!(sans.contains(&"example.com".to_string()));
        assert!(sans.contains(&"www.example.com".to_string()));
    }

    #[tokio::test]
    async fn test_certificate_validity_window() {
        let supplier = SelfSignedSupplier::new();
        let cert = supplier.issue("example.com", &[]).await.unwrap();

        assert!(cert.valid_for(TimeDelta::days(29)));
        assert!(!cert.valid_for(TimeDelta::days(31)));
    }

    #[tokio::test]
    async fn test_staple_is_immediately_stale() {
        let supplier = SelfSignedSupplier::new();
        let cert = supplier.issue("example.com", &[]).await.unwrap();

        assert!(cert.ocsp_staple.is_empty());
        assert!(!cert.staple_valid_for(TimeDelta::seconds(1)));

        let staple = supplier.refresh_staple(&cert).await.unwrap();
        assert!(staple.response.is_empty());
        assert!(staple.next_update <= Utc::now());
    }

    #[tokio::test]
    async fn test_issued_material_builds_a_certified_key() {
        let supplier = SelfSignedSupplier::new();
        let cert = supplier
            .issue("example.com", &["www.example.com".to_string()])
            .await
            .unwrap();

        let certified = cert.certified_key().unwrap();
        assert_eq!(certified.cert.len(), 1);
        assert!(certified.ocsp.is_none());
    }
}
