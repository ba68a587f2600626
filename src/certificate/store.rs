//! Cached certificates and the persistent store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio_rustls::rustls::crypto::aws_lc_rs::sign::any_supported_type;
use tokio_rustls::rustls::sign::CertifiedKey;
use tracing::debug;

use super::error::{CertificateError, CertificateResult};

/// A certificate held in the store, together with the metadata that
/// drives renewal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    /// Name of the supplier that issued this certificate.
    pub supplier: String,

    /// The certificate subject.
    pub subject: String,

    /// Alternative names, in the order they were requested.
    pub alt_names: Vec<String>,

    /// Certificate expiry.
    pub not_after: DateTime<Utc>,

    /// When the attached OCSP staple stops being fresh.
    pub ocsp_next_update: DateTime<Utc>,

    /// Leaf certificate and chain, PEM encoded.
    pub certificate_pem: String,

    /// Private key, PEM encoded.
    pub private_key_pem: String,

    /// DER-encoded OCSP response to staple, if any.
    #[serde(default)]
    pub ocsp_staple: Vec<u8>,
}

impl Certificate {
    /// The store key identifying this certificate.
    #[must_use]
    pub fn key(&self) -> StoreKey {
        StoreKey::new(&self.supplier, &self.subject, &self.alt_names)
    }

    /// Whether the certificate is valid for at least `margin` more.
    #[must_use]
    pub fn valid_for(&self, margin: TimeDelta) -> bool {
        self.not_after - Utc::now() >= margin
    }

    /// Whether the OCSP staple is fresh for at least `margin` more.
    #[must_use]
    pub fn staple_valid_for(&self, margin: TimeDelta) -> bool {
        self.ocsp_next_update - Utc::now() >= margin
    }

    /// Whether this certificate covers every one of the given names,
    /// taking single-label wildcards into account.
    #[must_use]
    pub fn covers(&self, names: &[String]) -> bool {
        names.iter().all(|name| self.covers_name(name))
    }

    fn covers_name(&self, name: &str) -> bool {
        std::iter::once(&self.subject)
            .chain(self.alt_names.iter())
            .any(|covered| {
                if covered == name {
                    return true;
                }
                // *.example.com matches www.example.com but neither
                // example.com nor a.b.example.com.
                if let Some(base) = covered.strip_prefix("*.") {
                    if let Some(label) = name
                        .strip_suffix(base)
                        .and_then(|prefix| prefix.strip_suffix('.'))
                    {
                        return !label.is_empty() && !label.contains('.');
                    }
                }
                false
            })
    }

    /// Build the rustls signing bundle for this certificate, with the
    /// OCSP staple attached.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM material cannot be parsed or the key
    /// type is unsupported.
    pub fn certified_key(&self) -> CertificateResult<CertifiedKey> {
        let chain: Vec<_> = rustls_pemfile::certs(&mut self.certificate_pem.as_bytes())
            .collect::<Result<_, _>>()
            .map_err(|e| {
                CertificateError::InvalidMaterial(format!("certificate chain: {e}"))
            })?;
        if chain.is_empty() {
            return Err(CertificateError::InvalidMaterial(
                "certificate chain is empty".to_string(),
            ));
        }

        let key = rustls_pemfile::private_key(&mut self.private_key_pem.as_bytes())
            .map_err(|e| CertificateError::InvalidMaterial(format!("private key: {e}")))?
            .ok_or_else(|| {
                CertificateError::InvalidMaterial("no private key found".to_string())
            })?;

        let signing_key = any_supported_type(&key)
            .map_err(|e| CertificateError::InvalidMaterial(format!("signing key: {e}")))?;

        let mut certified = CertifiedKey::new(chain, signing_key);
        if !self.ocsp_staple.is_empty() {
            certified.ocsp = Some(self.ocsp_staple.clone());
        }
        Ok(certified)
    }
}

/// Identifies a stored certificate: supplier plus the requested name set.
///
/// Alternative names are kept sorted so the key is stable under domain
/// reordering in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    supplier: String,
    subject: String,
    alt_names: Vec<String>,
}

impl StoreKey {
    /// Build a key, normalising the alternative name order.
    #[must_use]
    pub fn new(supplier: &str, subject: &str, alt_names: &[String]) -> Self {
        let mut alt_names = alt_names.to_vec();
        alt_names.sort();
        alt_names.dedup();
        Self {
            supplier: supplier.to_string(),
            subject: subject.to_string(),
            alt_names,
        }
    }
}

/// Persistent certificate store.
///
/// Certificates live in a single JSON document on disk, loaded at open
/// and rewritten on every change. An in-memory mode backs tests and
/// deployments that prefer re-issuance over persistence.
#[derive(Debug)]
pub struct Store {
    path: Option<PathBuf>,
    entries: Mutex<HashMap<StoreKey, Certificate>>,
}

impl Store {
    /// Open a store backed by the given file, creating it lazily.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn open<P: AsRef<Path>>(path: P) -> CertificateResult<Self> {
        let path = path.as_ref().to_path_buf();

        let mut entries = HashMap::new();
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let stored: Vec<Certificate> = serde_json::from_str(&content)?;
                for certificate in stored {
                    entries.insert(certificate.key(), certificate);
                }
                debug!(path = %path.display(), certificates = entries.len(), "Loaded certificate store");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(CertificateError::StoreRead { path, source }),
        }

        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
        })
    }

    /// Create a store with no backing file.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the certificate stored under `key`, if any.
    #[must_use]
    pub fn get(&self, key: &StoreKey) -> Option<Certificate> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Insert or replace a certificate and persist the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store file cannot be written.
    pub fn put(&self, certificate: Certificate) -> CertificateResult<()> {
        let snapshot: Vec<Certificate> = {
            let mut entries = self
                .entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            entries.insert(certificate.key(), certificate);
            entries.values().cloned().collect()
        };

        if let Some(path) = &self.path {
            let content = serde_json::to_string_pretty(&snapshot)?;
            std::fs::write(path, content).map_err(|source| CertificateError::StoreWrite {
                path: path.clone(),
                source,
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_certificate(supplier: &str, subject: &str, alt_names: &[&str]) -> Certificate {
        Certificate {
            supplier: supplier.to_string(),
            subject: subject.to_string(),
            alt_names: alt_names.iter().map(ToString::to_string).collect(),
            not_after: Utc::now() + TimeDelta::days(90),
            ocsp_next_update: Utc::now() + TimeDelta::days(4),
            certificate_pem: String::new(),
            private_key_pem: String::new(),
            ocsp_staple: Vec::new(),
        }
    }

    #[test]
    fn test_validity_margins() {
        let mut cert = test_certificate("test", "example.com", &[]);
        assert!(cert.valid_for(TimeDelta::days(30)));
        assert!(!cert.valid_for(TimeDelta::days(91)));

        cert.not_after = Utc::now() - TimeDelta::days(1);
        assert!(!cert.valid_for(TimeDelta::zero()));
    }

    #[test]
    fn test_staple_margins() {
        let mut cert = test_certificate("test", "example.com", &[]);
        assert!(cert.staple_valid_for(TimeDelta::days(1)));
        assert!(!cert.staple_valid_for(TimeDelta::days(5)));

        cert.ocsp_next_update = Utc::now();
        assert!(!cert.staple_valid_for(TimeDelta::seconds(1)));
    }

    #[test]
    fn test_covers_exact_names() {
        let cert = test_certificate("test", "example.com", &["www.example.com"]);
        assert!(cert.covers(&["example.com".to_string()]));
        assert!(cert.covers(&[
            "example.com".to_string(),
            "www.example.com".to_string()
        ]));
        assert!(!cert.covers(&["other.com".to_string()]));
    }

    #[test]
    fn test_covers_wildcard_names() {
        let cert = test_certificate("test", "*.example.com", &[]);
        assert!(cert.covers(&["www.example.com".to_string()]));
        assert!(cert.covers(&["api.example.com".to_string()]));
        assert!(!cert.covers(&["example.com".to_string()]));
        assert!(!cert.covers(&["deep.sub.example.com".to_string()]));
    }

    #[test]
    fn test_store_key_normalises_alt_name_order() {
        let forward = StoreKey::new(
            "test",
            "example.com",
            &["a.example.com".to_string(), "b.example.com".to_string()],
        );
        let reversed = StoreKey::new(
            "test",
            "example.com",
            &["b.example.com".to_string(), "a.example.com".to_string()],
        );
        assert_eq!(forward, reversed);
    }

    #[test]
    fn test_store_key_distinguishes_suppliers() {
        let acme = StoreKey::new("acme", "example.com", &[]);
        let selfsigned = StoreKey::new("selfsigned", "example.com", &[]);
        assert_ne!(acme, selfsigned);
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = Store::in_memory();
        let cert = test_certificate("test", "example.com", &["www.example.com"]);
        let key = cert.key();

        assert!(store.get(&key).is_none());
        store.put(cert).unwrap();

        let loaded = store.get(&key).unwrap();
        assert_eq!(loaded.subject, "example.com");
    }

    #[test]
    fn test_file_store_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certs.json");

        let cert = test_certificate("test", "example.com", &[]);
        let key = cert.key();

        let store = Store::open(&path).unwrap();
        store.put(cert).unwrap();

        let reopened = Store::open(&path).unwrap();
        let loaded = reopened.get(&key).unwrap();
        assert_eq!(loaded.subject, "example.com");
        assert_eq!(loaded.supplier, "test");
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certs.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            Store::open(&path),
            Err(CertificateError::StoreFormat(_))
        ));
    }

    #[test]
    fn test_put_replaces_existing_entry() {
        let store = Store::in_memory();
        let mut cert = test_certificate("test", "example.com", &[]);
        store.put(cert.clone()).unwrap();

        cert.ocsp_staple = vec![1, 2, 3];
        store.put(cert.clone()).unwrap();

        let loaded = store.get(&cert.key()).unwrap();
        assert_eq!(loaded.ocsp_staple, vec![1, 2, 3]);
    }
}
