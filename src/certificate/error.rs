//! Certificate subsystem error types.

use std::path::PathBuf;

use thiserror::Error;

use super::dns::DnsProviderError;

/// Errors raised while obtaining, caching or serving certificates.
#[derive(Debug, Error)]
pub enum CertificateError {
    /// Failed to read the certificate store file.
    #[error("failed to read certificate store '{path}': {source}")]
    StoreRead {
        /// Path to the store file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write the certificate store file.
    #[error("failed to write certificate store '{path}': {source}")]
    StoreWrite {
        /// Path to the store file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The store file is not valid JSON.
    #[error("certificate store is corrupt: {0}")]
    StoreFormat(#[from] serde_json::Error),

    /// Key or certificate material could not be parsed or used.
    #[error("invalid certificate material: {0}")]
    InvalidMaterial(String),

    /// A supplier failed to issue a certificate.
    #[error("certificate issuance failed: {0}")]
    Issuance(String),

    /// ACME account creation or loading failed.
    #[error("ACME account error: {0}")]
    Account(String),

    /// A DNS provider failed during a DNS-01 challenge.
    #[error(transparent)]
    Dns(#[from] DnsProviderError),
}

/// Result type for certificate operations.
pub type CertificateResult<T> = Result<T, CertificateError>;
