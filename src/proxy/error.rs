//! Proxy manager error types.

use thiserror::Error;

use crate::certificate::CertificateError;

/// Errors raised by the route/certificate manager.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// A route declared a name that is not valid DNS syntax.
    #[error("invalid domain name '{domain}'")]
    InvalidDomain {
        /// The offending name, after lowercasing.
        domain: String,
    },

    /// The same name appears in more than one route.
    #[error("domain '{domain}' is declared by more than one route")]
    DuplicateDomain {
        /// The duplicated name.
        domain: String,
    },

    /// The certificate provider failed while obtaining a certificate.
    #[error("certificate provider failed for '{subject}': {source}")]
    Supplier {
        /// The certificate subject that was being requested.
        subject: String,
        /// Underlying provider error.
        #[source]
        source: CertificateError,
    },

    /// A TLS handshake arrived for a route with no certificate attached.
    ///
    /// This means the route exists but has no certificate provider
    /// configured; it is distinct from an SNI miss, which is silent.
    #[error("no certificate available for '{domain}': route has no provider configured")]
    NoCertificate {
        /// The requested server name.
        domain: String,
    },
}

/// Result type for proxy manager operations.
pub type ProxyResult<T> = Result<T, ProxyError>;
