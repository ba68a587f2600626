//! # Certificate lifecycle management
//!
//! Everything between "a route needs a certificate for these names" and
//! "here is a signing bundle for the TLS stack":
//!
//! - [`Supplier`] implementations do the actual issuance:
//!   [`AcmeSupplier`] (ACME DNS-01) and [`SelfSignedSupplier`].
//! - [`CertificateManager`] wraps a supplier with the persistent
//!   [`Store`] and the renewal policy, deciding when a cached
//!   certificate is still good, needs a fresh OCSP staple, or must be
//!   reissued.
//! - [`WildcardResolver`] sits in front and rewrites requests so one
//!   wildcard certificate serves a whole family of subdomains.
//!
//! The proxy manager only ever sees the [`CertificateProvider`] trait at
//! the top of that chain.

mod acme;
mod dns;
mod error;
mod manager;
mod selfsigned;
mod store;
mod supplier;
mod wildcard;

pub use acme::{AcmeSupplier, AcmeSupplierConfig};
pub use dns::{
    challenge_record_fqdn, normalize_domain, DnsProvider, DnsProviderError, DnsResult,
    WebhookProvider, ACME_CHALLENGE_RECORD,
};
pub use error::{CertificateError, CertificateResult};
pub use manager::CertificateManager;
pub use selfsigned::SelfSignedSupplier;
pub use store::{Certificate, Store, StoreKey};
pub use supplier::{CertificateProvider, OcspStaple, Supplier};
pub use wildcard::WildcardResolver;
