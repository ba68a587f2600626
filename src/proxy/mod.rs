//! # Route and certificate management
//!
//! The heart of the proxy: a [`Manager`] owning the installed route table.
//! Routes map DNS names to upstream origins; the manager resolves inbound
//! SNI and Host values to routes, obtains certificates for every route
//! through the configured [`CertificateProvider`](crate::certificate::CertificateProvider)
//! chain, and serves those certificates to the TLS accept path.
//!
//! Concurrency model: the table is guarded by a readers-writer lock and
//! replaced wholesale on reload or renewal. Certificate acquisition runs
//! against candidate routes outside the lock, so handshakes are never
//! blocked behind ACME traffic. Installed routes are immutable; readers
//! may hold a route handle past lock release and simply see a consistent,
//! possibly stale, snapshot.

mod error;
mod manager;
mod rewriter;
mod route;

pub use error::{ProxyError, ProxyResult};
pub use manager::Manager;
pub use rewriter::Rewriter;
pub use route::{HeaderOp, HeaderRule, Route};
