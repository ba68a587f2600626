//! # Centauri
//!
//! A TLS-terminating HTTP reverse proxy whose distinguishing feature is
//! automatic certificate lifecycle management: routes are declared in a
//! small hot-reloadable config file, certificates are obtained on demand
//! via ACME DNS-01 (with a self-signed fallback), and TLS handshakes are
//! answered by SNI lookup against the installed route table.
//!
//! ## Features
//!
//! - Declarative route configuration with live reload on SIGHUP
//! - ACME DNS-01 certificate issuance with pluggable DNS providers
//! - Self-signed certificate fallback for internal deployments
//! - Wildcard certificate reuse across subdomains
//! - Per-route response header rewriting
//!
//! ## Architecture
//!
//! The [`proxy::Manager`] owns the route table and drives certificate
//! acquisition through the [`certificate::CertificateProvider`] chain:
//! a wildcard resolver wrapping a certificate manager wrapping one of
//! the concrete suppliers. The [`frontend`] terminates TLS and proxies
//! requests to upstreams.

pub mod certificate;
pub mod config;
pub mod frontend;
pub mod proxy;
