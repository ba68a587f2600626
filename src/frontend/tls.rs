//! Bridges the route manager into the rustls handshake path.

use std::sync::Arc;

use tokio_rustls::rustls::server::{ClientHello, ResolvesServerCert};
use tokio_rustls::rustls::sign::CertifiedKey;
use tracing::{debug, warn};

use crate::proxy::Manager;

/// Resolves server certificates by SNI against the installed routes.
#[derive(Debug)]
pub struct CertificateResolver {
    manager: Arc<Manager>,
}

impl CertificateResolver {
    /// Create a resolver backed by the given manager.
    #[must_use]
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }
}

impl ResolvesServerCert for CertificateResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let server_name = client_hello.server_name()?;

        match self.manager.certificate_for_client(server_name) {
            Ok(Some(certificate)) => Some(certificate),
            Ok(None) => {
                // Unknown SNI: let the TLS stack answer unrecognized_name.
                debug!(sni = %server_name, "No route for requested server name");
                None
            }
            Err(e) => {
                warn!(sni = %server_name, error = %e, "Cannot serve certificate");
                None
            }
        }
    }
}
