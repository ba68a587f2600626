//! The route/certificate manager.
//!
//! Owns the installed route table, resolves domains to routes for the
//! request path, and drives certificate acquisition through the configured
//! providers. The table is swapped atomically: readers hold cheap shared
//! locks and may keep route handles past release, while `set_routes` and
//! `check_certificates` build complete replacement tables before taking
//! the exclusive lock. Provider calls (which may perform ACME exchanges)
//! always happen outside the lock, so TLS handshakes never wait on
//! certificate issuance.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use regex::Regex;
use tokio_rustls::rustls::sign::CertifiedKey;
use tracing::{debug, info};

use crate::certificate::CertificateProvider;

use super::error::{ProxyError, ProxyResult};
use super::route::Route;

/// DNS name syntax: 1-63 character labels of alphanumerics and hyphens,
/// with no leading or trailing hyphen. Applied after lowercasing.
static DOMAIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?(\.[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)*$")
        .expect("domain pattern must compile")
});

/// Maximum total length of a DNS name.
const MAX_DOMAIN_LENGTH: usize = 253;

/// An installed route table: routes in declaration order plus an index
/// from every served name to its route.
#[derive(Default)]
struct RouteTable {
    routes: Vec<Arc<Route>>,
    by_domain: HashMap<String, usize>,
}

/// The route/certificate manager.
///
/// One instance serves the whole process, but the type carries no global
/// state: tests instantiate as many as they need.
pub struct Manager {
    /// Certificate providers by name.
    providers: HashMap<String, Arc<dyn CertificateProvider>>,

    /// Provider used by routes that do not name one.
    default_provider: String,

    /// Current table, swapped wholesale on reload and renewal.
    table: RwLock<Arc<RouteTable>>,
}

impl Manager {
    /// Create a manager with the given certificate providers.
    ///
    /// `default_provider` names the provider used by routes without an
    /// explicit `provider` directive. Routes naming a provider that does
    /// not exist (and routes without one when the default is absent) are
    /// installed without a certificate.
    #[must_use]
    pub fn new(
        providers: HashMap<String, Arc<dyn CertificateProvider>>,
        default_provider: impl Into<String>,
    ) -> Self {
        Self {
            providers,
            default_provider: default_provider.into(),
            table: RwLock::new(Arc::new(RouteTable::default())),
        }
    }

    /// Install a new route table, replacing the current one atomically.
    ///
    /// Domains are lowercased and validated, duplicates across the whole
    /// set are rejected, and a certificate is obtained for every route
    /// whose provider is configured. On any error the previous table is
    /// left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if a domain fails the DNS syntax check, a domain
    /// is served by two routes, or a certificate provider fails.
    pub async fn set_routes(&self, routes: Vec<Route>) -> ProxyResult<()> {
        let mut prepared = Vec::with_capacity(routes.len());
        for mut route in routes {
            if route.domains.is_empty() {
                return Err(ProxyError::InvalidDomain {
                    domain: String::new(),
                });
            }
            for domain in &mut route.domains {
                *domain = domain.to_ascii_lowercase();
                if !is_valid_domain(domain) {
                    return Err(ProxyError::InvalidDomain {
                        domain: domain.clone(),
                    });
                }
            }
            prepared.push(route);
        }

        let mut by_domain = HashMap::new();
        for (index, route) in prepared.iter().enumerate() {
            for domain in &route.domains {
                if by_domain.insert(domain.clone(), index).is_some() {
                    return Err(ProxyError::DuplicateDomain {
                        domain: domain.clone(),
                    });
                }
            }
        }

        // Obtain certificates against the candidate routes, before taking
        // any lock: handshakes keep being served from the old table while
        // providers work.
        for route in &mut prepared {
            if let Some(certificate) = self.obtain_certificate(route).await? {
                route.certificate = Some(certificate);
            }
        }

        let table = Arc::new(RouteTable {
            by_domain,
            routes: prepared.into_iter().map(Arc::new).collect(),
        });

        let count = table.routes.len();
        *self
            .table
            .write()
            .unwrap_or_else(PoisonError::into_inner) = table;
        info!(routes = count, "Installed route table");

        Ok(())
    }

    /// Look up the route serving `domain`, case-insensitively.
    ///
    /// Exact match only: wildcard handling lives entirely in the
    /// certificate path, never in the lookup path.
    #[must_use]
    pub fn route_for_domain(&self, domain: &str) -> Option<Arc<Route>> {
        let domain = domain.to_ascii_lowercase();
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table
            .by_domain
            .get(&domain)
            .map(|&index| Arc::clone(&table.routes[index]))
    }

    /// Resolve the certificate to serve for a TLS client hello.
    ///
    /// A server name with no route yields `Ok(None)`; the TLS stack
    /// closes the handshake with `unrecognized_name`, which is not an
    /// error condition here. A route with no attached certificate is a
    /// misconfiguration and yields [`ProxyError::NoCertificate`].
    pub fn certificate_for_client(
        &self,
        server_name: &str,
    ) -> ProxyResult<Option<Arc<CertifiedKey>>> {
        let Some(route) = self.route_for_domain(server_name) else {
            return Ok(None);
        };

        match &route.certificate {
            Some(certificate) => Ok(Some(Arc::clone(certificate))),
            None => Err(ProxyError::NoCertificate {
                domain: server_name.to_ascii_lowercase(),
            }),
        }
    }

    /// Re-check every route's certificate against its provider.
    ///
    /// The provider decides whether anything is actually reissued; routes
    /// receive whatever it returns. The pass is all-or-nothing: on any
    /// provider error the current table is left untouched and the caller
    /// is expected to retry at the next tick.
    ///
    /// # Errors
    ///
    /// Returns an error if any provider fails.
    pub async fn check_certificates(&self) -> ProxyResult<()> {
        let current = Arc::clone(&self.table.read().unwrap_or_else(PoisonError::into_inner));

        let mut renewed = Vec::with_capacity(current.routes.len());
        for route in &current.routes {
            let mut replacement = Route::clone(route);
            if let Some(certificate) = self.obtain_certificate(&replacement).await? {
                replacement.certificate = Some(certificate);
            }
            renewed.push(Arc::new(replacement));
        }

        let table = Arc::new(RouteTable {
            routes: renewed,
            by_domain: current.by_domain.clone(),
        });
        *self
            .table
            .write()
            .unwrap_or_else(PoisonError::into_inner) = table;
        debug!("Certificate check complete");

        Ok(())
    }

    /// Ask the route's provider for a certificate, if one is configured.
    ///
    /// The route's own provider name is passed through as the preferred
    /// supplier even when the default provider is doing the work.
    async fn obtain_certificate(
        &self,
        route: &Route,
    ) -> ProxyResult<Option<Arc<CertifiedKey>>> {
        let preferred = route.provider.clone().unwrap_or_default();
        let name = if preferred.is_empty() {
            self.default_provider.as_str()
        } else {
            preferred.as_str()
        };

        let Some(provider) = self.providers.get(name) else {
            debug!(
                provider = name,
                subject = route.subject(),
                "No such certificate provider, leaving route uncertified"
            );
            return Ok(None);
        };

        let subject = route.subject().to_string();
        let alt_names = route.alt_names().to_vec();
        let certificate = provider
            .get_certificate(&preferred, &subject, &alt_names)
            .await
            .map_err(|source| ProxyError::Supplier {
                subject: subject.clone(),
                source,
            })?;

        Ok(Some(certificate))
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Manager")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("default_provider", &self.default_provider)
            .field("routes", &table.routes.len())
            .finish()
    }
}

/// Check a lowercased name against DNS syntax rules.
fn is_valid_domain(domain: &str) -> bool {
    domain.len() <= MAX_DOMAIN_LENGTH && DOMAIN_PATTERN.is_match(domain)
}
