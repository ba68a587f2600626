//! Route records binding domains to upstreams.

use std::sync::Arc;

use tokio_rustls::rustls::sign::CertifiedKey;

/// Operation applied to a response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderOp {
    /// Append the header, keeping any existing values.
    Add,
    /// Replace the header value, only if the header is already present.
    Replace,
    /// Set the header value, only if the header is not already present.
    Default,
    /// Remove the header entirely.
    Delete,
}

impl HeaderOp {
    /// Parse an operation name, case-insensitively.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "add" => Some(Self::Add),
            "replace" => Some(Self::Replace),
            "default" => Some(Self::Default),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Whether this operation carries a value.
    #[must_use]
    pub fn takes_value(self) -> bool {
        !matches!(self, Self::Delete)
    }
}

/// A single header rewriting rule attached to a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRule {
    /// The operation to perform.
    pub operation: HeaderOp,
    /// Header name, preserved verbatim from the config file.
    pub name: String,
    /// Header value; empty for [`HeaderOp::Delete`].
    pub value: String,
}

/// A binding from one or more DNS names to an upstream origin.
///
/// The first entry in `domains` is the certificate subject; the rest are
/// alternative names. Routes are immutable once installed in the
/// [`Manager`](super::Manager); renewal builds replacement records.
#[derive(Clone)]
pub struct Route {
    /// Domains served by this route, in declaration order.
    pub domains: Vec<String>,

    /// The origin server, as a host:port string.
    pub upstream: Option<String>,

    /// Preferred certificate provider name, if any.
    pub provider: Option<String>,

    /// Header rewriting rules, in declaration order.
    pub headers: Vec<HeaderRule>,

    /// Certificate serving this route's domains. Attached by the manager;
    /// absent when no certificate provider is configured.
    pub certificate: Option<Arc<CertifiedKey>>,
}

impl Route {
    /// Create a route serving the given domains.
    #[must_use]
    pub fn new(domains: Vec<String>) -> Self {
        Self {
            domains,
            upstream: None,
            provider: None,
            headers: Vec::new(),
            certificate: None,
        }
    }

    /// The certificate subject: the first declared domain.
    #[must_use]
    pub fn subject(&self) -> &str {
        self.domains.first().map(String::as_str).unwrap_or("")
    }

    /// The alternative names: every declared domain after the first.
    #[must_use]
    pub fn alt_names(&self) -> &[String] {
        if self.domains.is_empty() {
            &[]
        } else {
            &self.domains[1..]
        }
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("domains", &self.domains)
            .field("upstream", &self.upstream)
            .field("provider", &self.provider)
            .field("headers", &self.headers)
            .field("certificate", &self.certificate.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_op_parse() {
        assert_eq!(HeaderOp::parse("add"), Some(HeaderOp::Add));
        assert_eq!(HeaderOp::parse("RePlAcE"), Some(HeaderOp::Replace));
        assert_eq!(HeaderOp::parse("DEFAULT"), Some(HeaderOp::Default));
        assert_eq!(HeaderOp::parse("delete"), Some(HeaderOp::Delete));
        assert_eq!(HeaderOp::parse("remove"), None);
    }

    #[test]
    fn test_header_op_takes_value() {
        assert!(HeaderOp::Add.takes_value());
        assert!(HeaderOp::Replace.takes_value());
        assert!(HeaderOp::Default.takes_value());
        assert!(!HeaderOp::Delete.takes_value());
    }

    #[test]
    fn test_route_subject_and_alt_names() {
        let route = Route::new(vec![
            "example.com".to_string(),
            "www.example.com".to_string(),
            "api.example.com".to_string(),
        ]);
        assert_eq!(route.subject(), "example.com");
        assert_eq!(route.alt_names(), &["www.example.com", "api.example.com"]);
    }

    #[test]
    fn test_route_without_domains() {
        let route = Route::new(Vec::new());
        assert_eq!(route.subject(), "");
        assert!(route.alt_names().is_empty());
    }
}
