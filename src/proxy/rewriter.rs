//! Request and response rewriting.
//!
//! Applies a route's header rules to upstream responses and stamps the
//! standard forwarding headers onto upstream requests.

use std::net::SocketAddr;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use super::route::{HeaderOp, Route};

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Applies per-route header transformations.
#[derive(Debug, Default, Clone)]
pub struct Rewriter;

impl Rewriter {
    /// Create a new rewriter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Prepare a request for forwarding to the upstream.
    ///
    /// Appends the client address to `X-Forwarded-For` and records the
    /// inbound scheme in `X-Forwarded-Proto`.
    pub fn rewrite_request(&self, headers: &mut HeaderMap, peer: SocketAddr, scheme: &str) {
        let client = peer.ip().to_string();
        let forwarded_for = match headers.get(X_FORWARDED_FOR) {
            Some(existing) => match existing.to_str() {
                Ok(existing) => format!("{existing}, {client}"),
                Err(_) => client,
            },
            None => client,
        };

        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(HeaderName::from_static(X_FORWARDED_FOR), value);
        }
        if let Ok(value) = HeaderValue::from_str(scheme) {
            headers.insert(HeaderName::from_static(X_FORWARDED_PROTO), value);
        }
    }

    /// Apply a route's header rules to a response header map.
    ///
    /// Rules run in declaration order. Rules whose name or value cannot
    /// be represented as an HTTP header are skipped with a warning rather
    /// than failing the response.
    pub fn rewrite_response(&self, route: &Route, headers: &mut HeaderMap) {
        for rule in &route.headers {
            let Ok(name) = HeaderName::from_bytes(rule.name.as_bytes()) else {
                warn!(header = %rule.name, "Skipping rule with invalid header name");
                continue;
            };

            if rule.operation == HeaderOp::Delete {
                headers.remove(&name);
                continue;
            }

            let Ok(value) = HeaderValue::from_str(&rule.value) else {
                warn!(header = %rule.name, "Skipping rule with invalid header value");
                continue;
            };

            match rule.operation {
                HeaderOp::Add => {
                    headers.append(name, value);
                }
                HeaderOp::Replace => {
                    if headers.contains_key(&name) {
                        headers.insert(name, value);
                    }
                }
                HeaderOp::Default => {
                    if !headers.contains_key(&name) {
                        headers.insert(name, value);
                    }
                }
                HeaderOp::Delete => unreachable!("handled above"),
            }
        }
    }
}
