//! # TCP frontend
//!
//! Terminates TLS and proxies HTTP requests to the upstream named by the
//! matched route. A companion plain-HTTP listener answers every request
//! with a redirect to HTTPS. Certificates come from the route manager via
//! SNI; requests are routed by Host (or :authority) with the route's
//! header rules applied to upstream responses.

mod error;
mod tls;

pub use error::{FrontendError, FrontendResult};
pub use tls::CertificateResolver;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::uri::Uri;
use http::StatusCode;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::proxy::{Manager, Rewriter};

/// Time allowed for a TLS handshake to complete.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type ProxyBody = BoxBody<Bytes, hyper::Error>;
type ProxyClient = Client<HttpConnector, Incoming>;

/// The TCP listener pair: TLS termination plus HTTP redirect.
#[derive(Debug)]
pub struct Frontend {
    https_addr: SocketAddr,
    http_addr: Option<SocketAddr>,
}

impl Frontend {
    /// Create a frontend listening on the given addresses.
    ///
    /// `http_addr` is optional; without it only the TLS listener runs.
    #[must_use]
    pub fn new(https_addr: SocketAddr, http_addr: Option<SocketAddr>) -> Self {
        Self {
            https_addr,
            http_addr,
        }
    }

    /// Serve until the shutdown signal fires.
    ///
    /// # Errors
    ///
    /// Returns an error if a listening socket cannot be bound.
    pub async fn serve(
        &self,
        manager: Arc<Manager>,
        rewriter: Rewriter,
        mut shutdown: watch::Receiver<bool>,
    ) -> FrontendResult<()> {
        let mut tls_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(CertificateResolver::new(Arc::clone(&manager))));
        tls_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        let acceptor = TlsAcceptor::from(Arc::new(tls_config));

        let listener =
            TcpListener::bind(self.https_addr)
                .await
                .map_err(|source| FrontendError::Bind {
                    addr: self.https_addr,
                    source,
                })?;
        info!(addr = %self.https_addr, "TLS frontend listening");

        if let Some(http_addr) = self.http_addr {
            let redirect_listener =
                TcpListener::bind(http_addr)
                    .await
                    .map_err(|source| FrontendError::Bind {
                        addr: http_addr,
                        source,
                    })?;
            info!(addr = %http_addr, "HTTP redirect listener listening");
            tokio::spawn(serve_redirects(redirect_listener, shutdown.clone()));
        }

        let client: ProxyClient = Client::builder(TokioExecutor::new()).build_http();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Accept failed");
                            continue;
                        }
                    };

                    let acceptor = acceptor.clone();
                    let manager = Arc::clone(&manager);
                    let rewriter = rewriter.clone();
                    let client = client.clone();

                    tokio::spawn(async move {
                        let tls_stream =
                            match timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                                Ok(Ok(stream)) => stream,
                                Ok(Err(e)) => {
                                    debug!(peer = %peer, error = %e, "TLS handshake failed");
                                    return;
                                }
                                Err(_) => {
                                    debug!(peer = %peer, "TLS handshake timed out");
                                    return;
                                }
                            };

                        let service = service_fn(move |req| {
                            proxy_request(
                                Arc::clone(&manager),
                                rewriter.clone(),
                                client.clone(),
                                peer,
                                req,
                            )
                        });

                        if let Err(e) = auto::Builder::new(TokioExecutor::new())
                            .serve_connection_with_upgrades(TokioIo::new(tls_stream), service)
                            .await
                        {
                            debug!(peer = %peer, error = %e, "Connection error");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!("Frontend shutting down");
                    return Ok(());
                }
            }
        }
    }
}

/// Answer plain-HTTP requests with a redirect to HTTPS.
async fn serve_redirects(listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Ok((stream, peer)) = accepted else { continue };
                tokio::spawn(async move {
                    let service = service_fn(redirect_request);
                    if let Err(e) = auto::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!(peer = %peer, error = %e, "Redirect connection error");
                    }
                });
            }
            _ = shutdown.changed() => return,
        }
    }
}

async fn redirect_request(req: Request<Incoming>) -> Result<Response<ProxyBody>, Infallible> {
    let Some(host) = request_host(&req) else {
        return Ok(status_response(StatusCode::BAD_REQUEST, "missing host"));
    };
    let path = req
        .uri()
        .path_and_query()
        .map_or("/", |path| path.as_str());

    let response = Response::builder()
        .status(StatusCode::MOVED_PERMANENTLY)
        .header(http::header::LOCATION, format!("https://{host}{path}"))
        .body(empty_body())
        .expect("static redirect response");
    Ok(response)
}

/// Proxy one terminated request to the matched route's upstream.
async fn proxy_request(
    manager: Arc<Manager>,
    rewriter: Rewriter,
    client: ProxyClient,
    peer: SocketAddr,
    mut req: Request<Incoming>,
) -> Result<Response<ProxyBody>, Infallible> {
    let Some(host) = request_host(&req) else {
        return Ok(status_response(StatusCode::BAD_REQUEST, "missing host"));
    };

    let Some(route) = manager.route_for_domain(&host) else {
        debug!(host = %host, "No route for host");
        return Ok(status_response(
            StatusCode::MISDIRECTED_REQUEST,
            "no route for host",
        ));
    };

    let Some(upstream) = route.upstream.clone() else {
        warn!(host = %host, "Route has no upstream");
        return Ok(status_response(StatusCode::BAD_GATEWAY, "no upstream"));
    };

    rewriter.rewrite_request(req.headers_mut(), peer, "https");

    let path = req
        .uri()
        .path_and_query()
        .map_or("/", |path| path.as_str());
    let uri: Uri = match format!("http://{upstream}{path}").parse() {
        Ok(uri) => uri,
        Err(e) => {
            warn!(upstream = %upstream, error = %e, "Invalid upstream URI");
            return Ok(status_response(StatusCode::BAD_GATEWAY, "bad upstream"));
        }
    };
    *req.uri_mut() = uri;

    match client.request(req).await {
        Ok(response) => {
            let mut response = response.map(BodyExt::boxed);
            rewriter.rewrite_response(&route, response.headers_mut());
            Ok(response)
        }
        Err(e) => {
            warn!(host = %host, upstream = %upstream, error = %e, "Upstream request failed");
            Ok(status_response(StatusCode::BAD_GATEWAY, "upstream error"))
        }
    }
}

/// The request's target host: :authority for HTTP/2, Host otherwise,
/// with any port stripped.
fn request_host<B>(req: &Request<B>) -> Option<String> {
    if let Some(host) = req.uri().host() {
        return Some(host.to_string());
    }

    let host = req.headers().get(http::header::HOST)?.to_str().ok()?;
    Some(strip_port(host).to_string())
}

/// Remove a trailing :port from a Host header value.
fn strip_port(host: &str) -> &str {
    // Bracketed IPv6 literals keep their brackets.
    if let Some(end) = host.rfind(']') {
        return &host[..=end];
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

fn status_response(status: StatusCode, message: &'static str) -> Response<ProxyBody> {
    Response::builder()
        .status(status)
        .body(
            Full::new(Bytes::from_static(message.as_bytes()))
                .map_err(|never| match never {})
                .boxed(),
        )
        .expect("static status response")
}

fn empty_body() -> ProxyBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("example.com:8443"), "example.com");
        assert_eq!(strip_port("[::1]:8443"), "[::1]");
        assert_eq!(strip_port("[::1]"), "[::1]");
        assert_eq!(strip_port("example.com:notaport"), "example.com:notaport");
    }

    #[test]
    fn test_request_host_prefers_uri_authority() {
        let req = Request::builder()
            .uri("https://example.com/path")
            .header(http::header::HOST, "other.com")
            .body(())
            .unwrap();
        assert_eq!(request_host(&req).as_deref(), Some("example.com"));
    }

    #[test]
    fn test_request_host_falls_back_to_host_header() {
        let req = Request::builder()
            .uri("/path")
            .header(http::header::HOST, "example.com:8443")
            .body(())
            .unwrap();
        assert_eq!(request_host(&req).as_deref(), Some("example.com"));
    }

    #[test]
    fn test_request_host_missing() {
        let req = Request::builder().uri("/path").body(()).unwrap();
        assert_eq!(request_host(&req), None);
    }
}
