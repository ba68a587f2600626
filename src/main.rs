//! Centauri binary entry point.
//!
//! Wires the certificate providers, route manager and frontend together,
//! installs the initial routes, and keeps the process responsive to the
//! operator: SIGHUP reloads the route configuration, a 12-hour ticker
//! re-checks certificates, and SIGINT/SIGTERM stop the frontend.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::TimeDelta;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use centauri::certificate::{
    AcmeSupplier, AcmeSupplierConfig, CertificateManager, CertificateProvider,
    SelfSignedSupplier, Store, WebhookProvider, WildcardResolver,
};
use centauri::config;
use centauri::frontend::Frontend;
use centauri::proxy::{Manager, Rewriter};

/// Let's Encrypt production directory URL.
const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// How often certificates are re-checked.
const CERTIFICATE_CHECK_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

/// Time allowed for challenge TXT records to propagate.
const DNS_PROPAGATION_DELAY: Duration = Duration::from_secs(30);

/// Request timeout for the DNS webhook.
const DNS_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Centauri - a TLS-terminating reverse proxy with automatic certificates.
#[derive(Parser, Debug)]
#[command(name = "centauri", version, about, long_about = None)]
struct Cli {
    /// Path to the route configuration file.
    #[arg(long, env = "CENTAURI_CONFIG", default_value = "centauri.conf")]
    config: PathBuf,

    /// Path to the persisted ACME account credentials.
    #[arg(long = "user-data", env = "CENTAURI_USER_DATA", default_value = "user.json")]
    user_data: PathBuf,

    /// Path to the certificate store.
    #[arg(
        long = "certificate-store",
        env = "CENTAURI_CERTIFICATE_STORE",
        default_value = "certs.json"
    )]
    certificate_store: PathBuf,

    /// Base URL of the DNS webhook used for ACME DNS-01 challenges.
    /// Without it, only the self-signed provider is available.
    #[arg(long = "dns-provider", env = "CENTAURI_DNS_PROVIDER")]
    dns_provider: Option<String>,

    /// Bearer token sent to the DNS webhook.
    #[arg(long = "dns-token", env = "CENTAURI_DNS_TOKEN")]
    dns_token: Option<String>,

    /// Email address for the ACME account.
    #[arg(long = "acme-email", env = "CENTAURI_ACME_EMAIL")]
    acme_email: Option<String>,

    /// ACME directory to use.
    #[arg(
        long = "acme-directory",
        env = "CENTAURI_ACME_DIRECTORY",
        default_value = LETSENCRYPT_PRODUCTION
    )]
    acme_directory: String,

    /// Space separated list of wildcard base domains.
    #[arg(long = "wildcard-domains", env = "CENTAURI_WILDCARD_DOMAINS", default_value = "")]
    wildcard_domains: String,

    /// Frontend to listen on.
    #[arg(long, env = "CENTAURI_FRONTEND", default_value = "tcp")]
    frontend: String,

    /// Address for the TLS listener.
    #[arg(long = "https-addr", env = "CENTAURI_HTTPS_ADDR", default_value = "0.0.0.0:443")]
    https_addr: SocketAddr,

    /// Address for the plain-HTTP redirect listener; disabled when unset.
    #[arg(long = "http-addr", env = "CENTAURI_HTTP_ADDR")]
    http_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.frontend != "tcp" {
        bail!("invalid frontend specified: {}", cli.frontend);
    }

    let providers = certificate_providers(&cli).context("creating certificate providers")?;
    let default_provider = if providers.contains_key("acme") {
        "acme"
    } else {
        "selfsigned"
    };
    info!(default_provider, "Certificate providers ready");

    let manager = Arc::new(Manager::new(providers, default_provider));
    let rewriter = Rewriter::new();

    update_routes(&manager, &cli.config).await?;

    spawn_reload_handler(Arc::clone(&manager), cli.config.clone());
    spawn_certificate_monitor(Arc::clone(&manager));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_shutdown_handler(shutdown_tx);

    let frontend = Frontend::new(cli.https_addr, cli.http_addr);
    frontend
        .serve(manager, rewriter, shutdown_rx)
        .await
        .context("running frontend")?;

    info!("Frontend stopped. Goodbye!");
    Ok(())
}

/// Build the provider map: self-signed always, ACME when a DNS webhook
/// is configured. Both share one store and the same wildcard bases.
fn certificate_providers(
    cli: &Cli,
) -> Result<HashMap<String, Arc<dyn CertificateProvider>>> {
    let store = Arc::new(
        Store::open(&cli.certificate_store).context("opening certificate store")?,
    );
    let wildcard_domains: Vec<String> = cli
        .wildcard_domains
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let mut providers: HashMap<String, Arc<dyn CertificateProvider>> = HashMap::new();

    let selfsigned = CertificateManager::new(
        Arc::clone(&store),
        Arc::new(SelfSignedSupplier::new()),
        TimeDelta::days(7),
        TimeDelta::seconds(1),
    );
    providers.insert(
        "selfsigned".to_string(),
        Arc::new(WildcardResolver::new(
            Arc::new(selfsigned),
            wildcard_domains.clone(),
        )),
    );

    if let Some(webhook_url) = &cli.dns_provider {
        let dns = Arc::new(
            WebhookProvider::new(
                webhook_url.clone(),
                cli.dns_token.clone(),
                DNS_WEBHOOK_TIMEOUT,
            )
            .context("creating DNS provider")?,
        );
        let acme = AcmeSupplier::new(AcmeSupplierConfig {
            directory_url: cli.acme_directory.clone(),
            email: cli.acme_email.clone(),
            credentials_path: cli.user_data.clone(),
            dns_provider: dns,
            propagation_delay: DNS_PROPAGATION_DELAY,
        });
        let acme_manager = CertificateManager::new(
            store,
            Arc::new(acme),
            TimeDelta::days(30),
            TimeDelta::hours(24),
        );
        providers.insert(
            "acme".to_string(),
            Arc::new(WildcardResolver::new(
                Arc::new(acme_manager),
                wildcard_domains,
            )),
        );
    }

    Ok(providers)
}

/// Read the configuration file and install its routes.
async fn update_routes(manager: &Manager, path: &Path) -> Result<()> {
    info!(path = %path.display(), "Reading route configuration");
    let routes = config::parse_file(path).context("parsing configuration")?;

    info!(routes = routes.len(), "Installing routes");
    manager
        .set_routes(routes)
        .await
        .context("installing routes")?;

    Ok(())
}

/// Reload routes on SIGHUP. A failed reload is fatal: running with a
/// half-applied configuration is worse than restarting.
fn spawn_reload_handler(manager: Arc<Manager>, config: PathBuf) {
    tokio::spawn(async move {
        let mut hangups = match signal(SignalKind::hangup()) {
            Ok(hangups) => hangups,
            Err(e) => {
                error!(error = %e, "Failed to install SIGHUP handler");
                std::process::exit(1);
            }
        };

        loop {
            hangups.recv().await;
            info!("Received SIGHUP, updating routes");
            if let Err(e) = update_routes(&manager, &config).await {
                error!(error = %e, "Route reload failed");
                std::process::exit(1);
            }
        }
    });
}

/// Re-check certificates on a fixed interval. Failures are fatal; the
/// supervisor restarts the process and the next pass retries.
fn spawn_certificate_monitor(manager: Arc<Manager>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CERTIFICATE_CHECK_INTERVAL);
        // The first tick fires immediately; routes were just installed.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            info!("Checking certificate validity");
            if let Err(e) = manager.check_certificates().await {
                error!(error = %e, "Certificate check failed");
                std::process::exit(1);
            }
        }
    });
}

/// Trip the shutdown signal on SIGINT or SIGTERM.
fn spawn_shutdown_handler(shutdown: watch::Sender<bool>) {
    tokio::spawn(async move {
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::process::exit(1);
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }

        info!("Received shutdown signal, stopping frontend");
        let _ = shutdown.send(true);
    });
}
