//! sztpd - Secure Zero Touch Provisioning bootstrap server
//!
//! Runs two listeners over one datastore:
//! - the management plane (native RESTCONF) on `--mgmt-bind`
//! - the bootstrap plane (RFC 8572) on the endpoints configured under
//!   `/sztpd:transport/listen`, or `--bootstrap-bind` when none are
//!
//! The bootstrap listeners are torn down and rebound whenever the transport
//! configuration changes.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use sztp_core::config::{get_config_int, load_environment};
use sztp_core::Mode;
use sztp_http::{ClientAuth, HttpServer, MiddlewareConfig, TlsConfig};
use sztp_plugins::PluginHost;
use sztp_server::{bootstrap_router, management_router, spawn_scheduler, Server, Settings};
use sztp_state_store::{sztpd_schema, DataAccessLayer, MemoryStore, SchemaValidator, SqliteStore, ValidationLayer};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "sztpd")]
#[command(about = "Secure Zero Touch Provisioning (RFC 8572) bootstrap server")]
struct Args {
    /// Deployment mode: 1 (multi-device) or x (multi-tenant)
    #[arg(long, env = "SZTPD_MODE", default_value = "1")]
    mode: Mode,

    /// SQLite database URL
    #[arg(long, env = "SZTPD_DB_URL", default_value = "sqlite:///var/lib/sztpd/sztpd.db")]
    db_url: String,

    /// Management interface bind address (host:port)
    #[arg(long, env = "SZTPD_MGMT_BIND", default_value = "127.0.0.1:8080")]
    mgmt_bind: String,

    /// Management interface TLS certificate (PEM)
    #[arg(long, env = "SZTPD_MGMT_TLS_CERT", requires = "mgmt_tls_key")]
    mgmt_tls_cert: Option<String>,

    /// Management interface TLS private key (PEM)
    #[arg(long, env = "SZTPD_MGMT_TLS_KEY", requires = "mgmt_tls_cert")]
    mgmt_tls_key: Option<String>,

    /// Bootstrap interface bind address used when no endpoint is configured
    #[arg(long, env = "SZTPD_BOOTSTRAP_BIND", default_value = "0.0.0.0:9090")]
    bootstrap_bind: String,

    /// Bootstrap interface TLS certificate (PEM)
    #[arg(long, env = "SZTPD_BOOTSTRAP_TLS_CERT", requires = "bootstrap_tls_key")]
    bootstrap_tls_cert: Option<String>,

    /// Bootstrap interface TLS private key (PEM)
    #[arg(long, env = "SZTPD_BOOTSTRAP_TLS_KEY", requires = "bootstrap_tls_cert")]
    bootstrap_tls_key: Option<String>,

    /// Take device certificates from the client-cert header set by a TLS-terminating proxy
    #[arg(long, env = "SZTPD_TRUST_CLIENT_CERT_HEADER")]
    trust_client_cert_header: bool,

    /// Honour the `sleep` query parameter (testing only)
    #[arg(long, env = "SZTPD_TEST_MODE")]
    test_mode: bool,

    /// Log output format
    #[arg(long, env = "SZTPD_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    // SZTPD_* from /etc/sztpd/environment become CLI defaults
    let env_file = load_environment();
    let args = Args::parse();

    let filter = EnvFilter::from_default_env()
        .add_directive("sztpd=info".parse()?)
        .add_directive("sztp_server=info".parse()?)
        .add_directive("sztp_http=info".parse()?)
        .add_directive("sztp_state_store=info".parse()?)
        .add_directive("sztp_plugins=info".parse()?);
    match args.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    // the loader ran before the subscriber existed
    if let Some(env) = &env_file {
        info!("Environment loaded from {} ({} variables applied)", env.path.display(), env.applied);
    }

    // --- Datastore ---
    let store = SqliteStore::new(&args.db_url)
        .await
        .with_context(|| format!("Failed to open database {}", args.db_url))?;
    store
        .check_mode(args.mode)
        .await
        .context("Datastore mode check failed")?;
    let val: Arc<dyn ValidationLayer> = Arc::new(SchemaValidator::new(Arc::new(sztpd_schema(args.mode))));
    let dal: Arc<dyn DataAccessLayer> = Arc::new(
        MemoryStore::open(val.clone(), store)
            .await
            .context("Failed to load datastore")?,
    );
    info!("Datastore ready (mode {})", args.mode);

    // --- Server context ---
    let settings = Settings {
        mode: args.mode,
        test_mode: args.test_mode,
        trust_client_cert_header: args.trust_client_cert_header,
    };
    if settings.test_mode {
        warn!("Test mode enabled: the sleep query parameter is honoured");
    }
    let server = Server::new(dal, val, PluginHost::with_builtins(), settings);
    server.load_plugins().await.context("Failed to load configured plugins")?;
    let scheduled = spawn_scheduler(&server);
    info!("Scheduled {} periodic tasks", scheduled.len());

    let timeout = Duration::from_secs(get_config_int("SZTPD_REQUEST_TIMEOUT_SECS", 30).max(1) as u64);

    // --- Management plane ---
    let mut mgmt = HttpServer::builder()
        .bind(args.mgmt_bind.clone())
        .router(management_router(server.clone()))
        .middleware(middleware("management", timeout));
    if let (Some(cert), Some(key)) = (&args.mgmt_tls_cert, &args.mgmt_tls_key) {
        mgmt = mgmt.tls(TlsConfig::with_certs(cert, key));
    }
    let mgmt = mgmt.build().context("Failed to configure management listener")?;
    let management: JoinHandle<sztp_http::Result<()>> = tokio::spawn(mgmt.serve());

    // --- Bootstrap plane ---
    let bootstrap = tokio::spawn(bootstrap_listeners(server.clone(), args, timeout));

    tokio::select! {
        joined = management => {
            joined.context("Management listener task failed")?.context("Management listener stopped")?;
        }
        joined = bootstrap => {
            joined.context("Bootstrap listener task failed")??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    scheduled.iter().for_each(JoinHandle::abort);
    Ok(())
}

fn middleware(label: &'static str, timeout: Duration) -> MiddlewareConfig {
    MiddlewareConfig::new()
        .label(label)
        .tracing(true)
        .request_logging(true)
        .timeout(timeout)
}

/// `host:port`, bracketing IPv6 literals
fn bind_address(address: &str, port: u16) -> String {
    if address.contains(':') && !address.starts_with('[') {
        format!("[{}]:{}", address, port)
    } else {
        format!("{}:{}", address, port)
    }
}

/// Serve the bootstrap plane, rebinding whenever `/sztpd:transport/listen`
/// changes. Returns only if the restart channel closes.
async fn bootstrap_listeners(server: Arc<Server>, args: Args, timeout: Duration) -> Result<()> {
    let mut restart = server.subscribe_restart();
    loop {
        let endpoints = server
            .listen_endpoints()
            .await
            .context("Failed to read transport configuration")?;
        let binds: Vec<String> = if endpoints.is_empty() {
            vec![args.bootstrap_bind.clone()]
        } else {
            endpoints
                .iter()
                .map(|e| bind_address(&e.address, e.port))
                .collect()
        };

        let (stop, stopped) = watch::channel(false);
        let mut listeners = Vec::with_capacity(binds.len());
        for bind in binds {
            let mut builder = HttpServer::builder()
                .bind(bind.clone())
                .router(bootstrap_router(server.clone()))
                .middleware(middleware("bootstrap", timeout));
            if let (Some(cert), Some(key)) = (&args.bootstrap_tls_cert, &args.bootstrap_tls_key) {
                builder = builder.tls(TlsConfig::with_certs(cert, key).client_auth(ClientAuth::Deferred));
            }
            let listener = builder
                .build()
                .with_context(|| format!("Failed to configure bootstrap listener {}", bind))?;
            let mut stopped = stopped.clone();
            listeners.push(tokio::spawn(async move {
                let shutdown = async move {
                    let _ = stopped.changed().await;
                };
                if let Err(e) = listener.serve_with_shutdown(shutdown).await {
                    error!(bind = %bind, "Bootstrap listener failed: {}", e);
                }
            }));
        }

        if restart.changed().await.is_err() {
            return Ok(());
        }
        info!("Transport configuration changed, restarting bootstrap listeners");
        let _ = stop.send(true);
        for listener in listeners {
            if let Err(e) = listener.await {
                warn!("Bootstrap listener task ended abnormally: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_address() {
        assert_eq!(bind_address("0.0.0.0", 9090), "0.0.0.0:9090");
        assert_eq!(bind_address("::1", 9443), "[::1]:9443");
        assert_eq!(bind_address("[::1]", 9443), "[::1]:9443");
    }

    #[test]
    fn test_cli_defaults() {
        let args = Args::parse_from(["sztpd"]);
        assert_eq!(args.mode, Mode::MultiDevice);
        assert!(!args.test_mode);

        let args = Args::parse_from(["sztpd", "--mode", "x", "--log-format", "json"]);
        assert_eq!(args.mode, Mode::MultiTenant);
        assert!(matches!(args.log_format, LogFormat::Json));
    }
}
