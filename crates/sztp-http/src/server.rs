//! HTTP/TLS server
//!
//! Connections are accepted by hand rather than through `axum::serve` so
//! each one can be tagged with a [`ConnectionInfo`] before its requests
//! reach the router.

use crate::middleware::{apply_middleware, MiddlewareConfig};
use crate::tls::TlsConfig;
use crate::{Result, ServerError};
use axum::http::Request;
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use std::future::Future;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, info, warn};

/// Per-connection facts made available to handlers as a request extension
#[derive(Clone, Debug)]
pub struct ConnectionInfo {
    pub remote_addr: SocketAddr,
    /// DER certificates presented by the client, end-entity first
    pub peer_certs: Vec<Vec<u8>>,
    pub tls: bool,
}

impl ConnectionInfo {
    pub fn plain(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            peer_certs: Vec::new(),
            tls: false,
        }
    }
}

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_host: String,
    pub port: u16,
    /// Public hostname for logging/display
    pub public_host: String,
    /// `None` serves plain HTTP
    pub tls: Option<TlsConfig>,
}

impl ServerConfig {
    fn bind_addr(&self) -> Result<SocketAddr> {
        let host = self.bind_host.trim_start_matches('[').trim_end_matches(']');
        let ip = host.parse().map_err(|_| {
            ServerError::BindError(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Invalid bind address: {}", self.bind_host),
            ))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

pub struct HttpServer {
    config: ServerConfig,
    router: Router,
}

impl HttpServer {
    /// Create a new server builder
    pub fn builder() -> HttpServerBuilder {
        HttpServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Start the server
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serve until `shutdown` completes. Connections already accepted are
    /// left to finish on their own.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = self.config.bind_addr()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve_listener(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve_listener<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let acceptor = match &self.config.tls {
            Some(tls) => Some(tls.build_acceptor()?),
            None => None,
        };
        let scheme = if acceptor.is_some() { "https" } else { "http" };
        let local = listener.local_addr()?;
        info!("Server listening on {}://{}", scheme, local);
        info!("Public URL: {}://{}:{}", scheme, self.config.public_host, local.port());

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Listener on {} shutting down", local);
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };
                    let acceptor = acceptor.clone();
                    let router = self.router.clone();
                    tokio::spawn(handle_connection(stream, remote_addr, acceptor, router));
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    router: Router,
) {
    let Some(acceptor) = acceptor else {
        serve_io(stream, ConnectionInfo::plain(remote_addr), router).await;
        return;
    };

    match acceptor.accept(stream).await {
        Ok(tls_stream) => {
            let peer_certs = tls_stream
                .get_ref()
                .1
                .peer_certificates()
                .map(|certs| certs.iter().map(|cert| cert.as_ref().to_vec()).collect())
                .unwrap_or_default();
            let info = ConnectionInfo {
                remote_addr,
                peer_certs,
                tls: true,
            };
            serve_io(tls_stream, info, router).await;
        }
        Err(e) => {
            debug!("TLS handshake error from {}: {}", remote_addr, e);
        }
    }
}

async fn serve_io<I>(io: I, info: ConnectionInfo, router: Router)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let remote_addr = info.remote_addr;
    let service = router.map_request(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(info.clone());
        request
    });
    let service = TowerToHyperService::new(service);

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(io), service)
        .await
    {
        debug!("Connection error from {}: {}", remote_addr, e);
    }
}

/// Builder for HttpServer
pub struct HttpServerBuilder {
    bind_host: String,
    port: u16,
    public_host: Option<String>,
    tls_config: Option<TlsConfig>,
    router: Option<Router>,
    middleware_config: MiddlewareConfig,
}

impl HttpServerBuilder {
    pub fn new() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 8080,
            public_host: None,
            tls_config: None,
            router: None,
            middleware_config: MiddlewareConfig::default(),
        }
    }

    /// Set bind address (host:port format or just port)
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        let addr = addr.into();
        if let Some((host, port)) = addr.rsplit_once(':') {
            self.bind_host = host.to_string();
            if let Ok(p) = port.parse() {
                self.port = p;
            }
        } else if let Ok(p) = addr.parse::<u16>() {
            self.port = p;
        }
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn public_host(mut self, host: impl Into<String>) -> Self {
        self.public_host = Some(host.into());
        self
    }

    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls_config = Some(tls);
        self
    }

    /// Disable HTTPS (HTTP only)
    pub fn http_only(mut self) -> Self {
        self.tls_config = None;
        self
    }

    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    pub fn middleware(mut self, config: MiddlewareConfig) -> Self {
        self.middleware_config = config;
        self
    }

    pub fn build(self) -> Result<HttpServer> {
        let router = self.router.unwrap_or_default();
        let router = apply_middleware(router, self.middleware_config);

        let public_host = self
            .public_host
            .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().to_string());

        let config = ServerConfig {
            bind_host: self.bind_host,
            port: self.port,
            public_host,
            tls: self.tls_config,
        };

        Ok(HttpServer { config, router })
    }
}

impl Default for HttpServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Extension;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_bind_parsing() {
        let server = HttpServer::builder().bind("[::1]:9443").http_only().build().unwrap();
        let addr = server.config().bind_addr().unwrap();
        assert!(addr.is_ipv6());
        assert_eq!(addr.port(), 9443);

        let server = HttpServer::builder().bind("8081").build().unwrap();
        assert_eq!(server.config().bind_addr().unwrap().port(), 8081);
    }

    #[tokio::test]
    async fn test_connection_info_reaches_handler() {
        let router = Router::new().route(
            "/peer",
            get(|Extension(info): Extension<ConnectionInfo>| async move {
                format!("{} {}", info.remote_addr.ip(), info.tls)
            }),
        );
        let server = HttpServer::builder()
            .router(router)
            .public_host("localhost")
            .build()
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(server.serve_listener(listener, async {
            let _ = stopped.await;
        }));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /peer HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("127.0.0.1 false"));

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}
