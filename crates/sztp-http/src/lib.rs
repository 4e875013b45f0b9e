//! HTTP/TLS listener for sztpd
//!
//! Both the management plane (native RESTCONF interface) and the bootstrap
//! plane (RFC 8572 southbound interface) run on this listener. Every request
//! carries a [`ConnectionInfo`] extension with the peer address and, for TLS
//! connections, the client certificate chain the peer presented.

pub mod middleware;
pub mod server;
pub mod tls;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),

    #[error("Certificate error: {0}")]
    CertificateError(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;

pub use middleware::{apply_middleware, MiddlewareConfig};
pub use server::{ConnectionInfo, HttpServer, HttpServerBuilder, ServerConfig};
pub use tls::{ClientAuth, TlsConfig};

pub mod prelude {
    pub use crate::{ConnectionInfo, HttpServer, ServerError, TlsConfig};
    pub use axum::{
        extract::{Path, Query, State},
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::{delete, get, post, put},
        Json, Router,
    };
}
