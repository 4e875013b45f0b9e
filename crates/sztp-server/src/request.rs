//! Transport-neutral request and response types
//!
//! The axum layer converts each HTTP exchange into a [`RestconfRequest`]
//! and renders the returned [`RestconfResponse`], which keeps the handlers
//! callable directly from tests.

use crate::encoding::Encoding;
use crate::error::HandlerError;
use axum::extract::Query;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Uri};
use serde_json::Value;
use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct RestconfRequest {
    pub method: Method,
    /// URI path, still percent-encoded
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
    /// DER client certificates from the TLS handshake, end-entity first
    pub peer_certs: Vec<Vec<u8>>,
    pub body: Vec<u8>,
}

impl RestconfRequest {
    pub fn new(method: Method, uri: &Uri) -> Self {
        let query = Query::<Vec<(String, String)>>::try_from_uri(uri)
            .map(|Query(pairs)| pairs)
            .unwrap_or_default();
        Self {
            method,
            path: uri.path().to_string(),
            query,
            headers: HeaderMap::new(),
            remote_addr: None,
            peer_certs: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn json_body(self, body: &Value) -> Self {
        self.header(header::CONTENT_TYPE, Encoding::Json.media_type())
            .body(body.to_string())
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn peer_certs(mut self, certs: Vec<Vec<u8>>) -> Self {
        self.peer_certs = certs;
        self
    }

    pub fn header_str(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn source_ip(&self) -> String {
        self.remote_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn has_body(&self) -> bool {
        !self.body.iter().all(u8::is_ascii_whitespace)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestconfResponse {
    pub status: u16,
    pub content_type: Option<&'static str>,
    pub body: Option<String>,
}

impl RestconfResponse {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: None,
        }
    }

    pub fn no_content() -> Self {
        Self::status(204)
    }

    /// Encode `doc`; an encoding failure turns into a 500
    pub fn document(status: u16, encoding: Encoding, doc: &Value) -> Self {
        match encoding.encode(doc) {
            Ok(body) => Self {
                status,
                content_type: Some(encoding.media_type()),
                body: Some(body),
            },
            Err(e) if status != 500 => {
                Self::error(&HandlerError::internal(format!("Unable to encode response: {}", e)), encoding)
            }
            Err(_) => Self::status(500),
        }
    }

    pub fn error(err: &HandlerError, encoding: Encoding) -> Self {
        Self::document(err.status, encoding, &err.errors)
    }

    /// Decode the body back into a document (JSON bodies only)
    pub fn json(&self) -> Option<Value> {
        self.body.as_deref().and_then(|b| serde_json::from_str(b).ok())
    }
}
