//! axum glue for the two planes
//!
//! Both routers are a single fallback handler: the RESTCONF path space is
//! resolved by the plane's own dispatcher, not by the router.

use crate::request::{RestconfRequest, RestconfResponse};
use crate::server::Server;
use crate::{native, rfc8572};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Router};
use std::sync::Arc;
use sztp_http::ConnectionInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plane {
    Management,
    Bootstrap,
}

/// Router for the native RESTCONF management interface
pub fn management_router(server: Arc<Server>) -> Router {
    Router::new()
        .fallback(|state, conn, method, uri, headers, body| serve(Plane::Management, state, conn, method, uri, headers, body))
        .with_state(server)
}

/// Router for the RFC 8572 bootstrap interface
pub fn bootstrap_router(server: Arc<Server>) -> Router {
    Router::new()
        .fallback(|state, conn, method, uri, headers, body| serve(Plane::Bootstrap, state, conn, method, uri, headers, body))
        .with_state(server)
}

async fn serve(
    plane: Plane,
    State(server): State<Arc<Server>>,
    conn: Option<Extension<ConnectionInfo>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut req = RestconfRequest::new(method, &uri).body(body.to_vec());
    req.headers = headers;
    if let Some(Extension(info)) = conn {
        req = req.remote_addr(info.remote_addr).peer_certs(info.peer_certs);
    }
    let response = match plane {
        Plane::Management => native::handle(&server, req).await,
        Plane::Bootstrap => rfc8572::handle(&server, req).await,
    };
    render(response)
}

fn render(response: RestconfResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut rendered = response.body.unwrap_or_default().into_response();
    *rendered.status_mut() = status;
    let headers = rendered.headers_mut();
    headers.remove(header::CONTENT_TYPE);
    if let Some(content_type) = response.content_type {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Settings;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_management_root_document() {
        let router = management_router(Server::in_memory(Settings::default()));
        let response = router
            .oneshot(Request::builder().uri("/restconf").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/yang-data+json"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["ietf-restconf:restconf"]["yang-library-version"], "2019-01-04");
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_datastore_access() {
        let router = bootstrap_router(Server::in_memory(Settings::default()));
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/restconf/ds/ietf-datastores:running")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }
}
