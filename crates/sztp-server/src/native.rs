//! Management plane: native RESTCONF interface over the datastore
//!
//! Every exchange authenticates the administrator, takes the [`FifoGate`]
//! (read for GET/HEAD, write otherwise) and then reads or mutates the
//! running datastore. Mutations dispatch the callback registry through the
//! Data Access Layer; a callback failure is reported after the commit.
//!
//! [`FifoGate`]: sztp_core::FifoGate

use crate::audit::{audit_entry, record_audit, Outcome};
use crate::auth::{basic_credentials, verify_password};
use crate::encoding::{request_encoding, Encoding};
use crate::error::HandlerError;
use crate::request::{RestconfRequest, RestconfResponse};
use crate::server::Server;
use axum::http::{header, Method};
use serde_json::{json, Map, Value};
use std::time::Duration;
use sztp_core::{DataPath, ErrorTag, GateMode, Scope};
use sztp_state_store::validation::{scalar_text, single_entry};
use sztp_state_store::{unwrap_document, DalError, Insert, ValidationError};
use tracing::{debug, info, warn};

pub const YANG_LIBRARY_VERSION: &str = "2019-01-04";

const RUNNING: &str = "/restconf/ds/ietf-datastores:running";
const OPERATIONAL: &str = "/restconf/ds/ietf-datastores:operational";
const OPERATIONS: &str = "/restconf/operations";

const JSON_ONLY: &[Encoding] = &[Encoding::Json];

pub(crate) fn restconf_root() -> Value {
    json!({
        "ietf-restconf:restconf": {
            "data": {},
            "operations": {},
            "yang-library-version": YANG_LIBRARY_VERSION
        }
    })
}

pub(crate) fn yang_library_version() -> Value {
    json!({ "ietf-restconf:yang-library-version": YANG_LIBRARY_VERSION })
}

/// Test-mode `sleep` query parameter, in milliseconds
pub(crate) fn sleep_param(req: &RestconfRequest) -> Result<Option<Duration>, HandlerError> {
    match req.query_param("sleep") {
        None => Ok(None),
        Some(ms) => ms
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| ValidationError::InvalidQueryParameter(format!("sleep={}", ms)).into()),
    }
}

/// Datastore addressed by a request path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Datastore {
    Running,
    Operational,
}

enum Target {
    Root,
    YangLibraryVersion,
    Operations,
    Data(Datastore, String),
    Unknown,
}

fn route(path: &str) -> Target {
    let path = path.strip_suffix('/').filter(|p| !p.is_empty()).unwrap_or(path);
    if path == "/restconf" {
        return Target::Root;
    }
    if path == "/restconf/yang-library-version" {
        return Target::YangLibraryVersion;
    }
    if path == OPERATIONS || path.starts_with("/restconf/operations/") {
        return Target::Operations;
    }
    for (prefix, ds) in [(RUNNING, Datastore::Running), (OPERATIONAL, Datastore::Operational)] {
        if let Some(rest) = path.strip_prefix(prefix) {
            if rest.is_empty() || rest.starts_with('/') {
                return Target::Data(ds, rest.to_string());
            }
        }
    }
    Target::Unknown
}

fn not_found() -> HandlerError {
    HandlerError::protocol(404, ErrorTag::InvalidValue, "Requested resource does not exist.")
}

fn method_not_allowed() -> HandlerError {
    HandlerError::protocol(405, ErrorTag::OperationNotSupported, "Method not allowed.")
}

/// Serve one management-plane exchange
pub async fn handle(server: &Server, req: RestconfRequest) -> RestconfResponse {
    let Some(encoding) = Encoding::negotiate(req.header_str(header::ACCEPT), JSON_ONLY, Encoding::Json) else {
        let err = HandlerError::protocol(406, ErrorTag::InvalidValue, "Unable to produce an acceptable response encoding.");
        return RestconfResponse::error(&err, Encoding::Json);
    };

    if let Err(err) = authenticate(server, &req).await {
        return RestconfResponse::error(&err, encoding);
    }

    let mode = if matches!(req.method, Method::GET | Method::HEAD) {
        GateMode::Read
    } else {
        GateMode::Write
    };
    let _guard = server.gate.acquire(mode).await;
    debug!(method = %req.method, path = %req.path, ?mode, "management request admitted");

    if server.settings.test_mode {
        match sleep_param(&req) {
            Ok(Some(delay)) => tokio::time::sleep(delay).await,
            Ok(None) => {}
            Err(err) => return RestconfResponse::error(&err, encoding),
        }
    }

    let head = req.method == Method::HEAD;
    let mut response = match dispatch(server, &req).await {
        Ok(response) => response,
        Err(err) => {
            if err.status >= 500 {
                warn!(method = %req.method, path = %req.path, status = err.status, "management request failed: {}", err);
            } else {
                debug!(method = %req.method, path = %req.path, status = err.status, "management request rejected: {}", err);
            }
            RestconfResponse::error(&err, encoding)
        }
    };
    if head {
        response.body = None;
    }
    response
}

/// HTTP Basic against the admin accounts. A fresh install (no admin
/// accounts) requires no authorization. Failures and successful
/// mutations are audited.
async fn authenticate(server: &Server, req: &RestconfRequest) -> Result<(), HandlerError> {
    let admins = DataPath::root().join("admin-accounts/admin-account");
    let mutation = !matches!(req.method, Method::GET | Method::HEAD);

    let outcome = match basic_credentials(req) {
        Err(reason) => Err(reason),
        Ok(None) => {
            if server.dal.list_len(&admins).await.map_err(HandlerError::from)? == 0 {
                Ok((None, Some("No authorization required for fresh installs.")))
            } else {
                Err("No authorization specified in the HTTP header.".to_string())
            }
        }
        Ok(Some(creds)) => {
            let account = admins.parent().unwrap_or_default().child("admin-account", Some(&creds.username));
            match server.dal.get_config(&account).await {
                Ok(account) => {
                    let stored = account.get("password").and_then(Value::as_str).unwrap_or_default();
                    if verify_password(&creds.password, stored) {
                        Ok((Some(creds.username), None))
                    } else {
                        Err(format!("Password mismatch for admin {}", creds.username))
                    }
                }
                Err(DalError::NodeNotFound(_)) => {
                    if server.dal.list_len(&admins).await.map_err(HandlerError::from)? == 0 {
                        Ok((None, Some("No authorization required for fresh installs.")))
                    } else {
                        Err(format!("Unknown admin: {}", creds.username))
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    match outcome {
        Ok((admin, comment)) => {
            debug!(admin = admin.as_deref().unwrap_or("-"), "management request authenticated");
            if mutation {
                let entry = audit_entry(req, Outcome::Success, None, comment);
                record_audit(server.dal.as_ref(), &Scope::Global, entry).await;
            }
            Ok(())
        }
        Err(reason) => {
            info!(path = %req.path, "management authentication failed: {}", reason);
            let entry = audit_entry(req, Outcome::Failure, None, Some(&reason));
            record_audit(server.dal.as_ref(), &Scope::Global, entry).await;
            Err(HandlerError::access_denied())
        }
    }
}

async fn dispatch(server: &Server, req: &RestconfRequest) -> Result<RestconfResponse, HandlerError> {
    check_query(server, req)?;
    match route(&req.path) {
        Target::Root => match req.method {
            Method::GET | Method::HEAD => Ok(RestconfResponse::document(200, Encoding::Json, &restconf_root())),
            _ => Err(method_not_allowed()),
        },
        Target::YangLibraryVersion => match req.method {
            Method::GET | Method::HEAD => Ok(RestconfResponse::document(200, Encoding::Json, &yang_library_version())),
            _ => Err(method_not_allowed()),
        },
        Target::Operations => match req.method {
            Method::GET | Method::HEAD if req.path.trim_end_matches('/') == OPERATIONS => Ok(
                RestconfResponse::document(200, Encoding::Json, &json!({"ietf-restconf:operations": {}})),
            ),
            Method::POST => Err(HandlerError::protocol(
                501,
                ErrorTag::OperationNotSupported,
                "RPCs are not supported on the management interface.",
            )),
            Method::GET | Method::HEAD => Err(not_found()),
            _ => Err(method_not_allowed()),
        },
        Target::Data(ds, rest) => {
            let path = DataPath::parse(&rest)?;
            server.val.check_path(&path)?;
            match (ds, &req.method) {
                (_, &Method::GET) | (_, &Method::HEAD) => get(server, req, ds, &path).await,
                (Datastore::Running, &Method::POST) => post(server, req, &path).await,
                (Datastore::Running, &Method::PUT) => put(server, req, &path).await,
                (Datastore::Running, &Method::DELETE) => delete(server, &path).await,
                (Datastore::Operational, &Method::POST) => Err(HandlerError::protocol(
                    501,
                    ErrorTag::OperationNotSupported,
                    "Actions are not supported on the management interface.",
                )),
                _ => Err(method_not_allowed()),
            }
        }
        Target::Unknown => Err(not_found()),
    }
}

fn check_query(server: &Server, req: &RestconfRequest) -> Result<(), ValidationError> {
    let allowed: &[&str] = match req.method {
        Method::GET | Method::HEAD => &["depth"],
        Method::POST | Method::PUT => &["insert", "point"],
        _ => &[],
    };
    for (name, _) in &req.query {
        if allowed.contains(&name.as_str()) || (name == "sleep" && server.settings.test_mode) {
            continue;
        }
        return Err(ValidationError::UnrecognizedQueryParameter(name.clone()));
    }
    Ok(())
}

/// `depth` query: `unbounded` or 1..=65535
fn depth_param(req: &RestconfRequest) -> Result<Option<u16>, ValidationError> {
    match req.query_param("depth") {
        None | Some("unbounded") => Ok(None),
        Some(raw) => raw
            .parse::<u16>()
            .ok()
            .filter(|d| *d >= 1)
            .map(Some)
            .ok_or_else(|| ValidationError::InvalidQueryParameter(format!("depth={}", raw))),
    }
}

/// Keep `depth` levels of containment below the target. Leaves of a kept
/// node are always returned; deeper containers come back empty.
fn prune_depth(value: &mut Value, depth: u16) {
    match value {
        Value::Array(entries) => entries.iter_mut().for_each(|e| prune_depth(e, depth)),
        Value::Object(members) => {
            for child in members.values_mut() {
                let nested = match child {
                    Value::Object(_) => true,
                    Value::Array(items) => items.iter().any(Value::is_object),
                    _ => false,
                };
                if !nested {
                    continue;
                }
                if depth <= 1 {
                    *child = match child {
                        Value::Array(_) => Value::Array(Vec::new()),
                        _ => Value::Object(Map::new()),
                    };
                } else {
                    prune_depth(child, depth - 1);
                }
            }
        }
        _ => {}
    }
}

/// Wrap a node's content into a document named after the node
fn wrap(path: &DataPath, value: Value) -> Value {
    match path.qualified_name() {
        None => json!({ "ietf-restconf:data": value }),
        Some(name) => {
            let value = match (path.last().and_then(|s| s.key.as_ref()), value) {
                (Some(_), entry) => Value::Array(vec![entry]),
                (None, value) => value,
            };
            let mut doc = Map::new();
            doc.insert(name, value);
            Value::Object(doc)
        }
    }
}

async fn get(server: &Server, req: &RestconfRequest, ds: Datastore, path: &DataPath) -> Result<RestconfResponse, HandlerError> {
    let depth = depth_param(req)?;
    let mut value = match ds {
        Datastore::Running => server.dal.get_config(path).await?,
        Datastore::Operational => server.dal.get_opstate(path).await?,
    };
    if let Some(depth) = depth {
        prune_depth(&mut value, depth);
    }
    Ok(RestconfResponse::document(200, Encoding::Json, &wrap(path, value)))
}

/// Parse the request body into `(local name, content)`
fn input_document(req: &RestconfRequest) -> Result<(String, Value), HandlerError> {
    let encoding = request_encoding(req.header_str(header::CONTENT_TYPE), JSON_ONLY)?;
    if !req.has_body() {
        return Err(HandlerError::malformed("Request body is missing."));
    }
    let body = encoding
        .decode(&req.body)
        .map_err(|e| HandlerError::malformed(format!("Unable to parse \"input\" JSON document: {}", e)))?;
    Ok(unwrap_document(&body)?)
}

/// `insert`/`point` query parameters of a create
fn insert_param(req: &RestconfRequest) -> Result<Insert, ValidationError> {
    let point = || {
        let raw = req
            .query_param("point")
            .ok_or_else(|| ValidationError::MissingQueryParameter("point".into()))?;
        DataPath::parse(raw)
            .ok()
            .and_then(|p| p.last().and_then(|s| s.key.clone()))
            .ok_or_else(|| ValidationError::InvalidQueryParameter(format!("point={}", raw)))
    };
    match req.query_param("insert") {
        None | Some("last") => Ok(Insert::Last),
        Some("first") => Ok(Insert::First),
        Some("before") => Ok(Insert::Before(point()?)),
        Some("after") => Ok(Insert::After(point()?)),
        Some(other) => Err(ValidationError::InvalidQueryParameter(format!("insert={}", other))),
    }
}

async fn post(server: &Server, req: &RestconfRequest, parent: &DataPath) -> Result<RestconfResponse, HandlerError> {
    let (name, value) = input_document(req)?;
    let schema = server.val.schema();
    let child = schema
        .find(parent)?
        .child(&name)
        .ok_or_else(|| ValidationError::NonexistentSchemaNode(format!("{}/{}", parent, name)))?;

    let (value, target) = match child.list_key() {
        Some(key_leaf) => {
            let entry = single_entry(value)?;
            let key = entry.get(key_leaf).map(scalar_text).ok_or_else(|| {
                ValidationError::ValidationFailed(format!("new \"{}\" entry is missing its key \"{}\"", name, key_leaf))
            })?;
            let target = parent.child(&name, Some(&key));
            (entry, target)
        }
        None => (value, parent.child(&name, None)),
    };
    server.val.validate_document(&target, &value)?;
    let insert = insert_param(req)?;

    let mut txn = server.transaction();
    let created = server.dal.post(parent, &name, value, &insert, &mut txn).await?;
    info!(path = %created, callbacks = txn.fired(), "created");
    Ok(RestconfResponse::status(201))
}

async fn put(server: &Server, req: &RestconfRequest, path: &DataPath) -> Result<RestconfResponse, HandlerError> {
    let (name, value) = if path.is_root() {
        let encoding = request_encoding(req.header_str(header::CONTENT_TYPE), JSON_ONLY)?;
        let body = encoding
            .decode(&req.body)
            .map_err(|e| HandlerError::malformed(format!("Unable to parse \"input\" JSON document: {}", e)))?;
        let content = body.get("ietf-restconf:data").cloned().unwrap_or(body);
        (String::new(), content)
    } else {
        input_document(req)?
    };
    if let Some(last) = path.last() {
        if last.local_name() != name {
            return Err(ValidationError::InvalidInputDocument(format!(
                "top-level node \"{}\" does not match the target \"{}\"",
                name,
                last.local_name()
            ))
            .into());
        }
    }
    let value = if path.last().is_some_and(|s| s.key.is_some()) {
        single_entry(value)?
    } else {
        value
    };
    server.val.validate_document(path, &value)?;
    let insert = insert_param(req)?;

    let mut txn = server.transaction();
    let created = server.dal.put(path, value, &insert, &mut txn).await?;
    info!(%path, created, callbacks = txn.fired(), "replaced");
    Ok(RestconfResponse::status(if created { 201 } else { 204 }))
}

async fn delete(server: &Server, path: &DataPath) -> Result<RestconfResponse, HandlerError> {
    let mut txn = server.transaction();
    server.dal.delete(path, &mut txn).await?;
    info!(%path, callbacks = txn.fired(), "deleted");
    Ok(RestconfResponse::no_content())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route() {
        assert!(matches!(route("/restconf"), Target::Root));
        assert!(matches!(route("/restconf/"), Target::Root));
        assert!(matches!(route("/restconf/operations/x:y"), Target::Operations));
        assert!(matches!(
            route("/restconf/ds/ietf-datastores:running/sztpd:devices"),
            Target::Data(Datastore::Running, ref rest) if rest == "/sztpd:devices"
        ));
        assert!(matches!(
            route("/restconf/ds/ietf-datastores:operational"),
            Target::Data(Datastore::Operational, ref rest) if rest.is_empty()
        ));
        assert!(matches!(route("/restconf/ds/ietf-datastores:runningx"), Target::Unknown));
    }

    #[test]
    fn test_prune_depth() {
        let mut value = json!({
            "device": [{"serial-number": "A", "lifecycle-statistics": {"sbi-access-stats": {"n": 1}}}]
        });
        prune_depth(&mut value, 1);
        assert_eq!(value, json!({"device": []}));

        let mut value = json!({
            "device": [{"serial-number": "A", "lifecycle-statistics": {"sbi-access-stats": {"n": 1}}}]
        });
        prune_depth(&mut value, 2);
        assert_eq!(value, json!({"device": [{"serial-number": "A", "lifecycle-statistics": {}}]}));
    }

    #[test]
    fn test_wrap() {
        let path = DataPath::parse("/sztpd:devices/device=A").unwrap();
        assert_eq!(
            wrap(&path, json!({"serial-number": "A"})),
            json!({"sztpd:device": [{"serial-number": "A"}]})
        );
        assert_eq!(wrap(&DataPath::root(), json!({})), json!({"ietf-restconf:data": {}}));
    }
}
