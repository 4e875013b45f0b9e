//! Bootstrap plane: the RFC 8572 bootstrap server
//!
//! Devices call two RPCs, `get-bootstrapping-data` and `report-progress`.
//! Every exchange authenticates the device first, whatever the resource,
//! then runs under a read guard on the gate. Each exchange by an admitted
//! device leaves exactly one bootstrapping-log entry; rejected devices
//! leave an audit-log entry. The datastores are visible but empty: a device
//! can neither read nor change configuration.

use crate::audit::{audit_entry, record_audit, timestamp, BootstrapLogEntry, Outcome};
use crate::auth::{basic_credentials, client_certificates, verify_password};
use crate::conveyed;
use crate::encoding::{request_encoding, Encoding};
use crate::error::HandlerError;
use crate::native::{restconf_root, sleep_param, yang_library_version, YANG_LIBRARY_VERSION};
use crate::policy::{select, MatchedResponse, ResolveContext, ResponseBody};
use crate::request::{RestconfRequest, RestconfResponse};
use crate::server::Server;
use crate::webhook::relay_notification;
use axum::http::{header, Method};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Map, Value};
use sztp_core::{DataPath, ErrorTag, Mode, Scope};
use sztp_crypto::{decode_certificate_bundle, encode_certificate_bundle, serial_number, validate_client_certificate};
use sztp_plugins::{CalloutReply, PluginError};
use sztp_state_store::DalError;
use tracing::{debug, info, warn};

pub const GET_BOOTSTRAPPING_DATA: &str = "ietf-sztp-bootstrap-server:get-bootstrapping-data";
pub const REPORT_PROGRESS: &str = "ietf-sztp-bootstrap-server:report-progress";
const INPUT: &str = "ietf-sztp-bootstrap-server:input";

const OPERATIONS: &str = "/restconf/operations";
const RUNNING: &str = "/restconf/ds/ietf-datastores:running";
const OPERATIONAL: &str = "/restconf/ds/ietf-datastores:operational";
const ENCODINGS: &[Encoding] = &[Encoding::Json, Encoding::Xml];

/// An admitted device
#[derive(Debug, Clone)]
struct DeviceContext {
    serial_number: Option<String>,
    scope: Scope,
    /// The device's inventory entry; `None` when admitted anonymously
    device: Option<Value>,
    device_path: Option<DataPath>,
    /// Presented certificates as a base64 CMS bundle
    identity_certificate: Option<String>,
}

impl DeviceContext {
    fn log_path(&self) -> DataPath {
        match &self.device_path {
            Some(device) => device.join("bootstrapping-log/log-entry"),
            None => self.scope.path("bootstrapping-log/log-entry"),
        }
    }
}

/// Serve one bootstrap-plane exchange
pub async fn handle(server: &Server, req: RestconfRequest) -> RestconfResponse {
    let negotiated = Encoding::negotiate(req.header_str(header::ACCEPT), ENCODINGS, Encoding::Json);
    let encoding = negotiated.unwrap_or(Encoding::Json);

    let _guard = server.gate.read().await;
    let device = match authenticate(server, &req).await {
        Ok(device) => device,
        Err(err) => return RestconfResponse::error(&err, encoding),
    };

    let mut log = BootstrapLogEntry::new(&req);
    let (result, details) = match negotiated {
        Some(encoding) => dispatch(server, &req, &device, encoding).await,
        None => (
            Err(HandlerError::protocol(
                406,
                ErrorTag::InvalidValue,
                "Unable to produce an acceptable response encoding.",
            )),
            None,
        ),
    };

    let response = match result {
        Ok(response) => response,
        Err(err) => {
            log.error_returned = Some(err.errors.clone());
            RestconfResponse::error(&err, encoding)
        }
    };
    log.return_code = response.status;
    log.event_details = details;
    log.record(server.dal.as_ref(), &device.log_path()).await;
    info!(
        serial = device.serial_number.as_deref().unwrap_or("-"),
        method = %req.method,
        path = %req.path,
        status = response.status,
        "bootstrap exchange"
    );
    response
}

type Dispatched = (Result<RestconfResponse, HandlerError>, Option<Value>);

/// Route an authenticated exchange. Returns the result and the
/// bootstrapping-log event details, if the resource produces any.
async fn dispatch(
    server: &Server,
    req: &RestconfRequest,
    device: &DeviceContext,
    encoding: Encoding,
) -> Dispatched {
    if server.settings.test_mode {
        match sleep_param(req) {
            Ok(Some(delay)) => tokio::time::sleep(delay).await,
            Ok(None) => {}
            Err(err) => return (Err(err), None),
        }
    }

    let path = req.path.trim_end_matches('/');
    if path == "/restconf" || path == "/restconf/yang-library-version" {
        if !matches!(req.method, Method::GET | Method::HEAD) {
            return (Err(method_not_allowed()), None);
        }
        let doc = if path == "/restconf" { restconf_root() } else { yang_library_version() };
        return (Ok(RestconfResponse::document(200, encoding, &doc)), None);
    }
    if let Some(rest) = path.strip_prefix(RUNNING) {
        return (running(&req.method, rest), None);
    }
    if let Some(rest) = path.strip_prefix(OPERATIONAL) {
        return (operational(&req.method, rest, encoding), None);
    }
    let Some(rpc) = path.strip_prefix(OPERATIONS) else {
        return (Err(not_found("Requested resource does not exist.")), None);
    };
    if req.method != Method::POST {
        return (Err(method_not_allowed()), None);
    }
    match rpc.trim_start_matches('/') {
        "" => (
            Err(HandlerError::application(400, ErrorTag::InvalidValue, "Resource does not exist.")),
            None,
        ),
        GET_BOOTSTRAPPING_DATA => {
            let (result, details) = get_bootstrapping_data(server, req, device, encoding).await;
            (result, Some(details))
        }
        REPORT_PROGRESS => {
            let (result, details) = report_progress(server, req, device).await;
            (result, Some(details))
        }
        _ => (Err(not_found("Unrecognized RPC.")), None),
    }
}

/// The running datastore holds nothing a device may see or change
fn running(method: &Method, rest: &str) -> Result<RestconfResponse, HandlerError> {
    match *method {
        Method::GET | Method::HEAD if rest.is_empty() => Ok(RestconfResponse::no_content()),
        Method::GET | Method::HEAD => Err(not_found("Requested resource does not exist.")),
        Method::POST | Method::PUT | Method::DELETE if rest.is_empty() => Err(HandlerError::application(
            400,
            ErrorTag::InvalidValue,
            "Resource can not be modified.",
        )),
        Method::POST | Method::PUT | Method::DELETE => Err(not_found("Parent node does not exist.")),
        _ => Err(method_not_allowed()),
    }
}

/// The operational datastore only exposes the bootstrap server's yang-library
fn operational(method: &Method, rest: &str, encoding: Encoding) -> Result<RestconfResponse, HandlerError> {
    match *method {
        Method::GET | Method::HEAD if rest.is_empty() || rest == "/ietf-yang-library:yang-library" => {
            Ok(RestconfResponse::document(200, encoding, &yang_library()))
        }
        Method::GET | Method::HEAD => Err(not_found("Requested resource does not exist.")),
        Method::POST if rest.is_empty() => Err(HandlerError::application(
            400,
            ErrorTag::InvalidValue,
            "Resource does not support action.",
        )),
        Method::POST => Err(not_found("Resource does not exist.")),
        _ => Err(method_not_allowed()),
    }
}

/// Modules implemented by the bootstrap plane
fn yang_library() -> Value {
    let modules: Vec<Value> = [
        ("ietf-datastores", "2018-02-14", "urn:ietf:params:xml:ns:yang:ietf-datastores"),
        ("ietf-restconf", "2017-01-26", "urn:ietf:params:xml:ns:yang:ietf-restconf"),
        ("ietf-sztp-bootstrap-server", "2019-04-30", "urn:ietf:params:xml:ns:yang:ietf-sztp-bootstrap-server"),
        ("ietf-sztp-conveyed-info", "2019-04-30", "urn:ietf:params:xml:ns:yang:ietf-sztp-conveyed-info"),
        ("ietf-yang-library", "2019-01-04", "urn:ietf:params:xml:ns:yang:ietf-yang-library"),
    ]
    .iter()
    .map(|(name, revision, namespace)| json!({"name": name, "revision": revision, "namespace": namespace}))
    .collect();
    json!({
        "ietf-yang-library:yang-library": {
            "module-set": [{"name": "bootstrap", "module": modules}],
            "schema": [{"name": "bootstrap", "module-set": ["bootstrap"]}],
            "datastore": [
                {"name": "ietf-datastores:running", "schema": "bootstrap"},
                {"name": "ietf-datastores:operational", "schema": "bootstrap"}
            ],
            "content-id": YANG_LIBRARY_VERSION
        }
    })
}

fn not_found(message: &str) -> HandlerError {
    HandlerError::protocol(404, ErrorTag::UnknownElement, message)
}

fn method_not_allowed() -> HandlerError {
    HandlerError::protocol(405, ErrorTag::OperationNotSupported, "Method not allowed.")
}

/// Record a rejected device and produce the 401
async fn reject(server: &Server, req: &RestconfRequest, scope: &Scope, serial: Option<&str>, reason: &str) -> HandlerError {
    info!(serial = serial.unwrap_or("-"), source = %req.source_ip(), "device rejected: {}", reason);
    record_audit(server.dal.as_ref(), scope, audit_entry(req, Outcome::Failure, serial, Some(reason))).await;
    HandlerError::access_denied()
}

/// True when no device is configured anywhere
async fn inventory_is_empty(server: &Server) -> Result<bool, HandlerError> {
    if server.dal.list_len(&Scope::Global.path("devices/device")).await? > 0 {
        return Ok(false);
    }
    if server.mode() != Mode::MultiTenant {
        return Ok(true);
    }
    let tenants = match server.dal.get_config(&DataPath::root().join("tenants/tenant")).await {
        Ok(Value::Array(tenants)) => tenants,
        Ok(_) | Err(DalError::NodeNotFound(_)) => return Ok(true),
        Err(e) => return Err(e.into()),
    };
    for name in tenants.iter().filter_map(|t| t.get("name").and_then(Value::as_str)) {
        if server.dal.list_len(&Scope::Tenant(name.to_string()).path("devices/device")).await? > 0 {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Admit the device or fail closed. Rejections answer 401; a datastore
/// failure while identifying the device answers 500. Both are audited.
async fn authenticate(server: &Server, req: &RestconfRequest) -> Result<DeviceContext, HandlerError> {
    match identify(server, req).await {
        Err(err) if err.status != 401 => {
            let reason = format!(
                "Unable to authenticate device: {}",
                err.message().unwrap_or("internal error")
            );
            warn!(source = %req.source_ip(), "{}", reason);
            record_audit(
                server.dal.as_ref(),
                &Scope::Global,
                audit_entry(req, Outcome::Failure, None, Some(&reason)),
            )
            .await;
            Err(HandlerError::internal(reason))
        }
        admitted => admitted,
    }
}

async fn identify(server: &Server, req: &RestconfRequest) -> Result<DeviceContext, HandlerError> {
    let global = Scope::Global;
    let certs = match client_certificates(req, server.settings.trust_client_cert_header) {
        Ok(certs) => certs,
        Err(reason) => return Err(reject(server, req, &global, None, &reason).await),
    };
    let cert_serial = match certs.first().map(|der| serial_number(der)) {
        None => None,
        Some(Ok(serial)) => serial,
        Some(Err(e)) => {
            let reason = format!("Unable to parse client certificate: {}", e);
            return Err(reject(server, req, &global, None, &reason).await);
        }
    };
    let basic = match basic_credentials(req) {
        Ok(basic) => basic,
        Err(reason) => return Err(reject(server, req, &global, cert_serial.as_deref(), &reason).await),
    };
    let identity_certificate = if certs.is_empty() {
        None
    } else {
        match encode_certificate_bundle(&certs) {
            Ok(bundle) => Some(STANDARD.encode(bundle)),
            Err(e) => {
                let reason = format!("Unable to parse client certificate: {}", e);
                return Err(reject(server, req, &global, cert_serial.as_deref(), &reason).await);
            }
        }
    };

    if inventory_is_empty(server).await? {
        let serial = cert_serial.or_else(|| basic.as_ref().map(|b| b.username.clone()));
        let entry = audit_entry(
            req,
            Outcome::Success,
            serial.as_deref(),
            Some("No devices configured; admitting anonymously."),
        );
        record_audit(server.dal.as_ref(), &global, entry).await;
        return Ok(DeviceContext {
            serial_number: serial,
            scope: global,
            device: None,
            device_path: None,
            identity_certificate,
        });
    }

    let serial = match (cert_serial, basic.as_ref().map(|b| b.username.clone())) {
        (None, None) => {
            return Err(reject(server, req, &global, None, "Device provided no identification credentials.").await)
        }
        (Some(a), Some(b)) if a != b => {
            let reason = format!("Device provided mismatched authentication credentials ({} != {}).", a, b);
            return Err(reject(server, req, &global, None, &reason).await);
        }
        (Some(serial), _) | (None, Some(serial)) => serial,
    };

    let scope = match server.mode() {
        Mode::MultiTenant => match server.dal.find_tenant_for_device(&serial).await? {
            Some(tenant) => Scope::Tenant(tenant),
            None => global,
        },
        Mode::MultiDevice => global,
    };
    let device_path = scope.path("devices").child("device", Some(&serial));
    let device = match server.dal.get_config(&device_path).await {
        Ok(device) => device,
        Err(DalError::NodeNotFound(_)) => {
            let reason = format!("Device \"{}\" not found for any tenant.", serial);
            return Err(reject(server, req, &scope, Some(&serial), &reason).await);
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(stored) = device.get("activation-code").and_then(Value::as_str) {
        let reason = match basic.as_ref() {
            None => Some(format!("Activation code required but none passed for serial number {}", serial)),
            Some(creds) if !verify_password(&creds.password, stored) => {
                Some(format!("Activation code mismatch for serial number {}", serial))
            }
            Some(_) => None,
        };
        if let Some(reason) = reason {
            return Err(reject(server, req, &scope, Some(&serial), &reason).await);
        }
    }

    if let Some(device_type) = device.get("device-type").and_then(Value::as_str) {
        if let Some(anchors) = identity_anchors(server, &scope, device_type).await? {
            let reason = if certs.is_empty() {
                Some(format!("Client cert required but none passed for serial number {}", serial))
            } else if let Err(e) = validate_client_certificate(&certs, &anchors) {
                debug!(serial = %serial, "client certificate rejected: {}", e);
                Some(format!(
                    "Client cert for serial number '{}' does not validate using trust anchors specified by device-type '{}'",
                    serial, device_type
                ))
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(reject(server, req, &scope, Some(&serial), &reason).await);
            }
        }
    }

    record_audit(
        server.dal.as_ref(),
        &scope,
        audit_entry(req, Outcome::Success, Some(&serial), None),
    )
    .await;
    record_access(server, &device_path).await;

    Ok(DeviceContext {
        serial_number: Some(serial),
        scope,
        device: Some(device),
        device_path: Some(device_path),
        identity_certificate,
    })
}

/// Trust anchors a device type requires identity certificates to chain to,
/// or `None` if it does not verify them
async fn identity_anchors(server: &Server, scope: &Scope, device_type: &str) -> Result<Option<Vec<Vec<u8>>>, HandlerError> {
    let path = scope.path("device-types").child("device-type", Some(device_type));
    let config = server.dal.get_config(&path).await?;
    let Some(reference) = config.pointer("/identity-certificates/verification/local-truststore-reference") else {
        return Ok(None);
    };
    let Some(bag) = reference.get("certificate-bag").and_then(Value::as_str) else {
        return Ok(None);
    };
    let only = reference.get("certificate").and_then(Value::as_str);

    let bag_path = scope
        .path("truststore/certificate-bags")
        .child("certificate-bag", Some(bag));
    let bag = server.dal.get_config(&bag_path).await?;
    let mut anchors = Vec::new();
    for cert in bag.get("certificate").and_then(Value::as_array).into_iter().flatten() {
        if only.is_some_and(|name| cert.get("name").and_then(Value::as_str) != Some(name)) {
            continue;
        }
        let Some(data) = cert.get("cert-data").and_then(Value::as_str) else {
            continue;
        };
        let der = STANDARD
            .decode(data)
            .map_err(|e| HandlerError::internal(format!("Invalid cert-data in {}: {}", bag_path, e)))?;
        let certs = decode_certificate_bundle(&der)
            .map_err(|e| HandlerError::internal(format!("Invalid cert-data in {}: {}", bag_path, e)))?;
        anchors.extend(certs);
    }
    Ok(Some(anchors))
}

/// Bump `lifecycle-statistics/sbi-access-stats`
async fn record_access(server: &Server, device_path: &DataPath) {
    let now = timestamp();
    let edit = Box::new(move |stats: &mut Value| {
        if !stats.is_object() {
            *stats = json!({});
        }
        let count = stats.get("num-times-accessed").and_then(Value::as_u64).unwrap_or(0);
        if count == 0 {
            stats["first-accessed"] = json!(now);
        }
        stats["last-accessed"] = json!(now);
        stats["num-times-accessed"] = json!(count + 1);
    });
    let path = device_path.join("lifecycle-statistics/sbi-access-stats");
    if let Err(e) = server.dal.modify_opstate(&path, edit).await {
        warn!(%path, error = %e, "failed to update access statistics");
    }
}

/// Parse the RPC input. `Ok(None)` when no body was sent.
fn rpc_input(req: &RestconfRequest) -> Result<Option<Map<String, Value>>, HandlerError> {
    if !req.has_body() {
        return Ok(None);
    }
    let encoding = request_encoding(req.header_str(header::CONTENT_TYPE), ENCODINGS)?;
    let doc = encoding
        .decode(&req.body)
        .map_err(|e| HandlerError::malformed(format!("Unable to parse \"input\" document: {}", e)))?;
    match doc.get(INPUT) {
        Some(Value::Object(input)) => Ok(Some(input.clone())),
        Some(Value::Null) => Ok(Some(Map::new())),
        Some(_) => Err(HandlerError::malformed(format!("\"{}\" must be a container.", INPUT))),
        None => Err(HandlerError::malformed(format!("\"{}\" is missing.", INPUT))),
    }
}

/// Matched responses in effect: the device's own, else the scope's
async fn matched_responses(server: &Server, device: &DeviceContext) -> Result<Vec<MatchedResponse>, HandlerError> {
    let own = device
        .device
        .as_ref()
        .and_then(|d| d.pointer("/response-manager/matched-response"))
        .and_then(Value::as_array)
        .filter(|entries| !entries.is_empty())
        .cloned();
    let entries = match own {
        Some(entries) => entries,
        None => match server
            .dal
            .get_config(&device.scope.path("response-manager/matched-response"))
            .await
        {
            Ok(Value::Array(entries)) => entries,
            Ok(_) | Err(DalError::NodeNotFound(_)) => Vec::new(),
            Err(e) => return Err(e.into()),
        },
    };
    entries.iter().map(MatchedResponse::from_config).collect()
}

async fn get_bootstrapping_data(
    server: &Server,
    req: &RestconfRequest,
    device: &DeviceContext,
    encoding: Encoding,
) -> (Result<RestconfResponse, HandlerError>, Value) {
    let mut event = Map::new();
    let result = bootstrapping_data(server, req, device, encoding, &mut event).await;
    (result, json!({ "get-bootstrapping-data-event": Value::Object(event) }))
}

async fn bootstrapping_data(
    server: &Server,
    req: &RestconfRequest,
    device: &DeviceContext,
    encoding: Encoding,
    event: &mut Map<String, Value>,
) -> Result<RestconfResponse, HandlerError> {
    let input = rpc_input(req)?;
    match &input {
        Some(input) => event.insert("passed-input".into(), Value::Object(input.clone())),
        None => event.insert("no-input-passed".into(), json!([null])),
    };

    let responses = matched_responses(server, device).await?;
    if responses.is_empty() {
        event.insert("selected-response".into(), json!("no-responses-configured"));
        return Err(HandlerError::application(404, ErrorTag::DataMissing, "No responses configured."));
    }
    let Some(selected) = select(&responses, input.as_ref()) else {
        event.insert("selected-response".into(), json!("no-match-found"));
        return Err(HandlerError::application(404, ErrorTag::DataMissing, "No matching responses configured."));
    };
    if selected.body == ResponseBody::None {
        event.insert("selected-response".into(), json!(format!("{} (explicit 'none')", selected.name)));
    } else {
        event.insert("selected-response".into(), json!(selected.name));
    }

    let ctx = ResolveContext {
        server,
        scope: &device.scope,
        serial_number: device.serial_number.as_deref(),
        source_ip: req.source_ip(),
        input: input.as_ref(),
        identity_certificate: device.identity_certificate.clone(),
    };
    let mut details = Map::new();
    let resolved = selected.body.resolve(&ctx, &mut details).await;
    event.insert("response-details".into(), json!({ "managed-response": Value::Object(details) }));

    let output = conveyed::package(&resolved?, encoding)?;
    Ok(RestconfResponse::document(200, encoding, &output))
}

async fn report_progress(
    server: &Server,
    req: &RestconfRequest,
    device: &DeviceContext,
) -> (Result<RestconfResponse, HandlerError>, Value) {
    let mut event = Map::new();
    let result = progress(server, req, device, &mut event).await;
    (result, json!({ "report-progress-event": Value::Object(event) }))
}

async fn progress(
    server: &Server,
    req: &RestconfRequest,
    device: &DeviceContext,
    event: &mut Map<String, Value>,
) -> Result<RestconfResponse, HandlerError> {
    let Some(input) = rpc_input(req)? else {
        return Err(HandlerError::protocol(
            400,
            ErrorTag::MissingAttribute,
            "RPC \"input\" node missing (required for \"report-progress\").",
        ));
    };
    event.insert("passed-input".into(), Value::Object(input.clone()));

    let reference_path = device
        .scope
        .path("preferences/notification-delivery/dynamic-callout/reference");
    let reference = match server.dal.get_config(&reference_path).await {
        Ok(Value::String(name)) => name,
        Ok(_) | Err(DalError::NodeNotFound(_)) => {
            event.insert("dynamic-callout".into(), json!({"no-callout-configured": [null]}));
            return Ok(RestconfResponse::no_content());
        }
        Err(e) => return Err(e.into()),
    };

    let callout = conveyed::dynamic_callout(server.dal.as_ref(), &device.scope, &reference).await?;
    let mut details = Map::new();
    details.insert("reference".into(), json!(reference));

    if let Some(webhooks) = callout.get("webhooks") {
        let notification = json!({ INPUT: Value::Object(input) });
        let results = relay_notification(&server.http, webhooks, &notification).await;
        details.insert("webhook-results".into(), json!({ "webhook": results }));
    } else if let Some(callback) = callout.get("callback") {
        let plugin = callback.get("plugin").and_then(Value::as_str).unwrap_or_default();
        let function = callback.get("function").and_then(Value::as_str).unwrap_or_default();
        details.insert("callback-details".into(), json!({"plugin": plugin, "function": function}));
        let callout_input = json!({
            "serial-number": device.serial_number,
            "source-ip-address": req.source_ip(),
            "notification": Value::Object(input),
        });
        let outcome = match server.plugins.invoke(plugin, function, &callout_input).await {
            Ok(CalloutReply::ConveyedInformation(_)) => json!({"exited-normally": "notification delivered"}),
            Ok(CalloutReply::RestconfErrors(errors)) => {
                let tag = sztp_core::restconf::first_error_tag(&errors).unwrap_or("operation-failed");
                json!({"exited-normally": format!("returned RESTCONF errors ({})", tag)})
            }
            Err(PluginError::Callout(e)) => {
                warn!(plugin, function, "progress callout failed: {}", e);
                json!({"exception-thrown": e.to_string()})
            }
            Err(e) => {
                warn!(plugin, function, "progress callout unavailable: {}", e);
                json!({"exception-thrown": e.to_string()})
            }
        };
        details.insert("callback-results".into(), outcome);
    }
    event.insert("dynamic-callout".into(), Value::Object(details));
    Ok(RestconfResponse::no_content())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_path() {
        let device = DeviceContext {
            serial_number: Some("SN-1".into()),
            scope: Scope::Tenant("acme".into()),
            device: None,
            device_path: Some(Scope::Tenant("acme".into()).path("devices").child("device", Some("SN-1"))),
            identity_certificate: None,
        };
        assert_eq!(
            device.log_path().to_string(),
            "/sztpd:tenants/tenant=acme/devices/device=SN-1/bootstrapping-log/log-entry"
        );
        let anonymous = DeviceContext {
            device_path: None,
            scope: Scope::Global,
            ..device
        };
        assert_eq!(anonymous.log_path().to_string(), "/sztpd:bootstrapping-log/log-entry");
    }

    #[test]
    fn test_rpc_input() {
        let uri = format!("{}/{}", OPERATIONS, GET_BOOTSTRAPPING_DATA).parse().unwrap();
        let req = RestconfRequest::new(Method::POST, &uri);
        assert_eq!(rpc_input(&req).unwrap(), None);

        let req = RestconfRequest::new(Method::POST, &uri).json_body(&json!({INPUT: {"hw-model": "x1"}}));
        assert_eq!(rpc_input(&req).unwrap().unwrap()["hw-model"], "x1");

        let req = RestconfRequest::new(Method::POST, &uri).json_body(&json!({"other:input": {}}));
        assert_eq!(rpc_input(&req).unwrap_err().status, 400);
    }
}
