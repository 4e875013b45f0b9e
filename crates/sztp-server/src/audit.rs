//! Audit-log and bootstrapping-log entries

use crate::request::RestconfRequest;
use axum::http::header;
use chrono::Utc;
use serde_json::{json, Map, Value};
use sztp_core::{DataPath, Scope};
use sztp_state_store::DataAccessLayer;
use tracing::warn;

/// Timestamps as stored in the datastore (UTC, second precision)
pub fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

/// One `audit-log/log-entry`
pub fn audit_entry(
    req: &RestconfRequest,
    outcome: Outcome,
    serial_number: Option<&str>,
    comment: Option<&str>,
) -> Value {
    let mut entry = Map::new();
    entry.insert("timestamp".into(), json!(timestamp()));
    entry.insert("source-ip".into(), json!(req.source_ip()));
    if let Some(proxies) = req.header_str("x-forwarded-for") {
        let proxies: Vec<&str> = proxies.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
        entry.insert("source-proxies".into(), json!(proxies));
    }
    if let Some(host) = req.header_str(header::HOST) {
        entry.insert("host".into(), json!(host));
    }
    entry.insert("method".into(), json!(req.method.as_str()));
    entry.insert("path".into(), json!(req.path));
    entry.insert("outcome".into(), json!(outcome.as_str()));
    if let Some(serial) = serial_number {
        entry.insert("serial-number".into(), json!(serial));
    }
    if let Some(comment) = comment {
        entry.insert("comment".into(), json!(comment));
    }
    Value::Object(entry)
}

/// Append to `<scope>/audit-log/log-entry`. Failures are logged, not returned:
/// the response to the client must not depend on them.
pub async fn record_audit(dal: &dyn DataAccessLayer, scope: &Scope, entry: Value) {
    let path = scope.path("audit-log/log-entry");
    if let Err(e) = dal.append_opstate(&path, entry).await {
        warn!(%path, error = %e, "failed to append audit-log entry");
    }
}

/// One `bootstrapping-log/log-entry`, filled in as the exchange progresses
#[derive(Debug, Clone)]
pub struct BootstrapLogEntry {
    pub timestamp: String,
    pub source_ip: String,
    pub method: String,
    pub path: String,
    pub return_code: u16,
    pub error_returned: Option<Value>,
    pub event_details: Option<Value>,
}

impl BootstrapLogEntry {
    pub fn new(req: &RestconfRequest) -> Self {
        Self {
            timestamp: timestamp(),
            source_ip: req.source_ip(),
            method: req.method.to_string(),
            path: req.path.clone(),
            return_code: 0,
            error_returned: None,
            event_details: None,
        }
    }

    pub fn to_json(&self) -> Value {
        let mut entry = Map::new();
        entry.insert("timestamp".into(), json!(self.timestamp));
        entry.insert("source-ip".into(), json!(self.source_ip));
        entry.insert("method".into(), json!(self.method));
        entry.insert("path".into(), json!(self.path));
        entry.insert("return-code".into(), json!(self.return_code));
        if let Some(err) = &self.error_returned {
            entry.insert("error-returned".into(), err.clone());
        }
        if let Some(details) = &self.event_details {
            entry.insert("event-details".into(), details.clone());
        }
        Value::Object(entry)
    }

    pub async fn record(&self, dal: &dyn DataAccessLayer, log: &DataPath) {
        if let Err(e) = dal.append_opstate(log, self.to_json()).await {
            warn!(path = %log, error = %e, "failed to append bootstrapping-log entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, Uri};

    #[test]
    fn test_audit_entry_fields() {
        let uri: Uri = "/restconf/operations/ietf-sztp-bootstrap-server:get-bootstrapping-data"
            .parse()
            .unwrap();
        let req = RestconfRequest::new(Method::POST, &uri)
            .header(header::HOST, "sztp.example")
            .header("x-forwarded-for".parse().unwrap(), "10.0.0.1, 10.0.0.2")
            .remote_addr("192.0.2.7:4431".parse().unwrap());

        let entry = audit_entry(&req, Outcome::Failure, Some("SN-1"), Some("Activation code mismatch"));
        assert_eq!(entry["source-ip"], "192.0.2.7");
        assert_eq!(entry["source-proxies"], json!(["10.0.0.1", "10.0.0.2"]));
        assert_eq!(entry["host"], "sztp.example");
        assert_eq!(entry["method"], "POST");
        assert_eq!(entry["outcome"], "failure");
        assert_eq!(entry["serial-number"], "SN-1");
        assert_eq!(entry["timestamp"].as_str().unwrap().len(), 20);
    }
}
