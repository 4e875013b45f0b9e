//! RESTCONF error taxonomy (RFC 8040 section 7)

use serde_json::{json, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Transport,
    Rpc,
    Protocol,
    Application,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Transport => "transport",
            ErrorType::Rpc => "rpc",
            ErrorType::Protocol => "protocol",
            ErrorType::Application => "application",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorTag {
    InUse,
    InvalidValue,
    TooBig,
    MissingAttribute,
    BadAttribute,
    UnknownAttribute,
    BadElement,
    UnknownElement,
    UnknownNamespace,
    AccessDenied,
    LockDenied,
    ResourceDenied,
    RollbackFailed,
    DataExists,
    DataMissing,
    OperationNotSupported,
    OperationFailed,
    PartialOperation,
    MalformedMessage,
}

const TAGS: &[(ErrorTag, &str)] = &[
    (ErrorTag::InUse, "in-use"),
    (ErrorTag::InvalidValue, "invalid-value"),
    (ErrorTag::TooBig, "too-big"),
    (ErrorTag::MissingAttribute, "missing-attribute"),
    (ErrorTag::BadAttribute, "bad-attribute"),
    (ErrorTag::UnknownAttribute, "unknown-attribute"),
    (ErrorTag::BadElement, "bad-element"),
    (ErrorTag::UnknownElement, "unknown-element"),
    (ErrorTag::UnknownNamespace, "unknown-namespace"),
    (ErrorTag::AccessDenied, "access-denied"),
    (ErrorTag::LockDenied, "lock-denied"),
    (ErrorTag::ResourceDenied, "resource-denied"),
    (ErrorTag::RollbackFailed, "rollback-failed"),
    (ErrorTag::DataExists, "data-exists"),
    (ErrorTag::DataMissing, "data-missing"),
    (ErrorTag::OperationNotSupported, "operation-not-supported"),
    (ErrorTag::OperationFailed, "operation-failed"),
    (ErrorTag::PartialOperation, "partial-operation"),
    (ErrorTag::MalformedMessage, "malformed-message"),
];

impl ErrorTag {
    pub fn as_str(&self) -> &'static str {
        TAGS.iter()
            .find(|(tag, _)| tag == self)
            .map(|(_, name)| *name)
            .unwrap_or("operation-failed")
    }

    pub fn parse(name: &str) -> Option<ErrorTag> {
        TAGS.iter().find(|(_, n)| *n == name).map(|(tag, _)| *tag)
    }

    /// HTTP status a RESTCONF server returns for this tag
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorTag::InvalidValue
            | ErrorTag::TooBig
            | ErrorTag::MissingAttribute
            | ErrorTag::BadAttribute
            | ErrorTag::UnknownAttribute
            | ErrorTag::BadElement
            | ErrorTag::UnknownElement
            | ErrorTag::UnknownNamespace
            | ErrorTag::MalformedMessage => 400,
            ErrorTag::AccessDenied => 403,
            ErrorTag::InUse
            | ErrorTag::LockDenied
            | ErrorTag::ResourceDenied
            | ErrorTag::DataExists
            | ErrorTag::DataMissing => 409,
            ErrorTag::RollbackFailed | ErrorTag::OperationFailed | ErrorTag::PartialOperation => 500,
            ErrorTag::OperationNotSupported => 501,
        }
    }
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `error` entry of an `ietf-restconf:errors` document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestconfError {
    pub error_type: ErrorType,
    pub error_tag: ErrorTag,
    pub error_message: Option<String>,
}

impl RestconfError {
    pub fn new(error_type: ErrorType, error_tag: ErrorTag) -> Self {
        Self {
            error_type,
            error_tag,
            error_message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn protocol(tag: ErrorTag, message: impl Into<String>) -> Self {
        Self::new(ErrorType::Protocol, tag).with_message(message)
    }

    pub fn application(tag: ErrorTag, message: impl Into<String>) -> Self {
        Self::new(ErrorType::Application, tag).with_message(message)
    }

    pub fn to_json(&self) -> Value {
        let mut entry = json!({
            "error-type": self.error_type.as_str(),
            "error-tag": self.error_tag.as_str(),
        });
        if let Some(msg) = &self.error_message {
            entry["error-message"] = Value::String(msg.clone());
        }
        entry
    }

    /// Wrap this error in a complete `ietf-restconf:errors` document
    pub fn to_document(&self) -> Value {
        errors_document(std::slice::from_ref(self))
    }
}

/// Build an `ietf-restconf:errors` document
pub fn errors_document(errors: &[RestconfError]) -> Value {
    json!({
        "ietf-restconf:errors": {
            "error": errors.iter().map(RestconfError::to_json).collect::<Vec<_>>()
        }
    })
}

/// First error-tag found in an `ietf-restconf:errors` document
pub fn first_error_tag(doc: &Value) -> Option<&str> {
    doc.get("ietf-restconf:errors")?
        .get("error")?
        .as_array()?
        .first()?
        .get("error-tag")?
        .as_str()
}
