//! Error types for sztp-server

use serde_json::Value;
use sztp_core::restconf::first_error_tag;
use sztp_core::{CallbackError, ErrorTag, RestconfError};
use sztp_plugins::PluginError;
use sztp_state_store::{DalError, StoreError, ValidationError};
use thiserror::Error;

/// Startup and plumbing failures
#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Dal(#[from] DalError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Http(#[from] sztp_http::ServerError),

    #[error(transparent)]
    Core(#[from] sztp_core::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// A failed exchange: the HTTP status plus the `ietf-restconf:errors`
/// document returned with it
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{status} {}", first_error_tag(.errors).unwrap_or("-"))]
pub struct HandlerError {
    pub status: u16,
    pub errors: Value,
}

impl HandlerError {
    pub fn new(status: u16, error: RestconfError) -> Self {
        Self {
            status,
            errors: error.to_document(),
        }
    }

    pub fn protocol(status: u16, tag: ErrorTag, message: impl Into<String>) -> Self {
        Self::new(status, RestconfError::protocol(tag, message))
    }

    pub fn application(status: u16, tag: ErrorTag, message: impl Into<String>) -> Self {
        Self::new(status, RestconfError::application(tag, message))
    }

    /// Pass an errors document through unchanged, e.g. one returned by a callout
    pub fn passthrough(status: u16, errors: Value) -> Self {
        Self { status, errors }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::application(500, ErrorTag::OperationFailed, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::protocol(400, ErrorTag::MalformedMessage, message)
    }

    pub fn access_denied() -> Self {
        Self::new(
            401,
            RestconfError::new(sztp_core::ErrorType::Protocol, ErrorTag::AccessDenied),
        )
    }

    /// error-tag of the first error
    pub fn tag(&self) -> Option<&str> {
        first_error_tag(&self.errors)
    }

    /// error-message of the first error
    pub fn message(&self) -> Option<&str> {
        self.errors
            .pointer("/ietf-restconf:errors/error/0/error-message")
            .and_then(Value::as_str)
    }
}

impl From<ValidationError> for HandlerError {
    fn from(err: ValidationError) -> Self {
        let msg = err.to_string();
        match err {
            ValidationError::InvalidDataPath(_)
            | ValidationError::UnrecognizedQueryParameter(_)
            | ValidationError::InvalidQueryParameter(_) => {
                HandlerError::protocol(400, ErrorTag::InvalidValue, msg)
            }
            ValidationError::MissingQueryParameter(_) => {
                HandlerError::protocol(400, ErrorTag::MissingAttribute, msg)
            }
            ValidationError::UnrecognizedInputNode(_) => {
                HandlerError::application(400, ErrorTag::UnknownElement, msg)
            }
            ValidationError::NonexistentSchemaNode(_)
            | ValidationError::InvalidInputDocument(_)
            | ValidationError::ValidationFailed(_) => {
                HandlerError::application(400, ErrorTag::InvalidValue, msg)
            }
        }
    }
}

impl From<CallbackError> for HandlerError {
    fn from(err: CallbackError) -> Self {
        match err {
            CallbackError::Failed(msg) => HandlerError::application(400, ErrorTag::OperationFailed, msg),
            CallbackError::NotSupported(msg) | CallbackError::Plugin(msg) => {
                HandlerError::application(501, ErrorTag::OperationNotSupported, msg)
            }
        }
    }
}

impl From<PluginError> for HandlerError {
    fn from(err: PluginError) -> Self {
        HandlerError::application(501, ErrorTag::OperationNotSupported, err.to_string())
    }
}

impl From<DalError> for HandlerError {
    fn from(err: DalError) -> Self {
        match err {
            DalError::NodeNotFound(path) | DalError::ParentNodeNotFound(path) => HandlerError::protocol(
                404,
                ErrorTag::UnknownElement,
                format!("Node \"{}\" does not exist.", path),
            ),
            DalError::NodeAlreadyExists(path) => HandlerError::application(
                409,
                ErrorTag::DataExists,
                format!("Node \"{}\" already exists.", path),
            ),
            DalError::Validation(e) => e.into(),
            DalError::Callback(e) => e.into(),
            DalError::Store(e) => HandlerError::internal(e.to_string()),
        }
    }
}

impl From<sztp_core::Error> for HandlerError {
    fn from(err: sztp_core::Error) -> Self {
        match err {
            sztp_core::Error::InvalidPath(_) => {
                HandlerError::protocol(400, ErrorTag::InvalidValue, err.to_string())
            }
            other => HandlerError::internal(other.to_string()),
        }
    }
}
