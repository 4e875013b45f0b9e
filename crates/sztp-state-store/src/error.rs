use sztp_core::CallbackError;
use thiserror::Error;

/// Persistence failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Datastore was created in mode {stored}, refusing to start in mode {requested}")]
    ModeMismatch { stored: String, requested: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Schema and input-document problems
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid data path: {0}")]
    InvalidDataPath(String),
    #[error("Nonexistent schema node: {0}")]
    NonexistentSchemaNode(String),
    #[error("Invalid input document: {0}")]
    InvalidInputDocument(String),
    #[error("Unrecognized input node: {0}")]
    UnrecognizedInputNode(String),
    #[error("Unrecognized query parameter: {0}")]
    UnrecognizedQueryParameter(String),
    #[error("Invalid query parameter: {0}")]
    InvalidQueryParameter(String),
    #[error("Missing query parameter: {0}")]
    MissingQueryParameter(String),
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

/// Data Access Layer failures
#[derive(Error, Debug)]
pub enum DalError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Node already exists: {0}")]
    NodeAlreadyExists(String),
    #[error("Parent node not found: {0}")]
    ParentNodeNotFound(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Callback failed: {0}")]
    Callback(#[from] CallbackError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type DalResult<T> = std::result::Result<T, DalError>;
