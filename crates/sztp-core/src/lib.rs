//! Core types and utilities for sztpd
//!
//! # Modules
//!
//! - `callbacks`: Lifecycle callback registry and post-commit hook queue
//! - `config`: Environment configuration loader
//! - `error`: Error types and Result alias
//! - `gate`: FIFO-fair read/write gate guarding the datastore
//! - `path`: RESTCONF data paths and their schema-path normalization
//! - `restconf`: RESTCONF error taxonomy
//! - `types`: Deployment mode and datastore scope

pub mod callbacks;
pub mod config;
pub mod error;
pub mod gate;
pub mod path;
pub mod restconf;
pub mod types;

// Re-exports
pub use callbacks::{
    CallbackContext, CallbackError, CallbackRegistry, ChangeEvent, EventKind, PostCommitQueue,
    RefAction, Transaction,
};
pub use error::{Error, Result};
pub use gate::{FifoGate, GateGuard, GateMode};
pub use path::{percent_decode, DataPath, PathSegment};
pub use restconf::{ErrorTag, ErrorType, RestconfError};
pub use types::{Mode, Scope, MODULE};
