//! sztpd datastore
//!
//! Holds the configuration and operational-state tree behind two narrow
//! contracts used by the request handlers:
//!
//! - [`ValidationLayer`]: schema checks on paths, input documents and
//!   complete candidate trees (including leafref integrity)
//! - [`DataAccessLayer`]: reads, validated writes with callback dispatch,
//!   and append-only operational state
//!
//! The shipped implementations are [`SchemaValidator`] over the compiled-in
//! SZTPD data model and [`MemoryStore`], optionally persisted through
//! [`SqliteStore`].

pub mod dal;
pub mod error;
pub mod model;
pub mod schema;
pub mod sqlite_store;
pub mod tree;
pub mod validation;

pub use dal::{DataAccessLayer, Insert};
pub use error::{DalError, DalResult, StoreError, ValidationError};
pub use model::sztpd_schema;
pub use schema::{LeafType, NodeKind, Schema, SchemaNode};
pub use sqlite_store::SqliteStore;
pub use tree::{locate, MemoryStore};
pub use validation::{unwrap_document, SchemaValidator, ValidationLayer};
