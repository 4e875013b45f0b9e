//! sztpd request handling
//!
//! Two planes share one [`Server`] context:
//!
//! - `native`: the management plane, a RESTCONF interface over the
//!   datastore for administrators
//! - `rfc8572`: the bootstrap plane devices call to obtain conveyed
//!   information and report progress
//!
//! Handlers work on transport-neutral [`RestconfRequest`]s; `routes` adapts
//! them to axum.

pub mod audit;
pub mod auth;
pub mod callbacks;
pub mod conveyed;
pub mod encoding;
pub mod error;
pub mod native;
pub mod policy;
pub mod request;
pub mod rfc8572;
pub mod routes;
pub mod scheduler;
pub mod server;
pub mod webhook;

pub use encoding::Encoding;
pub use error::{HandlerError, Result, ServerError};
pub use policy::{MatchCriterion, MatchedResponse, ResponseBody};
pub use request::{RestconfRequest, RestconfResponse};
pub use routes::{bootstrap_router, management_router};
pub use scheduler::spawn_scheduler;
pub use server::{ListenEndpoint, Server, Settings};
