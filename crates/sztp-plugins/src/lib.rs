//! Callout plugin host for sztpd
//!
//! Dynamic callouts resolve bootstrapping responses (and relay progress
//! reports) through functions exposed by plugins. See [`PluginHost`].

pub mod builtin;
pub mod callout;
pub mod error;
pub mod host;

pub use builtin::BUILTIN_PLUGIN;
pub use callout::{Callout, CalloutError, CalloutReply, FnCallout};
pub use error::{PluginError, Result};
pub use host::{PluginAttribute, PluginFactory, PluginHost, PluginModule};
