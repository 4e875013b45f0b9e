//! Deployment mode and datastore scoping

use crate::error::Error;
use crate::path::DataPath;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// YANG module prefix of the server's own data model
pub const MODULE: &str = "sztpd";

/// How the device inventory is organized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// One inventory at `/sztpd:devices` (mode `1`)
    MultiDevice,
    /// Inventories per tenant at `/sztpd:tenants/tenant=NAME/devices` (mode `x`)
    MultiTenant,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" | "multi-device" => Ok(Mode::MultiDevice),
            "x" | "multi-tenant" => Ok(Mode::MultiTenant),
            other => Err(Error::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::MultiDevice => write!(f, "1"),
            Mode::MultiTenant => write!(f, "x"),
        }
    }
}

/// The subtree a device and its policies live in
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Tenant(String),
}

impl Scope {
    /// Path of the scope itself (root for `Global`)
    pub fn base(&self) -> DataPath {
        match self {
            Scope::Global => DataPath::root(),
            Scope::Tenant(name) => DataPath::root()
                .child("tenants", None)
                .child("tenant", Some(name)),
        }
    }

    /// Path of a keyless relative node inside the scope, e.g. `"devices"`
    pub fn path(&self, rel: &str) -> DataPath {
        self.base().join(rel)
    }

    pub fn tenant(&self) -> Option<&str> {
        match self {
            Scope::Global => None,
            Scope::Tenant(name) => Some(name),
        }
    }
}
