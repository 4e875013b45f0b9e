//! Data Access Layer contract

use crate::error::DalResult;
use async_trait::async_trait;
use serde_json::Value;
use sztp_core::{DataPath, Transaction};

/// Where a new entry of an ordered-by-user list goes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Insert {
    First,
    #[default]
    Last,
    /// Before the entry with the given key
    Before(String),
    /// After the entry with the given key
    After(String),
}

/// Storage of the configuration and operational-state tree.
///
/// Writes validate the complete candidate tree before it replaces the live
/// one, then dispatch the transaction's callbacks against the committed
/// nodes. A callback failure is returned after the commit; the write stays.
#[async_trait]
pub trait DataAccessLayer: Send + Sync {
    /// Configuration at `path` (state nodes stripped)
    async fn get_config(&self, path: &DataPath) -> DalResult<Value>;

    /// Configuration and state at `path`
    async fn get_opstate(&self, path: &DataPath) -> DalResult<Value>;

    async fn exists(&self, path: &DataPath) -> DalResult<bool>;

    /// Create child `name` of `parent`; fails if it already exists. Returns the new node's path.
    async fn post(
        &self,
        parent: &DataPath,
        name: &str,
        value: Value,
        insert: &Insert,
        txn: &mut Transaction<'_>,
    ) -> DalResult<DataPath>;

    /// Create or replace the node at `path`. Returns `true` if it was created.
    async fn put(
        &self,
        path: &DataPath,
        value: Value,
        insert: &Insert,
        txn: &mut Transaction<'_>,
    ) -> DalResult<bool>;

    async fn delete(&self, path: &DataPath, txn: &mut Transaction<'_>) -> DalResult<()>;

    /// Append an entry to the state list at `path`, creating empty state containers on the way
    async fn append_opstate(&self, path: &DataPath, entry: Value) -> DalResult<()>;

    /// Edit the state node at `path` in place, creating it as `{}` if absent
    async fn modify_opstate(
        &self,
        path: &DataPath,
        edit: Box<dyn for<'v> FnOnce(&'v mut Value) + Send>,
    ) -> DalResult<()>;

    /// Number of entries in the list at `path`; zero if absent
    async fn list_len(&self, path: &DataPath) -> DalResult<usize>;

    /// Name of the tenant whose inventory holds `serial_number`
    async fn find_tenant_for_device(&self, serial_number: &str) -> DalResult<Option<String>>;

    /// Copy of the whole tree, state included
    async fn snapshot(&self) -> Value;
}
