//! SQLite-based persistence for the datastore
//!
//! The whole tree is stored as one JSON document and rewritten after every
//! committed write. The deployment mode is recorded on first start so a
//! database cannot be reopened in the other mode.

use crate::error::{Result, StoreError};
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use sztp_core::Mode;
use tracing::{debug, info};

/// SQLite-backed snapshot store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url`.
    ///
    /// URL format: `sqlite:///path/to/sztpd.db` or `sqlite::memory:`
    pub async fn new(url: &str) -> Result<Self> {
        info!("Opening SQLite datastore: {}", url);

        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // single connection: an in-memory database exists per connection
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    /// Create an in-memory store for testing
    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    async fn initialize_schema(&self) -> Result<()> {
        debug!("Initializing database schema");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS datastore (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                document TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS server_info (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Last saved document, if any
    pub async fn load(&self) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT document FROM datastore WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let document: String = row.get("document");
                Ok(Some(serde_json::from_str(&document)?))
            }
            None => Ok(None),
        }
    }

    pub async fn save(&self, document: &Value) -> Result<()> {
        let json = serde_json::to_string(document)?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO datastore (id, document, updated_at)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                document = excluded.document,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&json)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        debug!("Saved datastore ({} bytes)", json.len());
        Ok(())
    }

    /// Record `mode` on first use; afterwards it must match the recorded one.
    pub async fn check_mode(&self, mode: Mode) -> Result<()> {
        let row = sqlx::query("SELECT value FROM server_info WHERE key = 'mode'")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let stored: String = row.get("value");
                if stored != mode.to_string() {
                    return Err(StoreError::ModeMismatch {
                        stored,
                        requested: mode.to_string(),
                    });
                }
                Ok(())
            }
            None => {
                sqlx::query("INSERT INTO server_info (key, value) VALUES ('mode', ?)")
                    .bind(mode.to_string())
                    .execute(&self.pool)
                    .await?;
                info!("Datastore initialized in mode {}", mode);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_and_load() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.load().await.unwrap().is_none());

        let doc = json!({"sztpd:devices": {"device": [{"serial-number": "A"}]}});
        store.save(&doc).await.unwrap();
        store.save(&doc).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(doc));
    }

    #[tokio::test]
    async fn test_mode_is_pinned() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.check_mode(Mode::MultiTenant).await.unwrap();
        store.check_mode(Mode::MultiTenant).await.unwrap();
        let err = store.check_mode(Mode::MultiDevice).await.unwrap_err();
        assert!(matches!(err, StoreError::ModeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("sztpd.db").display());

        let doc = json!({"sztpd:transport": {}});
        {
            let store = SqliteStore::new(&url).await.unwrap();
            store.save(&doc).await.unwrap();
        }
        let store = SqliteStore::new(&url).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(doc));
    }
}
