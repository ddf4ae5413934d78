//! Lumen Photos - SQLite document store
//!
//! Local stand-in for the remote document store. Documents are JSON text
//! keyed by (collection, id). Sealed records are already ciphertext, so the
//! database itself is not encrypted.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::{VaultError, VaultResult};
use crate::store::{merge_json, DocumentStore};

/// Document store backed by a single SQLite file
pub struct SqliteStore {
    /// Database connection
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> VaultResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Throwaway in-memory database
    pub fn in_memory() -> VaultResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> VaultResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn read(conn: &Connection, collection: &str, id: &str) -> VaultResult<Option<Value>> {
        let text: Option<String> = conn
            .query_row(
                "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;

        match text {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// Number of documents in a collection
    pub fn count(&self, collection: &str) -> VaultResult<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get_document(&self, collection: &str, id: &str) -> VaultResult<Option<Value>> {
        let conn = self.conn.lock();
        Self::read(&conn, collection, id)
    }

    async fn set_document(&self, collection: &str, id: &str, data: Value, merge: bool) -> VaultResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let document = match (merge, Self::read(&tx, collection, id)?) {
            (true, Some(mut existing)) => {
                merge_json(&mut existing, data);
                existing
            }
            _ => data,
        };

        let text = serde_json::to_string(&document)
            .map_err(|e| VaultError::Serialization(e.to_string()))?;
        tx.execute(
            "INSERT OR REPLACE INTO documents (collection, id, data, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![collection, id, text, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_roundtrip_and_merge() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .set_document("users", "u1", json!({ "name": "Ada", "prefs": { "a": 1 } }), false)
            .await
            .unwrap();
        store
            .set_document("users", "u1", json!({ "prefs": { "b": 2 } }), true)
            .await
            .unwrap();

        let doc = store.get_document("users", "u1").await.unwrap().unwrap();
        assert_eq!(doc, json!({ "name": "Ada", "prefs": { "a": 1, "b": 2 } }));
        assert_eq!(store.count("users").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_is_none() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get_document("albumKeys", "A1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persists_across_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db").join("store.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .set_document("albumKeys", "A1", json!({ "albumId": "A1" }), false)
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let doc = store.get_document("albumKeys", "A1").await.unwrap().unwrap();
        assert_eq!(doc["albumId"], "A1");
    }
}
