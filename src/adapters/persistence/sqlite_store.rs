//! SQLite-backed document store via libsql. Implements EntityStore.
//!
//! One `documents` table keyed by (kind, id); bodies are stored as JSON text.
//! Filters are evaluated in-process after loading a kind's documents.

use crate::adapters::persistence::{explicit_id, merge_patch, require_object};
use crate::domain::{EntityKind, StoreError};
use crate::ports::{EntityStore, ListFilter};
use libsql::{Database, params};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

const DOCUMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    kind TEXT NOT NULL,
    id TEXT NOT NULL,
    body TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (kind, id)
)"#;

/// SQLite store. One database file (campus.db) in the given base directory.
pub struct SqliteStore {
    db: Database,
    db_path: PathBuf,
    seq: AtomicU64,
}

fn unavailable(e: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

impl SqliteStore {
    /// Connect to (or create) the database and ensure the schema exists.
    /// Sets WAL mode so readers do not block the single writer.
    pub async fn connect(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base = base_dir.as_ref();
        std::fs::create_dir_all(base).map_err(unavailable)?;
        let db_path = base.join("campus.db");
        let path_str = db_path.to_string_lossy();
        let db = libsql::Builder::new_local(path_str.as_ref())
            .build()
            .await
            .map_err(unavailable)?;
        let conn = db.connect().map_err(unavailable)?;

        // PRAGMA returns a row; consume it (execute fails when rows are returned).
        let mut wal_rows = conn
            .query("PRAGMA journal_mode=WAL", ())
            .await
            .map_err(|e| StoreError::Unavailable(format!("WAL pragma failed: {}", e)))?;
        while wal_rows.next().await.map_err(unavailable)?.is_some() {}

        conn.execute(DOCUMENTS_TABLE, ()).await.map_err(unavailable)?;

        info!(path = %db_path.display(), "SQLite document store connected");

        Ok(Self {
            db,
            db_path,
            seq: AtomicU64::new(1),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn generate_id(&self, kind: EntityKind) -> String {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", kind, chrono::Utc::now().timestamp_millis(), n)
    }

    fn parse_body(kind: EntityKind, id: &str, body: &str) -> Result<Value, StoreError> {
        serde_json::from_str(body).map_err(|e| {
            StoreError::Unavailable(format!("corrupt {} {} document: {}", kind, id, e))
        })
    }
}

#[async_trait::async_trait]
impl EntityStore for SqliteStore {
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Value, StoreError> {
        let conn = self.db.connect().map_err(unavailable)?;
        let mut rows = conn
            .query(
                "SELECT body FROM documents WHERE kind = ?1 AND id = ?2",
                params![kind.collection(), id],
            )
            .await
            .map_err(unavailable)?;
        match rows.next().await.map_err(unavailable)? {
            Some(row) => {
                let body: String = row.get(0).map_err(unavailable)?;
                Self::parse_body(kind, id, &body)
            }
            None => Err(StoreError::NotFound {
                kind,
                id: id.to_string(),
            }),
        }
    }

    async fn list(
        &self,
        kind: EntityKind,
        filter: Option<&ListFilter>,
    ) -> Result<Vec<Value>, StoreError> {
        let conn = self.db.connect().map_err(unavailable)?;
        let mut rows = conn
            .query(
                "SELECT id, body FROM documents WHERE kind = ?1 ORDER BY id",
                params![kind.collection()],
            )
            .await
            .map_err(unavailable)?;
        let mut docs = Vec::new();
        while let Some(row) = rows.next().await.map_err(unavailable)? {
            let id: String = row.get(0).map_err(unavailable)?;
            let body: String = row.get(1).map_err(unavailable)?;
            let doc = Self::parse_body(kind, &id, &body)?;
            if filter.is_none_or(|f| f.matches(&doc)) {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    async fn create(&self, kind: EntityKind, mut body: Value) -> Result<Value, StoreError> {
        require_object(kind, &body)?;
        let id = match explicit_id(kind, &body)? {
            Some(id) => id,
            None => self.generate_id(kind),
        };
        body["id"] = Value::String(id.clone());
        let text = serde_json::to_string(&body).map_err(unavailable)?;

        let conn = self.db.connect().map_err(unavailable)?;
        let inserted = conn
            .execute(
                r#"
                INSERT INTO documents (kind, id, body, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT (kind, id) DO NOTHING
                "#,
                params![kind.collection(), id.as_str(), text, now_secs()],
            )
            .await
            .map_err(unavailable)?;
        if inserted == 0 {
            return Err(StoreError::Validation(format!(
                "{} {} already exists",
                kind, id
            )));
        }
        Ok(body)
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        partial: Value,
    ) -> Result<Value, StoreError> {
        let conn = self.db.connect().map_err(unavailable)?;
        let tx = conn.transaction().await.map_err(unavailable)?;
        let mut rows = tx
            .query(
                "SELECT body FROM documents WHERE kind = ?1 AND id = ?2",
                params![kind.collection(), id],
            )
            .await
            .map_err(unavailable)?;
        let body: String = match rows.next().await.map_err(unavailable)? {
            Some(row) => row.get(0).map_err(unavailable)?,
            None => {
                return Err(StoreError::NotFound {
                    kind,
                    id: id.to_string(),
                });
            }
        };
        drop(rows);

        let mut doc = Self::parse_body(kind, id, &body)?;
        merge_patch(kind, id, &mut doc, partial)?;
        let text = serde_json::to_string(&doc).map_err(unavailable)?;
        tx.execute(
            "UPDATE documents SET body = ?3, updated_at = ?4 WHERE kind = ?1 AND id = ?2",
            params![kind.collection(), id, text, now_secs()],
        )
        .await
        .map_err(unavailable)?;
        tx.commit().await.map_err(unavailable)?;
        Ok(doc)
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), StoreError> {
        let conn = self.db.connect().map_err(unavailable)?;
        let removed = conn
            .execute(
                "DELETE FROM documents WHERE kind = ?1 AND id = ?2",
                params![kind.collection(), id],
            )
            .await
            .map_err(unavailable)?;
        if removed == 0 {
            return Err(StoreError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        Ok(())
    }
}
