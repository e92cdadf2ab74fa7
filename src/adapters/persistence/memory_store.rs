//! Implements EntityStore in memory, optionally persisted to a JSON snapshot file.
//!
//! Snapshot layout: `{ "<collection>": [ {document}, ... ], ... }`.

use crate::adapters::persistence::{explicit_id, merge_patch, require_object};
use crate::domain::{EntityKind, StoreError};
use crate::ports::{EntityStore, ListFilter};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

type Collections = BTreeMap<EntityKind, BTreeMap<String, Value>>;

/// In-process document store. Writes are flushed to the snapshot file when one is set.
pub struct MemoryStore {
    snapshot_path: Option<PathBuf>,
    docs: tokio::sync::RwLock<Collections>,
    /// Held from snapshot build to rename; one writer owns the temp file at a time.
    save_lock: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            snapshot_path: None,
            docs: tokio::sync::RwLock::new(Collections::new()),
            save_lock: tokio::sync::Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_snapshot(path: impl AsRef<Path>) -> Self {
        Self {
            snapshot_path: Some(path.as_ref().to_path_buf()),
            ..Self::new()
        }
    }

    /// Load documents from the snapshot file. A missing file yields an empty store.
    pub async fn load(&self) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let raw = match fs::read_to_string(path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StoreError::Unavailable(format!("read snapshot: {}", e))),
        };
        let parsed: BTreeMap<String, Vec<Value>> = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Validation(format!("snapshot is not valid JSON: {}", e)))?;

        let mut collections = Collections::new();
        for (name, docs) in parsed {
            let Some(kind) = EntityKind::from_collection(&name) else {
                warn!(collection = %name, "unknown collection in snapshot, skipping");
                continue;
            };
            let bucket = collections.entry(kind).or_default();
            for doc in docs {
                match doc.get("id").and_then(Value::as_str) {
                    Some(id) => {
                        bucket.insert(id.to_string(), doc.clone());
                    }
                    None => warn!(%kind, "snapshot document without id, skipping"),
                }
            }
        }
        *self.docs.write().await = collections;
        Ok(())
    }

    /// Insert or replace a document as-is. Seeding and tests only; bypasses validation.
    pub async fn insert(&self, kind: EntityKind, doc: Value) -> Result<(), StoreError> {
        let id = explicit_id(kind, &doc)?
            .ok_or_else(|| StoreError::Validation(format!("{} seed needs an id", kind)))?;
        {
            let mut docs = self.docs.write().await;
            docs.entry(kind).or_default().insert(id, doc);
        }
        self.save().await
    }

    /// Atomic write-replace of the snapshot: temp file, sync_all, rename.
    ///
    /// Saves are serialized and each one snapshots the state as of taking the
    /// lock, so the file never goes back to an older state.
    async fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let _guard = self.save_lock.lock().await;
        let snapshot: BTreeMap<&str, Vec<Value>> = {
            let docs = self.docs.read().await;
            docs.iter()
                .map(|(kind, bucket)| (kind.collection(), bucket.values().cloned().collect()))
                .collect()
        };
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Unavailable(format!("create snapshot dir: {}", e)))?;
        }
        let temp_path = path.with_extension("json.tmp");
        let mut f = fs::File::create(&temp_path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("create temp file: {}", e)))?;
        f.write_all(json.as_bytes())
            .await
            .map_err(|e| StoreError::Unavailable(format!("write temp file: {}", e)))?;
        f.sync_all()
            .await
            .map_err(|e| StoreError::Unavailable(format!("sync temp file: {}", e)))?;
        drop(f);

        fs::rename(&temp_path, path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("atomic rename failed: {}", e)))?;
        debug!(path = %path.display(), "snapshot saved");
        Ok(())
    }

    fn generate_id(&self, kind: EntityKind, taken: &BTreeMap<String, Value>) -> String {
        loop {
            let n = self.next_id.fetch_add(1, Ordering::Relaxed);
            let candidate = format!("{}-{}", kind, n);
            if !taken.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EntityStore for MemoryStore {
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Value, StoreError> {
        let docs = self.docs.read().await;
        docs.get(&kind)
            .and_then(|bucket| bucket.get(id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind,
                id: id.to_string(),
            })
    }

    async fn list(
        &self,
        kind: EntityKind,
        filter: Option<&ListFilter>,
    ) -> Result<Vec<Value>, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs
            .get(&kind)
            .map(|bucket| {
                bucket
                    .values()
                    .filter(|d| filter.is_none_or(|f| f.matches(d)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create(&self, kind: EntityKind, mut body: Value) -> Result<Value, StoreError> {
        require_object(kind, &body)?;
        let created = {
            let mut docs = self.docs.write().await;
            let bucket = docs.entry(kind).or_default();
            let id = match explicit_id(kind, &body)? {
                Some(id) if bucket.contains_key(&id) => {
                    return Err(StoreError::Validation(format!(
                        "{} {} already exists",
                        kind, id
                    )));
                }
                Some(id) => id,
                None => self.generate_id(kind, bucket),
            };
            body["id"] = Value::String(id.clone());
            bucket.insert(id, body.clone());
            body
        };
        self.save().await?;
        Ok(created)
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        partial: Value,
    ) -> Result<Value, StoreError> {
        let updated = {
            let mut docs = self.docs.write().await;
            let doc = docs
                .get_mut(&kind)
                .and_then(|bucket| bucket.get_mut(id))
                .ok_or_else(|| StoreError::NotFound {
                    kind,
                    id: id.to_string(),
                })?;
            merge_patch(kind, id, doc, partial)?;
            doc.clone()
        };
        self.save().await?;
        Ok(updated)
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), StoreError> {
        {
            let mut docs = self.docs.write().await;
            docs.get_mut(&kind)
                .and_then(|bucket| bucket.remove(id))
                .ok_or_else(|| StoreError::NotFound {
                    kind,
                    id: id.to_string(),
                })?;
        }
        self.save().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_crud_round() {
        let store = MemoryStore::new();
        let created = store
            .create(EntityKind::Major, json!({"name": "Software"}))
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap().to_string();
        assert!(id.starts_with("major-"));

        let updated = store
            .update(EntityKind::Major, &id, json!({"subject_ids": ["S1"]}))
            .await
            .unwrap();
        assert_eq!(updated["name"], "Software");
        assert_eq!(updated["subject_ids"], json!(["S1"]));

        store.delete(EntityKind::Major, &id).await.unwrap();
        let err = store.get(EntityKind::Major, &id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_id() {
        let store = MemoryStore::new();
        store
            .create(EntityKind::Subject, json!({"id": "S1", "name": "A", "year": 1}))
            .await
            .unwrap();
        let err = store
            .create(EntityKind::Subject, json!({"id": "S1", "name": "B", "year": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_list_with_filter() {
        let store = MemoryStore::new();
        store
            .insert(EntityKind::Subject, json!({"id": "S1", "major_id": "M1"}))
            .await
            .unwrap();
        store
            .insert(EntityKind::Subject, json!({"id": "S2", "major_id": "M2"}))
            .await
            .unwrap();
        let filter = ListFilter::eq("major_id", "M1");
        let found = store
            .list(EntityKind::Subject, Some(&filter))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["id"], "S1");
        assert_eq!(store.list(EntityKind::Subject, None).await.unwrap().len(), 2);
        assert!(store.list(EntityKind::Major, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_survives_reload() {
        let dir = std::env::temp_dir().join(format!(
            "campus-sync-snapshot-{}",
            std::process::id()
        ));
        let path = dir.join("store.json");
        let _ = tokio::fs::remove_file(&path).await;

        let store = MemoryStore::with_snapshot(&path);
        store.load().await.unwrap();
        store
            .create(EntityKind::Department, json!({"id": "D1", "name": "Computing"}))
            .await
            .unwrap();

        let reopened = MemoryStore::with_snapshot(&path);
        reopened.load().await.unwrap();
        let doc = reopened.get(EntityKind::Department, "D1").await.unwrap();
        assert_eq!(doc["name"], "Computing");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_concurrent_writes_all_reach_the_snapshot() {
        let dir = std::env::temp_dir().join(format!(
            "campus-sync-concurrent-{}",
            std::process::id()
        ));
        let path = dir.join("store.json");
        let _ = tokio::fs::remove_file(&path).await;

        let store = std::sync::Arc::new(MemoryStore::with_snapshot(&path));
        let mut tasks = tokio::task::JoinSet::new();
        for n in 0..32 {
            let store = std::sync::Arc::clone(&store);
            tasks.spawn(async move {
                store
                    .create(EntityKind::Professor, json!({"id": format!("P{}", n)}))
                    .await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        let reopened = MemoryStore::with_snapshot(&path);
        reopened.load().await.unwrap();
        assert_eq!(reopened.list(EntityKind::Professor, None).await.unwrap().len(), 32);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
