//! Local entity store adapters and the document helpers they share.

pub mod memory_store;
pub mod sqlite_store;

pub use memory_store::MemoryStore;
pub use sqlite_store::SqliteStore;

use crate::domain::{EntityKind, StoreError};
use serde_json::Value;

/// Rejects non-object bodies.
pub(crate) fn require_object(kind: EntityKind, body: &Value) -> Result<(), StoreError> {
    if body.is_object() {
        Ok(())
    } else {
        Err(StoreError::Validation(format!(
            "{} body must be a JSON object",
            kind
        )))
    }
}

/// Explicit id carried by a create body, if any. Blank ids count as absent.
pub(crate) fn explicit_id(kind: EntityKind, body: &Value) -> Result<Option<String>, StoreError> {
    match body.get("id") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(StoreError::Validation(format!("{} id must be a string", kind))),
    }
}

/// Shallow merge of `partial` into `target`. The `id` field is immutable.
pub(crate) fn merge_patch(
    kind: EntityKind,
    id: &str,
    target: &mut Value,
    partial: Value,
) -> Result<(), StoreError> {
    require_object(kind, &partial)?;
    let Value::Object(fields) = partial else {
        return Ok(());
    };
    if let Some(new_id) = fields.get("id") {
        if new_id.as_str() != Some(id) {
            return Err(StoreError::Validation(format!(
                "{} {}: id cannot be changed",
                kind, id
            )));
        }
    }
    if let Value::Object(existing) = target {
        for (key, value) in fields {
            existing.insert(key, value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_patch_is_shallow() {
        let mut doc = json!({"id": "M1", "name": "Old", "subject_ids": ["S1"]});
        merge_patch(
            EntityKind::Major,
            "M1",
            &mut doc,
            json!({"name": "New", "department_id": null}),
        )
        .unwrap();
        assert_eq!(doc["name"], "New");
        assert_eq!(doc["subject_ids"], json!(["S1"]));
        assert!(doc["department_id"].is_null());
    }

    #[test]
    fn test_merge_patch_rejects_id_change_and_non_objects() {
        let mut doc = json!({"id": "M1"});
        assert!(merge_patch(EntityKind::Major, "M1", &mut doc, json!({"id": "M2"})).is_err());
        assert!(merge_patch(EntityKind::Major, "M1", &mut doc, json!(["x"])).is_err());
        assert!(merge_patch(EntityKind::Major, "M1", &mut doc, json!({"id": "M1"})).is_ok());
    }

    #[test]
    fn test_explicit_id() {
        assert_eq!(explicit_id(EntityKind::Major, &json!({})).unwrap(), None);
        assert_eq!(explicit_id(EntityKind::Major, &json!({"id": " "})).unwrap(), None);
        assert_eq!(
            explicit_id(EntityKind::Major, &json!({"id": "M1"})).unwrap(),
            Some("M1".to_string())
        );
        assert!(explicit_id(EntityKind::Major, &json!({"id": 4})).is_err());
    }
}
