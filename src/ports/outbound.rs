//! Outbound ports. Application calls into the entity store.
//!
//! Implemented by adapters (in-memory, SQLite, HTTP).

use crate::domain::{DomainError, EntityKind, StoreError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

/// Equality filter for `list`. Matches a scalar field equal to `value`, or an
/// array field containing `value`.
#[derive(Debug, Clone, PartialEq)]
pub struct ListFilter {
    pub field: String,
    pub value: Value,
}

impl ListFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, doc: &Value) -> bool {
        match doc.get(&self.field) {
            Some(Value::Array(items)) => items.contains(&self.value),
            Some(v) => *v == self.value,
            None => self.value.is_null(),
        }
    }

    /// Filter value rendered for query strings.
    pub fn value_str(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Entity store. Documents are JSON objects carrying an `id` field.
///
/// Every call returns the stored document and distinguishes not-found,
/// validation and server-side failures (see `StoreError`). No multi-document
/// transactions are assumed.
#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Value, StoreError>;

    async fn list(
        &self,
        kind: EntityKind,
        filter: Option<&ListFilter>,
    ) -> Result<Vec<Value>, StoreError>;

    /// Create a record. The store assigns an id when `body` has none.
    async fn create(&self, kind: EntityKind, body: Value) -> Result<Value, StoreError>;

    /// Shallow-merge `partial` into the stored record; returns the updated document.
    async fn update(&self, kind: EntityKind, id: &str, partial: Value)
    -> Result<Value, StoreError>;

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), StoreError>;
}

/// Decode a stored document into a typed record.
pub fn decode<T: DeserializeOwned>(kind: EntityKind, doc: Value) -> Result<T, DomainError> {
    serde_json::from_value(doc).map_err(|e| DomainError::Decode {
        kind,
        reason: e.to_string(),
    })
}

/// Decode a list. Malformed documents are logged and skipped.
pub fn decode_all<T: DeserializeOwned>(kind: EntityKind, docs: Vec<Value>) -> Vec<T> {
    docs.into_iter()
        .filter_map(|d| {
            let id = doc_id(&d).unwrap_or("?").to_string();
            match decode(kind, d) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(%kind, id = %id, error = %e, "skipping malformed document");
                    None
                }
            }
        })
        .collect()
}

/// The `id` field of a stored document.
pub fn doc_id(doc: &Value) -> Option<&str> {
    doc.get("id").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matches_scalars_and_arrays() {
        let doc = json!({"major_id": "M1", "staff": ["P1", "P2"]});
        assert!(ListFilter::eq("major_id", "M1").matches(&doc));
        assert!(!ListFilter::eq("major_id", "M2").matches(&doc));
        assert!(ListFilter::eq("staff", "P2").matches(&doc));
        assert!(!ListFilter::eq("year", 2).matches(&doc));
        assert!(ListFilter::eq("year", Value::Null).matches(&doc));
    }

    #[test]
    fn test_decode_all_skips_malformed() {
        let docs = vec![
            json!({"id": "S1", "name": "Algebra", "year": 1}),
            json!({"id": "S2", "name": "No year"}),
        ];
        let subjects: Vec<crate::domain::Subject> = decode_all(EntityKind::Subject, docs);
        assert_eq!(subjects.len(), 1);
        assert_eq!(subjects[0].id, "S1");
    }

    #[test]
    fn test_decode_reports_kind() {
        let err = decode::<crate::domain::Subject>(EntityKind::Subject, json!({"id": 1}))
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Decode {
                kind: EntityKind::Subject,
                ..
            }
        ));
    }
}
