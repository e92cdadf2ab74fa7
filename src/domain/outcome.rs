//! Result types for reconciliation and form submission.

use crate::domain::entities::EntityId;
use crate::domain::errors::{DomainError, StoreError};
use crate::domain::relations::Relation;
use serde::Serialize;
use serde_json::Value;

/// What happened to one link. Ordering is the processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeOp {
    Remove,
    Add,
    /// Counter moved away from a previous pointer owner; that owner's set is trimmed.
    Detach,
}

/// A single link between an owner and a counter-entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Edge {
    pub relation: Relation,
    pub owner_id: EntityId,
    pub counter_id: EntityId,
    pub op: EdgeOp,
}

impl Edge {
    pub fn new(
        relation: Relation,
        owner_id: impl Into<EntityId>,
        counter_id: impl Into<EntityId>,
        op: EdgeOp,
    ) -> Self {
        Self {
            relation,
            owner_id: owner_id.into(),
            counter_id: counter_id.into(),
            op,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeFailure {
    pub edge: Edge,
    #[serde(serialize_with = "serialize_display")]
    pub error: StoreError,
}

/// Outcome of one `reconcile` call. Never an error for per-edge problems.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileResult {
    pub relation: Relation,
    pub owner_id: EntityId,
    pub applied: Vec<Edge>,
    pub failed: Vec<EdgeFailure>,
    /// Previous pointer owners trimmed after a counter moved here.
    pub detached: Vec<Edge>,
    /// Rewriting the owner's own field failed; counters may be ahead of the owner.
    #[serde(serialize_with = "serialize_opt_display")]
    pub owner_error: Option<StoreError>,
}

impl ReconcileResult {
    pub fn empty(relation: Relation, owner_id: impl Into<EntityId>) -> Self {
        Self {
            relation,
            owner_id: owner_id.into(),
            applied: Vec::new(),
            failed: Vec::new(),
            detached: Vec::new(),
            owner_error: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.owner_error.is_none()
    }

    pub fn applied_ids(&self, op: EdgeOp) -> Vec<&str> {
        self.applied
            .iter()
            .filter(|e| e.op == op)
            .map(|e| e.counter_id.as_str())
            .collect()
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed
            .iter()
            .map(|f| f.edge.counter_id.as_str())
            .collect()
    }

    /// Flattens problems into façade-level failures.
    pub fn sync_failures(&self) -> Vec<SyncFailure> {
        let mut out: Vec<SyncFailure> = self
            .failed
            .iter()
            .map(|f| SyncFailure {
                relation: f.edge.relation,
                owner_id: f.edge.owner_id.clone(),
                counter_id: Some(f.edge.counter_id.clone()),
                op: Some(f.edge.op),
                reason: f.error.to_string(),
            })
            .collect();
        if let Some(err) = &self.owner_error {
            out.push(SyncFailure {
                relation: self.relation,
                owner_id: self.owner_id.clone(),
                counter_id: None,
                op: None,
                reason: format!("owner field not written: {}", err),
            });
        }
        out
    }
}

/// A relation-sync problem surfaced to the caller of the façade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub relation: Relation,
    pub owner_id: EntityId,
    /// `None` when the whole relation could not be synced (owner unreadable).
    pub counter_id: Option<EntityId>,
    pub op: Option<EdgeOp>,
    pub reason: String,
}

/// Aggregated outcome of a form submission.
#[derive(Debug)]
pub enum SubmissionOutcome {
    Success {
        entity: Value,
        syncs: Vec<ReconcileResult>,
    },
    /// Saved but not fully synced. Re-submitting the same form converges.
    PartialFailure {
        entity: Value,
        syncs: Vec<ReconcileResult>,
        failures: Vec<SyncFailure>,
    },
    Failure {
        error: DomainError,
    },
}

impl SubmissionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SubmissionOutcome::Success { .. })
    }

    pub fn entity(&self) -> Option<&Value> {
        match self {
            SubmissionOutcome::Success { entity, .. }
            | SubmissionOutcome::PartialFailure { entity, .. } => Some(entity),
            SubmissionOutcome::Failure { .. } => None,
        }
    }

    pub fn failures(&self) -> &[SyncFailure] {
        match self {
            SubmissionOutcome::PartialFailure { failures, .. } => failures,
            _ => &[],
        }
    }
}

/// Links present on only one side of a relation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DriftReport {
    /// Owner lists the counter, counter does not point back.
    pub missing_on_counter: Vec<Edge>,
    /// Counter points at the owner, owner does not list it.
    pub missing_on_owner: Vec<Edge>,
}

impl DriftReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_on_counter.is_empty() && self.missing_on_owner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.missing_on_counter.len() + self.missing_on_owner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn serialize_display<S: serde::Serializer>(err: &StoreError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(err)
}

fn serialize_opt_display<S: serde::Serializer>(
    err: &Option<StoreError>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match err {
        Some(e) => s.collect_str(e),
        None => s.serialize_none(),
    }
}
