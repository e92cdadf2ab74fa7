//! Link reconciliation: bring every counter-entity in line with an owner's
//! desired membership set for one relation.
//!
//! - Previous membership comes from the owner's stored field
//! - Removals run before additions
//! - A pointer add first drops the counter from its previous owner's set, and
//!   only then rewrites the pointer; pointer adds run one at a time
//! - Per-edge failures are collected, never thrown; the owner's field is
//!   rewritten from what actually succeeded so a retry picks up the rest

use crate::domain::relations::{id_set, normalize_ids, pointer};
use crate::domain::{
    DomainError, DriftReport, Edge, EdgeFailure, EdgeOp, EntityId, EntityKind, Mirror,
    ReconcileResult, Relation, StoreError,
};
use crate::ports::{EntityStore, doc_id};
use crate::shared::RetryPolicy;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// What a single counter write produced.
#[derive(Debug)]
enum EdgeOutcome {
    Applied(Edge),
    /// Applied after the counter was dropped from `detached.owner_id`.
    Moved { edge: Edge, detached: Edge },
    Failed(EdgeFailure),
}

/// Reconciler. Sole writer of every relation field.
pub struct LinkReconciler {
    store: Arc<dyn EntityStore>,
    retry: RetryPolicy,
    /// Counter updates in flight per phase. 1 = sequential.
    concurrency: usize,
}

impl LinkReconciler {
    pub fn new(store: Arc<dyn EntityStore>, retry: RetryPolicy, concurrency: usize) -> Self {
        Self {
            store,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// String-keyed entry point: `reconcile_named(Major, "M1", "major.subject_ids", ids)`.
    pub async fn reconcile_named<I, S>(
        &self,
        kind: EntityKind,
        owner_id: &str,
        relation: &str,
        desired: I,
    ) -> Result<ReconcileResult, DomainError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let relation: Relation = relation.parse()?;
        if relation.owner_kind() != kind {
            return Err(DomainError::Validation(format!(
                "relation {} is owned by {}, not {}",
                relation,
                relation.owner_kind(),
                kind
            )));
        }
        self.reconcile(relation, owner_id, desired).await
    }

    /// Make `owner.<relation field>` equal `desired` on both sides.
    ///
    /// Fails only when the owner cannot be read; every per-edge problem is
    /// reported in the result.
    pub async fn reconcile<I, S>(
        &self,
        relation: Relation,
        owner_id: &str,
        desired: I,
    ) -> Result<ReconcileResult, DomainError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let desired = normalize_ids(desired);
        let owner_kind = relation.owner_kind();
        let owner = self
            .retry
            .run("reconcile.load_owner", || self.store.get(owner_kind, owner_id))
            .await?;
        let previous = id_set(&owner, relation.owner_field());

        let to_remove: Vec<EntityId> = previous.difference(&desired).cloned().collect();
        let to_add: Vec<EntityId> = desired.difference(&previous).cloned().collect();

        let mut result = ReconcileResult::empty(relation, owner_id);
        if to_remove.is_empty() && to_add.is_empty() {
            debug!(%relation, owner_id, "relation already in sync");
            return Ok(result);
        }
        debug!(
            %relation,
            owner_id,
            remove = to_remove.len(),
            add = to_add.len(),
            "reconciling relation"
        );

        let removals: Vec<Edge> = to_remove
            .into_iter()
            .map(|c| Edge::new(relation, owner_id, c, EdgeOp::Remove))
            .collect();
        let additions: Vec<Edge> = to_add
            .into_iter()
            .map(|c| Edge::new(relation, owner_id, c, EdgeOp::Add))
            .collect();

        for phase in [removals, additions] {
            for outcome in self.apply_phase(phase).await {
                match outcome {
                    EdgeOutcome::Applied(edge) => result.applied.push(edge),
                    EdgeOutcome::Moved { edge, detached } => {
                        result.detached.push(detached);
                        result.applied.push(edge);
                    }
                    EdgeOutcome::Failed(f) => {
                        warn!(
                            %relation,
                            owner_id,
                            counter_id = %f.edge.counter_id,
                            op = ?f.edge.op,
                            error = %f.error,
                            "counter update failed"
                        );
                        result.failed.push(f);
                    }
                }
            }
        }

        // Owner field reflects only what landed on the counter side.
        let mut next = previous.clone();
        for edge in &result.applied {
            match edge.op {
                EdgeOp::Remove => {
                    next.remove(&edge.counter_id);
                }
                EdgeOp::Add => {
                    next.insert(edge.counter_id.clone());
                }
                EdgeOp::Detach => {}
            }
        }
        if next != previous {
            let field = relation.owner_field();
            let partial = json!({ field: next });
            if let Err(e) = self
                .retry
                .run("reconcile.write_owner", || {
                    self.store.update(owner_kind, owner_id, partial.clone())
                })
                .await
            {
                warn!(%relation, owner_id, error = %e, "owner field write failed");
                result.owner_error = Some(e);
            }
        }

        if result.is_complete() {
            info!(
                %relation,
                owner_id,
                applied = result.applied.len(),
                detached = result.detached.len(),
                "relation synced"
            );
        } else {
            warn!(
                %relation,
                owner_id,
                applied = result.applied.len(),
                failed = result.failed.len(),
                owner_write_failed = result.owner_error.is_some(),
                "relation partially synced; re-run with the same set to retry"
            );
        }
        Ok(result)
    }

    /// Add one counter to the owner's current set.
    pub async fn link(
        &self,
        relation: Relation,
        owner_id: &str,
        counter_id: &str,
    ) -> Result<ReconcileResult, DomainError> {
        let mut set = self.current_set(relation, owner_id).await?;
        set.insert(counter_id.to_string());
        self.reconcile(relation, owner_id, set).await
    }

    /// Remove one counter from the owner's current set.
    pub async fn unlink(
        &self,
        relation: Relation,
        owner_id: &str,
        counter_id: &str,
    ) -> Result<ReconcileResult, DomainError> {
        let mut set = self.current_set(relation, owner_id).await?;
        set.remove(counter_id);
        self.reconcile(relation, owner_id, set).await
    }

    /// The owner's stored membership for `relation`.
    pub async fn current_set(
        &self,
        relation: Relation,
        owner_id: &str,
    ) -> Result<BTreeSet<EntityId>, DomainError> {
        let owner = self
            .retry
            .run("reconcile.current_set", || {
                self.store.get(relation.owner_kind(), owner_id)
            })
            .await?;
        Ok(id_set(&owner, relation.owner_field()))
    }

    /// Read-only scan for links recorded on one side only.
    pub async fn audit(&self, relation: Relation) -> Result<DriftReport, DomainError> {
        let owners = self
            .retry
            .run("audit.list_owners", || {
                self.store.list(relation.owner_kind(), None)
            })
            .await?;
        let counters = self
            .retry
            .run("audit.list_counters", || {
                self.store.list(relation.counter_kind(), None)
            })
            .await?;

        let mut owner_side: BTreeSet<(EntityId, EntityId)> = BTreeSet::new();
        for owner in &owners {
            let Some(owner_id) = doc_id(owner) else { continue };
            for counter_id in id_set(owner, relation.owner_field()) {
                owner_side.insert((owner_id.to_string(), counter_id));
            }
        }

        let mut counter_side: BTreeSet<(EntityId, EntityId)> = BTreeSet::new();
        for counter in &counters {
            let Some(counter_id) = doc_id(counter) else { continue };
            let owner_ids: BTreeSet<EntityId> = match relation.mirror() {
                Mirror::Pointer(field) => pointer(counter, field).into_iter().collect(),
                Mirror::Set(field) => id_set(counter, field),
            };
            for owner_id in owner_ids {
                counter_side.insert((owner_id, counter_id.to_string()));
            }
        }

        let to_edges = |pairs: Vec<&(EntityId, EntityId)>, op: EdgeOp| -> Vec<Edge> {
            pairs
                .into_iter()
                .map(|(o, c)| Edge::new(relation, o.clone(), c.clone(), op))
                .collect()
        };
        let report = DriftReport {
            missing_on_counter: to_edges(owner_side.difference(&counter_side).collect(), EdgeOp::Add),
            missing_on_owner: to_edges(counter_side.difference(&owner_side).collect(), EdgeOp::Remove),
        };
        if report.is_consistent() {
            info!(%relation, "no drift found");
        } else {
            warn!(%relation, edges = report.len(), "relation drift found");
        }
        Ok(report)
    }

    /// Runs one phase, bounded by `concurrency`. Output is sorted by counter id.
    async fn apply_phase(&self, edges: Vec<Edge>) -> Vec<EdgeOutcome> {
        let mut outcomes = Vec::with_capacity(edges.len());
        // Two moves away from the same previous owner would race on its set.
        let pointer_adds = edges
            .first()
            .is_some_and(|e| e.op == EdgeOp::Add && matches!(e.relation.mirror(), Mirror::Pointer(_)));
        if self.concurrency <= 1 || edges.len() <= 1 || pointer_adds {
            for edge in edges {
                outcomes.push(apply_edge(&*self.store, &self.retry, edge).await);
            }
            return outcomes;
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for edge in edges.iter().cloned() {
            let sem = Arc::clone(&semaphore);
            let store = Arc::clone(&self.store);
            let retry = self.retry.clone();
            tasks.spawn(async move {
                match sem.acquire_owned().await {
                    Ok(_permit) => apply_edge(&*store, &retry, edge).await,
                    Err(_) => EdgeOutcome::Failed(EdgeFailure {
                        edge,
                        error: StoreError::Unavailable("sync limiter closed".to_string()),
                    }),
                }
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "counter update task aborted"),
            }
        }
        // An aborted task still owes a report for its edge.
        let reported: BTreeSet<EntityId> = outcomes
            .iter()
            .map(|o| outcome_edge(o).counter_id.clone())
            .collect();
        for edge in edges {
            if !reported.contains(&edge.counter_id) {
                outcomes.push(EdgeOutcome::Failed(EdgeFailure {
                    edge,
                    error: StoreError::Unavailable("counter update task aborted".to_string()),
                }));
            }
        }
        outcomes.sort_by(|a, b| outcome_edge(a).counter_id.cmp(&outcome_edge(b).counter_id));
        outcomes
    }
}

fn outcome_edge(outcome: &EdgeOutcome) -> &Edge {
    match outcome {
        EdgeOutcome::Applied(edge) | EdgeOutcome::Moved { edge, .. } => edge,
        EdgeOutcome::Failed(f) => &f.edge,
    }
}

/// Read-modify-write of the counter's mirrored field for one edge.
async fn apply_edge(store: &dyn EntityStore, retry: &RetryPolicy, edge: Edge) -> EdgeOutcome {
    match write_counter(store, retry, &edge).await {
        Ok(None) => EdgeOutcome::Applied(edge),
        Ok(Some(previous_owner)) => {
            let detached = Edge::new(
                edge.relation,
                previous_owner,
                edge.counter_id.clone(),
                EdgeOp::Detach,
            );
            EdgeOutcome::Moved { edge, detached }
        }
        Err(error) => EdgeOutcome::Failed(EdgeFailure { edge, error }),
    }
}

/// Returns the previous pointer owner when an add moved the counter away from one.
async fn write_counter(
    store: &dyn EntityStore,
    retry: &RetryPolicy,
    edge: &Edge,
) -> Result<Option<EntityId>, StoreError> {
    let kind = edge.relation.counter_kind();
    let counter = match retry
        .run("reconcile.load_counter", || store.get(kind, &edge.counter_id))
        .await
    {
        Ok(doc) => doc,
        // Removing a link to something that no longer exists is already done.
        Err(e) if e.is_not_found() && edge.op == EdgeOp::Remove => return Ok(None),
        Err(e) => return Err(e),
    };

    let (partial, previous_owner) = match (edge.relation.mirror(), edge.op) {
        (Mirror::Set(field), EdgeOp::Add) => {
            let mut set = id_set(&counter, field);
            set.insert(edge.owner_id.clone());
            (json!({ field: set }), None)
        }
        (Mirror::Set(field), EdgeOp::Remove) => {
            let mut set = id_set(&counter, field);
            set.remove(&edge.owner_id);
            (json!({ field: set }), None)
        }
        (Mirror::Pointer(field), EdgeOp::Add) => {
            let previous = pointer(&counter, field).filter(|p| *p != edge.owner_id);
            // The pointer keeps naming the old owner until it no longer lists
            // the counter, so a failed detach is retried on the next call.
            if let Some(previous_owner) = &previous {
                detach(store, retry, edge.relation, previous_owner, &edge.counter_id).await?;
            }
            (json!({ field: edge.owner_id }), previous)
        }
        (Mirror::Pointer(field), EdgeOp::Remove) => {
            if pointer(&counter, field).as_deref() != Some(edge.owner_id.as_str()) {
                // Already moved to another owner; do not clobber it.
                return Ok(None);
            }
            (json!({ field: Value::Null }), None)
        }
        (_, EdgeOp::Detach) => return Ok(None),
    };

    retry
        .run("reconcile.write_counter", || {
            store.update(kind, &edge.counter_id, partial.clone())
        })
        .await?;
    debug!(
        relation = %edge.relation,
        owner_id = %edge.owner_id,
        counter_id = %edge.counter_id,
        op = ?edge.op,
        "counter updated"
    );
    Ok(previous_owner)
}

/// Drop `counter_id` from a previous pointer owner's set. Missing owner is a no-op.
async fn detach(
    store: &dyn EntityStore,
    retry: &RetryPolicy,
    relation: Relation,
    previous_owner: &str,
    counter_id: &str,
) -> Result<(), StoreError> {
    let kind = relation.owner_kind();
    let owner = match retry
        .run("reconcile.detach_load", || store.get(kind, previous_owner))
        .await
    {
        Ok(doc) => doc,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e),
    };
    let mut set = id_set(&owner, relation.owner_field());
    if !set.remove(counter_id) {
        return Ok(());
    }
    let partial = json!({ relation.owner_field(): set });
    retry
        .run("reconcile.detach_write", || {
            store.update(kind, previous_owner, partial.clone())
        })
        .await?;
    debug!(%relation, previous_owner, counter_id, "detached from previous owner");
    Ok(())
}
