//! Orchestration façade. Sequences a primary write with the relation syncs it implies.
//!
//! The primary write is never rolled back. A relation that could not be fully
//! synced degrades the outcome to `PartialFailure`; re-submitting converges.

use crate::domain::entities::{FINAL_YEAR, MAX_GRADE, MIN_GRADE};
use crate::domain::relations::pointer;
use crate::domain::{
    AdvanceBlock, DomainError, EntityId, EntityKind, ExamGrade, ExamSession, Notification,
    RecipientType, ReconcileResult, Relation, Role, Standing, Student, SubmissionOutcome,
    Subject, SyncFailure, UserRef, validate_record,
};
use crate::ports::{EntityStore, decode, doc_id};
use crate::shared::RetryPolicy;
use crate::usecases::{EligibilityService, LinkReconciler};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ─── Requests ───────────────────────────────────────────────────────────────

/// Full desired membership for one relation the submitted form edits.
#[derive(Debug, Clone)]
pub struct RelationChange {
    pub relation: Relation,
    pub desired: BTreeSet<EntityId>,
}

impl RelationChange {
    pub fn new<I, S>(relation: Relation, desired: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<EntityId>,
    {
        Self {
            relation,
            desired: desired.into_iter().map(Into::into).collect(),
        }
    }
}

/// A form submission: create when `id` is `None`, otherwise update.
#[derive(Debug, Clone)]
pub struct Submission {
    pub kind: EntityKind,
    pub id: Option<EntityId>,
    pub body: Value,
    pub relations: Vec<RelationChange>,
}

impl Submission {
    pub fn create(kind: EntityKind, body: Value) -> Self {
        Self {
            kind,
            id: None,
            body,
            relations: Vec::new(),
        }
    }

    pub fn update(kind: EntityKind, id: impl Into<EntityId>, body: Value) -> Self {
        Self {
            kind,
            id: Some(id.into()),
            body,
            relations: Vec::new(),
        }
    }

    pub fn with_relation<I, S>(mut self, relation: Relation, desired: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<EntityId>,
    {
        self.relations.push(RelationChange::new(relation, desired));
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSessionDraft {
    pub subject_id: EntityId,
    pub exam_date: NaiveDate,
    #[serde(default)]
    pub location: String,
    pub max_students: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeDraft {
    pub exam_session_id: EntityId,
    pub student_id: EntityId,
    pub grade: u8,
}

// ─── Results ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    Advanced { from: u8, to: u8 },
    Blocked(AdvanceBlock),
    /// Already in the last study year.
    FinalYear,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledSession {
    pub session: ExamSession,
    /// Advisory: the date lies outside every active exam period.
    pub outside_active_period: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordedGrade {
    pub grade: ExamGrade,
    pub standing: Option<Standing>,
    /// Set when the grade was saved but the student's GPA/ESPB could not be refreshed.
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SentNotification {
    pub notification: Notification,
    pub audience: BTreeSet<UserRef>,
}

/// A pointer field on a child form, turned into a move between parents.
#[derive(Debug)]
struct ParentMove {
    relation: Relation,
    /// `None` clears the parent.
    target: Option<EntityId>,
}

// ─── Façade ─────────────────────────────────────────────────────────────────

pub struct Orchestrator {
    store: Arc<dyn EntityStore>,
    retry: RetryPolicy,
    reconciler: LinkReconciler,
    eligibility: EligibilityService,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn EntityStore>, retry: RetryPolicy, concurrency: usize) -> Self {
        Self {
            reconciler: LinkReconciler::new(Arc::clone(&store), retry.clone(), concurrency),
            eligibility: EligibilityService::new(Arc::clone(&store), retry.clone()),
            store,
            retry,
        }
    }

    pub fn reconciler(&self) -> &LinkReconciler {
        &self.reconciler
    }

    pub fn eligibility(&self) -> &EligibilityService {
        &self.eligibility
    }

    /// Primary write, then every relation sync the form implies.
    pub async fn submit(&self, submission: Submission) -> SubmissionOutcome {
        let Submission {
            kind,
            id,
            body,
            relations,
        } = submission;

        let Value::Object(mut fields) = body else {
            return failure(DomainError::Validation(format!(
                "{} form body must be a JSON object",
                kind
            )));
        };
        if let Some(change) = relations.iter().find(|c| c.relation.owner_kind() != kind) {
            return failure(DomainError::Validation(format!(
                "relation {} cannot be edited from a {} form",
                change.relation, kind
            )));
        }

        let moves = take_parent_moves(kind, &mut fields);
        for field in Relation::managed_fields(kind) {
            fields.remove(field);
        }

        // Validated against the stored record; also names the parent a cleared pointer leaves.
        let previous = match &id {
            Some(id) => match self.retry.run("submit.load", || self.store.get(kind, id)).await {
                Ok(doc) => Some(doc),
                Err(e) => return failure(e.into()),
            },
            None => None,
        };
        if let Err(e) = validate_record(kind, &candidate(previous.as_ref(), &fields)) {
            warn!(%kind, id = id.as_deref().unwrap_or("<new>"), error = %e, "form rejected");
            return failure(e);
        }

        let written = match &id {
            Some(id) => {
                self.retry
                    .run("submit.update", || {
                        self.store.update(kind, id, Value::Object(fields.clone()))
                    })
                    .await
            }
            None => {
                self.retry
                    .single_attempt()
                    .run("submit.create", || {
                        self.store.create(kind, Value::Object(fields.clone()))
                    })
                    .await
            }
        };
        let entity = match written {
            Ok(doc) => doc,
            Err(e) => {
                warn!(%kind, id = id.as_deref().unwrap_or("<new>"), error = %e, "primary write failed");
                return failure(e.into());
            }
        };
        let Some(entity_id) = doc_id(&entity).map(str::to_string) else {
            return failure(DomainError::Decode {
                kind,
                reason: "store returned a document without an id".to_string(),
            });
        };

        let mut syncs = Vec::new();
        let mut failures = Vec::new();
        for change in relations {
            self.collect(
                change.relation,
                &entity_id,
                self.reconciler
                    .reconcile(change.relation, &entity_id, &change.desired)
                    .await,
                &mut syncs,
                &mut failures,
            );
        }

        for mv in moves {
            let field = mv.relation.mirror().field();
            let result = match (&mv.target, previous.as_ref().and_then(|p| pointer(p, field))) {
                (Some(parent), _) => self.reconciler.link(mv.relation, parent, &entity_id).await,
                (None, Some(old_parent)) => {
                    self.reconciler
                        .unlink(mv.relation, &old_parent, &entity_id)
                        .await
                }
                (None, None) => continue,
            };
            let owner = mv
                .target
                .clone()
                .or_else(|| previous.as_ref().and_then(|p| pointer(p, field)))
                .unwrap_or_default();
            self.collect(mv.relation, &owner, result, &mut syncs, &mut failures);
        }

        // Re-read so the caller sees the pointer fields the syncs wrote.
        let entity = match self
            .retry
            .run("submit.reload", || self.store.get(kind, &entity_id))
            .await
        {
            Ok(doc) => doc,
            Err(e) => {
                debug!(%kind, id = %entity_id, error = %e, "reload failed, returning the primary write");
                entity
            }
        };

        if failures.is_empty() {
            info!(%kind, id = %entity_id, relations = syncs.len(), "submission saved");
            SubmissionOutcome::Success { entity, syncs }
        } else {
            warn!(
                %kind,
                id = %entity_id,
                failed = failures.len(),
                "saved but not fully synced; re-submit to retry"
            );
            SubmissionOutcome::PartialFailure {
                entity,
                syncs,
                failures,
            }
        }
    }

    /// Unlinks the record from every relation, then deletes it.
    ///
    /// The record is kept when any unlink fails, so the call can simply be repeated.
    pub async fn delete(&self, kind: EntityKind, id: &str) -> SubmissionOutcome {
        let entity = match self.retry.run("delete.load", || self.store.get(kind, id)).await {
            Ok(doc) => doc,
            Err(e) => return failure(e.into()),
        };

        let mut syncs = Vec::new();
        let mut failures = Vec::new();
        for relation in Relation::owned_by(kind) {
            let cleared: [&str; 0] = [];
            self.collect(
                relation,
                id,
                self.reconciler.reconcile(relation, id, cleared).await,
                &mut syncs,
                &mut failures,
            );
        }
        for relation in Relation::parents_of(kind) {
            if let Some(parent) = pointer(&entity, relation.mirror().field()) {
                self.collect(
                    relation,
                    &parent,
                    self.reconciler.unlink(relation, &parent, id).await,
                    &mut syncs,
                    &mut failures,
                );
            }
        }

        if !failures.is_empty() {
            warn!(%kind, id, failed = failures.len(), "links not cleared; record kept");
            return SubmissionOutcome::PartialFailure {
                entity,
                syncs,
                failures,
            };
        }

        match self.retry.run("delete", || self.store.delete(kind, id)).await {
            Ok(()) => {
                info!(%kind, id, "record deleted");
                SubmissionOutcome::Success { entity, syncs }
            }
            Err(e) => failure(e.into()),
        }
    }

    /// Moves the student to the next year when every current-year subject is passed.
    pub async fn advance_year(&self, student_id: &str) -> Result<AdvanceOutcome, DomainError> {
        let student: Student = self.fetch(EntityKind::Student, student_id).await?;
        if student.year.is_some_and(|y| y >= FINAL_YEAR) {
            return Ok(AdvanceOutcome::FinalYear);
        }
        if let Err(block) = self.eligibility.advancement(student_id).await? {
            info!(student_id, reason = %block, "year advancement blocked");
            return Ok(AdvanceOutcome::Blocked(block));
        }

        // advancement() already rejected a missing year.
        let from = student.year.unwrap_or_default();
        let to = from + 1;
        self.retry
            .run("advance_year", || {
                self.store
                    .update(EntityKind::Student, student_id, json!({ "year": to }))
            })
            .await?;
        info!(student_id, from, to, "student advanced");
        Ok(AdvanceOutcome::Advanced { from, to })
    }

    /// Creates an exam session for a subject the professor teaches.
    pub async fn schedule_exam_session(
        &self,
        professor_id: &str,
        draft: ExamSessionDraft,
    ) -> Result<ScheduledSession, DomainError> {
        if draft.max_students == 0 {
            return Err(DomainError::Validation(
                "max_students must be greater than zero".to_string(),
            ));
        }
        let subject: Subject = self.fetch(EntityKind::Subject, &draft.subject_id).await?;
        if !subject.professor_ids.contains(professor_id) {
            return Err(DomainError::Validation(format!(
                "professor {} does not teach subject {}",
                professor_id, subject.id
            )));
        }

        let outside_active_period = !self
            .eligibility
            .is_within_active_period(draft.exam_date)
            .await?;
        if outside_active_period {
            warn!(
                subject_id = %subject.id,
                exam_date = %draft.exam_date,
                "exam date is outside every active exam period"
            );
        }

        let body = json!({
            "subject_id": draft.subject_id,
            "professor_id": professor_id,
            "exam_date": draft.exam_date,
            "location": draft.location,
            "max_students": draft.max_students,
        });
        let created = self
            .retry
            .single_attempt()
            .run("schedule_exam_session", || {
                self.store.create(EntityKind::ExamSession, body.clone())
            })
            .await?;
        let session: ExamSession = decode(EntityKind::ExamSession, created)?;
        info!(session_id = %session.id, subject_id = %session.subject_id, "exam session scheduled");
        Ok(ScheduledSession {
            session,
            outside_active_period,
        })
    }

    /// Records a grade in one of the professor's sessions, then refreshes the student's standing.
    pub async fn record_grade(
        &self,
        professor_id: &str,
        draft: GradeDraft,
    ) -> Result<RecordedGrade, DomainError> {
        if !(MIN_GRADE..=MAX_GRADE).contains(&draft.grade) {
            return Err(DomainError::Validation(format!(
                "grade {} is outside {}..={}",
                draft.grade, MIN_GRADE, MAX_GRADE
            )));
        }
        let session: ExamSession = self
            .fetch(EntityKind::ExamSession, &draft.exam_session_id)
            .await?;
        if session.professor_id != professor_id {
            return Err(DomainError::Validation(format!(
                "exam session {} belongs to another professor",
                session.id
            )));
        }
        let student: Student = self.fetch(EntityKind::Student, &draft.student_id).await?;

        let body = json!({
            "exam_session_id": session.id,
            "subject_id": session.subject_id,
            "student_id": student.id,
            "grade": draft.grade,
        });
        let created = self
            .retry
            .single_attempt()
            .run("record_grade", || {
                self.store.create(EntityKind::ExamGrade, body.clone())
            })
            .await?;
        let grade: ExamGrade = decode(EntityKind::ExamGrade, created)?;
        info!(grade_id = %grade.id, student_id = %student.id, grade = grade.grade, "grade recorded");

        match self.refresh_standing(&student.id).await {
            Ok(standing) => Ok(RecordedGrade {
                grade,
                standing: Some(standing),
                warning: None,
            }),
            Err(e) => {
                warn!(student_id = %student.id, error = %e, "grade saved, standing not refreshed");
                Ok(RecordedGrade {
                    grade,
                    standing: None,
                    warning: Some(format!("standing not refreshed: {}", e)),
                })
            }
        }
    }

    /// Resolves the audience from current membership, then persists the notification.
    ///
    /// Nothing is written when the body is invalid or the audience cannot be resolved.
    pub async fn send_notification(&self, body: Value) -> Result<SentNotification, DomainError> {
        let Value::Object(mut fields) = body else {
            return Err(DomainError::Validation(
                "notification body must be a JSON object".to_string(),
            ));
        };
        fields
            .entry("created_at")
            .or_insert_with(|| json!(Utc::now()));
        let mut draft_fields = fields.clone();
        draft_fields
            .entry("id")
            .or_insert_with(|| Value::String(String::new()));
        let draft: Notification = serde_json::from_value(Value::Object(draft_fields))
            .map_err(|e| DomainError::Validation(format!("notification: {}", e)))?;
        let value = draft.recipient_value.trim();
        if value.is_empty() {
            return Err(DomainError::Validation(
                "notification recipient value is empty".to_string(),
            ));
        }
        if draft.recipient_type == RecipientType::Role && Role::parse(value).is_none() {
            return Err(DomainError::Validation(format!("unknown role '{}'", value)));
        }
        let audience = self.eligibility.resolve_audience(&draft).await?;

        let body = Value::Object(fields);
        let created = self
            .retry
            .single_attempt()
            .run("send_notification", || {
                self.store.create(EntityKind::Notification, body.clone())
            })
            .await?;
        let Some(id) = doc_id(&created).map(str::to_string) else {
            return Err(DomainError::Decode {
                kind: EntityKind::Notification,
                reason: "store returned a document without an id".to_string(),
            });
        };
        let notification = Notification { id, ..draft };
        info!(
            notification_id = %notification.id,
            recipients = audience.len(),
            "notification sent"
        );
        Ok(SentNotification {
            notification,
            audience,
        })
    }

    async fn refresh_standing(&self, student_id: &str) -> Result<Standing, DomainError> {
        let standing = self.eligibility.standing(student_id).await?;
        self.retry
            .run("refresh_standing", || {
                self.store.update(
                    EntityKind::Student,
                    student_id,
                    json!({ "gpa": standing.gpa, "espb": standing.espb }),
                )
            })
            .await?;
        Ok(standing)
    }

    fn collect(
        &self,
        relation: Relation,
        owner_id: &str,
        result: Result<ReconcileResult, DomainError>,
        syncs: &mut Vec<ReconcileResult>,
        failures: &mut Vec<SyncFailure>,
    ) {
        match result {
            Ok(r) => {
                failures.extend(r.sync_failures());
                syncs.push(r);
            }
            Err(e) => {
                warn!(%relation, owner_id, error = %e, "relation not synced");
                failures.push(SyncFailure {
                    relation,
                    owner_id: owner_id.to_string(),
                    counter_id: None,
                    op: None,
                    reason: e.to_string(),
                });
            }
        }
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> Result<T, DomainError> {
        let doc = self
            .retry
            .run("orchestrator.get", || self.store.get(kind, id))
            .await?;
        decode(kind, doc)
    }
}

/// The record as it would read after the write: stored fields overlaid with the form.
fn candidate(previous: Option<&Value>, fields: &Map<String, Value>) -> Value {
    let mut merged = match previous {
        Some(Value::Object(stored)) => stored.clone(),
        _ => Map::new(),
    };
    for (key, value) in fields {
        merged.insert(key.clone(), value.clone());
    }
    merged
        .entry("id")
        .or_insert_with(|| Value::String(String::new()));
    Value::Object(merged)
}

fn failure(error: DomainError) -> SubmissionOutcome {
    SubmissionOutcome::Failure { error }
}

/// Pulls child-side pointer fields (`Subject.major_id`, `Major.department_id`) out of a form.
fn take_parent_moves(kind: EntityKind, fields: &mut Map<String, Value>) -> Vec<ParentMove> {
    Relation::parents_of(kind)
        .filter_map(|relation| {
            let value = fields.remove(relation.mirror().field())?;
            let target = value
                .as_str()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            Some(ParentMove { relation, target })
        })
        .collect()
}
