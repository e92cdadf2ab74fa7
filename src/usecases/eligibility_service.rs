//! Eligibility queries by id. Fetches fresh snapshots, then defers to the pure rules.

use crate::domain::{
    AdvanceBlock, Directory, DomainError, EntityKind, ExamGrade, ExamPeriod, Notification,
    Standing, Student, Subject, UserRef, compute_standing, evaluate_advancement,
    is_within_active_period, passed_subject_ids, resolve_audience,
};
use crate::ports::{EntityStore, ListFilter, decode, decode_all};
use crate::shared::RetryPolicy;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

pub struct EligibilityService {
    store: Arc<dyn EntityStore>,
    retry: RetryPolicy,
}

impl EligibilityService {
    pub fn new(store: Arc<dyn EntityStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub async fn can_advance_year(&self, student_id: &str) -> Result<bool, DomainError> {
        Ok(self.advancement(student_id).await?.is_ok())
    }

    /// Like `can_advance_year`, but names the blocking reason.
    pub async fn advancement(
        &self,
        student_id: &str,
    ) -> Result<Result<(), AdvanceBlock>, DomainError> {
        let student: Student = self.fetch(EntityKind::Student, student_id).await?;
        let Some(major_id) = student.major_id.clone() else {
            return Ok(Err(AdvanceBlock::NoMajor));
        };
        let subjects: Vec<Subject> = self
            .fetch_all(EntityKind::Subject, Some(ListFilter::eq("major_id", major_id)))
            .await?;
        let grades = self.grades_of(student_id).await?;
        let decision = evaluate_advancement(&student, &subjects, &passed_subject_ids(&grades));
        debug!(student_id, advanceable = decision.is_ok(), "advancement evaluated");
        Ok(decision)
    }

    /// Advisory check against the currently configured exam periods.
    pub async fn is_within_active_period(&self, exam_date: NaiveDate) -> Result<bool, DomainError> {
        let periods: Vec<ExamPeriod> = self.fetch_all(EntityKind::ExamPeriod, None).await?;
        Ok(is_within_active_period(exam_date, &periods))
    }

    /// Resolved against membership as stored right now.
    pub async fn resolve_audience(
        &self,
        notification: &Notification,
    ) -> Result<BTreeSet<UserRef>, DomainError> {
        let directory = self.directory().await?;
        let audience = resolve_audience(notification, &directory)?;
        debug!(
            notification_id = %notification.id,
            recipients = audience.len(),
            "audience resolved"
        );
        Ok(audience)
    }

    /// GPA and ESPB derived from the student's grades.
    pub async fn standing(&self, student_id: &str) -> Result<Standing, DomainError> {
        let grades = self.grades_of(student_id).await?;
        let subjects: Vec<Subject> = self.fetch_all(EntityKind::Subject, None).await?;
        Ok(compute_standing(&grades, &subjects))
    }

    async fn directory(&self) -> Result<Directory, DomainError> {
        Ok(Directory {
            users: self.fetch_all(EntityKind::User, None).await?,
            departments: self.fetch_all(EntityKind::Department, None).await?,
            majors: self.fetch_all(EntityKind::Major, None).await?,
            subjects: self.fetch_all(EntityKind::Subject, None).await?,
            professors: self.fetch_all(EntityKind::Professor, None).await?,
            students: self.fetch_all(EntityKind::Student, None).await?,
        })
    }

    async fn grades_of(&self, student_id: &str) -> Result<Vec<ExamGrade>, DomainError> {
        self.fetch_all(
            EntityKind::ExamGrade,
            Some(ListFilter::eq("student_id", student_id)),
        )
        .await
    }

    async fn fetch<T: DeserializeOwned>(&self, kind: EntityKind, id: &str) -> Result<T, DomainError> {
        let doc = self
            .retry
            .run("eligibility.get", || self.store.get(kind, id))
            .await?;
        decode(kind, doc)
    }

    async fn fetch_all<T: DeserializeOwned>(
        &self,
        kind: EntityKind,
        filter: Option<ListFilter>,
    ) -> Result<Vec<T>, DomainError> {
        let docs = self
            .retry
            .run("eligibility.list", || self.store.list(kind, filter.as_ref()))
            .await?;
        Ok(decode_all(kind, docs))
    }
}
