//! Core domain layer. No external I/O dependencies.
//!
//! Entities, relation table and eligibility rules live here. Dependencies flow inward.

pub mod audience;
pub mod eligibility;
pub mod entities;
pub mod errors;
pub mod outcome;
pub mod relations;
pub mod validation;

pub use audience::{Directory, resolve_audience};
pub use eligibility::{
    AdvanceBlock, Standing, can_advance_year, compute_standing, evaluate_advancement,
    is_within_active_period, passed_subject_ids,
};
pub use entities::{
    Department, EntityId, EntityKind, ExamGrade, ExamPeriod, ExamSession, Major, Notification,
    Professor, RecipientType, Role, Student, Subject, User, UserRef,
};
pub use errors::{DomainError, StoreError};
pub use outcome::{
    DriftReport, Edge, EdgeFailure, EdgeOp, ReconcileResult, SubmissionOutcome, SyncFailure,
};
pub use relations::{Mirror, Relation};
pub use validation::validate_record;
