//! Application use cases. Orchestrate domain logic via ports.

pub mod eligibility_service;
pub mod orchestrator;
pub mod reconciler;

#[cfg(test)]
pub(crate) mod test_support;

pub use eligibility_service::EligibilityService;
pub use orchestrator::{
    AdvanceOutcome, ExamSessionDraft, GradeDraft, Orchestrator, RecordedGrade, RelationChange,
    ScheduledSession, SentNotification, Submission,
};
pub use reconciler::LinkReconciler;
