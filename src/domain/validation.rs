//! Shape and range checks applied to a record before it is written.

use crate::domain::entities::{
    Department, EntityKind, ExamGrade, ExamPeriod, ExamSession, FINAL_YEAR, Major, Notification,
    Professor, Student, Subject, User,
};
use crate::domain::errors::DomainError;
use serde::de::DeserializeOwned;
use serde_json::Value;

fn shape<T: DeserializeOwned>(kind: EntityKind, doc: &Value) -> Result<T, DomainError> {
    T::deserialize(doc).map_err(|e| DomainError::Validation(format!("{}: {}", kind, e)))
}

fn check_year(kind: EntityKind, year: u8) -> Result<(), DomainError> {
    if (1..=FINAL_YEAR).contains(&year) {
        Ok(())
    } else {
        Err(DomainError::Validation(format!(
            "{} year {} is outside 1..={}",
            kind, year, FINAL_YEAR
        )))
    }
}

/// Rejects a full record (stored fields merged with the form) that list reads
/// could not decode, or whose study year or semester is out of range.
pub fn validate_record(kind: EntityKind, doc: &Value) -> Result<(), DomainError> {
    match kind {
        EntityKind::Subject => {
            let subject: Subject = shape(kind, doc)?;
            check_year(kind, subject.year)?;
            if let Some(semester) = subject.semester.filter(|s| !matches!(s, 1 | 2)) {
                return Err(DomainError::Validation(format!(
                    "subject semester {} must be 1 or 2",
                    semester
                )));
            }
        }
        EntityKind::Student => {
            let student: Student = shape(kind, doc)?;
            if let Some(year) = student.year {
                check_year(kind, year)?;
            }
        }
        EntityKind::Department => {
            shape::<Department>(kind, doc)?;
        }
        EntityKind::Major => {
            shape::<Major>(kind, doc)?;
        }
        EntityKind::Professor => {
            shape::<Professor>(kind, doc)?;
        }
        EntityKind::User => {
            shape::<User>(kind, doc)?;
        }
        EntityKind::ExamPeriod => {
            let period: ExamPeriod = shape(kind, doc)?;
            if period.end_date < period.start_date {
                return Err(DomainError::Validation(format!(
                    "exam period {} ends before it starts",
                    period.id
                )));
            }
        }
        EntityKind::ExamSession => {
            shape::<ExamSession>(kind, doc)?;
        }
        EntityKind::ExamGrade => {
            shape::<ExamGrade>(kind, doc)?;
        }
        EntityKind::Notification => {
            shape::<Notification>(kind, doc)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subject_needs_year_in_range() {
        let ok = json!({"id": "S1", "name": "Algebra", "year": 2, "semester": 1});
        assert!(validate_record(EntityKind::Subject, &ok).is_ok());

        let missing = json!({"id": "S1", "name": "Algebra"});
        assert!(validate_record(EntityKind::Subject, &missing).unwrap_err().is_validation());
        let too_late = json!({"id": "S1", "name": "Algebra", "year": 9});
        assert!(validate_record(EntityKind::Subject, &too_late).is_err());
        let bad_semester = json!({"id": "S1", "name": "Algebra", "year": 1, "semester": 7});
        assert!(validate_record(EntityKind::Subject, &bad_semester).is_err());
    }

    #[test]
    fn test_student_year_is_optional() {
        assert!(validate_record(EntityKind::Student, &json!({"id": "ST1"})).is_ok());
        assert!(validate_record(EntityKind::Student, &json!({"id": "ST1", "year": 0})).is_err());
    }

    #[test]
    fn test_period_dates_ordered() {
        let period = json!({"id": "JAN", "name": "January", "start_date": "2025-01-24", "end_date": "2025-01-10"});
        assert!(validate_record(EntityKind::ExamPeriod, &period).is_err());
    }
}
