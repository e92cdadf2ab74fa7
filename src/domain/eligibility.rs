//! Eligibility rules. Pure functions over already-fetched snapshots.

use crate::domain::entities::{EntityId, ExamGrade, ExamPeriod, Student, Subject};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Why a student cannot move to the next year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AdvanceBlock {
    NoMajor,
    NoYear,
    /// The major defines no subjects for this year; never advanceable.
    NoSubjectsForYear { year: u8 },
    MissingPasses { year: u8, subject_ids: Vec<EntityId> },
}

impl fmt::Display for AdvanceBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvanceBlock::NoMajor => write!(f, "student has no major"),
            AdvanceBlock::NoYear => write!(f, "student has no study year"),
            AdvanceBlock::NoSubjectsForYear { year } => {
                write!(f, "major defines no subjects for year {}", year)
            }
            AdvanceBlock::MissingPasses { year, subject_ids } => write!(
                f,
                "{} year-{} subject(s) not passed: {}",
                subject_ids.len(),
                year,
                subject_ids.join(", ")
            ),
        }
    }
}

/// Checks every year-advancement precondition and names the first one that fails.
///
/// `subjects_of_major` may contain subjects of other majors; only those whose
/// `major_id` matches the student's major are considered.
pub fn evaluate_advancement(
    student: &Student,
    subjects_of_major: &[Subject],
    passed_subject_ids: &BTreeSet<EntityId>,
) -> Result<(), AdvanceBlock> {
    let major_id = student.major_id.as_deref().ok_or(AdvanceBlock::NoMajor)?;
    let year = student.year.ok_or(AdvanceBlock::NoYear)?;

    let current: Vec<&Subject> = subjects_of_major
        .iter()
        .filter(|s| s.year == year && s.major_id.as_deref() == Some(major_id))
        .collect();
    if current.is_empty() {
        return Err(AdvanceBlock::NoSubjectsForYear { year });
    }

    let missing: Vec<EntityId> = current
        .iter()
        .filter(|s| !passed_subject_ids.contains(&s.id))
        .map(|s| s.id.clone())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AdvanceBlock::MissingPasses {
            year,
            subject_ids: missing,
        })
    }
}

pub fn can_advance_year(
    student: &Student,
    subjects_of_major: &[Subject],
    passed_subject_ids: &BTreeSet<EntityId>,
) -> bool {
    evaluate_advancement(student, subjects_of_major, passed_subject_ids).is_ok()
}

/// Subjects with at least one passing grade.
pub fn passed_subject_ids(grades: &[ExamGrade]) -> BTreeSet<EntityId> {
    grades
        .iter()
        .filter(|g| g.is_passed())
        .map(|g| g.subject_id.clone())
        .collect()
}

/// Inclusive on both ends. No configured periods means no constraint.
pub fn is_within_active_period(exam_date: NaiveDate, periods: &[ExamPeriod]) -> bool {
    if periods.is_empty() {
        return true;
    }
    periods
        .iter()
        .any(|p| p.is_active && p.start_date <= exam_date && exam_date <= p.end_date)
}

/// Derived academic standing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Standing {
    pub gpa: f64,
    pub espb: u32,
}

/// GPA over the best passing grade per subject; ESPB summed over those subjects.
/// Grades for subjects missing from `subjects` count toward GPA with zero credits.
pub fn compute_standing(grades: &[ExamGrade], subjects: &[Subject]) -> Standing {
    let mut best: BTreeMap<&str, u8> = BTreeMap::new();
    for g in grades.iter().filter(|g| g.is_passed()) {
        let entry = best.entry(g.subject_id.as_str()).or_insert(g.grade);
        *entry = (*entry).max(g.grade);
    }
    if best.is_empty() {
        return Standing { gpa: 0.0, espb: 0 };
    }

    let credits: BTreeMap<&str, u32> = subjects.iter().map(|s| (s.id.as_str(), s.espb)).collect();
    let espb = best
        .keys()
        .map(|id| credits.get(id).copied().unwrap_or(0))
        .sum();
    let total: u32 = best.values().map(|g| u32::from(*g)).sum();
    let gpa = f64::from(total) / best.len() as f64;
    Standing {
        gpa: (gpa * 100.0).round() / 100.0,
        espb,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn subject(id: &str, major: &str, year: u8) -> Subject {
        Subject {
            id: id.to_string(),
            name: id.to_string(),
            major_id: Some(major.to_string()),
            year,
            semester: Some(1),
            espb: 6,
            professor_ids: BTreeSet::new(),
        }
    }

    fn student(major: Option<&str>, year: Option<u8>) -> Student {
        Student {
            id: "ST1".to_string(),
            first_name: "Ana".to_string(),
            last_name: "Petrovic".to_string(),
            index_number: Some("2021/0042".to_string()),
            major_id: major.map(str::to_string),
            year,
            gpa: 0.0,
            espb: 0,
            scholarship: false,
        }
    }

    fn period(start: (i32, u32, u32), end: (i32, u32, u32), active: bool) -> ExamPeriod {
        ExamPeriod {
            id: "P1".to_string(),
            name: "January".to_string(),
            start_date: NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap(),
            end_date: NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap(),
            academic_year: "2024/2025".to_string(),
            semester: Some(1),
            is_active: active,
        }
    }

    fn grade(subject_id: &str, value: u8) -> ExamGrade {
        ExamGrade {
            id: format!("G-{}-{}", subject_id, value),
            exam_session_id: "ES1".to_string(),
            subject_id: subject_id.to_string(),
            student_id: "ST1".to_string(),
            grade: value,
        }
    }

    #[test]
    fn test_advance_requires_algorithms_pass() {
        let st = student(Some("M1"), Some(2));
        let subjects = vec![subject("ALG", "M1", 2), subject("CALC", "M1", 1)];
        let mut passed = BTreeSet::new();
        assert!(!can_advance_year(&st, &subjects, &passed));

        passed.insert("ALG".to_string());
        assert!(can_advance_year(&st, &subjects, &passed));
    }

    #[test]
    fn test_advance_is_false_without_subjects_for_year() {
        let st = student(Some("M1"), Some(2));
        let subjects = vec![subject("CALC", "M1", 1)];
        let passed: BTreeSet<EntityId> = ["CALC".to_string()].into();
        assert_eq!(
            evaluate_advancement(&st, &subjects, &passed),
            Err(AdvanceBlock::NoSubjectsForYear { year: 2 })
        );
        assert!(!can_advance_year(&st, &[], &passed));
    }

    #[test]
    fn test_advance_ignores_other_majors() {
        let st = student(Some("M1"), Some(2));
        let subjects = vec![subject("ALG", "M1", 2), subject("DB", "M2", 2)];
        let passed: BTreeSet<EntityId> = ["ALG".to_string()].into();
        assert!(can_advance_year(&st, &subjects, &passed));
    }

    #[test]
    fn test_advance_lists_missing_subjects() {
        let st = student(Some("M1"), Some(1));
        let subjects = vec![subject("A", "M1", 1), subject("B", "M1", 1)];
        let passed: BTreeSet<EntityId> = ["A".to_string()].into();
        match evaluate_advancement(&st, &subjects, &passed) {
            Err(AdvanceBlock::MissingPasses { year, subject_ids }) => {
                assert_eq!(year, 1);
                assert_eq!(subject_ids, vec!["B".to_string()]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_advance_blocked_without_major_or_year() {
        let subjects = vec![subject("A", "M1", 1)];
        let passed = BTreeSet::new();
        assert_eq!(
            evaluate_advancement(&student(None, Some(1)), &subjects, &passed),
            Err(AdvanceBlock::NoMajor)
        );
        assert_eq!(
            evaluate_advancement(&student(Some("M1"), None), &subjects, &passed),
            Err(AdvanceBlock::NoYear)
        );
    }

    #[test]
    fn test_passed_subject_ids_skip_failing_grade() {
        let grades = vec![grade("A", 5), grade("B", 6), grade("C", 10)];
        let passed = passed_subject_ids(&grades);
        assert!(!passed.contains("A"));
        assert!(passed.contains("B"));
        assert!(passed.contains("C"));
    }

    #[test]
    fn test_period_window_is_inclusive() {
        let periods = vec![period((2025, 1, 10), (2025, 1, 24), true)];
        let d = |day| NaiveDate::from_ymd_opt(2025, 1, day).unwrap();
        assert!(is_within_active_period(d(10), &periods));
        assert!(is_within_active_period(d(24), &periods));
        assert!(!is_within_active_period(d(25), &periods));
        assert!(!is_within_active_period(d(9), &periods));
    }

    #[test]
    fn test_no_periods_means_no_constraint() {
        let date = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        assert!(is_within_active_period(date, &[]));
    }

    #[test]
    fn test_inactive_period_does_not_count() {
        let periods = vec![period((2025, 1, 10), (2025, 1, 24), false)];
        let date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        assert!(!is_within_active_period(date, &periods));
    }

    #[test]
    fn test_compute_standing_uses_best_pass_per_subject() {
        let subjects = vec![subject("A", "M1", 1), subject("B", "M1", 1)];
        let grades = vec![grade("A", 6), grade("A", 9), grade("B", 8), grade("C", 5)];
        let standing = compute_standing(&grades, &subjects);
        assert_eq!(standing.espb, 12);
        assert!((standing.gpa - 8.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_compute_standing_without_passes() {
        let standing = compute_standing(&[grade("A", 5)], &[]);
        assert_eq!(standing, Standing { gpa: 0.0, espb: 0 });
    }
}
