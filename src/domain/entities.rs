//! Domain entities. Pure data structures for the portal's relational core.
//!
//! No store/HTTP types here — adapters hand over JSON documents which are
//! decoded into these records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of any stored record. The store owns the format.
pub type EntityId = String;

/// Lowest grade that counts as passed on the 5–10 scale.
pub const PASSING_GRADE: u8 = 6;
/// Highest grade on the scale.
pub const MAX_GRADE: u8 = 10;
/// Failing grade; the lowest value a professor may record.
pub const MIN_GRADE: u8 = 5;
/// Last study year a subject can be assigned to.
pub const FINAL_YEAR: u8 = 6;

/// Every record kind the store knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Department,
    Major,
    Subject,
    Professor,
    Student,
    User,
    Notification,
    ExamPeriod,
    ExamSession,
    ExamGrade,
}

impl EntityKind {
    pub const ALL: [EntityKind; 10] = [
        EntityKind::Department,
        EntityKind::Major,
        EntityKind::Subject,
        EntityKind::Professor,
        EntityKind::Student,
        EntityKind::User,
        EntityKind::Notification,
        EntityKind::ExamPeriod,
        EntityKind::ExamSession,
        EntityKind::ExamGrade,
    ];

    /// Collection name used in URLs, snapshot files and the SQLite `kind` column.
    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Department => "departments",
            EntityKind::Major => "majors",
            EntityKind::Subject => "subjects",
            EntityKind::Professor => "professors",
            EntityKind::Student => "students",
            EntityKind::User => "users",
            EntityKind::Notification => "notifications",
            EntityKind::ExamPeriod => "exam-periods",
            EntityKind::ExamSession => "exam-sessions",
            EntityKind::ExamGrade => "exam-grades",
        }
    }

    pub fn from_collection(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.collection() == name)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Department => "department",
            EntityKind::Major => "major",
            EntityKind::Subject => "subject",
            EntityKind::Professor => "professor",
            EntityKind::Student => "student",
            EntityKind::User => "user",
            EntityKind::Notification => "notification",
            EntityKind::ExamPeriod => "exam_period",
            EntityKind::ExamSession => "exam_session",
            EntityKind::ExamGrade => "exam_grade",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Department {
    pub id: EntityId,
    pub name: String,
    /// Head of department (a professor id).
    #[serde(default)]
    pub head: Option<EntityId>,
    #[serde(default)]
    pub major_ids: BTreeSet<EntityId>,
    #[serde(default)]
    pub staff: BTreeSet<EntityId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Major {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub department_id: Option<EntityId>,
    #[serde(default)]
    pub subject_ids: BTreeSet<EntityId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub major_id: Option<EntityId>,
    /// Study year, 1..=6.
    pub year: u8,
    /// 1 (winter) or 2 (summer); absent for year-long subjects.
    #[serde(default)]
    pub semester: Option<u8>,
    /// ECTS-equivalent credits awarded when passed.
    #[serde(default)]
    pub espb: u32,
    #[serde(default)]
    pub professor_ids: BTreeSet<EntityId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Professor {
    pub id: EntityId,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub department_ids: BTreeSet<EntityId>,
    #[serde(default)]
    pub subject_ids: BTreeSet<EntityId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: EntityId,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub index_number: Option<String>,
    #[serde(default)]
    pub major_id: Option<EntityId>,
    #[serde(default)]
    pub year: Option<u8>,
    #[serde(default)]
    pub gpa: f64,
    #[serde(default)]
    pub espb: u32,
    #[serde(default)]
    pub scholarship: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Professor,
    Student,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "professor" => Some(Role::Professor),
            "student" => Some(Role::Student),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Admin => "admin",
            Role::Professor => "professor",
            Role::Student => "student",
        })
    }
}

/// Login account. Professors and students share ids with their profile records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: EntityId,
    #[serde(default)]
    pub email: Option<String>,
    pub role: Role,
}

/// A resolved notification recipient.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserRef {
    pub id: EntityId,
    /// Unknown when an `id` audience names a user the directory does not hold.
    pub role: Option<Role>,
}

impl UserRef {
    pub fn new(id: impl Into<EntityId>, role: Role) -> Self {
        Self {
            id: id.into(),
            role: Some(role),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamPeriod {
    pub id: EntityId,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub academic_year: String,
    #[serde(default)]
    pub semester: Option<u8>,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSession {
    pub id: EntityId,
    pub subject_id: EntityId,
    pub professor_id: EntityId,
    pub exam_date: NaiveDate,
    #[serde(default)]
    pub location: String,
    pub max_students: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamGrade {
    pub id: EntityId,
    pub exam_session_id: EntityId,
    pub subject_id: EntityId,
    pub student_id: EntityId,
    pub grade: u8,
}

impl ExamGrade {
    pub fn is_passed(&self) -> bool {
        (PASSING_GRADE..=MAX_GRADE).contains(&self.grade)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientType {
    Id,
    Role,
    Department,
    Major,
    DepartmentStudents,
    DepartmentProfessors,
    MajorStudents,
    MajorProfessors,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: EntityId,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub recipient_type: RecipientType,
    pub recipient_value: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}
