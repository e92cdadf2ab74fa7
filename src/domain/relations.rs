//! Relation table. Each many-to-many (or one-to-many) link is stored on both
//! ends; this module names the owning field and the mirrored field of each.

use crate::domain::entities::{EntityId, EntityKind};
use crate::domain::errors::DomainError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Shape of the field a counter-entity keeps for a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirror {
    /// Single child -> parent reference (e.g. `Subject.major_id`).
    Pointer(&'static str),
    /// Id set on the counter side (e.g. `Professor.subject_ids`).
    Set(&'static str),
}

impl Mirror {
    pub fn field(self) -> &'static str {
        match self {
            Mirror::Pointer(f) | Mirror::Set(f) => f,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    MajorSubjects,
    DepartmentMajors,
    DepartmentStaff,
    SubjectProfessors,
    ProfessorSubjects,
    ProfessorDepartments,
}

impl Relation {
    pub const ALL: [Relation; 6] = [
        Relation::MajorSubjects,
        Relation::DepartmentMajors,
        Relation::DepartmentStaff,
        Relation::SubjectProfessors,
        Relation::ProfessorSubjects,
        Relation::ProfessorDepartments,
    ];

    /// Dotted name, e.g. `major.subject_ids`.
    pub fn name(self) -> &'static str {
        match self {
            Relation::MajorSubjects => "major.subject_ids",
            Relation::DepartmentMajors => "department.major_ids",
            Relation::DepartmentStaff => "department.staff",
            Relation::SubjectProfessors => "subject.professor_ids",
            Relation::ProfessorSubjects => "professor.subject_ids",
            Relation::ProfessorDepartments => "professor.department_ids",
        }
    }

    pub fn owner_kind(self) -> EntityKind {
        match self {
            Relation::MajorSubjects => EntityKind::Major,
            Relation::DepartmentMajors | Relation::DepartmentStaff => EntityKind::Department,
            Relation::SubjectProfessors => EntityKind::Subject,
            Relation::ProfessorSubjects | Relation::ProfessorDepartments => EntityKind::Professor,
        }
    }

    /// Id-set field on the owning entity.
    pub fn owner_field(self) -> &'static str {
        match self {
            Relation::MajorSubjects => "subject_ids",
            Relation::DepartmentMajors => "major_ids",
            Relation::DepartmentStaff => "staff",
            Relation::SubjectProfessors => "professor_ids",
            Relation::ProfessorSubjects => "subject_ids",
            Relation::ProfessorDepartments => "department_ids",
        }
    }

    pub fn counter_kind(self) -> EntityKind {
        match self {
            Relation::MajorSubjects | Relation::ProfessorSubjects => EntityKind::Subject,
            Relation::DepartmentMajors => EntityKind::Major,
            Relation::DepartmentStaff | Relation::SubjectProfessors => EntityKind::Professor,
            Relation::ProfessorDepartments => EntityKind::Department,
        }
    }

    pub fn mirror(self) -> Mirror {
        match self {
            Relation::MajorSubjects => Mirror::Pointer("major_id"),
            Relation::DepartmentMajors => Mirror::Pointer("department_id"),
            Relation::DepartmentStaff => Mirror::Set("department_ids"),
            Relation::SubjectProfessors => Mirror::Set("subject_ids"),
            Relation::ProfessorSubjects => Mirror::Set("professor_ids"),
            Relation::ProfessorDepartments => Mirror::Set("staff"),
        }
    }

    /// The same link viewed from the counter side, when that side also owns a set.
    pub fn inverse(self) -> Option<Relation> {
        match self {
            Relation::DepartmentStaff => Some(Relation::ProfessorDepartments),
            Relation::ProfessorDepartments => Some(Relation::DepartmentStaff),
            Relation::SubjectProfessors => Some(Relation::ProfessorSubjects),
            Relation::ProfessorSubjects => Some(Relation::SubjectProfessors),
            Relation::MajorSubjects | Relation::DepartmentMajors => None,
        }
    }

    /// One relation per stored link: of two inverse relations only the first
    /// in `ALL` is kept, since both read the same pair of fields.
    pub fn distinct_links() -> Vec<Relation> {
        let mut kept: Vec<Relation> = Vec::new();
        for r in Self::ALL {
            if !r.inverse().is_some_and(|inv| kept.contains(&inv)) {
                kept.push(r);
            }
        }
        kept
    }

    /// Relations owned by records of `kind`.
    pub fn owned_by(kind: EntityKind) -> impl Iterator<Item = Relation> {
        Self::ALL.into_iter().filter(move |r| r.owner_kind() == kind)
    }

    /// Pointer relations whose counter side is `kind` (i.e. `kind` has a parent).
    pub fn parents_of(kind: EntityKind) -> impl Iterator<Item = Relation> {
        Self::ALL.into_iter().filter(move |r| {
            r.counter_kind() == kind && matches!(r.mirror(), Mirror::Pointer(_))
        })
    }

    /// Every field on `kind` that only the reconciler may write.
    pub fn managed_fields(kind: EntityKind) -> BTreeSet<&'static str> {
        let mut fields = BTreeSet::new();
        for r in Self::ALL {
            if r.owner_kind() == kind {
                fields.insert(r.owner_field());
            }
            if r.counter_kind() == kind {
                fields.insert(r.mirror().field());
            }
        }
        fields
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Relation {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|r| r.name() == wanted)
            .ok_or_else(|| DomainError::UnknownRelation(wanted.to_string()))
    }
}

/// Reads an id-set field from a stored document. Missing or null yields an empty set;
/// non-string members are ignored.
pub fn id_set(doc: &Value, field: &str) -> BTreeSet<EntityId> {
    match doc.get(field) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => BTreeSet::new(),
    }
}

/// Reads a pointer field. Missing, null or blank yields `None`.
pub fn pointer(doc: &Value, field: &str) -> Option<EntityId> {
    doc.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Normalizes an operator-submitted desired set: trims, drops blanks and duplicates.
pub fn normalize_ids<I, S>(ids: I) -> BTreeSet<EntityId>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    ids.into_iter()
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_relation_names_round_trip() {
        for r in Relation::ALL {
            assert_eq!(r.name().parse::<Relation>().unwrap(), r);
        }
        assert!("major.nonsense".parse::<Relation>().is_err());
    }

    #[test]
    fn test_inverse_relations_share_fields() {
        for r in Relation::ALL {
            if let Some(inv) = r.inverse() {
                assert_eq!(inv.owner_kind(), r.counter_kind());
                assert_eq!(inv.owner_field(), r.mirror().field());
                assert_eq!(inv.mirror().field(), r.owner_field());
            }
        }
    }

    #[test]
    fn test_distinct_links_drop_inverse_duplicates() {
        let links = Relation::distinct_links();
        assert_eq!(links.len(), 4);
        for r in &links {
            assert!(!r.inverse().is_some_and(|inv| links.contains(&inv)));
        }
    }

    #[test]
    fn test_managed_fields_for_subject() {
        let fields = Relation::managed_fields(EntityKind::Subject);
        assert!(fields.contains("major_id"));
        assert!(fields.contains("professor_ids"));
        assert!(!fields.contains("name"));
    }

    #[test]
    fn test_parents_of() {
        let parents: Vec<_> = Relation::parents_of(EntityKind::Subject).collect();
        assert_eq!(parents, vec![Relation::MajorSubjects]);
        assert_eq!(Relation::parents_of(EntityKind::Professor).count(), 0);
    }

    #[test]
    fn test_id_set_and_pointer_readers() {
        let doc = json!({"subject_ids": ["S1", "S2", 3], "major_id": " ", "department_id": "D1"});
        assert_eq!(id_set(&doc, "subject_ids").len(), 2);
        assert!(id_set(&doc, "missing").is_empty());
        assert_eq!(pointer(&doc, "major_id"), None);
        assert_eq!(pointer(&doc, "department_id").as_deref(), Some("D1"));
    }

    #[test]
    fn test_normalize_ids_dedupes_and_trims() {
        let ids = normalize_ids(["A", " A ", "", "B", "  "]);
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["A", "B"]);
    }
}
