//! Notification audience resolution over a membership snapshot.
//!
//! The snapshot must be taken at send time; membership drifts after a
//! notification is authored, so results are never stored.

use crate::domain::entities::{
    Department, EntityId, Major, Notification, Professor, RecipientType, Role, Student, Subject,
    User, UserRef,
};
use crate::domain::errors::DomainError;
use std::collections::BTreeSet;

/// Current membership of every unit an audience can name.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    pub users: Vec<User>,
    pub departments: Vec<Department>,
    pub majors: Vec<Major>,
    pub subjects: Vec<Subject>,
    pub professors: Vec<Professor>,
    pub students: Vec<Student>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Members {
    All,
    StudentsOnly,
    ProfessorsOnly,
}

impl Members {
    fn students(self) -> bool {
        matches!(self, Members::All | Members::StudentsOnly)
    }

    fn professors(self) -> bool {
        matches!(self, Members::All | Members::ProfessorsOnly)
    }
}

pub fn resolve_audience(
    notification: &Notification,
    directory: &Directory,
) -> Result<BTreeSet<UserRef>, DomainError> {
    let value = notification.recipient_value.trim();
    if value.is_empty() {
        return Err(DomainError::Validation(format!(
            "notification {} has an empty recipient value",
            notification.id
        )));
    }

    let audience = match notification.recipient_type {
        RecipientType::Id => BTreeSet::from([UserRef {
            id: value.to_string(),
            role: directory.role_of(value),
        }]),
        RecipientType::Role => {
            let role = Role::parse(value)
                .ok_or_else(|| DomainError::Validation(format!("unknown role '{}'", value)))?;
            directory.members_with_role(role)
        }
        RecipientType::Department => directory.department_members(value, Members::All),
        RecipientType::DepartmentStudents => {
            directory.department_members(value, Members::StudentsOnly)
        }
        RecipientType::DepartmentProfessors => {
            directory.department_members(value, Members::ProfessorsOnly)
        }
        RecipientType::Major => directory.major_members(value, Members::All),
        RecipientType::MajorStudents => directory.major_members(value, Members::StudentsOnly),
        RecipientType::MajorProfessors => directory.major_members(value, Members::ProfessorsOnly),
    };
    Ok(audience)
}

impl Directory {
    fn role_of(&self, id: &str) -> Option<Role> {
        if let Some(user) = self.users.iter().find(|u| u.id == id) {
            return Some(user.role);
        }
        if self.professors.iter().any(|p| p.id == id) {
            return Some(Role::Professor);
        }
        if self.students.iter().any(|s| s.id == id) {
            return Some(Role::Student);
        }
        None
    }

    fn members_with_role(&self, role: Role) -> BTreeSet<UserRef> {
        let mut out: BTreeSet<UserRef> = self
            .users
            .iter()
            .filter(|u| u.role == role)
            .map(|u| UserRef::new(u.id.clone(), role))
            .collect();
        match role {
            Role::Professor => out.extend(
                self.professors
                    .iter()
                    .map(|p| UserRef::new(p.id.clone(), Role::Professor)),
            ),
            Role::Student => out.extend(
                self.students
                    .iter()
                    .map(|s| UserRef::new(s.id.clone(), Role::Student)),
            ),
            Role::Admin => {}
        }
        out
    }

    fn department_members(&self, department_id: &str, members: Members) -> BTreeSet<UserRef> {
        let department = self.departments.iter().find(|d| d.id == department_id);
        let mut out = BTreeSet::new();

        if members.students() {
            let mut majors: BTreeSet<&str> = department
                .map(|d| d.major_ids.iter().map(String::as_str).collect())
                .unwrap_or_default();
            majors.extend(
                self.majors
                    .iter()
                    .filter(|m| m.department_id.as_deref() == Some(department_id))
                    .map(|m| m.id.as_str()),
            );
            out.extend(self.students_of(&majors));
        }

        if members.professors() {
            let mut staff: BTreeSet<&str> = department
                .map(|d| d.staff.iter().map(String::as_str).collect())
                .unwrap_or_default();
            staff.extend(
                self.professors
                    .iter()
                    .filter(|p| p.department_ids.contains(department_id))
                    .map(|p| p.id.as_str()),
            );
            out.extend(staff.into_iter().map(|id| UserRef::new(id, Role::Professor)));
        }
        out
    }

    fn major_members(&self, major_id: &str, members: Members) -> BTreeSet<UserRef> {
        let mut out = BTreeSet::new();

        if members.students() {
            out.extend(self.students_of(&BTreeSet::from([major_id])));
        }

        if members.professors() {
            let mut subjects: BTreeSet<&str> = self
                .majors
                .iter()
                .find(|m| m.id == major_id)
                .map(|m| m.subject_ids.iter().map(String::as_str).collect())
                .unwrap_or_default();
            subjects.extend(
                self.subjects
                    .iter()
                    .filter(|s| s.major_id.as_deref() == Some(major_id))
                    .map(|s| s.id.as_str()),
            );

            let mut teaching: BTreeSet<EntityId> = self
                .subjects
                .iter()
                .filter(|s| subjects.contains(s.id.as_str()))
                .flat_map(|s| s.professor_ids.iter().cloned())
                .collect();
            teaching.extend(
                self.professors
                    .iter()
                    .filter(|p| p.subject_ids.iter().any(|s| subjects.contains(s.as_str())))
                    .map(|p| p.id.clone()),
            );
            out.extend(teaching.into_iter().map(|id| UserRef::new(id, Role::Professor)));
        }
        out
    }

    fn students_of(&self, majors: &BTreeSet<&str>) -> Vec<UserRef> {
        self.students
            .iter()
            .filter(|s| s.major_id.as_deref().is_some_and(|m| majors.contains(m)))
            .map(|s| UserRef::new(s.id.clone(), Role::Student))
            .collect()
    }
}
