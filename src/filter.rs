use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::models::{AttendanceSession, Member, Student};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scope<T> {
    #[default]
    All,
    Only(T),
}

impl<T: PartialEq> Scope<T> {
    pub fn admits(&self, value: &T) -> bool {
        match self {
            Scope::All => true,
            Scope::Only(expected) => expected == value,
        }
    }
}

impl<T> From<Option<T>> for Scope<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Scope::All, Scope::Only)
    }
}

/// Cohort and date-range selection applied before aggregation. Built
/// explicitly by the caller; an empty branch set means every branch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub branches: BTreeSet<String>,
    pub year: Scope<u8>,
    pub section: Scope<String>,
}

impl SessionFilter {
    /// Starting selection for a portal user: students see their own cohort,
    /// faculty see the branches they teach across every year and section.
    pub fn defaults_for(member: &Member) -> Self {
        match member {
            Member::Student(student) => Self {
                branches: student.branch.iter().cloned().collect(),
                year: student.year.into(),
                section: student.section.clone().into(),
                ..Self::default()
            },
            Member::Faculty(faculty) => Self {
                branches: faculty.branches.iter().cloned().collect(),
                ..Self::default()
            },
        }
    }

    pub fn matches(&self, session: &AttendanceSession) -> bool {
        self.from.map_or(true, |from| session.date >= from)
            && self.to.map_or(true, |to| session.date <= to)
            && self.admits_branch(Some(&session.branch))
            && self.year.admits(&session.year)
            && self.section.admits(&session.section)
    }

    /// Whether a roster entry belongs to the selected cohort. Entries with
    /// an unknown branch, year or section are only excluded when that field
    /// is actually being filtered on.
    pub fn matches_student(&self, student: &Student) -> bool {
        self.admits_branch(student.branch.as_ref())
            && match (&self.year, student.year) {
                (Scope::All, _) => true,
                (Scope::Only(expected), Some(year)) => *expected == year,
                (Scope::Only(_), None) => false,
            }
            && match (&self.section, &student.section) {
                (Scope::All, _) => true,
                (Scope::Only(expected), Some(section)) => expected == section,
                (Scope::Only(_), None) => false,
            }
    }

    pub fn apply(&self, sessions: &[AttendanceSession]) -> Vec<AttendanceSession> {
        sessions
            .iter()
            .filter(|session| self.matches(session))
            .cloned()
            .collect()
    }

    pub fn scope_roster(&self, roster: &[Student]) -> Vec<Student> {
        roster
            .iter()
            .filter(|student| self.matches_student(student))
            .cloned()
            .collect()
    }

    fn admits_branch(&self, branch: Option<&String>) -> bool {
        if self.branches.is_empty() {
            return true;
        }
        branch.is_some_and(|branch| self.branches.contains(branch))
    }
}
