use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::attendance::normalize_presence;
use crate::classify::normalize_id;
use crate::error::AttendanceError;
use crate::models::{AttendanceSession, Mark, SessionCounts};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditState {
    Editable,
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditWindow {
    pub length: Duration,
}

impl Default for EditWindow {
    fn default() -> Self {
        Self {
            length: Duration::hours(2),
        }
    }
}

impl EditWindow {
    /// `Editable` up to and including the instant the window elapses.
    pub fn state(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> EditState {
        if now - created_at <= self.length {
            EditState::Editable
        } else {
            EditState::Locked
        }
    }

    pub fn locks_at(&self, created_at: DateTime<Utc>) -> DateTime<Utc> {
        created_at + self.length
    }

    pub fn ensure_editable(
        &self,
        session: &AttendanceSession,
        editor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AttendanceError> {
        if session.faculty_id != editor_id {
            return Err(AttendanceError::NotSubmitter {
                session_id: session.id,
                owner: session.faculty_id.clone(),
                editor: editor_id.to_string(),
            });
        }
        match self.state(session.created_at, now) {
            EditState::Editable => Ok(()),
            EditState::Locked => Err(AttendanceError::EditWindowClosed {
                session_id: session.id,
                locked_at: self.locks_at(session.created_at),
            }),
        }
    }

    /// Overwrites marks on an existing session. Only students already
    /// recorded on the session can be changed.
    pub fn apply_edit(
        &self,
        session: &mut AttendanceSession,
        editor_id: &str,
        changes: &BTreeMap<String, bool>,
        now: DateTime<Utc>,
    ) -> Result<(), AttendanceError> {
        self.ensure_editable(session, editor_id, now)?;
        let changes: BTreeMap<String, bool> = changes
            .iter()
            .map(|(student_id, present)| (normalize_id(student_id), *present))
            .collect();
        if let Some(unknown) = changes.keys().find(|id| !session.records.contains_key(*id)) {
            return Err(AttendanceError::UnknownStudent(unknown.clone()));
        }

        for (student_id, present) in changes {
            session.records.insert(student_id, mark_for(present));
        }
        session.stats = Some(counts(&session.records));
        Ok(())
    }
}

/// What to record for roster members left unmarked at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum UnmarkedPolicy {
    Present,
    Absent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDraft {
    pub date: NaiveDate,
    pub branch: String,
    pub year: u8,
    pub section: String,
    pub faculty_id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    pub roster: Vec<String>,
    #[serde(default)]
    pub marks: BTreeMap<String, bool>,
}

impl SessionDraft {
    fn normalized(&self) -> (Vec<String>, BTreeMap<String, bool>) {
        let roster = self.roster.iter().map(|id| normalize_id(id)).collect();
        let marks = self
            .marks
            .iter()
            .map(|(id, present)| (normalize_id(id), *present))
            .collect();
        (roster, marks)
    }

    pub fn unmarked(&self) -> Vec<String> {
        let (roster, marks) = self.normalized();
        roster
            .into_iter()
            .filter(|id| !marks.contains_key(id))
            .collect()
    }

    /// Produces a complete session with one explicit mark per roster member.
    /// Unmarked students must be resolved through `policy`.
    pub fn finalize(
        &self,
        policy: Option<UnmarkedPolicy>,
        created_at: DateTime<Utc>,
    ) -> Result<AttendanceSession, AttendanceError> {
        let (roster, marks) = self.normalized();
        if let Some(stray) = marks.keys().find(|id| !roster.contains(*id)) {
            return Err(AttendanceError::UnknownStudent(stray.clone()));
        }

        let unmarked = self.unmarked();
        let fallback = match (policy, unmarked.is_empty()) {
            (_, true) => None,
            (Some(policy), false) => Some(policy == UnmarkedPolicy::Present),
            (None, false) => {
                return Err(AttendanceError::UnmarkedStudents {
                    student_ids: unmarked,
                })
            }
        };

        let records: BTreeMap<String, Mark> = roster
            .into_iter()
            .map(|id| {
                let present = marks.get(&id).copied().or(fallback).unwrap_or(false);
                (id, mark_for(present))
            })
            .collect();

        Ok(AttendanceSession {
            id: Uuid::new_v4(),
            date: self.date,
            branch: self.branch.clone(),
            year: self.year,
            section: self.section.clone(),
            faculty_id: self.faculty_id.clone(),
            created_at,
            subject: self.subject.clone(),
            topic: self.topic.clone(),
            stats: Some(counts(&records)),
            records,
        })
    }
}

fn mark_for(present: bool) -> Mark {
    if present {
        Mark::present()
    } else {
        Mark::absent()
    }
}

fn counts(records: &BTreeMap<String, Mark>) -> SessionCounts {
    SessionCounts {
        present: records
            .values()
            .filter(|mark| normalize_presence(Some(*mark)))
            .count() as u32,
        total: records.len() as u32,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 4, 12, 0, 0).unwrap()
    }

    fn draft(marks: &[(&str, bool)]) -> SessionDraft {
        SessionDraft {
            date: NaiveDate::from_ymd_opt(2024, 11, 4).unwrap(),
            branch: "ECE".to_string(),
            year: 3,
            section: "B".to_string(),
            faculty_id: "FAC042".to_string(),
            subject: Some("Signals".to_string()),
            topic: Some("Fourier series".to_string()),
            roster: vec!["S1".to_string(), "S2".to_string(), "S3".to_string()],
            marks: marks
                .iter()
                .map(|(id, present)| (id.to_string(), *present))
                .collect(),
        }
    }

    #[rstest]
    #[case(0, EditState::Editable)]
    #[case(119, EditState::Editable)]
    #[case(120, EditState::Editable)]
    #[case(121, EditState::Locked)]
    #[case(60 * 24, EditState::Locked)]
    fn edit_window_locks_after_two_hours(#[case] minutes_ago: i64, #[case] expected: EditState) {
        let created_at = now() - Duration::minutes(minutes_ago);
        assert_eq!(EditWindow::default().state(created_at, now()), expected);
    }

    #[test]
    fn boundary_is_inclusive_to_the_second() {
        let window = EditWindow::default();
        let created_at = now() - Duration::minutes(120) - Duration::seconds(1);
        assert_eq!(window.state(created_at, now()), EditState::Locked);
    }

    #[test]
    fn locked_session_rejects_edits() {
        let mut session = draft(&[("S1", true), ("S2", true), ("S3", true)])
            .finalize(None, now() - Duration::minutes(121))
            .unwrap();
        let before = session.clone();
        let changes: BTreeMap<String, bool> = [("S1".to_string(), false)].into_iter().collect();

        let error = EditWindow::default()
            .apply_edit(&mut session, "FAC042", &changes, now())
            .unwrap_err();

        assert!(matches!(error, AttendanceError::EditWindowClosed { .. }));
        assert_eq!(session, before);
    }

    #[test]
    fn other_faculty_cannot_edit() {
        let session = draft(&[("S1", true), ("S2", true), ("S3", true)])
            .finalize(None, now())
            .unwrap();
        let error = EditWindow::default()
            .ensure_editable(&session, "FAC001", now())
            .unwrap_err();
        assert!(matches!(error, AttendanceError::NotSubmitter { .. }));
    }

    #[test]
    fn edit_within_window_updates_marks_and_counts() {
        let mut session = draft(&[("S1", true), ("S2", true), ("S3", false)])
            .finalize(None, now() - Duration::minutes(30))
            .unwrap();
        let changes: BTreeMap<String, bool> = [("S2".to_string(), false)].into_iter().collect();

        EditWindow::default()
            .apply_edit(&mut session, "FAC042", &changes, now())
            .unwrap();

        assert_eq!(session.records.get("S2"), Some(&Mark::absent()));
        assert_eq!(session.stats, Some(SessionCounts { present: 1, total: 3 }));
    }

    #[test]
    fn edit_rejects_students_not_on_session() {
        let mut session = draft(&[("S1", true), ("S2", true), ("S3", true)])
            .finalize(None, now())
            .unwrap();
        let changes: BTreeMap<String, bool> = [("S9".to_string(), true)].into_iter().collect();
        let error = EditWindow::default()
            .apply_edit(&mut session, "FAC042", &changes, now())
            .unwrap_err();
        assert_eq!(error, AttendanceError::UnknownStudent("S9".to_string()));
    }

    #[test]
    fn unmarked_students_block_finalize_without_policy() {
        let error = draft(&[("S1", true)]).finalize(None, now()).unwrap_err();
        assert_eq!(
            error,
            AttendanceError::UnmarkedStudents {
                student_ids: vec!["S2".to_string(), "S3".to_string()],
            }
        );
        assert!(error.to_string().contains("2 student(s) are unmarked (S2, S3)"));
    }

    #[rstest]
    #[case(UnmarkedPolicy::Present, 3)]
    #[case(UnmarkedPolicy::Absent, 1)]
    fn policy_resolves_unmarked_students(#[case] policy: UnmarkedPolicy, #[case] present: u32) {
        let session = draft(&[("S1", true)]).finalize(Some(policy), now()).unwrap();
        assert_eq!(session.records.len(), 3);
        assert_eq!(session.records.get("S1"), Some(&Mark::present()));
        assert_eq!(session.stats, Some(SessionCounts { present, total: 3 }));
    }

    #[test]
    fn explicit_marks_win_over_policy() {
        let session = draft(&[("S1", false)])
            .finalize(Some(UnmarkedPolicy::Present), now())
            .unwrap();
        assert_eq!(session.records.get("S1"), Some(&Mark::absent()));
    }

    #[test]
    fn mixed_case_ids_are_stored_in_roster_form() {
        let mut draft = draft(&[("s1", true), (" S2", false), ("S3", true)]);
        draft.roster = vec!["s1".to_string(), "S2".to_string(), "s3 ".to_string()];

        let mut session = draft.finalize(None, now()).unwrap();
        let keys: Vec<&str> = session.records.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["S1", "S2", "S3"]);

        let changes: BTreeMap<String, bool> = [("s2".to_string(), true)].into_iter().collect();
        EditWindow::default()
            .apply_edit(&mut session, "FAC042", &changes, now())
            .unwrap();
        assert_eq!(session.records.get("S2"), Some(&Mark::present()));
        assert_eq!(session.records.len(), 3);
    }

    #[test]
    fn marks_for_students_off_roster_are_rejected() {
        let error = draft(&[("S7", true)])
            .finalize(Some(UnmarkedPolicy::Absent), now())
            .unwrap_err();
        assert_eq!(error, AttendanceError::UnknownStudent("S7".to_string()));
    }
}
