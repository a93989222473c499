//! Recoverable rejections raised by the attendance core. Each message is
//! meant to be shown to the person who triggered it.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttendanceError {
    /// The session is older than the edit window and is now read-only.
    #[error("attendance for session {session_id} was locked at {locked_at}; it can no longer be edited")]
    EditWindowClosed {
        session_id: Uuid,
        locked_at: DateTime<Utc>,
    },

    /// Only the faculty member who submitted a session may change it.
    #[error("session {session_id} was submitted by {owner}; {editor} cannot edit it")]
    NotSubmitter {
        session_id: Uuid,
        owner: String,
        editor: String,
    },

    /// Some roster members have no mark and no default was chosen.
    #[error("{} student(s) are unmarked ({}); choose whether to mark them present or absent", .student_ids.len(), .student_ids.join(", "))]
    UnmarkedStudents { student_ids: Vec<String> },

    #[error("student {0} is not on the roster for this session")]
    UnknownStudent(String),
}
