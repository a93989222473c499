//! Attendance tracking core for a college portal: registration number
//! classification, attendance aggregation over session records, the
//! post-submission edit window, and the Postgres layer that feeds them.

pub mod attendance;
pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod models;
pub mod report;
pub mod session;

pub use attendance::{
    aggregate, below_threshold, branch_summary, daily_trend, distribution, enrich_roster,
    enrich_roster_with, normalize_presence, student_subjects, subject_breakdown,
};
pub use classify::{
    classify, classify_with, AcademicCalendar, Branch, ClassifiedIdentifier, EntryType,
};
pub use config::AppConfig;
pub use error::AttendanceError;
pub use filter::{Scope, SessionFilter};
pub use models::{
    AttendanceSession, BranchSummary, BucketRange, DailyTrendPoint, DistributionBucket, Mark,
    Member, SessionCounts, Student, StudentStat, SubjectAttendance,
};
pub use session::{EditState, EditWindow, SessionDraft, UnmarkedPolicy};
