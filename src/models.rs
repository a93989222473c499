use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::normalize_id;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub student_id: String,
    pub name: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub year: Option<u8>,
    #[serde(default)]
    pub section: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacultyProfile {
    pub employee_id: String,
    pub name: String,
    #[serde(default)]
    pub branches: Vec<String>,
}

/// A signed-in portal user. The role is decided once, when the profile
/// document is read, and never re-derived from the shape of the fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Member {
    Student(Student),
    Faculty(FacultyProfile),
}

/// Historical documents hold either `"Present"`/`"Absent"` labels or plain
/// booleans; anything else is kept and read as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Mark {
    Flag(bool),
    Label(String),
    Other(serde_json::Value),
}

impl Mark {
    pub fn present() -> Self {
        Mark::Label("Present".to_string())
    }

    pub fn absent() -> Self {
        Mark::Label("Absent".to_string())
    }
}

/// Aggregate counts kept by older session documents that never stored
/// per-student records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionCounts {
    pub present: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSession {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub date: NaiveDate,
    pub branch: String,
    pub year: u8,
    pub section: String,
    pub faculty_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub records: BTreeMap<String, Mark>,
    #[serde(default)]
    pub stats: Option<SessionCounts>,
}

impl AttendanceSession {
    /// Rewrites record keys into the same form the roster import stores.
    pub fn normalize_student_ids(&mut self) {
        let records = std::mem::take(&mut self.records);
        self.records = records
            .into_iter()
            .map(|(student_id, mark)| (normalize_id(&student_id), mark))
            .collect();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentStat {
    pub student_id: String,
    pub name: String,
    pub branch: Option<String>,
    pub year: Option<u8>,
    pub section: Option<String>,
    pub present: u32,
    pub total: u32,
    pub percent: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum BucketRange {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl BucketRange {
    pub const ALL: [BucketRange; 5] = [
        BucketRange::Excellent,
        BucketRange::Good,
        BucketRange::Fair,
        BucketRange::Poor,
        BucketRange::Critical,
    ];

    pub fn for_percent(percent: u8) -> Self {
        match percent {
            90..=u8::MAX => BucketRange::Excellent,
            80..=89 => BucketRange::Good,
            70..=79 => BucketRange::Fair,
            60..=69 => BucketRange::Poor,
            _ => BucketRange::Critical,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BucketRange::Excellent => "90-100",
            BucketRange::Good => "80-89",
            BucketRange::Fair => "70-79",
            BucketRange::Poor => "60-69",
            BucketRange::Critical => "<60",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DistributionBucket {
    pub range: BucketRange,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyTrendPoint {
    pub date: NaiveDate,
    pub percent: u8,
    pub present: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchSummary {
    pub branch: String,
    pub total_students: usize,
    pub avg_attendance: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectAttendance {
    pub subject: String,
    pub conducted: u32,
    pub attended: u32,
    pub percent: u8,
}
