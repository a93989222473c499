use std::collections::HashMap;

use chrono::NaiveDate;

use crate::classify::{self, AcademicCalendar};
use crate::filter::SessionFilter;
use crate::models::{
    AttendanceSession, BranchSummary, BucketRange, DailyTrendPoint, DistributionBucket, Mark,
    Member, Student, StudentStat, SubjectAttendance,
};

pub const UNASSIGNED_BRANCH: &str = "Unassigned";
pub const GENERAL_SUBJECT: &str = "General";
pub const DEFAULT_THRESHOLD: u8 = 75;

/// Compatibility shim for historical session documents: a student counts as
/// present for boolean `true` or any casing of `"present"`. Everything else,
/// including a missing record, is absent.
pub fn normalize_presence(mark: Option<&Mark>) -> bool {
    match mark {
        Some(Mark::Flag(value)) => *value,
        Some(Mark::Label(label)) => label.eq_ignore_ascii_case("present"),
        Some(Mark::Other(_)) | None => false,
    }
}

pub fn percent(part: u32, whole: u32) -> u8 {
    if whole == 0 {
        return 0;
    }
    let part = u64::from(part.min(whole));
    let whole = u64::from(whole);
    ((part * 200 + whole) / (whole * 2)) as u8
}

fn rounded_mean(values: impl Iterator<Item = u8>) -> u8 {
    let (sum, count) = values.fold((0u64, 0u64), |(sum, count), value| {
        (sum + u64::from(value), count + 1)
    });
    if count == 0 {
        return 0;
    }
    ((sum * 2 + count) / (count * 2)) as u8
}

/// Fills a roster entry's missing branch or year from its registration
/// number. Values already present on the roster are kept.
pub fn enrich_roster(roster: &[Student], as_of: NaiveDate) -> Vec<Student> {
    enrich_roster_with(roster, as_of, &AcademicCalendar::default())
}

pub fn enrich_roster_with(
    roster: &[Student],
    as_of: NaiveDate,
    calendar: &AcademicCalendar,
) -> Vec<Student> {
    roster
        .iter()
        .map(|student| {
            let mut student = student.clone();
            if student.branch.is_none() || student.year.is_none() {
                let classified = classify::classify_with(&student.student_id, as_of, calendar);
                if student.branch.is_none() {
                    student.branch = classified.branch.map(|branch| branch.to_string());
                }
                if student.year.is_none() {
                    student.year = classified.calculated_year;
                }
            }
            student
        })
        .collect()
}

// A student without a record in a session is counted absent for it.
pub fn aggregate(roster: &[Student], sessions: &[AttendanceSession]) -> Vec<StudentStat> {
    let total = sessions.len() as u32;
    let mut stats: Vec<StudentStat> = roster
        .iter()
        .map(|student| {
            let present = sessions
                .iter()
                .filter(|session| normalize_presence(session.records.get(&student.student_id)))
                .count() as u32;
            StudentStat {
                student_id: student.student_id.clone(),
                name: student.name.clone(),
                branch: student.branch.clone(),
                year: student.year,
                section: student.section.clone(),
                present,
                total,
                percent: percent(present, total),
            }
        })
        .collect();

    stats.sort_by(|a, b| a.student_id.cmp(&b.student_id));
    stats
}

pub fn distribution(stats: &[StudentStat]) -> Vec<DistributionBucket> {
    let mut counts: HashMap<BucketRange, usize> = HashMap::new();
    for stat in stats {
        *counts.entry(BucketRange::for_percent(stat.percent)).or_insert(0) += 1;
    }

    BucketRange::ALL
        .iter()
        .map(|range| DistributionBucket {
            range: *range,
            count: counts.get(range).copied().unwrap_or(0),
        })
        .collect()
}

/// One point per session, ordered by date. Sessions with an empty records
/// map fall back to the summary counts stored on older documents.
pub fn daily_trend(sessions: &[AttendanceSession]) -> Vec<DailyTrendPoint> {
    let mut points: Vec<DailyTrendPoint> = sessions
        .iter()
        .map(|session| {
            let (present, total) = if session.records.is_empty() {
                session
                    .stats
                    .map(|counts| (counts.present, counts.total))
                    .unwrap_or((0, 0))
            } else {
                let present = session
                    .records
                    .values()
                    .filter(|mark| normalize_presence(Some(*mark)))
                    .count() as u32;
                (present, session.records.len() as u32)
            };
            DailyTrendPoint {
                date: session.date,
                percent: percent(present, total.max(1)),
                present,
                total,
            }
        })
        .collect();

    points.sort_by(|a, b| a.date.cmp(&b.date));
    points
}

/// Per-branch averages, highest first; equal averages are ordered by
/// branch name.
pub fn branch_summary(stats: &[StudentStat]) -> Vec<BranchSummary> {
    let mut groups: HashMap<&str, Vec<u8>> = HashMap::new();
    for stat in stats {
        let branch = stat.branch.as_deref().unwrap_or(UNASSIGNED_BRANCH);
        groups.entry(branch).or_default().push(stat.percent);
    }

    let mut summaries: Vec<BranchSummary> = groups
        .into_iter()
        .map(|(branch, percents)| BranchSummary {
            branch: branch.to_string(),
            total_students: percents.len(),
            avg_attendance: rounded_mean(percents.into_iter()),
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.avg_attendance
            .cmp(&a.avg_attendance)
            .then_with(|| a.branch.cmp(&b.branch))
    });
    summaries
}

pub fn subject_breakdown(student_id: &str, sessions: &[AttendanceSession]) -> Vec<SubjectAttendance> {
    let mut subjects: HashMap<&str, (u32, u32)> = HashMap::new();
    for session in sessions {
        let subject = session.subject.as_deref().unwrap_or(GENERAL_SUBJECT);
        let entry = subjects.entry(subject).or_insert((0, 0));
        entry.0 += 1;
        if normalize_presence(session.records.get(student_id)) {
            entry.1 += 1;
        }
    }

    let mut rows: Vec<SubjectAttendance> = subjects
        .into_iter()
        .map(|(subject, (conducted, attended))| SubjectAttendance {
            subject: subject.to_string(),
            conducted,
            attended,
            percent: percent(attended, conducted),
        })
        .collect();

    rows.sort_by(|a, b| a.subject.cmp(&b.subject));
    rows
}

/// Subject breakdown over the sessions held for the student's own branch,
/// year and section. Classes taken by other cohorts are not conducted for
/// this student, even when they share a subject name.
pub fn student_subjects(student: &Student, sessions: &[AttendanceSession]) -> Vec<SubjectAttendance> {
    let own = SessionFilter::defaults_for(&Member::Student(student.clone())).apply(sessions);
    subject_breakdown(&student.student_id, &own)
}

pub fn below_threshold(stats: &[StudentStat], threshold: u8) -> Vec<StudentStat> {
    let mut flagged: Vec<StudentStat> = stats
        .iter()
        .filter(|stat| stat.percent < threshold)
        .cloned()
        .collect();

    flagged.sort_by(|a, b| {
        a.percent
            .cmp(&b.percent)
            .then_with(|| a.student_id.cmp(&b.student_id))
    });
    flagged
}
