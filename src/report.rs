use std::fmt::Write;
use std::path::Path;

use anyhow::Context;
use chrono::NaiveDate;

use crate::attendance;
use crate::classify::{self, AcademicCalendar};
use crate::models::{AttendanceSession, Student, StudentStat};

pub struct ReportScope<'a> {
    pub label: &'a str,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub as_of: NaiveDate,
    pub threshold: u8,
    pub calendar: AcademicCalendar,
}

/// Markdown summary of one cohort. `roster` and `sessions` must already be
/// scoped to the cohort being reported.
pub fn build_report(
    scope: &ReportScope<'_>,
    roster: &[Student],
    sessions: &[AttendanceSession],
) -> String {
    let stats = attendance::aggregate(roster, sessions);
    let buckets = attendance::distribution(&stats);
    let branches = attendance::branch_summary(&stats);
    let flagged = attendance::below_threshold(&stats, scope.threshold);
    let trend = attendance::daily_trend(sessions);

    let mut output = String::new();
    let window = match (scope.from, scope.to) {
        (Some(from), Some(to)) => format!("{from} to {to}"),
        (Some(from), None) => format!("since {from}"),
        (None, Some(to)) => format!("up to {to}"),
        (None, None) => "all recorded sessions".to_string(),
    };

    let _ = writeln!(output, "# Attendance Report");
    let _ = writeln!(
        output,
        "Generated for {} ({}, {} sessions, {} students)",
        scope.label,
        window,
        sessions.len(),
        stats.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Distribution");

    if stats.is_empty() {
        let _ = writeln!(output, "No students in this cohort.");
    } else {
        for bucket in &buckets {
            let _ = writeln!(output, "- {}%: {} students", bucket.range.label(), bucket.count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Branch Averages");

    if branches.is_empty() {
        let _ = writeln!(output, "No branches to summarize.");
    } else {
        for row in &branches {
            let _ = writeln!(
                output,
                "- {}: {}% across {} students",
                row.branch, row.avg_attendance, row.total_students
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Below {}%", scope.threshold);

    if flagged.is_empty() {
        let _ = writeln!(output, "Every student is at or above the threshold.");
    } else {
        for stat in &flagged {
            let _ = writeln!(
                output,
                "- {} ({}): {}/{} classes, {}%",
                stat.name, stat.student_id, stat.present, stat.total, stat.percent
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Daily Trend");

    if trend.is_empty() {
        let _ = writeln!(output, "No sessions recorded for this window.");
    } else {
        for point in &trend {
            let _ = writeln!(
                output,
                "- {}: {}% ({}/{})",
                point.date, point.percent, point.present, point.total
            );
        }
    }

    let warnings: Vec<(String, String)> = roster
        .iter()
        .filter_map(|student| {
            classify::classify_with(&student.student_id, scope.as_of, &scope.calendar)
                .warning
                .map(|warning| (student.student_id.clone(), warning))
        })
        .collect();

    if !warnings.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Identifier Warnings");
        for (student_id, warning) in &warnings {
            let _ = writeln!(output, "- {student_id}: {warning}");
        }
    }

    output
}

pub fn export_csv(stats: &[StudentStat], path: &Path) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for stat in stats {
        writer.serialize(stat)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::models::Mark;

    fn scope() -> ReportScope<'static> {
        ReportScope {
            label: "CSE year 2",
            from: NaiveDate::from_ymd_opt(2024, 9, 1),
            to: NaiveDate::from_ymd_opt(2024, 9, 30),
            as_of: NaiveDate::from_ymd_opt(2024, 9, 30).unwrap(),
            threshold: 75,
            calendar: AcademicCalendar::default(),
        }
    }

    fn roster() -> Vec<Student> {
        vec![
            Student {
                student_id: "23HP1A0501".to_string(),
                name: "Ananya Reddy".to_string(),
                branch: Some("CSE".to_string()),
                year: Some(2),
                section: Some("A".to_string()),
            },
            Student {
                student_id: "23HP1A9902".to_string(),
                name: "Karthik Varma".to_string(),
                branch: Some("CSE".to_string()),
                year: Some(2),
                section: Some("A".to_string()),
            },
        ]
    }

    fn sessions() -> Vec<AttendanceSession> {
        (2..=3)
            .map(|day| AttendanceSession {
                id: Uuid::new_v4(),
                date: NaiveDate::from_ymd_opt(2024, 9, day).unwrap(),
                branch: "CSE".to_string(),
                year: 2,
                section: "A".to_string(),
                faculty_id: "FAC-CSE-07".to_string(),
                created_at: Utc.with_ymd_and_hms(2024, 9, day, 9, 0, 0).unwrap(),
                subject: None,
                topic: None,
                records: [("23HP1A0501".to_string(), Mark::present())]
                    .into_iter()
                    .collect::<BTreeMap<_, _>>(),
                stats: None,
            })
            .collect()
    }

    #[test]
    fn report_includes_every_section() {
        let report = build_report(&scope(), &roster(), &sessions());

        assert!(report.contains("# Attendance Report"));
        assert!(report.contains("Generated for CSE year 2 (2024-09-01 to 2024-09-30, 2 sessions, 2 students)"));
        assert!(report.contains("- 90-100%: 1 students"));
        assert!(report.contains("- <60%: 1 students"));
        assert!(report.contains("- CSE: 50% across 2 students"));
        assert!(report.contains("- Karthik Varma (23HP1A9902): 0/2 classes, 0%"));
        assert!(report.contains("- 2024-09-02: 100% (1/1)"));
        assert!(report.contains("## Identifier Warnings"));
        assert!(report.contains("23HP1A9902: unknown branch code '99'"));
    }

    #[test]
    fn empty_cohort_reports_placeholders() {
        let report = build_report(&scope(), &[], &[]);
        assert!(report.contains("No students in this cohort."));
        assert!(report.contains("No sessions recorded for this window."));
        assert!(!report.contains("## Identifier Warnings"));
    }

    #[test]
    fn export_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.csv");
        let stats = attendance::aggregate(&roster(), &sessions());

        export_csv(&stats, &path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines[0], "student_id,name,branch,year,section,present,total,percent");
        assert_eq!(lines[1], "23HP1A0501,Ananya Reddy,CSE,2,A,2,2,100");
        assert_eq!(lines[2], "23HP1A9902,Karthik Varma,CSE,2,A,0,2,0");
    }
}
