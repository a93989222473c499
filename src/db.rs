use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify;
use crate::models::{AttendanceSession, Mark, SessionCounts, Student};
use crate::session::EditWindow;

const SESSION_COLUMNS: &str = "id, session_date, branch, year, section, faculty_id, subject, \
     topic, created_at, records, present_count, total_count";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let students = vec![
        ("23HP1A0501", "Ananya Reddy", "CSE", 2, "A"),
        ("23HP1A0502", "Karthik Varma", "CSE", 2, "A"),
        ("24HP5A0503", "Meghana Rao", "CSE", 2, "A"),
        ("23HP1A0401", "Rahul Naidu", "ECE", 2, "A"),
        ("23HP1A0402", "Sravya Kumari", "ECE", 2, "A"),
    ];

    for (student_id, full_name, branch, year, section) in &students {
        upsert_student(
            pool,
            &Student {
                student_id: student_id.to_string(),
                name: full_name.to_string(),
                branch: Some(branch.to_string()),
                year: Some(*year),
                section: Some(section.to_string()),
            },
        )
        .await?;
    }

    let sessions = vec![
        (
            Uuid::parse_str("6a1f3c0e-52a4-4d8e-9a55-0f9f5b8e7d11")?,
            NaiveDate::from_ymd_opt(2024, 9, 2).context("invalid date")?,
            "CSE",
            "FAC-CSE-07",
            "Data Structures",
            vec![
                ("23HP1A0501", Mark::present()),
                ("23HP1A0502", Mark::Flag(true)),
                ("24HP5A0503", Mark::absent()),
            ],
        ),
        (
            Uuid::parse_str("b4c7e2d9-0d61-4f3a-8b3e-6f2a1c9d4e20")?,
            NaiveDate::from_ymd_opt(2024, 9, 3).context("invalid date")?,
            "CSE",
            "FAC-CSE-07",
            "Data Structures",
            vec![
                ("23HP1A0501", Mark::present()),
                ("23HP1A0502", Mark::absent()),
                ("24HP5A0503", Mark::Label("present".to_string())),
            ],
        ),
        (
            Uuid::parse_str("e8d2a6b1-7c3f-4b9e-a1d4-3c5e7f9a2b31")?,
            NaiveDate::from_ymd_opt(2024, 9, 2).context("invalid date")?,
            "ECE",
            "FAC-ECE-03",
            "Signals and Systems",
            vec![("23HP1A0401", Mark::present()), ("23HP1A0402", Mark::present())],
        ),
    ];

    for (id, date, branch, faculty_id, subject, records) in sessions {
        let records: BTreeMap<String, Mark> = records
            .into_iter()
            .map(|(student_id, mark)| (student_id.to_string(), mark))
            .collect();
        let created_at = date
            .and_hms_opt(9, 0, 0)
            .context("invalid time")?
            .and_utc();
        insert_session(
            pool,
            &AttendanceSession {
                id,
                date,
                branch: branch.to_string(),
                year: 2,
                section: "A".to_string(),
                faculty_id: faculty_id.to_string(),
                created_at,
                subject: Some(subject.to_string()),
                topic: None,
                records,
                stats: None,
            },
        )
        .await?;
    }

    // Older documents only carried totals.
    let legacy_date = NaiveDate::from_ymd_opt(2024, 8, 30).context("invalid date")?;
    insert_session(
        pool,
        &AttendanceSession {
            id: Uuid::parse_str("0f4e1a2b-3c5d-4e6f-8a9b-1c2d3e4f5a62")?,
            date: legacy_date,
            branch: "CSE".to_string(),
            year: 2,
            section: "A".to_string(),
            faculty_id: "FAC-CSE-07".to_string(),
            created_at: legacy_date
                .and_hms_opt(9, 0, 0)
                .context("invalid time")?
                .and_utc(),
            subject: Some("Data Structures".to_string()),
            topic: Some("Orientation".to_string()),
            records: BTreeMap::new(),
            stats: Some(SessionCounts {
                present: 2,
                total: 3,
            }),
        },
    )
    .await?;

    info!(students = students.len(), "seed data inserted");
    Ok(())
}

async fn upsert_student(pool: &PgPool, student: &Student) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO college_attendance.students (student_id, full_name, branch, year, section)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (student_id) DO UPDATE
        SET full_name = EXCLUDED.full_name,
            branch = EXCLUDED.branch,
            year = EXCLUDED.year,
            section = EXCLUDED.section
        "#,
    )
    .bind(&student.student_id)
    .bind(&student.name)
    .bind(&student.branch)
    .bind(student.year.map(i16::from))
    .bind(&student.section)
    .execute(pool)
    .await?;
    Ok(())
}

// Columns: student_id,full_name,branch,year,section
pub async fn import_roster_csv(
    pool: &PgPool,
    csv_path: &Path,
    as_of: NaiveDate,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_id: String,
        full_name: String,
        branch: Option<String>,
        year: Option<u8>,
        section: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut imported = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let classified = classify::classify(&row.student_id, as_of);
        if let Some(warning) = &classified.warning {
            warn!(student_id = %row.student_id, %warning, "registration number did not classify");
        }

        upsert_student(
            pool,
            &Student {
                student_id: classified.id,
                name: row.full_name,
                branch: row.branch.filter(|branch| !branch.is_empty()),
                year: row.year,
                section: row.section.filter(|section| !section.is_empty()),
            },
        )
        .await?;
        imported += 1;
    }

    info!(imported, path = %csv_path.display(), "roster imported");
    Ok(imported)
}

pub async fn import_sessions_json(pool: &PgPool, json_path: &Path) -> anyhow::Result<usize> {
    let raw = std::fs::read_to_string(json_path)
        .with_context(|| format!("failed to read {}", json_path.display()))?;
    let sessions = parse_session_documents(&raw)
        .with_context(|| format!("{} is not a list of session documents", json_path.display()))?;

    let mut inserted = 0usize;
    for session in &sessions {
        if insert_session(pool, session).await? {
            inserted += 1;
        }
    }

    info!(inserted, skipped = sessions.len() - inserted, "sessions imported");
    Ok(inserted)
}

pub fn parse_session_documents(raw: &str) -> anyhow::Result<Vec<AttendanceSession>> {
    let mut sessions: Vec<AttendanceSession> = serde_json::from_str(raw)?;
    for session in &mut sessions {
        session.normalize_student_ids();
    }
    Ok(sessions)
}

pub async fn insert_session(pool: &PgPool, session: &AttendanceSession) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO college_attendance.sessions
        (id, session_date, branch, year, section, faculty_id, subject, topic,
         created_at, records, present_count, total_count)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(session.id)
    .bind(session.date)
    .bind(&session.branch)
    .bind(i16::from(session.year))
    .bind(&session.section)
    .bind(&session.faculty_id)
    .bind(&session.subject)
    .bind(&session.topic)
    .bind(session.created_at)
    .bind(Json(&session.records))
    .bind(session.stats.map(|counts| counts.present as i32))
    .bind(session.stats.map(|counts| counts.total as i32))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn fetch_roster(pool: &PgPool) -> anyhow::Result<Vec<Student>> {
    let rows = sqlx::query(
        "SELECT student_id, full_name, branch, year, section \
         FROM college_attendance.students ORDER BY student_id",
    )
    .fetch_all(pool)
    .await?;

    let mut roster = Vec::with_capacity(rows.len());
    for row in rows {
        let year: Option<i16> = row.get("year");
        roster.push(Student {
            student_id: row.get("student_id"),
            name: row.get("full_name"),
            branch: row.get("branch"),
            year: year.map(u8::try_from).transpose().context("student year out of range")?,
            section: row.get("section"),
        });
    }

    debug!(students = roster.len(), "roster fetched");
    Ok(roster)
}

pub async fn fetch_sessions(
    pool: &PgPool,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> anyhow::Result<Vec<AttendanceSession>> {
    let mut query = format!("SELECT {SESSION_COLUMNS} FROM college_attendance.sessions WHERE TRUE");

    let mut position = 1;
    if from.is_some() {
        query.push_str(&format!(" AND session_date >= ${position}"));
        position += 1;
    }
    if to.is_some() {
        query.push_str(&format!(" AND session_date <= ${position}"));
    }
    query.push_str(" ORDER BY session_date, created_at");

    let mut rows = sqlx::query(&query);
    if let Some(value) = from {
        rows = rows.bind(value);
    }
    if let Some(value) = to {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    let sessions = records
        .iter()
        .map(session_from_row)
        .collect::<anyhow::Result<Vec<_>>>()?;

    debug!(sessions = sessions.len(), "sessions fetched");
    Ok(sessions)
}

pub async fn fetch_session(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<AttendanceSession>> {
    let query = format!("SELECT {SESSION_COLUMNS} FROM college_attendance.sessions WHERE id = $1");
    let row = sqlx::query(&query).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(session_from_row).transpose()
}

/// Applies mark changes to a stored session if the editor submitted it and
/// its edit window is still open. Concurrent edits are last-write-wins.
pub async fn update_session_records(
    pool: &PgPool,
    id: Uuid,
    editor_id: &str,
    changes: &BTreeMap<String, bool>,
    window: &EditWindow,
    now: DateTime<Utc>,
) -> anyhow::Result<AttendanceSession> {
    let mut session = fetch_session(pool, id)
        .await?
        .with_context(|| format!("session {id} does not exist"))?;

    if let Err(rejection) = window.apply_edit(&mut session, editor_id, changes, now) {
        warn!(session_id = %id, editor = editor_id, %rejection, "edit rejected");
        return Err(rejection.into());
    }

    sqlx::query(
        r#"
        UPDATE college_attendance.sessions
        SET records = $2, present_count = $3, total_count = $4
        WHERE id = $1
        "#,
    )
    .bind(session.id)
    .bind(Json(&session.records))
    .bind(session.stats.map(|counts| counts.present as i32))
    .bind(session.stats.map(|counts| counts.total as i32))
    .execute(pool)
    .await?;

    info!(
        session_id = %id,
        changed = changes.len(),
        remaining_minutes = (window.locks_at(session.created_at) - now).num_minutes().max(0),
        "session updated"
    );
    Ok(session)
}

fn session_from_row(row: &PgRow) -> anyhow::Result<AttendanceSession> {
    let year: i16 = row.get("year");
    let Json(records): Json<BTreeMap<String, Mark>> = row.get("records");
    let present: Option<i32> = row.get("present_count");
    let total: Option<i32> = row.get("total_count");

    let stats = match (present, total) {
        (Some(present), Some(total)) => Some(SessionCounts {
            present: u32::try_from(present).context("negative present count")?,
            total: u32::try_from(total).context("negative total count")?,
        }),
        _ => None,
    };

    Ok(AttendanceSession {
        id: row.get("id"),
        date: row.get("session_date"),
        branch: row.get("branch"),
        year: u8::try_from(year).context("session year out of range")?,
        section: row.get("section"),
        faculty_id: row.get("faculty_id"),
        created_at: row.get("created_at"),
        subject: row.get("subject"),
        topic: row.get("topic"),
        records,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::attendance;

    #[test]
    fn imported_sessions_match_roster_ids_regardless_of_case() {
        let sessions = parse_session_documents(
            r#"[{"date":"2024-09-02","branch":"CSE","year":2,"section":"A","facultyId":"F1",
                 "createdAt":"2024-09-02T09:00:00Z","records":{"23hp1a0501":"Present"}}]"#,
        )
        .unwrap();
        let as_of = NaiveDate::from_ymd_opt(2024, 9, 30).unwrap();
        let roster = vec![Student {
            student_id: classify::classify(" 23hp1a0501", as_of).id,
            name: "Ananya".to_string(),
            branch: None,
            year: None,
            section: None,
        }];

        let stats = attendance::aggregate(&roster, &sessions);

        assert_eq!(stats[0].student_id, "23HP1A0501");
        assert_eq!((stats[0].present, stats[0].total, stats[0].percent), (1, 1, 100));
    }

    #[test]
    fn malformed_session_documents_are_rejected() {
        assert!(parse_session_documents(r#"{"date":"2024-09-02"}"#).is_err());
    }
}
