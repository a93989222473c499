use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use college_attendance::attendance;
use college_attendance::classify;
use college_attendance::db;
use college_attendance::filter::{Scope, SessionFilter};
use college_attendance::models::{AttendanceSession, Student};
use college_attendance::report::{self, ReportScope};
use college_attendance::session::{EditWindow, SessionDraft, UnmarkedPolicy};
use college_attendance::{AppConfig, AttendanceError};

#[derive(Parser)]
#[command(name = "college-attendance")]
#[command(about = "Attendance tracking and analytics for college cohorts", long_about = None)]
struct Cli {
    /// Only log errors
    #[arg(long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Log debug detail
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct FilterArgs {
    /// First session date to include (inclusive)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last session date to include (inclusive)
    #[arg(long)]
    to: Option<NaiveDate>,
    /// Branch to include; repeat for several, omit for all
    #[arg(long = "branch")]
    branches: Vec<String>,
    /// Year of study; omit for all years
    #[arg(long)]
    year: Option<u8>,
    /// Section; omit for all sections
    #[arg(long)]
    section: Option<String>,
    /// Date used to derive current year of study (defaults to today)
    #[arg(long)]
    as_of: Option<NaiveDate>,
}

impl FilterArgs {
    fn to_filter(&self) -> SessionFilter {
        SessionFilter {
            from: self.from,
            to: self.to,
            branches: self.branches.iter().map(|b| b.to_ascii_uppercase()).collect(),
            year: Scope::from(self.year),
            section: Scope::from(self.section.clone()),
        }
    }

    fn label(&self) -> String {
        let mut parts = Vec::new();
        if self.branches.is_empty() {
            parts.push("all branches".to_string());
        } else {
            parts.push(self.branches.join(", ").to_ascii_uppercase());
        }
        if let Some(year) = self.year {
            parts.push(format!("year {year}"));
        }
        if let Some(section) = &self.section {
            parts.push(format!("section {section}"));
        }
        parts.join(" ")
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import or update students from a roster CSV
    ImportRoster {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Import session documents from a JSON array
    ImportSessions {
        #[arg(long)]
        json: PathBuf,
    },
    /// Decode registration numbers
    Classify {
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Per-student attendance for a cohort
    Stats {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value_t = 25)]
        limit: usize,
        #[arg(long)]
        threshold: Option<u8>,
    },
    /// Conducted and attended classes per subject for one student
    Subjects {
        student_id: String,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        threshold: Option<u8>,
        #[arg(long, default_value = "attendance-report.md")]
        out: PathBuf,
    },
    /// Export per-student statistics as CSV
    Export {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value = "attendance.csv")]
        out: PathBuf,
    },
    /// Commit a faculty submission
    Submit {
        #[arg(long)]
        json: PathBuf,
        /// How to record students left unmarked
        #[arg(long, value_enum)]
        unmarked: Option<UnmarkedPolicy>,
    },
    /// Change marks on a session inside its edit window
    Edit {
        #[arg(long)]
        session: Uuid,
        #[arg(long)]
        faculty: String,
        /// JSON object of student id to true (present) / false (absent)
        #[arg(long)]
        json: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose)?;
    let config = AppConfig::from_env()?;
    let today = Utc::now().date_naive();

    match cli.command {
        Commands::InitDb => {
            let pool = connect(&config).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(&config).await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportRoster { csv, as_of } => {
            let pool = connect(&config).await?;
            let imported = db::import_roster_csv(&pool, &csv, as_of.unwrap_or(today)).await?;
            println!("Imported {imported} students from {}.", csv.display());
        }
        Commands::ImportSessions { json } => {
            let pool = connect(&config).await?;
            let inserted = db::import_sessions_json(&pool, &json).await?;
            println!("Inserted {inserted} sessions from {}.", json.display());
        }
        Commands::Classify { ids, as_of } => {
            let as_of = as_of.unwrap_or(today);
            for id in &ids {
                let result = classify::classify_with(id, as_of, &config.calendar);
                let branch = result
                    .branch
                    .map(|branch| branch.to_string())
                    .unwrap_or_else(|| "?".to_string());
                let admitted = result
                    .admission_year
                    .map(|year| year.to_string())
                    .unwrap_or_else(|| "?".to_string());
                let year = result
                    .calculated_year
                    .map(|year| year.to_string())
                    .unwrap_or_else(|| "?".to_string());
                println!(
                    "- {}: {} admitted {} ({:?}), year {}",
                    result.id, branch, admitted, result.entry_type, year
                );
                if let Some(warning) = result.warning {
                    println!("  warning: {warning}");
                }
            }
        }
        Commands::Stats {
            filter,
            limit,
            threshold,
        } => {
            let pool = connect(&config).await?;
            let (roster, sessions) = load_cohort(&pool, &filter, &config, today).await?;
            let stats = attendance::aggregate(&roster, &sessions);

            if stats.is_empty() {
                println!("No students found for this cohort.");
                return Ok(ExitCode::SUCCESS);
            }

            let threshold = threshold.unwrap_or(config.threshold);
            println!(
                "Attendance for {} across {} sessions:",
                filter.label(),
                sessions.len()
            );
            for stat in stats.iter().take(limit) {
                let flag = if stat.percent < threshold { " !" } else { "" };
                println!(
                    "- {} ({}) {}/{} = {}%{}",
                    stat.name, stat.student_id, stat.present, stat.total, stat.percent, flag
                );
            }
            if stats.len() > limit {
                println!("... {} more", stats.len() - limit);
            }

            println!("Branch averages:");
            for row in attendance::branch_summary(&stats) {
                println!(
                    "- {}: {}% ({} students)",
                    row.branch, row.avg_attendance, row.total_students
                );
            }
        }
        Commands::Subjects { student_id, filter } => {
            let pool = connect(&config).await?;
            let (roster, sessions) = load_cohort(&pool, &filter, &config, today).await?;
            let student_id = classify::normalize_id(&student_id);
            let Some(student) = roster.iter().find(|student| student.student_id == student_id)
            else {
                bail!("{student_id} is not on the roster for {}", filter.label());
            };
            let rows = attendance::student_subjects(student, &sessions);

            if rows.is_empty() {
                println!("No sessions found for this window.");
                return Ok(ExitCode::SUCCESS);
            }

            println!("Subject attendance for {student_id}:");
            for row in rows {
                println!(
                    "- {}: CA {} / CC {} = {}%",
                    row.subject, row.attended, row.conducted, row.percent
                );
            }
        }
        Commands::Report {
            filter,
            threshold,
            out,
        } => {
            let pool = connect(&config).await?;
            let (roster, sessions) = load_cohort(&pool, &filter, &config, today).await?;
            let label = filter.label();
            let scope = ReportScope {
                label: &label,
                from: filter.from,
                to: filter.to,
                as_of: filter.as_of.unwrap_or(today),
                threshold: threshold.unwrap_or(config.threshold),
                calendar: config.calendar,
            };
            let report = report::build_report(&scope, &roster, &sessions);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { filter, out } => {
            let pool = connect(&config).await?;
            let (roster, sessions) = load_cohort(&pool, &filter, &config, today).await?;
            let stats = attendance::aggregate(&roster, &sessions);
            report::export_csv(&stats, &out)?;
            println!("Exported {} students to {}.", stats.len(), out.display());
        }
        Commands::Submit { json, unmarked } => {
            let raw = std::fs::read_to_string(&json)
                .with_context(|| format!("failed to read {}", json.display()))?;
            let draft: SessionDraft = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a session submission", json.display()))?;

            let session = match draft.finalize(unmarked, Utc::now()) {
                Ok(session) => session,
                Err(rejection) => {
                    warn!(%rejection, "submission rejected");
                    println!("Not submitted: {rejection}");
                    return Ok(ExitCode::from(REJECTED));
                }
            };

            let pool = connect(&config).await?;
            db::insert_session(&pool, &session).await?;
            info!(session_id = %session.id, records = session.records.len(), "session committed");
            println!(
                "Session {} saved; editable until {}.",
                session.id,
                EditWindow::default().locks_at(session.created_at)
            );
        }
        Commands::Edit {
            session,
            faculty,
            json,
        } => {
            let raw = std::fs::read_to_string(&json)
                .with_context(|| format!("failed to read {}", json.display()))?;
            let changes: BTreeMap<String, bool> = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a map of student marks", json.display()))?;

            let pool = connect(&config).await?;
            match db::update_session_records(
                &pool,
                session,
                &faculty,
                &changes,
                &EditWindow::default(),
                Utc::now(),
            )
            .await
            {
                Ok(updated) => println!(
                    "Session {} updated ({} of {} present).",
                    updated.id,
                    updated.stats.map(|counts| counts.present).unwrap_or(0),
                    updated.records.len()
                ),
                Err(error) => match rejection(&error) {
                    Some(rejection) => {
                        println!("Not updated: {rejection}");
                        return Ok(ExitCode::from(REJECTED));
                    }
                    None => return Err(error),
                },
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Exit status when the attendance rules turn a request down.
const REJECTED: u8 = 2;

fn rejection(error: &anyhow::Error) -> Option<&AttendanceError> {
    error.downcast_ref::<AttendanceError>()
}

async fn connect(config: &AppConfig) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(config.require_database_url()?)
        .await
        .context("failed to connect to Postgres")
}

async fn load_cohort(
    pool: &PgPool,
    args: &FilterArgs,
    config: &AppConfig,
    today: NaiveDate,
) -> anyhow::Result<(Vec<Student>, Vec<AttendanceSession>)> {
    let filter = args.to_filter();
    let sessions = filter.apply(&db::fetch_sessions(pool, filter.from, filter.to).await?);

    let as_of = args.as_of.unwrap_or(today);
    let roster = attendance::enrich_roster_with(&db::fetch_roster(pool).await?, as_of, &config.calendar);
    let roster = filter.scope_roster(&roster);

    info!(
        students = roster.len(),
        sessions = sessions.len(),
        "cohort loaded"
    );
    Ok((roster, sessions))
}

fn init_tracing(quiet: bool, verbose: bool) -> anyhow::Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("ATTENDANCE_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Context;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn rule_rejections_are_told_apart_from_failures() {
        let rejected: anyhow::Error = AttendanceError::UnknownStudent("S9".to_string()).into();
        assert_eq!(
            rejection(&rejected),
            Some(&AttendanceError::UnknownStudent("S9".to_string()))
        );

        let wrapped = Err::<(), _>(AttendanceError::UnknownStudent("S9".to_string()))
            .with_context(|| format!("failed to update session {}", Uuid::nil()))
            .unwrap_err();
        assert!(rejection(&wrapped).is_some());

        let failure = anyhow::anyhow!("connection refused");
        assert!(rejection(&failure).is_none());
    }
}
