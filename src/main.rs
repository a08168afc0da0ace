use std::path::PathBuf;

use anyhow::Context;
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

mod aggregate;
mod analysis;
mod capture;
mod config;
mod controller;
mod db;
mod export;
mod models;
mod report;
mod session;
mod viewer;

use aggregate::{SortKey, SortOrder};
use config::{AnalysisConfig, Config};
use models::{ReportKind, TeacherContext, TeachingSession};
use session::{SessionInfo, SessionState};

#[derive(Parser)]
#[command(name = "tutor-dashboard")]
#[command(about = "Teacher dashboard for English tutoring sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import student activities from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List students with their grades and activity counts
    Students {
        /// Only show students whose name contains this text
        #[arg(long)]
        search: Option<String>,
        #[arg(long, value_enum, default_value_t = SortKey::Name)]
        sort: SortKey,
        #[arg(long, value_enum, default_value_t = SortOrder::Asc)]
        order: SortOrder,
    },
    /// Show one student's grades and histories
    Student {
        id: String,
        /// Write the overview to this file instead of printing it
        #[arg(long)]
        out: Option<PathBuf>,
        /// Emit JSON instead of markdown
        #[arg(long)]
        json: bool,
    },
    /// Show a stored role-play or self-study report
    Report {
        student: String,
        #[arg(value_enum)]
        kind: ReportKind,
        id: String,
    },
    /// Record a successful login for a user
    Login { user: String },
    /// List a user's logins, newest first
    Logins { user: String },
    /// Record a teaching session and have it analyzed
    Record {
        #[arg(long)]
        student: String,
        #[arg(long)]
        teacher_id: String,
        #[arg(long)]
        teacher_name: Option<String>,
        /// Directory for the exported text report
        #[arg(long, default_value = ".")]
        export_dir: PathBuf,
        /// Skip saving the analyzed session to the database
        #[arg(long)]
        no_save: bool,
    },
    /// List a teacher's saved sessions
    Sessions {
        #[arg(long)]
        teacher_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tutor_dashboard=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;
    tracing::debug!(max_connections = config.max_connections, "database pool ready");

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} activities from {}.", csv.display());
        }
        Commands::Students {
            search,
            sort,
            order,
        } => {
            let students = db::or_empty(db::fetch_students(&pool, &Local).await, "students");
            let students = aggregate::arrange_students(students, search.as_deref(), sort, order);

            if students.is_empty() {
                println!("No students found.");
                return Ok(());
            }

            for student in &students {
                println!(
                    "- {} ({}) writing {} / reading {}, {} role-plays, last login {}",
                    student.name,
                    student.id,
                    student.level_test.writing,
                    student.level_test.reading,
                    student.role_play_history.len(),
                    student.last_login
                );
            }
        }
        Commands::Student { id, out, json } => {
            let student = db::or_empty(
                db::fetch_student(&pool, &id, &Local).await,
                "student details",
            );
            let Some(student) = student else {
                println!("No student found with id {id}.");
                return Ok(());
            };

            let overview = if json {
                let mut rendered = serde_json::to_string_pretty(&student)?;
                rendered.push('\n');
                rendered
            } else {
                report::build_student_report(&student)
            };
            match out {
                Some(path) => {
                    std::fs::write(&path, overview)?;
                    println!("Student overview written to {}.", path.display());
                }
                None => print!("{overview}"),
            }
        }
        Commands::Report { student, kind, id } => {
            let viewer = viewer::ReportViewer::new();
            let shown = viewer
                .open(db::fetch_report(&pool, kind, &student, &id))
                .await;

            match shown {
                Some(found) => {
                    let name = db::or_empty(db::fetch_user_name(&pool, &student).await, "student name")
                        .unwrap_or_else(|| student.clone());
                    print!("{}", report::render_report(&name, &found));
                }
                None => println!("No report data to display."),
            }
        }
        Commands::Login { user } => {
            let record = db::record_login(&pool, &user).await?;
            println!(
                "Login recorded for {user} at {}.",
                aggregate::format_date_time(&record.occurred_at, &Local)
            );
        }
        Commands::Logins { user } => {
            let records = db::or_empty(db::fetch_login_history(&pool, &user).await, "login history");
            print!("{}", report::render_login_history(&records, &Local));
        }
        Commands::Record {
            student,
            teacher_id,
            teacher_name,
            export_dir,
            no_save,
        } => {
            let teacher = TeacherContext {
                id: teacher_id,
                display_name: teacher_name,
            };
            record_session(&pool, &config, &teacher, &student, export_dir, !no_save).await?;
        }
        Commands::Sessions { teacher_id } => {
            let sessions = db::or_empty(
                db::fetch_teaching_sessions(&pool, &teacher_id).await,
                "teaching sessions",
            );
            print!("{}", report::render_sessions(&sessions, &Local));
        }
    }

    Ok(())
}

async fn record_session(
    pool: &sqlx::PgPool,
    config: &Config,
    teacher: &TeacherContext,
    student_id: &str,
    export_dir: PathBuf,
    save: bool,
) -> anyhow::Result<()> {
    let analysis = analysis::GeminiAnalysis::new(AnalysisConfig::from_env()?);
    let student = db::or_empty(
        db::fetch_student(pool, student_id, &Local).await,
        "student details",
    )
    .filter(|student| student.role == "student");

    let info = student.as_ref().map(|student| SessionInfo {
        student_id: student.id.clone(),
        student_name: student.name.clone(),
        teacher_name: teacher.display_name().to_string(),
        started_at: Local::now().fixed_offset(),
        ceiling_secs: config.recording_secs,
    });
    if info.is_none() {
        println!("Select a student to start recording (no student with id {student_id}).");
        return Ok(());
    }

    println!(
        "Recording for up to {}. Press Ctrl-C to stop.",
        session::format_countdown(config.recording_secs)
    );
    let capture = capture::CommandCapture::new(&config.capture_command, &config.capture_mime_type);
    let mut controller =
        controller::SessionController::new(capture, &analysis).with_export_dir(&export_dir);
    let stop = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    let outcome = controller.run(info, stop).await;

    for notice in &outcome.notices {
        println!("{}: {}", notice.title(), notice.description());
    }

    let SessionState::Complete {
        session,
        remaining_secs,
        report,
    } = outcome.state
    else {
        return Ok(());
    };

    println!();
    println!("Organizing the contents of the class");
    println!("{}", report.evaluation);
    if let Some(path) = &outcome.exported {
        println!();
        println!("Report saved to {}.", path.display());
    }
    if let Some(err) = &outcome.export_error {
        println!();
        println!("Could not save the report file: {err}");
    }

    if save {
        let saved = TeachingSession {
            id: Uuid::new_v4(),
            teacher_id: teacher.id.clone(),
            teacher_name: session.teacher_name.clone(),
            student_id: session.student_id.clone(),
            student_name: session.student_name.clone(),
            started_at: session.started_at.with_timezone(&Utc),
            duration_secs: i32::try_from(session.ceiling_secs.saturating_sub(remaining_secs))
                .unwrap_or(i32::MAX),
            report,
            created_at: Utc::now(),
        };
        db::save_teaching_session(pool, &saved).await?;
        tracing::info!(session_id = %saved.id, "teaching session saved");
    }

    Ok(())
}
