use anyhow::Context;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::aggregate;
use crate::models::{
    ActivityKind, ActivityRecord, LoginRecord, Report, ReportKind, SessionReport,
    StudentAggregate, StudentProfile, TeachingSession,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Logs a failed read and falls back to an empty value. Callers cannot tell
/// "failed" from "nothing there".
pub fn or_empty<T: Default>(result: anyhow::Result<T>, what: &str) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "error fetching {what}");
            T::default()
        }
    }
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let users = vec![
        ("t-dana", "teacher", "Dana Kim", "dana.kim@tutoring.example"),
        ("s-mina-park", "student", "Mina Park", "mina.park@tutoring.example"),
        ("s-jin-choi", "student", "Jin Choi", "jin.choi@tutoring.example"),
        ("s-leo-han", "student", "Leo Han", "leo.han@tutoring.example"),
    ];

    for (id, role, name, email) in users {
        sqlx::query(
            r#"
            INSERT INTO tutoring.users (id, role, name, email)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET role = EXCLUDED.role, name = EXCLUDED.name, email = EXCLUDED.email
            "#,
        )
        .bind(id)
        .bind(role)
        .bind(name)
        .bind(email)
        .execute(pool)
        .await?;
    }

    let now = Utc::now();
    let activities = vec![
        ("seed-001", "s-mina-park", ActivityKind::LevelTest, "Writing", Some("B1"), None, None, 20),
        ("seed-002", "s-mina-park", ActivityKind::LevelTest, "Reading", Some("B2"), None, None, 19),
        ("seed-003", "s-mina-park", ActivityKind::Learning, "Ordering at a cafe", None, Some(1740), Some("rp-mina-1"), 6),
        ("seed-004", "s-mina-park", ActivityKind::SelfStudy, "Articles", Some("4/5"), None, Some("ss-mina-1"), 2),
        ("seed-005", "s-jin-choi", ActivityKind::LevelTest, "Reading", Some("A2"), None, None, 12),
        ("seed-006", "s-jin-choi", ActivityKind::Learning, "Job interview", None, Some(2460), None, 3),
    ];

    for (source_key, user_id, kind, details, result, duration_secs, history_id, days_ago) in
        activities
    {
        sqlx::query(
            r#"
            INSERT INTO tutoring.activities
            (id, user_id, occurred_at, activity_type, details, result, duration_secs, history_id, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(now - Duration::days(days_ago))
        .bind(kind.as_tag())
        .bind(details)
        .bind(result)
        .bind(duration_secs)
        .bind(history_id)
        .bind(source_key)
        .execute(pool)
        .await?;
    }

    let role_play = serde_json::json!({
        "evaluation": "Learning Topic: ordering food politely.\nKey Concepts: \"Could I have...\" and \"I'd like...\".",
        "messages": [
            {"role": "model", "content": "Hi! What can I get for you today?"},
            {"role": "user", "content": "I want a latte."},
            {"role": "model", "content": "Sure. Try asking: \"Could I have a latte, please?\""},
            {"role": "user", "content": "Could I have a latte, please?"}
        ]
    });
    sqlx::query(
        r#"
        INSERT INTO tutoring.role_play_reports (user_id, id, body)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, id) DO NOTHING
        "#,
    )
    .bind("s-mina-park")
    .bind("rp-mina-1")
    .bind(&role_play)
    .execute(pool)
    .await?;

    let self_study = serde_json::json!({
        "title": "Articles",
        "score": "4/5",
        "problems": [
            {"question": "I saw ___ owl.", "answer": "an", "isCorrect": true},
            {"question": "She is ___ honest person.", "answer": "a", "correctAnswer": "an", "isCorrect": false,
             "explanation": "'honest' starts with a vowel sound."}
        ]
    });
    sqlx::query(
        r#"
        INSERT INTO tutoring.self_study_reports (user_id, id, body)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, id) DO NOTHING
        "#,
    )
    .bind("s-mina-park")
    .bind("ss-mina-1")
    .bind(&self_study)
    .execute(pool)
    .await?;

    Ok(())
}

fn profile_from_row(row: &PgRow) -> anyhow::Result<StudentProfile> {
    Ok(StudentProfile {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        avatar_url: row.try_get("avatar_url")?,
        email: row.try_get("email")?,
        role: row.try_get("role")?,
        total_logins: row.try_get("total_logins")?,
        last_login: row.try_get("last_login")?,
    })
}

pub async fn fetch_activities(pool: &PgPool, user_id: &str) -> anyhow::Result<Vec<ActivityRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, occurred_at, activity_type, details, result, duration_secs, history_id
        FROM tutoring.activities
        WHERE user_id = $1
        ORDER BY occurred_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to load activities for {user_id}"))?;

    let mut activities = Vec::with_capacity(rows.len());
    for row in rows {
        activities.push(ActivityRecord {
            id: row.try_get("id")?,
            occurred_at: row.try_get("occurred_at")?,
            kind: row.try_get("activity_type")?,
            details: row.try_get("details")?,
            result: row.try_get("result")?,
            duration_secs: row.try_get("duration_secs")?,
            history_id: row.try_get("history_id")?,
        });
    }

    Ok(activities)
}

pub async fn fetch_students<Tz>(pool: &PgPool, tz: &Tz) -> anyhow::Result<Vec<StudentAggregate>>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let rows = sqlx::query(
        r#"
        SELECT id, name, avatar_url, email, role, total_logins, last_login
        FROM tutoring.users
        WHERE role = 'student'
        "#,
    )
    .fetch_all(pool)
    .await
    .context("failed to load students")?;

    let mut students = Vec::with_capacity(rows.len());
    for row in rows {
        let profile = profile_from_row(&row)?;
        let activities = fetch_activities(pool, &profile.id).await?;
        students.push(aggregate::build_student(profile, &activities, tz));
    }

    Ok(students)
}

pub async fn fetch_student<Tz>(
    pool: &PgPool,
    student_id: &str,
    tz: &Tz,
) -> anyhow::Result<Option<StudentAggregate>>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let row = sqlx::query(
        r#"
        SELECT id, name, avatar_url, email, role, total_logins, last_login
        FROM tutoring.users
        WHERE id = $1
        "#,
    )
    .bind(student_id)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to load user {student_id}"))?;

    let Some(row) = row else {
        tracing::info!(student_id, "no such user");
        return Ok(None);
    };

    let profile = profile_from_row(&row)?;
    let activities = fetch_activities(pool, student_id).await?;
    Ok(Some(aggregate::build_student(profile, &activities, tz)))
}

/// Display name of a user, without loading their activities.
pub async fn fetch_user_name(pool: &PgPool, user_id: &str) -> anyhow::Result<Option<String>> {
    let name: Option<Option<String>> =
        sqlx::query_scalar("SELECT name FROM tutoring.users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .with_context(|| format!("failed to load name of {user_id}"))?;
    Ok(name.flatten())
}

pub async fn fetch_report(
    pool: &PgPool,
    kind: ReportKind,
    student_id: &str,
    report_id: &str,
) -> anyhow::Result<Option<Report>> {
    let table = match kind {
        ReportKind::RolePlay => "tutoring.role_play_reports",
        ReportKind::SelfStudy => "tutoring.self_study_reports",
    };
    let query = format!("SELECT body FROM {table} WHERE user_id = $1 AND id = $2");

    let row = sqlx::query(&query)
        .bind(student_id)
        .bind(report_id)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("failed to load report {report_id}"))?;

    let Some(row) = row else {
        return Ok(None);
    };
    let body: serde_json::Value = row.try_get("body")?;

    let report = match kind {
        ReportKind::RolePlay => Report::RolePlay(
            serde_json::from_value(body).context("stored role-play report is malformed")?,
        ),
        ReportKind::SelfStudy => Report::SelfStudy(
            serde_json::from_value(body).context("stored self-study report is malformed")?,
        ),
    };
    Ok(Some(report))
}

/// Bumps the user's login counter and appends one login record, atomically.
pub async fn record_login(pool: &PgPool, user_id: &str) -> anyhow::Result<LoginRecord> {
    let mut tx = pool.begin().await?;

    let updated: Option<DateTime<Utc>> = sqlx::query_scalar(
        r#"
        UPDATE tutoring.users
        SET last_login = now(), total_logins = total_logins + 1
        WHERE id = $1
        RETURNING last_login
        "#,
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(occurred_at) = updated else {
        anyhow::bail!("no user with id {user_id}");
    };

    let record = LoginRecord {
        id: Uuid::new_v4(),
        occurred_at,
    };
    sqlx::query(
        r#"
        INSERT INTO tutoring.login_history (id, user_id, occurred_at)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(record.id)
    .bind(user_id)
    .bind(record.occurred_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(user_id, login_id = %record.id, "login recorded");
    Ok(record)
}

pub async fn fetch_login_history(pool: &PgPool, user_id: &str) -> anyhow::Result<Vec<LoginRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, occurred_at
        FROM tutoring.login_history
        WHERE user_id = $1
        ORDER BY occurred_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to load login history for {user_id}"))?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        records.push(LoginRecord {
            id: row.try_get("id")?,
            occurred_at: row.try_get("occurred_at")?,
        });
    }

    Ok(records)
}

pub async fn save_teaching_session(pool: &PgPool, session: &TeachingSession) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tutoring.teaching_sessions
        (id, teacher_id, teacher_name, student_id, student_name, started_at, duration_secs,
         transcript, evaluation, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(session.id)
    .bind(&session.teacher_id)
    .bind(&session.teacher_name)
    .bind(&session.student_id)
    .bind(&session.student_name)
    .bind(session.started_at)
    .bind(session.duration_secs)
    .bind(&session.report.transcript)
    .bind(&session.report.evaluation)
    .bind(session.created_at)
    .execute(pool)
    .await
    .context("failed to save teaching session")?;

    Ok(())
}

pub async fn fetch_teaching_sessions(
    pool: &PgPool,
    teacher_id: &str,
) -> anyhow::Result<Vec<TeachingSession>> {
    if teacher_id.is_empty() {
        return Ok(Vec::new());
    }

    let rows = sqlx::query(
        r#"
        SELECT id, teacher_id, teacher_name, student_id, student_name, started_at,
               duration_secs, transcript, evaluation, created_at
        FROM tutoring.teaching_sessions
        WHERE teacher_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(teacher_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to load teaching sessions for {teacher_id}"))?;

    let mut sessions = Vec::with_capacity(rows.len());
    for row in rows {
        sessions.push(TeachingSession {
            id: row.try_get("id")?,
            teacher_id: row.try_get("teacher_id")?,
            teacher_name: row.try_get("teacher_name")?,
            student_id: row.try_get("student_id")?,
            student_name: row.try_get("student_name")?,
            started_at: row.try_get("started_at")?,
            duration_secs: row.try_get("duration_secs")?,
            report: SessionReport {
                transcript: row.try_get("transcript")?,
                evaluation: row.try_get("evaluation")?,
            },
            created_at: row.try_get("created_at")?,
        });
    }

    Ok(sessions)
}

#[derive(Debug, serde::Deserialize)]
pub struct ActivityCsvRow {
    pub user_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub activity_type: String,
    #[serde(default)]
    pub details: String,
    pub result: Option<String>,
    pub duration_secs: Option<i32>,
    pub history_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub source_key: Option<String>,
}

/// Rejects rows whose activity type would be dropped by the aggregator.
pub fn validate_csv_row(row: &ActivityCsvRow) -> anyhow::Result<ActivityKind> {
    anyhow::ensure!(!row.user_id.trim().is_empty(), "row is missing user_id");
    ActivityKind::parse(&row.activity_type)
        .with_context(|| format!("unknown activity_type `{}`", row.activity_type))
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (index, result) in reader.deserialize::<ActivityCsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid CSV row {}", index + 1))?;
        let kind = validate_csv_row(&row).with_context(|| format!("CSV row {}", index + 1))?;

        sqlx::query(
            r#"
            INSERT INTO tutoring.users (id, role, name, email)
            VALUES ($1, 'student', $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET name = COALESCE(EXCLUDED.name, tutoring.users.name),
                email = COALESCE(EXCLUDED.email, tutoring.users.email)
            "#,
        )
        .bind(&row.user_id)
        .bind(&row.name)
        .bind(&row.email)
        .execute(pool)
        .await?;

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(
            r#"
            INSERT INTO tutoring.activities
            (id, user_id, occurred_at, activity_type, details, result, duration_secs, history_id, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.user_id)
        .bind(row.occurred_at)
        .bind(kind.as_tag())
        .bind(&row.details)
        .bind(&row.result)
        .bind(row.duration_secs)
        .bind(&row.history_id)
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    tracing::info!(inserted, path = %csv_path.display(), "activity import finished");
    Ok(inserted)
}
