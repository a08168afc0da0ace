use std::fmt::Write;

use chrono::TimeZone;

use crate::aggregate;
use crate::models::{HistoryItem, LoginRecord, Report, StudentAggregate, TeachingSession};

fn history_section(output: &mut String, title: &str, items: &[HistoryItem], empty: &str) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## {title}");

    if items.is_empty() {
        let _ = writeln!(output, "{empty}");
        return;
    }

    for item in items {
        let mut line = format!("- {}: {}", item.date, item.activity);
        if let Some(score) = &item.score {
            let _ = write!(line, " (score {score})");
        }
        if let Some(duration) = &item.duration {
            let _ = write!(line, ", {duration}");
        }
        if let Some(history_id) = &item.history_id {
            let _ = write!(line, " [report {history_id}]");
        }
        let _ = writeln!(output, "{line}");
    }
}

pub fn build_student_report(student: &StudentAggregate) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# {}", student.name);
    let _ = writeln!(output, "{} ({})", student.email, student.role);
    let _ = writeln!(output, "Avatar: {}", student.avatar_url);
    let _ = writeln!(
        output,
        "Logins: {} (last {})",
        student.total_logins, student.last_login
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Level Test");
    let _ = writeln!(output, "- Writing: {}", student.level_test.writing);
    let _ = writeln!(output, "- Reading: {}", student.level_test.reading);

    history_section(
        &mut output,
        "Level Test History",
        &student.level_test_history,
        "No level tests taken yet.",
    );
    history_section(
        &mut output,
        "Role-Play History",
        &student.role_play_history,
        "No role-play sessions yet.",
    );
    history_section(
        &mut output,
        "Self-Study History",
        &student.self_study_history,
        "No self-study activity yet.",
    );

    output
}

pub fn render_report(student_name: &str, report: &Report) -> String {
    let mut output = String::new();

    match report {
        Report::RolePlay(report) => {
            let _ = writeln!(output, "Role-Play Report");
            let _ = writeln!(output);
            let _ = writeln!(output, "Evaluation");
            let _ = writeln!(output, "{}", report.evaluation);
            let _ = writeln!(output);
            let _ = writeln!(output, "Transcript");
            for message in &report.messages {
                let speaker = if message.role == "user" {
                    student_name
                } else {
                    "AI"
                };
                let _ = writeln!(output, "{speaker}: {}", message.content);
            }
        }
        Report::SelfStudy(report) => {
            let _ = writeln!(
                output,
                "Self-Study Report: {}",
                report.title.as_deref().unwrap_or("Untitled")
            );
            if let Some(score) = &report.score {
                let _ = writeln!(output, "Score: {score}");
            }
            for (index, problem) in report.problems.iter().enumerate() {
                let mark = match problem.is_correct {
                    Some(true) => "correct",
                    Some(false) => "incorrect",
                    None => "ungraded",
                };
                let _ = writeln!(output);
                let _ = writeln!(output, "{}. {} ({mark})", index + 1, problem.question);
                let _ = writeln!(output, "   Answer: {}", problem.answer);
                if let Some(correct) = &problem.correct_answer {
                    let _ = writeln!(output, "   Expected: {correct}");
                }
                if let Some(explanation) = &problem.explanation {
                    let _ = writeln!(output, "   {explanation}");
                }
            }
        }
    }

    output
}

pub fn render_login_history<Tz>(records: &[LoginRecord], tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut output = String::new();
    if records.is_empty() {
        let _ = writeln!(output, "No logins recorded.");
        return output;
    }

    for record in records {
        let _ = writeln!(
            output,
            "- {}",
            aggregate::format_date_time(&record.occurred_at, tz)
        );
    }
    output
}

pub fn render_sessions<Tz>(sessions: &[TeachingSession], tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut output = String::new();
    if sessions.is_empty() {
        let _ = writeln!(output, "No teaching sessions saved.");
        return output;
    }

    for session in sessions {
        let _ = writeln!(
            output,
            "- {} {} with {} ({}, {})",
            aggregate::format_date_time(&session.started_at, tz),
            session.teacher_name,
            session.student_name,
            aggregate::format_duration(session.duration_secs),
            session.id
        );
    }
    output
}
