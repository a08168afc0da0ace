use std::fmt::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, FixedOffset, Utc};

use crate::models::SessionReport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub contents: String,
}

fn underscore_whitespace(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

/// Builds the plain-text session report. The date in the file name comes
/// from the UTC instant while the time comes from the session's own clock,
/// matching files exported by earlier versions of the dashboard.
pub fn build_artifact(
    started_at: &DateTime<FixedOffset>,
    teacher: &str,
    student: &str,
    report: &SessionReport,
) -> ExportArtifact {
    let date_part = started_at.with_timezone(&Utc).format("%y%m%d");
    let time_part = started_at.format("%H%M");
    let file_name = format!(
        "{}_{}_{}_{}.txt",
        date_part,
        time_part,
        underscore_whitespace(teacher),
        underscore_whitespace(student)
    );

    let mut contents = String::new();
    let _ = writeln!(contents, "Session Details");
    let _ = writeln!(contents, "---------------");
    let _ = writeln!(contents, "Date: {}", started_at.format("%B %-d, %Y"));
    let _ = writeln!(contents, "Time: {}", started_at.format("%I:%M %p"));
    let _ = writeln!(contents, "Teacher: {teacher}");
    let _ = writeln!(contents, "Student: {student}");
    let _ = writeln!(contents);
    let _ = writeln!(contents, "---------------");
    let _ = writeln!(contents, "Organizing the contents of the class:");
    let _ = writeln!(contents, "{}", report.evaluation);
    let _ = writeln!(contents);
    let _ = writeln!(contents, "---------------");
    let _ = writeln!(contents, "Transcript:");
    let _ = write!(contents, "{}", report.transcript);

    ExportArtifact {
        file_name,
        contents,
    }
}

pub async fn write_artifact(dir: &Path, artifact: &ExportArtifact) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create export directory {}", dir.display()))?;
    let path = dir.join(&artifact.file_name);
    tokio::fs::write(&path, &artifact.contents)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn report() -> SessionReport {
        SessionReport {
            transcript: "T".to_string(),
            evaluation: "E".to_string(),
        }
    }

    #[test]
    fn file_name_follows_date_time_teacher_student() {
        let started = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 7, 9, 5, 0)
            .unwrap();
        let artifact = build_artifact(&started, "teacher", "student", &report());
        assert_eq!(artifact.file_name, "260307_0905_teacher_student.txt");
    }

    #[test]
    fn names_with_spaces_are_underscored() {
        let started = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 7, 9, 5, 0)
            .unwrap();
        let artifact = build_artifact(&started, "Dana  Kim", "Lee\tMin Ho", &report());
        assert_eq!(artifact.file_name, "260307_0905_Dana__Kim_Lee_Min_Ho.txt");
        assert!(artifact.contents.contains("Teacher: Dana  Kim\n"));
    }

    #[test]
    fn date_part_is_utc_and_time_part_is_local() {
        // 00:30 on Mar 8 in Seoul is still Mar 7 in UTC.
        let started = FixedOffset::east_opt(9 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 8, 0, 30, 0)
            .unwrap();
        let artifact = build_artifact(&started, "teacher", "student", &report());
        assert_eq!(artifact.file_name, "260307_0030_teacher_student.txt");
        assert!(artifact.contents.contains("Date: March 8, 2026\n"));
    }

    #[test]
    fn contents_match_exported_layout() {
        let started = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 16, 15, 4, 0)
            .unwrap();
        let artifact = build_artifact(&started, "Teacher", "Mina Park", &report());
        let expected = "Session Details\n\
---------------\n\
Date: October 16, 2026\n\
Time: 03:04 PM\n\
Teacher: Teacher\n\
Student: Mina Park\n\
\n\
---------------\n\
Organizing the contents of the class:\n\
E\n\
\n\
---------------\n\
Transcript:\n\
T";
        assert_eq!(artifact.contents, expected);
    }
}
