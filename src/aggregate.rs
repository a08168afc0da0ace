use std::cmp::Ordering;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::models::{
    ActivityKind, ActivityRecord, HistoryItem, LevelTestGrade, StudentAggregate, StudentProfile,
};

#[derive(Debug, Clone, Default)]
pub struct ActivityHistory {
    pub level_test: Vec<HistoryItem>,
    pub role_play: Vec<HistoryItem>,
    pub self_study: Vec<HistoryItem>,
    pub grades: LevelTestGrade,
    /// Records whose type tag matched no known activity kind.
    pub unrecognized: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SortKey {
    Name,
    LevelTest,
    Learning,
    Login,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Splits newest-first activity records into per-kind histories in a single
/// pass. Input order is kept within every bucket.
pub fn aggregate_activities<Tz>(records: &[ActivityRecord], tz: &Tz) -> ActivityHistory
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut history = ActivityHistory::default();
    let mut writing: Option<String> = None;
    let mut reading: Option<String> = None;

    for record in records {
        let Some(kind) = ActivityKind::parse(&record.kind) else {
            tracing::warn!(
                activity_id = %record.id,
                tag = %record.kind,
                "skipping activity with unrecognized type"
            );
            history.unrecognized.push(record.id);
            continue;
        };

        let score = match kind {
            ActivityKind::Learning => None,
            ActivityKind::LevelTest | ActivityKind::SelfStudy => record.result.clone(),
        };
        let item = HistoryItem {
            id: record.id,
            kind,
            date: format_date(&record.occurred_at, tz),
            activity: record.details.clone(),
            score,
            duration: record.duration_secs.map(format_duration),
            history_id: record.history_id.clone(),
        };

        match kind {
            ActivityKind::LevelTest => {
                let slot = match record.details.as_str() {
                    "Writing" => Some(&mut writing),
                    "Reading" => Some(&mut reading),
                    _ => None,
                };
                if let Some(slot) = slot {
                    if slot.is_none() {
                        *slot = record.result.clone().filter(|value| !value.is_empty());
                    }
                }
                history.level_test.push(item);
            }
            ActivityKind::Learning => history.role_play.push(item),
            ActivityKind::SelfStudy => history.self_study.push(item),
        }
    }

    if let Some(value) = writing {
        history.grades.writing = value;
    }
    if let Some(value) = reading {
        history.grades.reading = value;
    }

    history
}

pub fn build_student<Tz>(
    profile: StudentProfile,
    activities: &[ActivityRecord],
    tz: &Tz,
) -> StudentAggregate
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let history = aggregate_activities(activities, tz);
    let id_prefix: String = profile.id.chars().take(4).collect();

    StudentAggregate {
        name: profile
            .name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("Student{id_prefix}")),
        avatar_url: profile
            .avatar_url
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| format!("https://picsum.photos/seed/{}/64/64", profile.id)),
        email: profile.email.unwrap_or_default(),
        role: profile
            .role
            .filter(|role| !role.is_empty())
            .unwrap_or_else(|| "student".to_string()),
        total_logins: profile.total_logins,
        last_login: profile
            .last_login
            .map(|at| format_date_time(&at, tz))
            .unwrap_or_else(|| "-".to_string()),
        last_login_at: profile.last_login,
        level_test: history.grades,
        level_test_history: history.level_test,
        role_play_history: history.role_play,
        self_study_history: history.self_study,
        id: profile.id,
    }
}

pub fn format_date<Tz>(at: &DateTime<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    at.with_timezone(tz).format("%b %-d, %Y").to_string()
}

pub fn format_date_time<Tz>(at: &DateTime<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    at.with_timezone(tz).format("%b %-d, %Y, %-I:%M %p").to_string()
}

pub fn format_duration(seconds: i32) -> String {
    let minutes = (f64::from(seconds) / 60.0).round() as i64;
    format!("{minutes} min")
}

fn level_test_rank(student: &StudentAggregate) -> u8 {
    match (student.level_test.has_writing(), student.level_test.has_reading()) {
        (true, true) => 3,
        (true, false) => 2,
        (false, true) => 1,
        (false, false) => 0,
    }
}

fn compare_students(a: &StudentAggregate, b: &StudentAggregate, key: SortKey) -> Ordering {
    match key {
        SortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        SortKey::LevelTest => level_test_rank(a).cmp(&level_test_rank(b)),
        SortKey::Learning => a.role_play_history.len().cmp(&b.role_play_history.len()),
        SortKey::Login => a.last_login_at.cmp(&b.last_login_at),
    }
}

/// Filters by a case-insensitive name fragment, then sorts. Ties keep their
/// fetched order.
pub fn arrange_students(
    students: Vec<StudentAggregate>,
    search: Option<&str>,
    key: SortKey,
    order: SortOrder,
) -> Vec<StudentAggregate> {
    let needle = search.map(str::to_lowercase).unwrap_or_default();
    let mut values: Vec<StudentAggregate> = students
        .into_iter()
        .filter(|student| student.name.to_lowercase().contains(&needle))
        .collect();

    values.sort_by(|a, b| {
        let ordering = compare_students(a, b, key);
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(kind: &str, details: &str, result: Option<&str>, days_ago: i64) -> ActivityRecord {
        let base = Utc.with_ymd_and_hms(2026, 3, 20, 12, 0, 0).unwrap();
        ActivityRecord {
            id: Uuid::new_v4(),
            occurred_at: base - Duration::days(days_ago),
            kind: kind.to_string(),
            details: details.to_string(),
            result: result.map(str::to_string),
            duration_secs: None,
            history_id: None,
        }
    }

    fn profile(id: &str) -> StudentProfile {
        StudentProfile {
            id: id.to_string(),
            name: None,
            avatar_url: None,
            email: None,
            role: None,
            total_logins: 0,
            last_login: None,
        }
    }

    #[test]
    fn buckets_partition_recognized_records_in_input_order() {
        let records = vec![
            record("Learning", "Ordering food", None, 0),
            record("Level Test", "Writing", Some("B1"), 1),
            record("Quiz", "Pop quiz", Some("9/10"), 2),
            record("Self-Study", "Articles", Some("4/5"), 3),
            record("Learning", "Job interview", None, 4),
            record("Level Test", "Reading", Some("A2"), 5),
        ];

        let history = aggregate_activities(&records, &Utc);

        let ids = |items: &[HistoryItem]| items.iter().map(|item| item.id).collect::<Vec<_>>();
        assert_eq!(ids(&history.role_play), vec![records[0].id, records[4].id]);
        assert_eq!(ids(&history.level_test), vec![records[1].id, records[5].id]);
        assert_eq!(ids(&history.self_study), vec![records[3].id]);
        assert_eq!(history.unrecognized, vec![records[2].id]);
        let bucketed = history.level_test.len() + history.role_play.len() + history.self_study.len();
        assert_eq!(bucketed, 5);
    }

    #[test]
    fn newest_grade_wins_per_label() {
        let records = vec![
            record("Level Test", "Writing", Some("B2"), 0),
            record("Level Test", "Writing", Some("B1"), 10),
            record("Level Test", "Writing", Some("A2"), 20),
            record("Level Test", "Reading", Some("C1"), 30),
        ];

        let history = aggregate_activities(&records, &Utc);
        assert_eq!(history.grades.writing, "B2");
        assert_eq!(history.grades.reading, "C1");
    }

    #[test]
    fn missing_result_does_not_claim_grade_slot() {
        let records = vec![
            record("Level Test", "Writing", None, 0),
            record("Level Test", "Writing", Some("B1"), 3),
        ];

        let history = aggregate_activities(&records, &Utc);
        assert_eq!(history.grades.writing, "B1");
        assert_eq!(history.grades.reading, "N/A");
    }

    #[test]
    fn learning_items_carry_no_score() {
        let mut learning = record("Learning", "Travel", Some("ignored"), 0);
        learning.duration_secs = Some(1770);
        learning.history_id = Some("rp-1".to_string());

        let history = aggregate_activities(&[learning], &Utc);
        let item = &history.role_play[0];
        assert_eq!(item.score, None);
        assert_eq!(item.duration.as_deref(), Some("30 min"));
        assert_eq!(item.history_id.as_deref(), Some("rp-1"));
        assert_eq!(item.date, "Mar 20, 2026");
    }

    #[test]
    fn profile_defaults_fill_display_fields() {
        let student = build_student(profile("abcdef123"), &[], &Utc);
        assert_eq!(student.name, "Studentabcd");
        assert_eq!(student.avatar_url, "https://picsum.photos/seed/abcdef123/64/64");
        assert_eq!(student.role, "student");
        assert_eq!(student.last_login, "-");
        assert_eq!(student.level_test, LevelTestGrade::default());
    }

    #[test]
    fn last_login_uses_twelve_hour_clock() {
        let mut stored = profile("u1");
        stored.last_login = Some(Utc.with_ymd_and_hms(2026, 1, 5, 15, 4, 0).unwrap());
        let student = build_student(stored, &[], &Utc);
        assert_eq!(student.last_login, "Jan 5, 2026, 3:04 PM");
    }

    #[test]
    fn arrange_filters_and_ranks_level_tests() {
        let mut both = profile("a");
        both.name = Some("Mina".to_string());
        let both = build_student(
            both,
            &[
                record("Level Test", "Writing", Some("B1"), 0),
                record("Level Test", "Reading", Some("B2"), 1),
            ],
            &Utc,
        );
        let mut reading_only = profile("b");
        reading_only.name = Some("Jin".to_string());
        let reading_only = build_student(
            reading_only,
            &[record("Level Test", "Reading", Some("A2"), 0)],
            &Utc,
        );
        let mut none = profile("c");
        none.name = Some("Minho".to_string());
        let none = build_student(none, &[], &Utc);

        let arranged = arrange_students(
            vec![reading_only.clone(), none.clone(), both.clone()],
            None,
            SortKey::LevelTest,
            SortOrder::Desc,
        );
        let names: Vec<&str> = arranged.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Mina", "Jin", "Minho"]);

        let filtered = arrange_students(
            vec![reading_only, none, both],
            Some("MIN"),
            SortKey::Name,
            SortOrder::Asc,
        );
        let names: Vec<&str> = filtered.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Mina", "Minho"]);
    }

    #[test]
    fn never_logged_in_sorts_oldest() {
        let mut recent = profile("r");
        recent.last_login = Some(Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap());
        let recent = build_student(recent, &[], &Utc);
        let never = build_student(profile("n"), &[], &Utc);

        let arranged = arrange_students(vec![never, recent], None, SortKey::Login, SortOrder::Desc);
        assert_eq!(arranged[0].id, "r");
        assert_eq!(arranged[1].id, "n");
    }

    #[test]
    fn duration_rounds_to_nearest_minute() {
        assert_eq!(format_duration(89), "1 min");
        assert_eq!(format_duration(90), "2 min");
        assert_eq!(format_duration(2700), "45 min");
    }
}
