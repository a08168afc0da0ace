use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const GRADE_NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    LevelTest,
    Learning,
    SelfStudy,
}

impl ActivityKind {
    /// Maps a stored type tag to a known activity kind.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "Level Test" | "LevelTest" => Some(Self::LevelTest),
            "Learning" => Some(Self::Learning),
            "Self-Study" => Some(Self::SelfStudy),
            _ => None,
        }
    }

    pub fn as_tag(self) -> &'static str {
        match self {
            Self::LevelTest => "Level Test",
            Self::Learning => "Learning",
            Self::SelfStudy => "Self-Study",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub kind: String,
    pub details: String,
    pub result: Option<String>,
    pub duration_secs: Option<i32>,
    pub history_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryItem {
    pub id: Uuid,
    pub kind: ActivityKind,
    pub date: String,
    pub activity: String,
    pub score: Option<String>,
    pub duration: Option<String>,
    pub history_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelTestGrade {
    pub writing: String,
    pub reading: String,
}

impl LevelTestGrade {
    pub fn has_writing(&self) -> bool {
        self.writing != GRADE_NOT_AVAILABLE
    }

    pub fn has_reading(&self) -> bool {
        self.reading != GRADE_NOT_AVAILABLE
    }
}

impl Default for LevelTestGrade {
    fn default() -> Self {
        Self {
            writing: GRADE_NOT_AVAILABLE.to_string(),
            reading: GRADE_NOT_AVAILABLE.to_string(),
        }
    }
}

/// A user row as stored, before any display defaults are applied.
#[derive(Debug, Clone)]
pub struct StudentProfile {
    pub id: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub total_logins: i32,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentAggregate {
    pub id: String,
    pub name: String,
    pub avatar_url: String,
    pub email: String,
    pub role: String,
    pub total_logins: i32,
    pub last_login: String,
    pub last_login_at: Option<DateTime<Utc>>,
    pub level_test: LevelTestGrade,
    pub level_test_history: Vec<HistoryItem>,
    pub role_play_history: Vec<HistoryItem>,
    pub self_study_history: Vec<HistoryItem>,
}

#[derive(Debug, Clone)]
pub struct LoginRecord {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

/// The signed-in teacher, passed explicitly to everything that acts on
/// their behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeacherContext {
    pub id: String,
    pub display_name: Option<String>,
}

impl TeacherContext {
    pub fn display_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or("Teacher")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    pub transcript: String,
    pub evaluation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePlayReport {
    #[serde(default)]
    pub evaluation: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfStudyProblem {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
    pub correct_answer: Option<String>,
    pub is_correct: Option<bool>,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfStudyReport {
    pub title: Option<String>,
    pub score: Option<String>,
    #[serde(default)]
    pub problems: Vec<SelfStudyProblem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    RolePlay(RolePlayReport),
    SelfStudy(SelfStudyReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportKind {
    RolePlay,
    SelfStudy,
}

#[derive(Debug, Clone)]
pub struct TeachingSession {
    pub id: Uuid,
    pub teacher_id: String,
    pub teacher_name: String,
    pub student_id: String,
    pub student_name: String,
    pub started_at: DateTime<Utc>,
    pub duration_secs: i32,
    pub report: SessionReport,
    pub created_at: DateTime<Utc>,
}
