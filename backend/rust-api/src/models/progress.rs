use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-(learner, course, lesson) progress stored in MongoDB "lesson_progress".
///
/// Sub-progress slices are typed and optional: only the slice matching the
/// activity a learner produced is populated. `version` is bumped on every
/// persisted write and used for compare-and-swap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub learner_id: String,
    pub course_id: String,
    pub lesson_id: String,
    pub enrollment_id: String,
    pub status: ProgressStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiz: Option<QuizProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment: Option<AssignmentProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reading: Option<ReadingProgress>,
    #[serde(default)]
    pub completion_percentage: f64,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub last_accessed_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub bookmarks: Vec<Bookmark>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: i64,
}

impl ProgressRecord {
    pub fn new(
        learner_id: &str,
        course_id: &str,
        lesson_id: &str,
        enrollment_id: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            learner_id: learner_id.to_string(),
            course_id: course_id.to_string(),
            lesson_id: lesson_id.to_string(),
            enrollment_id: enrollment_id.to_string(),
            status: ProgressStatus::NotStarted,
            video: None,
            quiz: None,
            assignment: None,
            reading: None,
            completion_percentage: 0.0,
            started_at: None,
            completed_at: None,
            last_accessed_at: now,
            notes: Vec::new(),
            bookmarks: Vec::new(),
            created_at: now,
            version: 0,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            learner_id: self.learner_id.clone(),
            course_id: self.course_id.clone(),
            lesson_id: self.lesson_id.clone(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ProgressStatus::Completed
    }

    /// Raises the lesson-level percentage; it never goes down.
    pub fn raise_completion_percentage(&mut self, value: f64) {
        let value = value.clamp(0.0, 100.0);
        if value > self.completion_percentage {
            self.completion_percentage = value;
        }
    }
}

/// Uniqueness key of a progress record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub learner_id: String,
    pub course_id: String,
    pub lesson_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::NotStarted => "not-started",
            ProgressStatus::InProgress => "in-progress",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Failed => "failed",
        }
    }

    /// Completed and failed are final for learner activity.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressStatus::Completed | ProgressStatus::Failed)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VideoProgress {
    pub watch_percentage: f64,
    pub watch_time: f64,
    pub last_position: f64,
    #[serde(default)]
    pub sessions: Vec<WatchSession>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchSession {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: i64,
    pub watch_percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuizProgress {
    pub attempts: u32,
    pub max_attempts: u32,
    pub best_score: u32,
    pub last_score: u32,
    pub passed: bool,
    #[serde(default)]
    pub answers: Vec<QuizAnswerEntry>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl QuizProgress {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            best_score: 0,
            last_score: 0,
            passed: false,
            answers: Vec::new(),
            last_attempt_at: None,
        }
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuizAnswerEntry {
    pub attempt: u32,
    pub question_id: String,
    pub answer: String,
    pub correct: bool,
    pub points_earned: u32,
    pub answered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AssignmentProgress {
    pub submitted: bool,
    #[serde(default)]
    pub submission: Option<AssignmentSubmission>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    pub graded: bool,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub graded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub graded_by: Option<String>,
    /// Number of grades issued so far; a revision must name the current one.
    #[serde(default)]
    pub grade_version: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AssignmentSubmission {
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReadingProgress {
    pub read_percentage: f64,
    pub read_time: f64,
    pub last_position: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub id: String,
    pub content: String,
    pub position: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bookmark {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub position: f64,
    pub created_at: DateTime<Utc>,
}
