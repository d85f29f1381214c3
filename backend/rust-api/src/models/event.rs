use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::progress::{ProgressRecord, ProgressStatus};

/// Domain event raised once per successful learner/tutor action.
///
/// Delivery and formatting belong to the notification service; this payload
/// is published as JSON on the progress events channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub id: String,
    pub kind: ProgressEventKind,
    pub learner_id: String,
    pub course_id: String,
    pub lesson_id: String,
    pub status: ProgressStatus,
    pub course_progress: u8,
    /// Course percentage reached 100 with this action.
    pub course_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub occurred_at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(
        kind: ProgressEventKind,
        record: &ProgressRecord,
        course_progress: u8,
        course_completed: bool,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            learner_id: record.learner_id.clone(),
            course_id: record.course_id.clone(),
            lesson_id: record.lesson_id.clone(),
            status: record.status,
            course_progress,
            course_completed,
            score: None,
            occurred_at,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventKind {
    LessonStarted,
    ProgressUpdated,
    LessonCompleted,
    QuizSubmitted,
    QuizFailed,
    AssignmentSubmitted,
    AssignmentGraded,
    ProgressReset,
}

impl ProgressEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressEventKind::LessonStarted => "lesson_started",
            ProgressEventKind::ProgressUpdated => "progress_updated",
            ProgressEventKind::LessonCompleted => "lesson_completed",
            ProgressEventKind::QuizSubmitted => "quiz_submitted",
            ProgressEventKind::QuizFailed => "quiz_failed",
            ProgressEventKind::AssignmentSubmitted => "assignment_submitted",
            ProgressEventKind::AssignmentGraded => "assignment_graded",
            ProgressEventKind::ProgressReset => "progress_reset",
        }
    }
}
