use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::progress::{ProgressRecord, ProgressStatus};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VideoProgressRequest {
    #[validate(range(min = 0.0, max = 100.0, message = "watch_percentage must be 0-100"))]
    pub watch_percentage: f64,
    #[validate(range(min = 0.0, message = "watch_time must not be negative"))]
    pub watch_time: f64,
    #[validate(range(min = 0.0, message = "position must not be negative"))]
    pub position: f64,
}

/// One continuous viewing span reported by the player.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WatchSessionRequest {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[validate(range(min = 0.0, max = 100.0, message = "watch_percentage must be 0-100"))]
    pub watch_percentage: f64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReadingProgressRequest {
    #[validate(range(min = 0.0, max = 100.0, message = "read_percentage must be 0-100"))]
    pub read_percentage: f64,
    #[validate(range(min = 0.0, message = "read_time must not be negative"))]
    pub read_time: f64,
    #[validate(range(min = 0.0, message = "position must not be negative"))]
    pub position: f64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitQuizRequest {
    #[validate(length(min = 1, message = "At least one answer is required"))]
    pub answers: Vec<QuizAnswer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAnswer {
    pub question_id: String,
    pub answer: String,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct SubmitAssignmentRequest {
    #[serde(default)]
    pub files: Vec<String>,
    #[validate(length(max = 20000, message = "Text must be at most 20000 characters"))]
    pub text: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
}

impl SubmitAssignmentRequest {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
            && self.links.is_empty()
            && self.text.as_deref().map(str::trim).unwrap_or("").is_empty()
    }
}

/// Grade issued by a tutor. Re-grading an already graded submission needs
/// `revise = true` and the grade version the tutor was looking at.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GradeAssignmentRequest {
    #[validate(length(min = 1, message = "learner_id is required"))]
    pub learner_id: String,
    #[validate(range(min = 0.0, max = 100.0, message = "score must be 0-100"))]
    pub score: f64,
    pub feedback: Option<String>,
    #[serde(default)]
    pub revise: bool,
    pub expected_grade_version: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddNoteRequest {
    #[validate(length(
        min = 1,
        max = 5000,
        message = "Note must be between 1 and 5000 characters"
    ))]
    pub content: String,
    #[serde(default)]
    #[validate(range(min = 0.0, message = "position must not be negative"))]
    pub position: f64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddBookmarkRequest {
    #[validate(length(max = 200, message = "Label must be at most 200 characters"))]
    pub label: Option<String>,
    #[validate(range(min = 0.0, message = "position must not be negative"))]
    pub position: f64,
}

/// Caller of a tutor action. Admins act on any lesson; tutors only on
/// lessons they own.
#[derive(Debug, Clone)]
pub struct Tutor {
    pub id: String,
    pub is_admin: bool,
}

impl Tutor {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            is_admin: false,
        }
    }

    pub fn admin(id: &str) -> Self {
        Self {
            id: id.to_string(),
            is_admin: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ResetProgressRequest {
    #[validate(length(min = 1, message = "learner_id is required"))]
    pub learner_id: String,
}

/// Result of any record-mutating action.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdateResponse {
    pub record: ProgressRecord,
    /// Set when this action moved the record into a new status.
    pub transition: Option<ProgressStatus>,
    pub course_progress: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizSubmissionResponse {
    pub score: u32,
    pub passed: bool,
    pub correct_answers: Vec<QuestionResult>,
    pub attempt: u32,
    pub attempts_remaining: u32,
    pub status: ProgressStatus,
    pub course_progress: u8,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QuestionResult {
    pub question_id: String,
    pub correct: bool,
    pub correct_answer: String,
    pub points: u32,
    pub points_earned: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseProgressResponse {
    pub course_id: String,
    pub learner_id: String,
    pub required_lessons: usize,
    pub completed_required_lessons: usize,
    pub percentage: u8,
    pub lessons: Vec<LessonProgressSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LessonProgressSummary {
    pub lesson_id: String,
    pub lesson_number: u32,
    pub title: String,
    pub required: bool,
    pub status: ProgressStatus,
    pub completion_percentage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_progress_rejects_out_of_range_percentage() {
        let req = VideoProgressRequest {
            watch_percentage: 120.0,
            watch_time: 10.0,
            position: 5.0,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn empty_assignment_is_detected() {
        let req = SubmitAssignmentRequest {
            text: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(req.is_empty());

        let req = SubmitAssignmentRequest {
            links: vec!["https://example.com/repo".to_string()],
            ..Default::default()
        };
        assert!(!req.is_empty());
    }
}
