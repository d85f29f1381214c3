use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_QUIZ_PASSING_SCORE: f64 = 70.0;
pub const DEFAULT_QUIZ_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_ASSIGNMENT_PASSING_SCORE: f64 = 70.0;

/// Lesson stored in MongoDB "lessons" collection. Read-only for this service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    #[serde(rename = "_id")]
    pub id: String,
    pub course_id: String,
    pub lesson_number: u32,
    pub title: String,
    pub content_type: ContentType,
    pub completion_criteria: CompletionCriteria,
    #[serde(default = "default_required")]
    pub required_for_completion: bool,
    /// Tutor who grades and resets progress on this lesson.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tutor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiz: Option<QuizDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment: Option<AssignmentDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaMetadata>,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Video,
    Document,
    Quiz,
    Assignment,
    Reading,
    Interactive,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Video => "video",
            ContentType::Document => "document",
            ContentType::Quiz => "quiz",
            ContentType::Assignment => "assignment",
            ContentType::Reading => "reading",
            ContentType::Interactive => "interactive",
        }
    }

    /// Whether events of the given activity kind may be recorded on this lesson.
    pub fn accepts(&self, activity: ActivityKind) -> bool {
        matches!(
            (self, activity),
            (ContentType::Video, ActivityKind::Video)
                | (ContentType::Interactive, ActivityKind::Video)
                | (ContentType::Reading, ActivityKind::Reading)
                | (ContentType::Document, ActivityKind::Reading)
                | (ContentType::Interactive, ActivityKind::Reading)
                | (ContentType::Quiz, ActivityKind::Quiz)
                | (ContentType::Assignment, ActivityKind::Assignment)
        )
    }
}

/// Kind of learner activity an evaluator consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Video,
    Reading,
    Quiz,
    Assignment,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Video => "video",
            ActivityKind::Reading => "reading",
            ActivityKind::Quiz => "quiz",
            ActivityKind::Assignment => "assignment",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionCriteria {
    #[serde(rename = "watch-90-percent")]
    Watch90Percent,
    WatchComplete,
    PassQuiz,
    SubmitAssignment,
    ReadComplete,
}

impl CompletionCriteria {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionCriteria::Watch90Percent => "watch-90-percent",
            CompletionCriteria::WatchComplete => "watch-complete",
            CompletionCriteria::PassQuiz => "pass-quiz",
            CompletionCriteria::SubmitAssignment => "submit-assignment",
            CompletionCriteria::ReadComplete => "read-complete",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizDefinition {
    pub questions: Vec<QuizQuestion>,
    #[serde(default = "default_quiz_passing_score")]
    pub passing_score: f64,
    #[serde(default = "default_quiz_max_attempts")]
    pub max_attempts: u32,
}

fn default_quiz_passing_score() -> f64 {
    DEFAULT_QUIZ_PASSING_SCORE
}

fn default_quiz_max_attempts() -> u32 {
    DEFAULT_QUIZ_MAX_ATTEMPTS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub id: String,
    #[serde(default)]
    pub prompt: String,
    pub correct_answer: String,
    #[serde(default = "default_question_points")]
    pub points: u32,
}

fn default_question_points() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default = "default_assignment_passing_score")]
    pub passing_score: f64,
}

fn default_assignment_passing_score() -> f64 {
    DEFAULT_ASSIGNMENT_PASSING_SCORE
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
}

impl Lesson {
    pub fn is_tutored_by(&self, tutor_id: &str) -> bool {
        self.tutor_id.as_deref() == Some(tutor_id)
    }

    pub fn assignment_passing_score(&self) -> f64 {
        self.assignment
            .as_ref()
            .map(|a| a.passing_score)
            .unwrap_or(DEFAULT_ASSIGNMENT_PASSING_SCORE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn criteria_uses_wire_names() {
        let json = serde_json::to_string(&CompletionCriteria::Watch90Percent).unwrap();
        assert_eq!(json, "\"watch-90-percent\"");
        let parsed: CompletionCriteria = serde_json::from_str("\"submit-assignment\"").unwrap();
        assert_eq!(parsed, CompletionCriteria::SubmitAssignment);
    }

    #[test]
    fn lesson_defaults_to_required_with_quiz_defaults() {
        let lesson: Lesson = serde_json::from_value(serde_json::json!({
            "_id": "l1",
            "course_id": "c1",
            "lesson_number": 1,
            "title": "Intro quiz",
            "content_type": "quiz",
            "completion_criteria": "pass-quiz",
            "quiz": { "questions": [{ "id": "q1", "correct_answer": "a" }] }
        }))
        .unwrap();

        assert!(lesson.required_for_completion);
        let quiz = lesson.quiz.unwrap();
        assert_eq!(quiz.max_attempts, DEFAULT_QUIZ_MAX_ATTEMPTS);
        assert_eq!(quiz.passing_score, DEFAULT_QUIZ_PASSING_SCORE);
        assert_eq!(quiz.questions[0].points, 1);
    }

    #[test]
    fn document_lessons_take_reading_events_only() {
        assert!(ContentType::Document.accepts(ActivityKind::Reading));
        assert!(!ContentType::Document.accepts(ActivityKind::Video));
        assert!(ContentType::Interactive.accepts(ActivityKind::Video));
        assert!(!ContentType::Video.accepts(ActivityKind::Quiz));
    }
}
