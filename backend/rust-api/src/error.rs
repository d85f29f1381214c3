use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::models::lesson::{ActivityKind, ContentType};

/// Failures of the persistence layer behind `ProgressStore`.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The record changed since it was read; re-read and re-apply.
    #[error("Progress record {0} was modified concurrently")]
    Conflict(String),
    #[error("{0}")]
    MongoDB(#[from] mongodb::error::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors of a single learner/tutor action. None of them are fatal to the
/// process and none leave a partially written record behind.
#[derive(thiserror::Error, Debug)]
pub enum ProgressError {
    #[error("Learner is not enrolled in course {course_id}")]
    NotEnrolled { course_id: String },
    #[error("Lesson {0} not found")]
    LessonNotFound(String),
    #[error("No progress recorded for lesson {0}")]
    RecordNotFound(String),
    #[error("Lesson is a {actual} lesson and does not accept {expected} activity")]
    WrongContentType {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("All {max_attempts} quiz attempts have been used")]
    AttemptsExhausted { attempts: u32, max_attempts: u32 },
    #[error("{0}")]
    AlreadyGraded(String),
    #[error("Lesson {0} is misconfigured: {1}")]
    InvalidLesson(String, String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Forbidden(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProgressError {
    pub fn wrong_content_type(activity: ActivityKind, content_type: ContentType) -> Self {
        ProgressError::WrongContentType {
            expected: activity.as_str(),
            actual: content_type.as_str(),
        }
    }

    pub fn is_write_conflict(&self) -> bool {
        matches!(self, ProgressError::Store(StoreError::Conflict(_)))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ProgressError::NotEnrolled { .. } | ProgressError::Forbidden(_) => {
                StatusCode::FORBIDDEN
            }
            ProgressError::LessonNotFound(_) | ProgressError::RecordNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ProgressError::WrongContentType { .. } | ProgressError::InvalidLesson(..) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ProgressError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ProgressError::AttemptsExhausted { .. }
            | ProgressError::AlreadyGraded(_)
            | ProgressError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            ProgressError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressError::NotEnrolled { .. } => "not_enrolled",
            ProgressError::LessonNotFound(_) => "lesson_not_found",
            ProgressError::RecordNotFound(_) => "record_not_found",
            ProgressError::WrongContentType { .. } => "wrong_content_type",
            ProgressError::AttemptsExhausted { .. } => "attempts_exhausted",
            ProgressError::AlreadyGraded(_) => "already_graded",
            ProgressError::InvalidLesson(..) => "invalid_lesson",
            ProgressError::InvalidInput(_) => "invalid_input",
            ProgressError::Forbidden(_) => "forbidden",
            ProgressError::Store(StoreError::Conflict(_)) => "conflict",
            ProgressError::Store(_) => "store",
        }
    }
}

impl From<validator::ValidationErrors> for ProgressError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ProgressError::InvalidInput(errors.to_string())
    }
}

impl IntoResponse for ProgressError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Store details stay in the logs.
        let message = match &self {
            ProgressError::Store(StoreError::Conflict(_)) => {
                "Progress record is busy, please retry".to_string()
            }
            ProgressError::Store(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        (
            status,
            Json(json!({
                "message": message,
                "status": status.as_u16()
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_errors_to_http_statuses() {
        let cases = [
            (
                ProgressError::NotEnrolled {
                    course_id: "c1".to_string(),
                },
                StatusCode::FORBIDDEN,
            ),
            (
                ProgressError::LessonNotFound("l1".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                ProgressError::wrong_content_type(ActivityKind::Quiz, ContentType::Video),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ProgressError::AttemptsExhausted {
                    attempts: 3,
                    max_attempts: 3,
                },
                StatusCode::CONFLICT,
            ),
            (
                ProgressError::InvalidInput("bad".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                StoreError::Unavailable("down".to_string()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.status_code(), expected, "{}", err);
        }
    }

    #[test]
    fn conflict_is_the_only_retryable_error() {
        let conflict: ProgressError = StoreError::Conflict("r1".to_string()).into();
        assert!(conflict.is_write_conflict());
        assert_eq!(conflict.kind(), "conflict");
        assert!(!ProgressError::AlreadyGraded("graded".to_string()).is_write_conflict());
    }

    #[test]
    fn wrong_content_type_names_both_sides() {
        let err = ProgressError::wrong_content_type(ActivityKind::Video, ContentType::Quiz);
        assert_eq!(
            err.to_string(),
            "Lesson is a quiz lesson and does not accept video activity"
        );
    }
}
