use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};

use crate::{
    error::ProgressError,
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::activity::{
        AddBookmarkRequest, AddNoteRequest, GradeAssignmentRequest, ReadingProgressRequest,
        ResetProgressRequest, SubmitAssignmentRequest, SubmitQuizRequest, VideoProgressRequest,
        WatchSessionRequest,
    },
    services::AppState,
};

fn ensure_learner(claims: &JwtClaims) -> Result<(), ProgressError> {
    if claims.is_learner() {
        Ok(())
    } else {
        Err(ProgressError::Forbidden("Student role required".to_string()))
    }
}

/// POST /api/v1/progress/lessons/{id}/start
pub async fn start_lesson(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(lesson_id): Path<String>,
) -> Result<impl IntoResponse, ProgressError> {
    ensure_learner(&claims)?;
    let response = state
        .progress_service()
        .start_lesson(&claims.sub, &lesson_id)
        .await?;
    Ok(Json(response))
}

/// GET /api/v1/progress/lessons/{id}
pub async fn get_lesson_progress(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(lesson_id): Path<String>,
) -> Result<impl IntoResponse, ProgressError> {
    ensure_learner(&claims)?;
    let record = state
        .progress_service()
        .lesson_progress(&claims.sub, &lesson_id)
        .await?;
    Ok(Json(record))
}

/// POST /api/v1/progress/lessons/{id}/video
pub async fn record_video_progress(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(lesson_id): Path<String>,
    AppJson(payload): AppJson<VideoProgressRequest>,
) -> Result<impl IntoResponse, ProgressError> {
    ensure_learner(&claims)?;
    let response = state
        .progress_service()
        .record_video_progress(&claims.sub, &lesson_id, &payload)
        .await?;
    Ok(Json(response))
}

/// POST /api/v1/progress/lessons/{id}/video/sessions
pub async fn record_watch_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(lesson_id): Path<String>,
    AppJson(payload): AppJson<WatchSessionRequest>,
) -> Result<impl IntoResponse, ProgressError> {
    ensure_learner(&claims)?;
    let record = state
        .progress_service()
        .record_watch_session(&claims.sub, &lesson_id, &payload)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// POST /api/v1/progress/lessons/{id}/reading
pub async fn record_reading_progress(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(lesson_id): Path<String>,
    AppJson(payload): AppJson<ReadingProgressRequest>,
) -> Result<impl IntoResponse, ProgressError> {
    ensure_learner(&claims)?;
    let response = state
        .progress_service()
        .record_reading_progress(&claims.sub, &lesson_id, &payload)
        .await?;
    Ok(Json(response))
}

/// POST /api/v1/progress/lessons/{id}/quiz
pub async fn submit_quiz(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(lesson_id): Path<String>,
    AppJson(payload): AppJson<SubmitQuizRequest>,
) -> Result<impl IntoResponse, ProgressError> {
    ensure_learner(&claims)?;
    let response = state
        .progress_service()
        .submit_quiz(&claims.sub, &lesson_id, &payload)
        .await?;
    Ok(Json(response))
}

/// POST /api/v1/progress/lessons/{id}/assignment
pub async fn submit_assignment(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(lesson_id): Path<String>,
    AppJson(payload): AppJson<SubmitAssignmentRequest>,
) -> Result<impl IntoResponse, ProgressError> {
    ensure_learner(&claims)?;
    let response = state
        .progress_service()
        .submit_assignment(&claims.sub, &lesson_id, &payload)
        .await?;
    Ok(Json(response))
}

/// POST /api/v1/progress/lessons/{id}/assignment/grade (tutor only)
pub async fn grade_assignment(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(lesson_id): Path<String>,
    AppJson(payload): AppJson<GradeAssignmentRequest>,
) -> Result<impl IntoResponse, ProgressError> {
    let response = state
        .progress_service()
        .grade_assignment(&claims.tutor(), &lesson_id, &payload)
        .await?;
    Ok(Json(response))
}

/// POST /api/v1/progress/lessons/{id}/notes
pub async fn add_note(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(lesson_id): Path<String>,
    AppJson(payload): AppJson<AddNoteRequest>,
) -> Result<impl IntoResponse, ProgressError> {
    ensure_learner(&claims)?;
    let note = state
        .progress_service()
        .add_note(&claims.sub, &lesson_id, &payload)
        .await?;
    Ok((StatusCode::CREATED, Json(note)))
}

/// POST /api/v1/progress/lessons/{id}/bookmarks
pub async fn add_bookmark(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(lesson_id): Path<String>,
    AppJson(payload): AppJson<AddBookmarkRequest>,
) -> Result<impl IntoResponse, ProgressError> {
    ensure_learner(&claims)?;
    let bookmark = state
        .progress_service()
        .add_bookmark(&claims.sub, &lesson_id, &payload)
        .await?;
    Ok((StatusCode::CREATED, Json(bookmark)))
}

/// POST /api/v1/progress/lessons/{id}/reset (tutor only)
pub async fn reset_lesson_progress(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(lesson_id): Path<String>,
    AppJson(payload): AppJson<ResetProgressRequest>,
) -> Result<impl IntoResponse, ProgressError> {
    let response = state
        .progress_service()
        .reset_lesson_progress(&claims.tutor(), &lesson_id, &payload)
        .await?;
    Ok(Json(response))
}

/// GET /api/v1/progress/courses/{course_id}
pub async fn get_course_progress(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(course_id): Path<String>,
) -> Result<impl IntoResponse, ProgressError> {
    ensure_learner(&claims)?;
    let response = state
        .progress_service()
        .course_progress(&claims.sub, &course_id)
        .await?;
    Ok(Json(response))
}
