use std::sync::Arc;

use chrono::{DateTime, Utc};
use validator::Validate;

use crate::error::{ProgressError, StoreError};
use crate::metrics::{
    LESSON_TRANSITIONS_TOTAL, PROGRESS_ACTIONS_TOTAL, PROGRESS_WRITE_CONFLICTS_TOTAL,
    QUIZ_SUBMISSIONS_TOTAL,
};
use crate::models::activity::{
    AddBookmarkRequest, AddNoteRequest, CourseProgressResponse, GradeAssignmentRequest,
    ProgressUpdateResponse, QuizSubmissionResponse, ReadingProgressRequest,
    ResetProgressRequest, SubmitAssignmentRequest, SubmitQuizRequest, Tutor,
    VideoProgressRequest, WatchSessionRequest,
};
use crate::models::enrollment::Enrollment;
use crate::models::event::{ProgressEvent, ProgressEventKind};
use crate::models::lesson::{ActivityKind, Lesson};
use crate::models::progress::{Bookmark, Note, ProgressRecord, ProgressStatus, RecordKey};
use crate::utils::retry::{retry_async_when, RetryConfig};

use super::aggregator::CourseSnapshot;
use super::completion_policy::{self, decide};
use super::enrollment_sync;
use super::evaluators;
use super::event_publisher::EventPublisher;
use super::progress_store::ProgressStore;

/// Lesson and enrollment resolved for one action, before any evaluator runs.
struct LessonContext {
    lesson: Lesson,
    enrollment: Enrollment,
}

impl LessonContext {
    fn key(&self, learner_id: &str) -> RecordKey {
        RecordKey {
            learner_id: learner_id.to_string(),
            course_id: self.lesson.course_id.clone(),
            lesson_id: self.lesson.id.clone(),
        }
    }
}

struct Mutation<T> {
    record: ProgressRecord,
    transition: Option<ProgressStatus>,
    output: T,
}

struct Finish {
    course_progress: u8,
}

/// Runs the progress pipeline for one action:
/// evaluator -> policy -> store write -> aggregate -> enrollment sync -> event.
pub struct ProgressService {
    store: Arc<dyn ProgressStore>,
    events: Arc<dyn EventPublisher>,
    retry: RetryConfig,
}

impl ProgressService {
    pub fn new(store: Arc<dyn ProgressStore>, events: Arc<dyn EventPublisher>) -> Self {
        Self {
            store,
            events,
            retry: RetryConfig::contention(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub async fn start_lesson(
        &self,
        learner_id: &str,
        lesson_id: &str,
    ) -> Result<ProgressUpdateResponse, ProgressError> {
        let result = async {
            let ctx = self.resolve(learner_id, lesson_id, None).await?;
            let mutation = self
                .mutate(learner_id, &ctx, |record, now| {
                    Ok((completion_policy::start(record, now), ()))
                })
                .await?;

            tracing::info!(
                "Lesson started: learner={}, lesson={}, status={}",
                learner_id,
                lesson_id,
                mutation.record.status.as_str()
            );

            let finish = self
                .finish(&mutation.record, ProgressEventKind::LessonStarted, None)
                .await?;
            Ok::<_, ProgressError>(update_response(mutation, finish))
        }
        .await;
        observe("start_lesson", learner_id, lesson_id, result)
    }

    pub async fn record_video_progress(
        &self,
        learner_id: &str,
        lesson_id: &str,
        req: &VideoProgressRequest,
    ) -> Result<ProgressUpdateResponse, ProgressError> {
        let result = async {
            req.validate()?;
            let ctx = self
                .resolve(learner_id, lesson_id, Some(ActivityKind::Video))
                .await?;
            let criteria = ctx.lesson.completion_criteria;

            let mutation = self
                .mutate(learner_id, &ctx, |record, now| {
                    let evaluation = evaluators::evaluate_video(record.video.as_ref(), req);
                    record.raise_completion_percentage(evaluation.slice.watch_percentage);
                    record.video = Some(evaluation.slice);
                    let decision = decide(criteria, &evaluation.signal);
                    Ok((completion_policy::apply(record, decision, now), ()))
                })
                .await?;

            tracing::info!(
                "Video progress recorded: learner={}, lesson={}, watched={:.1}%, status={}",
                learner_id,
                lesson_id,
                mutation
                    .record
                    .video
                    .as_ref()
                    .map(|v| v.watch_percentage)
                    .unwrap_or_default(),
                mutation.record.status.as_str()
            );

            let kind = completion_event(mutation.transition, ProgressEventKind::ProgressUpdated);
            let finish = self.finish(&mutation.record, kind, None).await?;
            Ok::<_, ProgressError>(update_response(mutation, finish))
        }
        .await;
        observe("video_progress", learner_id, lesson_id, result)
    }

    /// Appends a watch session. Sessions never decide completion, so neither
    /// the aggregate nor the enrollment is touched.
    pub async fn record_watch_session(
        &self,
        learner_id: &str,
        lesson_id: &str,
        req: &WatchSessionRequest,
    ) -> Result<ProgressRecord, ProgressError> {
        let result = async {
            req.validate()?;
            let ctx = self
                .resolve(learner_id, lesson_id, Some(ActivityKind::Video))
                .await?;
            let mutation = self
                .mutate(learner_id, &ctx, |record, _now| {
                    let slice = evaluators::evaluate_watch_session(record.video.as_ref(), req)?;
                    record.video = Some(slice);
                    Ok((None, ()))
                })
                .await?;
            Ok::<_, ProgressError>(mutation.record)
        }
        .await;
        observe("watch_session", learner_id, lesson_id, result)
    }

    pub async fn record_reading_progress(
        &self,
        learner_id: &str,
        lesson_id: &str,
        req: &ReadingProgressRequest,
    ) -> Result<ProgressUpdateResponse, ProgressError> {
        let result = async {
            req.validate()?;
            let ctx = self
                .resolve(learner_id, lesson_id, Some(ActivityKind::Reading))
                .await?;
            let criteria = ctx.lesson.completion_criteria;

            let mutation = self
                .mutate(learner_id, &ctx, |record, now| {
                    let evaluation = evaluators::evaluate_reading(record.reading.as_ref(), req);
                    record.raise_completion_percentage(evaluation.slice.read_percentage);
                    record.reading = Some(evaluation.slice);
                    let decision = decide(criteria, &evaluation.signal);
                    Ok((completion_policy::apply(record, decision, now), ()))
                })
                .await?;

            tracing::info!(
                "Reading progress recorded: learner={}, lesson={}, status={}",
                learner_id,
                lesson_id,
                mutation.record.status.as_str()
            );

            let kind = completion_event(mutation.transition, ProgressEventKind::ProgressUpdated);
            let finish = self.finish(&mutation.record, kind, None).await?;
            Ok::<_, ProgressError>(update_response(mutation, finish))
        }
        .await;
        observe("reading_progress", learner_id, lesson_id, result)
    }

    pub async fn submit_quiz(
        &self,
        learner_id: &str,
        lesson_id: &str,
        req: &SubmitQuizRequest,
    ) -> Result<QuizSubmissionResponse, ProgressError> {
        let result = async {
            req.validate()?;
            let ctx = self
                .resolve(learner_id, lesson_id, Some(ActivityKind::Quiz))
                .await?;
            let criteria = ctx.lesson.completion_criteria;
            let definition = ctx.lesson.quiz.as_ref().ok_or_else(|| {
                ProgressError::InvalidLesson(ctx.lesson.id.clone(), "no quiz defined".to_string())
            })?;
            if definition.max_attempts == 0 {
                return Err(ProgressError::InvalidLesson(
                    ctx.lesson.id.clone(),
                    "quiz allows no attempts".to_string(),
                ));
            }

            let mutation = self
                .mutate(learner_id, &ctx, |record, now| {
                    let evaluation = evaluators::evaluate_quiz(
                        definition,
                        record.quiz.as_ref(),
                        &req.answers,
                        now,
                    )?;
                    record.raise_completion_percentage(f64::from(evaluation.slice.best_score));
                    record.quiz = Some(evaluation.slice.clone());
                    let decision = decide(criteria, &evaluation.signal);
                    Ok((completion_policy::apply(record, decision, now), evaluation))
                })
                .await?;

            let evaluation = &mutation.output;
            QUIZ_SUBMISSIONS_TOTAL
                .with_label_values(&[if evaluation.passed { "true" } else { "false" }])
                .inc();
            tracing::info!(
                "Quiz submitted: learner={}, lesson={}, attempt={}, score={}, passed={}, status={}",
                learner_id,
                lesson_id,
                evaluation.attempt,
                evaluation.score,
                evaluation.passed,
                mutation.record.status.as_str()
            );

            let kind = match mutation.transition {
                Some(ProgressStatus::Failed) => ProgressEventKind::QuizFailed,
                transition => completion_event(transition, ProgressEventKind::QuizSubmitted),
            };
            let finish = self
                .finish(
                    &mutation.record,
                    kind,
                    Some(f64::from(evaluation.score)),
                )
                .await?;

            Ok::<_, ProgressError>(QuizSubmissionResponse {
                score: evaluation.score,
                passed: evaluation.passed,
                correct_answers: evaluation.results.clone(),
                attempt: evaluation.attempt,
                attempts_remaining: evaluation.slice.attempts_remaining(),
                status: mutation.record.status,
                course_progress: finish.course_progress,
            })
        }
        .await;
        observe("quiz_submission", learner_id, lesson_id, result)
    }

    pub async fn submit_assignment(
        &self,
        learner_id: &str,
        lesson_id: &str,
        req: &SubmitAssignmentRequest,
    ) -> Result<ProgressUpdateResponse, ProgressError> {
        let result = async {
            req.validate()?;
            let ctx = self
                .resolve(learner_id, lesson_id, Some(ActivityKind::Assignment))
                .await?;

            let mutation = self
                .mutate(learner_id, &ctx, |record, now| {
                    let slice =
                        evaluators::evaluate_submission(record.assignment.as_ref(), req, now)?;
                    record.assignment = Some(slice);
                    Ok((None, ()))
                })
                .await?;

            tracing::info!(
                "Assignment submitted: learner={}, lesson={}",
                learner_id,
                lesson_id
            );

            let finish = self
                .finish(
                    &mutation.record,
                    ProgressEventKind::AssignmentSubmitted,
                    None,
                )
                .await?;
            Ok::<_, ProgressError>(update_response(mutation, finish))
        }
        .await;
        observe("assignment_submission", learner_id, lesson_id, result)
    }

    /// Grades the learner named in `req`. A first grade follows the regular
    /// policy; an explicit revision may lift a failed record to completed.
    pub async fn grade_assignment(
        &self,
        grader: &Tutor,
        lesson_id: &str,
        req: &GradeAssignmentRequest,
    ) -> Result<ProgressUpdateResponse, ProgressError> {
        let learner_id = req.learner_id.as_str();
        let grader_id = grader.id.as_str();
        let result = async {
            req.validate()?;
            let ctx = self
                .resolve_as_tutor(grader, learner_id, lesson_id, Some(ActivityKind::Assignment))
                .await?;
            let criteria = ctx.lesson.completion_criteria;
            let passing_score = ctx.lesson.assignment_passing_score();

            let mutation = self
                .mutate(learner_id, &ctx, |record, now| {
                    let is_revision = record.assignment.as_ref().is_some_and(|a| a.graded);
                    let evaluation = evaluators::evaluate_grade(
                        record.assignment.as_ref(),
                        req,
                        grader_id,
                        passing_score,
                        now,
                    )?;
                    if let Some(score) = evaluation.slice.score {
                        record.raise_completion_percentage(score);
                    }
                    record.assignment = Some(evaluation.slice);
                    let decision = decide(criteria, &evaluation.signal);
                    let transition = if is_revision {
                        completion_policy::apply_revision(record, decision, now)
                    } else {
                        completion_policy::apply(record, decision, now)
                    };
                    Ok((transition, ()))
                })
                .await?;

            tracing::info!(
                "Assignment graded: grader={}, learner={}, lesson={}, score={}, status={}",
                grader_id,
                learner_id,
                lesson_id,
                req.score,
                mutation.record.status.as_str()
            );

            let kind = completion_event(mutation.transition, ProgressEventKind::AssignmentGraded);
            let finish = self
                .finish(&mutation.record, kind, Some(req.score))
                .await?;
            Ok::<_, ProgressError>(update_response(mutation, finish))
        }
        .await;
        observe("assignment_grading", learner_id, lesson_id, result)
    }

    pub async fn add_note(
        &self,
        learner_id: &str,
        lesson_id: &str,
        req: &AddNoteRequest,
    ) -> Result<Note, ProgressError> {
        let result = async {
            req.validate()?;
            let ctx = self.resolve(learner_id, lesson_id, None).await?;
            let mutation = self
                .mutate(learner_id, &ctx, |record, now| {
                    Ok((None, evaluators::append_note(record, req, now)))
                })
                .await?;
            Ok::<_, ProgressError>(mutation.output)
        }
        .await;
        observe("add_note", learner_id, lesson_id, result)
    }

    pub async fn add_bookmark(
        &self,
        learner_id: &str,
        lesson_id: &str,
        req: &AddBookmarkRequest,
    ) -> Result<Bookmark, ProgressError> {
        let result = async {
            req.validate()?;
            let ctx = self.resolve(learner_id, lesson_id, None).await?;
            let mutation = self
                .mutate(learner_id, &ctx, |record, now| {
                    Ok((None, evaluators::append_bookmark(record, req, now)))
                })
                .await?;
            Ok::<_, ProgressError>(mutation.output)
        }
        .await;
        observe("add_bookmark", learner_id, lesson_id, result)
    }

    pub async fn lesson_progress(
        &self,
        learner_id: &str,
        lesson_id: &str,
    ) -> Result<ProgressRecord, ProgressError> {
        let ctx = self.resolve(learner_id, lesson_id, None).await?;
        self.store
            .find_record(&ctx.key(learner_id))
            .await?
            .ok_or_else(|| ProgressError::RecordNotFound(lesson_id.to_string()))
    }

    pub async fn course_progress(
        &self,
        learner_id: &str,
        course_id: &str,
    ) -> Result<CourseProgressResponse, ProgressError> {
        self.store
            .find_enrollment(learner_id, course_id)
            .await?
            .ok_or_else(|| ProgressError::NotEnrolled {
                course_id: course_id.to_string(),
            })?;

        let snapshot = CourseSnapshot::load(self.store.as_ref(), learner_id, course_id).await?;
        let progress = snapshot.progress();

        Ok(CourseProgressResponse {
            course_id: course_id.to_string(),
            learner_id: learner_id.to_string(),
            required_lessons: progress.required_lessons,
            completed_required_lessons: progress.completed_required_lessons,
            percentage: progress.percentage,
            lessons: snapshot.breakdown(),
        })
    }

    /// Puts a learner's record back to `not-started` so the lesson can be
    /// retried. This is the only way out of `failed`.
    pub async fn reset_lesson_progress(
        &self,
        tutor: &Tutor,
        lesson_id: &str,
        req: &ResetProgressRequest,
    ) -> Result<ProgressUpdateResponse, ProgressError> {
        let learner_id = req.learner_id.as_str();
        let result = async {
            req.validate()?;
            let ctx = self
                .resolve_as_tutor(tutor, learner_id, lesson_id, None)
                .await?;
            if self.store.find_record(&ctx.key(learner_id)).await?.is_none() {
                return Err(ProgressError::RecordNotFound(lesson_id.to_string()));
            }

            let mutation = self
                .mutate(learner_id, &ctx, |record, _now| {
                    let previous = record.status;
                    completion_policy::reset(record);
                    let transition = (previous != ProgressStatus::NotStarted)
                        .then_some(ProgressStatus::NotStarted);
                    Ok((transition, ()))
                })
                .await?;

            tracing::info!(
                "Lesson progress reset: tutor={}, learner={}, lesson={}",
                tutor.id,
                learner_id,
                lesson_id
            );

            let finish = self
                .finish(&mutation.record, ProgressEventKind::ProgressReset, None)
                .await?;
            Ok::<_, ProgressError>(update_response(mutation, finish))
        }
        .await;
        observe("reset", learner_id, lesson_id, result)
    }

    async fn find_lesson(&self, lesson_id: &str) -> Result<Lesson, ProgressError> {
        self.store
            .find_lesson(lesson_id)
            .await?
            .ok_or_else(|| ProgressError::LessonNotFound(lesson_id.to_string()))
    }

    async fn resolve(
        &self,
        learner_id: &str,
        lesson_id: &str,
        activity: Option<ActivityKind>,
    ) -> Result<LessonContext, ProgressError> {
        let lesson = self.find_lesson(lesson_id).await?;
        self.resolve_lesson(learner_id, lesson, activity).await
    }

    /// Like `resolve`, but the caller must own the lesson unless they are an
    /// admin. Checked before the learner's enrollment is looked at.
    async fn resolve_as_tutor(
        &self,
        tutor: &Tutor,
        learner_id: &str,
        lesson_id: &str,
        activity: Option<ActivityKind>,
    ) -> Result<LessonContext, ProgressError> {
        let lesson = self.find_lesson(lesson_id).await?;
        if !tutor.is_admin && !lesson.is_tutored_by(&tutor.id) {
            tracing::warn!(
                "Tutor {} denied on lesson {} owned by {:?}",
                tutor.id,
                lesson.id,
                lesson.tutor_id
            );
            return Err(ProgressError::Forbidden(
                "Only the lesson's tutor may grade or reset its progress".to_string(),
            ));
        }
        self.resolve_lesson(learner_id, lesson, activity).await
    }

    async fn resolve_lesson(
        &self,
        learner_id: &str,
        lesson: Lesson,
        activity: Option<ActivityKind>,
    ) -> Result<LessonContext, ProgressError> {
        let enrollment = self
            .store
            .find_enrollment(learner_id, &lesson.course_id)
            .await?
            .ok_or_else(|| ProgressError::NotEnrolled {
                course_id: lesson.course_id.clone(),
            })?;

        if let Some(activity) = activity {
            if !lesson.content_type.accepts(activity) {
                return Err(ProgressError::wrong_content_type(
                    activity,
                    lesson.content_type,
                ));
            }
        }

        Ok(LessonContext { lesson, enrollment })
    }

    /// Read-modify-write of one record with all-or-nothing semantics.
    ///
    /// `apply` works on a copy; nothing is stored when it fails. A record that
    /// does not exist yet is inserted with the update already applied. Lost
    /// races (stale version, concurrent first insert) re-run `apply` on the
    /// fresh record.
    async fn mutate<T, F>(
        &self,
        learner_id: &str,
        ctx: &LessonContext,
        apply: F,
    ) -> Result<Mutation<T>, ProgressError>
    where
        F: Fn(&mut ProgressRecord, DateTime<Utc>) -> Result<(Option<ProgressStatus>, T), ProgressError>,
    {
        let apply = &apply;
        let key = ctx.key(learner_id);
        let key = &key;

        let mutation = retry_async_when(
            self.retry.clone(),
            |err: &ProgressError| {
                let conflict = err.is_write_conflict();
                if conflict {
                    PROGRESS_WRITE_CONFLICTS_TOTAL.inc();
                    tracing::debug!(
                        "Write conflict on learner={}, lesson={}; retrying",
                        key.learner_id,
                        key.lesson_id
                    );
                }
                conflict
            },
            || async move {
                let now = Utc::now();
                let existing = self.store.find_record(key).await?;
                let fresh = existing.is_none();
                let current = existing.unwrap_or_else(|| {
                    ProgressRecord::new(
                        &key.learner_id,
                        &key.course_id,
                        &key.lesson_id,
                        &ctx.enrollment.id,
                        now,
                    )
                });

                let mut next = current.clone();
                next.last_accessed_at = now;
                let (transition, output) = apply(&mut next, now)?;

                let record = if fresh {
                    let stored = self.store.get_or_create(next.clone()).await?;
                    if stored.id != next.id {
                        return Err(StoreError::Conflict(stored.id).into());
                    }
                    stored
                } else {
                    self.store.save_record(&next, current.version).await?
                };

                Ok(Mutation {
                    record,
                    transition,
                    output,
                })
            },
        )
        .await?;

        if let Some(status) = mutation.transition {
            LESSON_TRANSITIONS_TOTAL
                .with_label_values(&[status.as_str()])
                .inc();
        }
        Ok(mutation)
    }

    /// Aggregates the course, syncs the enrollment and raises the domain event.
    async fn finish(
        &self,
        record: &ProgressRecord,
        kind: ProgressEventKind,
        score: Option<f64>,
    ) -> Result<Finish, ProgressError> {
        let outcome = enrollment_sync::sync(
            self.store.as_ref(),
            &record.learner_id,
            &record.course_id,
            self.retry.clone(),
        )
        .await?;
        let percentage = outcome.progress.percentage;
        let now = Utc::now();

        let mut event = ProgressEvent::new(
            kind,
            record,
            percentage,
            outcome.course_completed,
            now,
        );
        if let Some(score) = score {
            event = event.with_score(score);
        }
        if let Err(e) = self.events.publish(&event).await {
            tracing::warn!(
                "Failed to publish {} event for learner={}, lesson={}: {:#}",
                kind.as_str(),
                record.learner_id,
                record.lesson_id,
                e
            );
        }

        Ok(Finish {
            course_progress: percentage,
        })
    }
}

fn completion_event(
    transition: Option<ProgressStatus>,
    fallback: ProgressEventKind,
) -> ProgressEventKind {
    match transition {
        Some(ProgressStatus::Completed) => ProgressEventKind::LessonCompleted,
        _ => fallback,
    }
}

fn update_response(mutation: Mutation<()>, finish: Finish) -> ProgressUpdateResponse {
    ProgressUpdateResponse {
        record: mutation.record,
        transition: mutation.transition,
        course_progress: finish.course_progress,
    }
}

fn observe<T>(
    action: &'static str,
    learner_id: &str,
    lesson_id: &str,
    result: Result<T, ProgressError>,
) -> Result<T, ProgressError> {
    match &result {
        Ok(_) => {
            PROGRESS_ACTIONS_TOTAL
                .with_label_values(&[action, "ok"])
                .inc();
        }
        Err(err) => {
            PROGRESS_ACTIONS_TOTAL
                .with_label_values(&[action, err.kind()])
                .inc();
            match err {
                ProgressError::Store(store_err) => tracing::error!(
                    "{} failed for learner={}, lesson={}: {}",
                    action,
                    learner_id,
                    lesson_id,
                    store_err
                ),
                other => tracing::warn!(
                    "{} rejected for learner={}, lesson={}: {}",
                    action,
                    learner_id,
                    lesson_id,
                    other
                ),
            }
        }
    }
    result
}
