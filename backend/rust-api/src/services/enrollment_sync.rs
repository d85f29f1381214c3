use chrono::{DateTime, Utc};

use crate::error::ProgressError;
use crate::metrics::PROGRESS_WRITE_CONFLICTS_TOTAL;
use crate::models::enrollment::Enrollment;
use crate::utils::retry::{retry_async_when, RetryConfig};

use super::aggregator::{CourseProgress, CourseSnapshot};
use super::progress_store::ProgressStore;

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub enrollment: Enrollment,
    pub progress: CourseProgress,
    /// The course went from below 100% to 100% with this write.
    pub course_completed: bool,
}

/// Writes the two enrollment fields owned by the progress engine.
pub fn apply(enrollment: &mut Enrollment, percentage: u8, now: DateTime<Utc>) -> bool {
    let newly_completed = percentage >= 100 && enrollment.progress < 100;
    enrollment.progress = percentage.min(100);
    enrollment.last_accessed_at = Some(now);
    newly_completed
}

/// Re-aggregates the course and writes the result to the enrollment.
///
/// The enrollment is read before the records, and the write only lands if
/// the enrollment version is unchanged. A writer that loses the race
/// re-reads both, so the last write always carries an aggregate that saw
/// every record stored before it.
pub async fn sync(
    store: &dyn ProgressStore,
    learner_id: &str,
    course_id: &str,
    retry: RetryConfig,
) -> Result<SyncOutcome, ProgressError> {
    retry_async_when(
        retry,
        |err: &ProgressError| {
            let conflict = err.is_write_conflict();
            if conflict {
                PROGRESS_WRITE_CONFLICTS_TOTAL.inc();
                tracing::debug!(
                    "Enrollment write conflict for learner={}, course={}; re-aggregating",
                    learner_id,
                    course_id
                );
            }
            conflict
        },
        || sync_once(store, learner_id, course_id),
    )
    .await
}

async fn sync_once(
    store: &dyn ProgressStore,
    learner_id: &str,
    course_id: &str,
) -> Result<SyncOutcome, ProgressError> {
    let current = store
        .find_enrollment(learner_id, course_id)
        .await?
        .ok_or_else(|| ProgressError::NotEnrolled {
            course_id: course_id.to_string(),
        })?;
    let progress = CourseSnapshot::load(store, learner_id, course_id)
        .await?
        .progress();
    let now = Utc::now();

    let mut updated = current.clone();
    let course_completed = apply(&mut updated, progress.percentage, now);
    let enrollment = store
        .update_enrollment_progress(&updated, current.version)
        .await?;

    tracing::info!(
        "Enrollment synced: enrollment={}, progress={} -> {}",
        enrollment.id,
        current.progress,
        enrollment.progress
    );
    if course_completed {
        tracing::info!(
            "Course {} completed by learner {}",
            enrollment.course_id,
            enrollment.learner_id
        );
    }

    Ok(SyncOutcome {
        enrollment,
        progress,
        course_completed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enrollment(progress: u8) -> Enrollment {
        Enrollment {
            id: "e1".to_string(),
            learner_id: "u1".to_string(),
            course_id: "c1".to_string(),
            progress,
            last_accessed_at: None,
            enrolled_at: Utc::now(),
            version: 0,
        }
    }

    #[test]
    fn apply_sets_progress_and_access_time() {
        let mut e = enrollment(25);
        let now = Utc::now();
        assert!(!apply(&mut e, 50, now));
        assert_eq!(e.progress, 50);
        assert_eq!(e.last_accessed_at, Some(now));
    }

    #[test]
    fn completion_is_reported_once() {
        let mut e = enrollment(75);
        assert!(apply(&mut e, 100, Utc::now()));
        assert!(!apply(&mut e, 100, Utc::now()));
    }
}
