use std::collections::{HashMap, HashSet};

use crate::error::StoreError;
use crate::models::activity::LessonProgressSummary;
use crate::models::lesson::Lesson;
use crate::models::progress::{ProgressRecord, ProgressStatus};

use super::progress_store::ProgressStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CourseProgress {
    pub required_lessons: usize,
    pub completed_required_lessons: usize,
    pub percentage: u8,
}

/// Course-level percentage:
/// `round(100 * completed required lessons / required lessons)`.
///
/// Lessons without a record count as not completed, non-required lessons
/// never enter the denominator, and a course without required lessons
/// aggregates to 0.
pub fn course_progress(lessons: &[Lesson], records: &[ProgressRecord]) -> CourseProgress {
    let required: HashSet<&str> = lessons
        .iter()
        .filter(|lesson| lesson.required_for_completion)
        .map(|lesson| lesson.id.as_str())
        .collect();

    let completed: HashSet<&str> = records
        .iter()
        .filter(|record| record.status == ProgressStatus::Completed)
        .map(|record| record.lesson_id.as_str())
        .filter(|lesson_id| required.contains(lesson_id))
        .collect();

    let percentage = if required.is_empty() {
        0
    } else {
        (100.0 * completed.len() as f64 / required.len() as f64).round() as u8
    };

    CourseProgress {
        required_lessons: required.len(),
        completed_required_lessons: completed.len(),
        percentage,
    }
}

/// Per-lesson status in lesson-number order.
pub fn lesson_breakdown(
    lessons: &[Lesson],
    records: &[ProgressRecord],
) -> Vec<LessonProgressSummary> {
    let by_lesson: HashMap<&str, &ProgressRecord> = records
        .iter()
        .map(|record| (record.lesson_id.as_str(), record))
        .collect();

    let mut ordered: Vec<&Lesson> = lessons.iter().collect();
    ordered.sort_by_key(|lesson| lesson.lesson_number);

    ordered
        .into_iter()
        .map(|lesson| {
            let record = by_lesson.get(lesson.id.as_str());
            LessonProgressSummary {
                lesson_id: lesson.id.clone(),
                lesson_number: lesson.lesson_number,
                title: lesson.title.clone(),
                required: lesson.required_for_completion,
                status: record
                    .map(|r| r.status)
                    .unwrap_or(ProgressStatus::NotStarted),
                completion_percentage: record.map(|r| r.completion_percentage).unwrap_or(0.0),
            }
        })
        .collect()
}

/// Lessons and a learner's records for one course, read once.
#[derive(Debug, Clone)]
pub struct CourseSnapshot {
    pub lessons: Vec<Lesson>,
    pub records: Vec<ProgressRecord>,
}

impl CourseSnapshot {
    pub async fn load(
        store: &dyn ProgressStore,
        learner_id: &str,
        course_id: &str,
    ) -> Result<Self, StoreError> {
        let lessons = store.course_lessons(course_id).await?;
        let records = store.course_records(learner_id, course_id).await?;
        Ok(Self { lessons, records })
    }

    pub fn progress(&self) -> CourseProgress {
        course_progress(&self.lessons, &self.records)
    }

    pub fn breakdown(&self) -> Vec<LessonProgressSummary> {
        lesson_breakdown(&self.lessons, &self.records)
    }
}
