use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::enrollment::Enrollment;
use crate::models::lesson::Lesson;
use crate::models::progress::{ProgressRecord, RecordKey};

use super::progress_store::ProgressStore;

#[derive(Default)]
struct MemoryState {
    lessons: HashMap<String, Lesson>,
    enrollments: HashMap<String, Enrollment>,
    records: HashMap<RecordKey, ProgressRecord>,
}

/// `ProgressStore` kept in process memory. Same contract as the MongoDB
/// store, including version checks; used for tests and local runs.
#[derive(Default)]
pub struct InMemoryProgressStore {
    state: Mutex<MemoryState>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_lesson(&self, lesson: Lesson) {
        self.state().lessons.insert(lesson.id.clone(), lesson);
    }

    pub fn insert_enrollment(&self, enrollment: Enrollment) {
        self.state()
            .enrollments
            .insert(enrollment.id.clone(), enrollment);
    }

    pub fn enrollment(&self, enrollment_id: &str) -> Option<Enrollment> {
        self.state().enrollments.get(enrollment_id).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.state().records.len()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find_lesson(&self, lesson_id: &str) -> Result<Option<Lesson>, StoreError> {
        Ok(self.state().lessons.get(lesson_id).cloned())
    }

    async fn course_lessons(&self, course_id: &str) -> Result<Vec<Lesson>, StoreError> {
        let mut lessons: Vec<Lesson> = self
            .state()
            .lessons
            .values()
            .filter(|lesson| lesson.course_id == course_id)
            .cloned()
            .collect();
        lessons.sort_by_key(|lesson| lesson.lesson_number);
        Ok(lessons)
    }

    async fn find_enrollment(
        &self,
        learner_id: &str,
        course_id: &str,
    ) -> Result<Option<Enrollment>, StoreError> {
        Ok(self
            .state()
            .enrollments
            .values()
            .find(|e| e.learner_id == learner_id && e.course_id == course_id)
            .cloned())
    }

    async fn find_record(&self, key: &RecordKey) -> Result<Option<ProgressRecord>, StoreError> {
        Ok(self.state().records.get(key).cloned())
    }

    async fn get_or_create(&self, seed: ProgressRecord) -> Result<ProgressRecord, StoreError> {
        let mut state = self.state();
        let record = state.records.entry(seed.key()).or_insert(seed);
        Ok(record.clone())
    }

    async fn save_record(
        &self,
        record: &ProgressRecord,
        expected_version: i64,
    ) -> Result<ProgressRecord, StoreError> {
        let mut state = self.state();
        let stored = state
            .records
            .get_mut(&record.key())
            .filter(|stored| stored.id == record.id && stored.version == expected_version)
            .ok_or_else(|| StoreError::Conflict(record.id.clone()))?;

        let mut next = record.clone();
        next.version = expected_version + 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn course_records(
        &self,
        learner_id: &str,
        course_id: &str,
    ) -> Result<Vec<ProgressRecord>, StoreError> {
        Ok(self
            .state()
            .records
            .values()
            .filter(|r| r.learner_id == learner_id && r.course_id == course_id)
            .cloned()
            .collect())
    }

    async fn update_enrollment_progress(
        &self,
        enrollment: &Enrollment,
        expected_version: i64,
    ) -> Result<Enrollment, StoreError> {
        let mut state = self.state();
        let stored = state
            .enrollments
            .get_mut(&enrollment.id)
            .ok_or_else(|| {
                StoreError::Unavailable(format!("Enrollment {} not found", enrollment.id))
            })?;
        if stored.version != expected_version {
            return Err(StoreError::Conflict(enrollment.id.clone()));
        }

        stored.progress = enrollment.progress;
        stored.last_accessed_at = enrollment.last_accessed_at;
        stored.version = expected_version + 1;
        Ok(stored.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn get_or_create_keeps_first_record() {
        let store = InMemoryProgressStore::new();
        let now = Utc::now();
        let first = store
            .get_or_create(ProgressRecord::new("u1", "c1", "l1", "e1", now))
            .await
            .unwrap();
        let second = store
            .get_or_create(ProgressRecord::new("u1", "c1", "l1", "e1", now))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let store = InMemoryProgressStore::new();
        let record = store
            .get_or_create(ProgressRecord::new("u1", "c1", "l1", "e1", Utc::now()))
            .await
            .unwrap();

        let saved = store.save_record(&record, 0).await.unwrap();
        assert_eq!(saved.version, 1);

        let stale = store.save_record(&record, 0).await;
        assert!(matches!(stale, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn stale_enrollment_write_is_a_conflict() {
        let store = InMemoryProgressStore::new();
        let enrollment = Enrollment {
            id: "e1".to_string(),
            learner_id: "u1".to_string(),
            course_id: "c1".to_string(),
            progress: 0,
            last_accessed_at: None,
            enrolled_at: Utc::now(),
            version: 0,
        };
        store.insert_enrollment(enrollment.clone());

        let mut half = enrollment.clone();
        half.progress = 50;
        let saved = store.update_enrollment_progress(&half, 0).await.unwrap();
        assert_eq!(saved.version, 1);

        let mut stale = enrollment.clone();
        stale.progress = 25;
        let result = store.update_enrollment_progress(&stale, 0).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(store.enrollment("e1").unwrap().progress, 50);
    }
}
