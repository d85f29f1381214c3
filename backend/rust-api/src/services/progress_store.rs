use async_trait::async_trait;
use chrono::SecondsFormat;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Document},
    error::{ErrorKind, WriteFailure},
    options::{FindOptions, IndexOptions},
    Collection, Database, IndexModel,
};

use crate::error::StoreError;
use crate::metrics::track_db_operation;
use crate::models::enrollment::Enrollment;
use crate::models::lesson::Lesson;
use crate::models::progress::{ProgressRecord, RecordKey};

const LESSONS: &str = "lessons";
const ENROLLMENTS: &str = "enrollments";
const PROGRESS: &str = "lesson_progress";
const DUPLICATE_KEY: i32 = 11000;

/// Durable storage behind the progress pipeline.
///
/// Records are unique per (learner, course, lesson). Writes go through
/// [`ProgressStore::save_record`], which is a compare-and-swap on
/// `ProgressRecord::version`.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn find_lesson(&self, lesson_id: &str) -> Result<Option<Lesson>, StoreError>;

    /// All lessons of a course ordered by lesson number.
    async fn course_lessons(&self, course_id: &str) -> Result<Vec<Lesson>, StoreError>;

    async fn find_enrollment(
        &self,
        learner_id: &str,
        course_id: &str,
    ) -> Result<Option<Enrollment>, StoreError>;

    async fn find_record(&self, key: &RecordKey) -> Result<Option<ProgressRecord>, StoreError>;

    /// Returns the record for `seed`'s key, inserting `seed` if none exists.
    /// Racing first touches converge on one stored record.
    async fn get_or_create(&self, seed: ProgressRecord) -> Result<ProgressRecord, StoreError>;

    /// Persists `record` if the stored version still equals
    /// `expected_version`; the stored copy gets `expected_version + 1`.
    async fn save_record(
        &self,
        record: &ProgressRecord,
        expected_version: i64,
    ) -> Result<ProgressRecord, StoreError>;

    /// Every record of a learner within one course, in a single read.
    async fn course_records(
        &self,
        learner_id: &str,
        course_id: &str,
    ) -> Result<Vec<ProgressRecord>, StoreError>;

    /// Writes `progress` and `last_accessed_at` of `enrollment` if the
    /// stored version still equals `expected_version`. Returns the stored
    /// copy with the bumped version.
    async fn update_enrollment_progress(
        &self,
        enrollment: &Enrollment,
        expected_version: i64,
    ) -> Result<Enrollment, StoreError>;
}

pub struct MongoProgressStore {
    mongo: Database,
}

impl MongoProgressStore {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn lessons(&self) -> Collection<Lesson> {
        self.mongo.collection(LESSONS)
    }

    fn enrollments(&self) -> Collection<Enrollment> {
        self.mongo.collection(ENROLLMENTS)
    }

    fn progress(&self) -> Collection<ProgressRecord> {
        self.mongo.collection(PROGRESS)
    }

    /// Creates the unique triple index that makes first-touch creation safe.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let unique_triple = IndexModel::builder()
            .keys(doc! { "learner_id": 1, "course_id": 1, "lesson_id": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .name("learner_course_lesson_unique".to_string())
                    .build(),
            )
            .build();
        self.progress().create_index(unique_triple).await?;

        let enrollment_lookup = IndexModel::builder()
            .keys(doc! { "learner_id": 1, "course_id": 1 })
            .build();
        self.enrollments().create_index(enrollment_lookup).await?;

        let course_order = IndexModel::builder()
            .keys(doc! { "course_id": 1, "lesson_number": 1 })
            .build();
        self.lessons().create_index(course_order).await?;

        tracing::info!("Progress store indexes ensured");
        Ok(())
    }

    async fn find_by_key(&self, key: &RecordKey) -> Result<Option<ProgressRecord>, StoreError> {
        let record = self
            .progress()
            .find_one(doc! {
                "learner_id": &key.learner_id,
                "course_id": &key.course_id,
                "lesson_id": &key.lesson_id,
            })
            .await?;
        Ok(record)
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref we)) if we.code == DUPLICATE_KEY
    )
}

/// Enrollments created by the enrollment subsystem may not carry a version
/// yet; those match version 0.
fn enrollment_version_filter(enrollment_id: &str, expected_version: i64) -> Document {
    if expected_version == 0 {
        doc! {
            "_id": enrollment_id,
            "$or": [{ "version": 0_i64 }, { "version": { "$exists": false } }],
        }
    } else {
        doc! { "_id": enrollment_id, "version": expected_version }
    }
}

#[async_trait]
impl ProgressStore for MongoProgressStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.mongo.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    async fn find_lesson(&self, lesson_id: &str) -> Result<Option<Lesson>, StoreError> {
        track_db_operation("find_one", LESSONS, async {
            Ok::<_, StoreError>(self.lessons().find_one(doc! { "_id": lesson_id }).await?)
        })
        .await
    }

    async fn course_lessons(&self, course_id: &str) -> Result<Vec<Lesson>, StoreError> {
        track_db_operation("find", LESSONS, async {
            let options = FindOptions::builder()
                .sort(doc! { "lesson_number": 1 })
                .build();
            let cursor = self
                .lessons()
                .find(doc! { "course_id": course_id })
                .with_options(options)
                .await?;
            Ok::<_, StoreError>(cursor.try_collect::<Vec<_>>().await?)
        })
        .await
    }

    async fn find_enrollment(
        &self,
        learner_id: &str,
        course_id: &str,
    ) -> Result<Option<Enrollment>, StoreError> {
        track_db_operation("find_one", ENROLLMENTS, async {
            Ok::<_, StoreError>(self
                .enrollments()
                .find_one(doc! { "learner_id": learner_id, "course_id": course_id })
                .await?)
        })
        .await
    }

    async fn find_record(&self, key: &RecordKey) -> Result<Option<ProgressRecord>, StoreError> {
        track_db_operation("find_one", PROGRESS, self.find_by_key(key)).await
    }

    async fn get_or_create(&self, seed: ProgressRecord) -> Result<ProgressRecord, StoreError> {
        let key = seed.key();
        if let Some(existing) = self.find_record(&key).await? {
            return Ok(existing);
        }

        let inserted = track_db_operation("insert_one", PROGRESS, async {
            self.progress().insert_one(&seed).await.map(|_| ())
        })
        .await;

        match inserted {
            Ok(()) => {
                tracing::info!(
                    "Progress record created: learner={}, course={}, lesson={}",
                    key.learner_id,
                    key.course_id,
                    key.lesson_id
                );
                Ok(seed)
            }
            // Lost the first-touch race: the unique index kept the winner's record.
            Err(err) if is_duplicate_key(&err) => {
                tracing::debug!(
                    "Concurrent first touch for learner={}, lesson={}; reading winner",
                    key.learner_id,
                    key.lesson_id
                );
                self.find_by_key(&key).await?.ok_or_else(|| {
                    StoreError::Unavailable("Progress record vanished after insert".to_string())
                })
            }
            Err(err) => Err(StoreError::MongoDB(err)),
        }
    }

    async fn save_record(
        &self,
        record: &ProgressRecord,
        expected_version: i64,
    ) -> Result<ProgressRecord, StoreError> {
        let mut next = record.clone();
        next.version = expected_version + 1;

        let result = track_db_operation("replace_one", PROGRESS, async {
            self.progress()
                .replace_one(doc! { "_id": &record.id, "version": expected_version }, &next)
                .await
        })
        .await?;

        if result.matched_count == 0 {
            return Err(StoreError::Conflict(record.id.clone()));
        }
        Ok(next)
    }

    async fn course_records(
        &self,
        learner_id: &str,
        course_id: &str,
    ) -> Result<Vec<ProgressRecord>, StoreError> {
        track_db_operation("find", PROGRESS, async {
            let cursor = self
                .progress()
                .find(doc! { "learner_id": learner_id, "course_id": course_id })
                .await?;
            Ok::<_, StoreError>(cursor.try_collect::<Vec<_>>().await?)
        })
        .await
    }

    async fn update_enrollment_progress(
        &self,
        enrollment: &Enrollment,
        expected_version: i64,
    ) -> Result<Enrollment, StoreError> {
        let mut next = enrollment.clone();
        next.version = expected_version + 1;
        let last_accessed_at = next
            .last_accessed_at
            .map(|at| at.to_rfc3339_opts(SecondsFormat::AutoSi, true));

        let result = track_db_operation("update_one", ENROLLMENTS, async {
            self.enrollments()
                .update_one(
                    enrollment_version_filter(&enrollment.id, expected_version),
                    doc! { "$set": {
                        "progress": i32::from(next.progress),
                        "last_accessed_at": last_accessed_at,
                        "version": next.version,
                    }},
                )
                .await
        })
        .await?;

        if result.matched_count == 0 {
            return Err(StoreError::Conflict(enrollment.id.clone()));
        }
        Ok(next)
    }
}
