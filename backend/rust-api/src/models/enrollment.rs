use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Enrollment stored in MongoDB "enrollments" collection.
///
/// Owned by the enrollment subsystem; this service only writes `progress`
/// and `last_accessed_at`, guarded by `version`. Documents written before
/// the field existed read as version 0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Enrollment {
    #[serde(rename = "_id")]
    pub id: String,
    pub learner_id: String,
    pub course_id: String,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub enrolled_at: DateTime<Utc>,
    #[serde(default)]
    pub version: i64,
}
