//! Completion policy engine.
//!
//! The only place where `ProgressRecord::status` changes. Evaluators hand in a
//! [`CompletionSignal`]; [`decide`] maps it through the lesson's completion
//! criteria and [`apply`] performs the (monotone) transition.

use chrono::{DateTime, Utc};

use crate::models::lesson::CompletionCriteria;
use crate::models::progress::{ProgressRecord, ProgressStatus};

pub const WATCH_THRESHOLD_PERCENT: f64 = 90.0;
pub const WATCH_COMPLETE_PERCENT: f64 = 100.0;
pub const READ_COMPLETE_PERCENT: f64 = 100.0;

/// Raw completion signal produced by one evaluator run.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionSignal {
    Video {
        watch_percentage: f64,
    },
    Reading {
        read_percentage: f64,
    },
    Quiz {
        score: u32,
        passed: bool,
        attempts_exhausted: bool,
    },
    Assignment {
        graded: bool,
        score: Option<f64>,
        passing_score: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Completed,
    Failed,
    Pending,
}

/// Pure decision table keyed by the lesson's declared criteria. A signal from
/// an evaluator the criteria does not consult never decides anything.
pub fn decide(criteria: CompletionCriteria, signal: &CompletionSignal) -> Decision {
    match (criteria, signal) {
        (CompletionCriteria::Watch90Percent, CompletionSignal::Video { watch_percentage })
            if *watch_percentage >= WATCH_THRESHOLD_PERCENT =>
        {
            Decision::Completed
        }
        (CompletionCriteria::WatchComplete, CompletionSignal::Video { watch_percentage })
            if *watch_percentage >= WATCH_COMPLETE_PERCENT =>
        {
            Decision::Completed
        }
        (CompletionCriteria::ReadComplete, CompletionSignal::Reading { read_percentage })
            if *read_percentage >= READ_COMPLETE_PERCENT =>
        {
            Decision::Completed
        }
        (CompletionCriteria::PassQuiz, CompletionSignal::Quiz { passed: true, .. }) => {
            Decision::Completed
        }
        (
            CompletionCriteria::PassQuiz,
            CompletionSignal::Quiz {
                passed: false,
                attempts_exhausted: true,
                ..
            },
        ) => Decision::Failed,
        (
            CompletionCriteria::SubmitAssignment,
            CompletionSignal::Assignment {
                graded: true,
                score: Some(score),
                passing_score,
            },
        ) => {
            if *score >= *passing_score {
                Decision::Completed
            } else {
                Decision::Failed
            }
        }
        _ => Decision::Pending,
    }
}

/// Applies a decision. Terminal records are never touched, so re-evaluating a
/// completed record is a no-op. Returns the new status on a transition.
pub fn apply(
    record: &mut ProgressRecord,
    decision: Decision,
    now: DateTime<Utc>,
) -> Option<ProgressStatus> {
    if record.status.is_terminal() {
        return None;
    }

    match decision {
        Decision::Completed => Some(complete(record, now)),
        Decision::Failed => {
            record.status = ProgressStatus::Failed;
            Some(ProgressStatus::Failed)
        }
        Decision::Pending => None,
    }
}

/// Applies a decision that comes from an explicitly revised assignment grade.
/// A revision may lift a failed record to completed; completed never regresses.
pub fn apply_revision(
    record: &mut ProgressRecord,
    decision: Decision,
    now: DateTime<Utc>,
) -> Option<ProgressStatus> {
    match (record.status, decision) {
        (ProgressStatus::Completed, _) => None,
        (ProgressStatus::Failed, Decision::Completed) => Some(complete(record, now)),
        (ProgressStatus::Failed, _) => None,
        _ => apply(record, decision, now),
    }
}

/// Explicit "start lesson" action: the only way into `in-progress`.
pub fn start(record: &mut ProgressRecord, now: DateTime<Utc>) -> Option<ProgressStatus> {
    if record.status != ProgressStatus::NotStarted {
        return None;
    }
    record.status = ProgressStatus::InProgress;
    record.started_at.get_or_insert(now);
    Some(ProgressStatus::InProgress)
}

/// External reset so a learner can retry a lesson. Notes and bookmarks stay.
pub fn reset(record: &mut ProgressRecord) {
    record.status = ProgressStatus::NotStarted;
    record.video = None;
    record.quiz = None;
    record.assignment = None;
    record.reading = None;
    record.completion_percentage = 0.0;
    record.started_at = None;
    record.completed_at = None;
}

fn complete(record: &mut ProgressRecord, now: DateTime<Utc>) -> ProgressStatus {
    record.status = ProgressStatus::Completed;
    record.completed_at = Some(now);
    record.completion_percentage = 100.0;
    ProgressStatus::Completed
}
