//! Content-type evaluators.
//!
//! Each evaluator maps one activity event onto its slice of the progress
//! record and returns the completion signal for the policy engine. They are
//! pure: no I/O, no status changes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ProgressError;
use crate::models::activity::{
    AddBookmarkRequest, AddNoteRequest, GradeAssignmentRequest, QuestionResult, QuizAnswer,
    ReadingProgressRequest, SubmitAssignmentRequest, VideoProgressRequest, WatchSessionRequest,
};
use crate::models::lesson::QuizDefinition;
use crate::models::progress::{
    AssignmentProgress, AssignmentSubmission, Bookmark, Note, ProgressRecord, QuizAnswerEntry,
    QuizProgress, ReadingProgress, VideoProgress, WatchSession,
};

use super::completion_policy::CompletionSignal;

#[derive(Debug, Clone)]
pub struct Evaluation<S> {
    pub slice: S,
    pub signal: CompletionSignal,
}

#[derive(Debug, Clone)]
pub struct QuizEvaluation {
    pub slice: QuizProgress,
    pub signal: CompletionSignal,
    pub score: u32,
    pub passed: bool,
    pub attempt: u32,
    pub results: Vec<QuestionResult>,
}

fn clamp_percentage(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.max(0.0)
    }
}

/// Percentage and time merge with `max` so resent or reordered events are
/// harmless; the position follows the player, including backward seeks.
pub fn evaluate_video(
    current: Option<&VideoProgress>,
    event: &VideoProgressRequest,
) -> Evaluation<VideoProgress> {
    let mut slice = current.cloned().unwrap_or_default();
    slice.watch_percentage = slice
        .watch_percentage
        .max(clamp_percentage(event.watch_percentage));
    slice.watch_time = slice.watch_time.max(non_negative(event.watch_time));
    slice.last_position = non_negative(event.position);

    let signal = CompletionSignal::Video {
        watch_percentage: slice.watch_percentage,
    };
    Evaluation { slice, signal }
}

/// Appends an immutable watch session. Produces no completion signal.
pub fn evaluate_watch_session(
    current: Option<&VideoProgress>,
    event: &WatchSessionRequest,
) -> Result<VideoProgress, ProgressError> {
    if event.end_time < event.start_time {
        return Err(ProgressError::InvalidInput(
            "end_time must not be before start_time".to_string(),
        ));
    }

    let mut slice = current.cloned().unwrap_or_default();
    slice.sessions.push(WatchSession {
        started_at: event.start_time,
        ended_at: event.end_time,
        duration_seconds: (event.end_time - event.start_time).num_seconds(),
        watch_percentage: clamp_percentage(event.watch_percentage),
    });
    Ok(slice)
}

/// Same merge rule as video.
pub fn evaluate_reading(
    current: Option<&ReadingProgress>,
    event: &ReadingProgressRequest,
) -> Evaluation<ReadingProgress> {
    let mut slice = current.cloned().unwrap_or_default();
    slice.read_percentage = slice
        .read_percentage
        .max(clamp_percentage(event.read_percentage));
    slice.read_time = slice.read_time.max(non_negative(event.read_time));
    slice.last_position = non_negative(event.position);

    let signal = CompletionSignal::Reading {
        read_percentage: slice.read_percentage,
    };
    Evaluation { slice, signal }
}

/// Scores one quiz attempt.
///
/// score = round(100 * earned points / total points). Questions left
/// unanswered earn nothing. Every submission consumes an attempt and its
/// answers are logged under the new attempt number.
pub fn evaluate_quiz(
    definition: &QuizDefinition,
    current: Option<&QuizProgress>,
    answers: &[QuizAnswer],
    now: DateTime<Utc>,
) -> Result<QuizEvaluation, ProgressError> {
    let mut slice = current
        .cloned()
        .unwrap_or_else(|| QuizProgress::new(definition.max_attempts));

    if slice.attempts_exhausted() {
        return Err(ProgressError::AttemptsExhausted {
            attempts: slice.attempts,
            max_attempts: slice.max_attempts,
        });
    }

    let questions: HashMap<&str, _> = definition
        .questions
        .iter()
        .map(|q| (q.id.as_str(), q))
        .collect();

    let mut submitted: HashMap<&str, &str> = HashMap::new();
    for answer in answers {
        if !questions.contains_key(answer.question_id.as_str()) {
            return Err(ProgressError::InvalidInput(format!(
                "Unknown question {}",
                answer.question_id
            )));
        }
        submitted.insert(answer.question_id.as_str(), answer.answer.as_str());
    }

    let results: Vec<QuestionResult> = definition
        .questions
        .iter()
        .map(|question| {
            let correct = submitted
                .get(question.id.as_str())
                .map(|given| given.trim() == question.correct_answer.trim())
                .unwrap_or(false);
            QuestionResult {
                question_id: question.id.clone(),
                correct,
                correct_answer: question.correct_answer.clone(),
                points: question.points,
                points_earned: if correct { question.points } else { 0 },
            }
        })
        .collect();

    let total: u32 = results.iter().map(|r| r.points).sum();
    let earned: u32 = results.iter().map(|r| r.points_earned).sum();
    let score = if total == 0 {
        0
    } else {
        (100.0 * f64::from(earned) / f64::from(total)).round() as u32
    };
    let passed = f64::from(score) >= definition.passing_score;

    slice.attempts += 1;
    let attempt = slice.attempts;
    for answer in answers {
        let result = results
            .iter()
            .find(|r| r.question_id == answer.question_id);
        slice.answers.push(QuizAnswerEntry {
            attempt,
            question_id: answer.question_id.clone(),
            answer: answer.answer.clone(),
            correct: result.map(|r| r.correct).unwrap_or(false),
            points_earned: result.map(|r| r.points_earned).unwrap_or(0),
            answered_at: now,
        });
    }
    slice.last_score = score;
    slice.best_score = slice.best_score.max(score);
    slice.passed = slice.passed || passed;
    slice.last_attempt_at = Some(now);

    let signal = CompletionSignal::Quiz {
        score,
        passed: slice.passed,
        attempts_exhausted: slice.attempts_exhausted(),
    };

    Ok(QuizEvaluation {
        slice,
        signal,
        score,
        passed,
        attempt,
        results,
    })
}

/// Records or replaces a submission. Locked once graded.
pub fn evaluate_submission(
    current: Option<&AssignmentProgress>,
    event: &SubmitAssignmentRequest,
    now: DateTime<Utc>,
) -> Result<AssignmentProgress, ProgressError> {
    if event.is_empty() {
        return Err(ProgressError::InvalidInput(
            "Submission needs files, text or links".to_string(),
        ));
    }

    let mut slice = current.cloned().unwrap_or_default();
    if slice.graded {
        return Err(ProgressError::AlreadyGraded(
            "Assignment has been graded and can no longer be resubmitted".to_string(),
        ));
    }

    slice.submitted = true;
    slice.submitted_at = Some(now);
    slice.submission = Some(AssignmentSubmission {
        files: event.files.clone(),
        text: event.text.clone(),
        links: event.links.clone(),
    });
    Ok(slice)
}

/// Applies a tutor's grade. A second grade is only accepted as an explicit
/// revision naming the grade version it replaces.
pub fn evaluate_grade(
    current: Option<&AssignmentProgress>,
    grade: &GradeAssignmentRequest,
    grader_id: &str,
    passing_score: f64,
    now: DateTime<Utc>,
) -> Result<Evaluation<AssignmentProgress>, ProgressError> {
    let mut slice = match current {
        Some(slice) if slice.submitted => slice.clone(),
        _ => {
            return Err(ProgressError::InvalidInput(
                "Nothing has been submitted for grading".to_string(),
            ))
        }
    };

    if slice.graded {
        if !grade.revise {
            return Err(ProgressError::AlreadyGraded(format!(
                "Assignment already graded (version {}); send revise=true to change the grade",
                slice.grade_version
            )));
        }
        if grade.expected_grade_version != Some(slice.grade_version) {
            return Err(ProgressError::AlreadyGraded(format!(
                "Stale grade revision: current grade version is {}",
                slice.grade_version
            )));
        }
    }

    let score = grade.score.clamp(0.0, 100.0);
    slice.graded = true;
    slice.score = Some(score);
    slice.feedback = grade.feedback.clone();
    slice.graded_at = Some(now);
    slice.graded_by = Some(grader_id.to_string());
    slice.grade_version += 1;

    let signal = CompletionSignal::Assignment {
        graded: true,
        score: Some(score),
        passing_score,
    };
    Ok(Evaluation { slice, signal })
}

pub fn append_note(record: &mut ProgressRecord, event: &AddNoteRequest, now: DateTime<Utc>) -> Note {
    let note = Note {
        id: Uuid::new_v4().to_string(),
        content: event.content.clone(),
        position: non_negative(event.position),
        created_at: now,
    };
    record.notes.push(note.clone());
    note
}

pub fn append_bookmark(
    record: &mut ProgressRecord,
    event: &AddBookmarkRequest,
    now: DateTime<Utc>,
) -> Bookmark {
    let bookmark = Bookmark {
        id: Uuid::new_v4().to_string(),
        label: event.label.clone(),
        position: non_negative(event.position),
        created_at: now,
    };
    record.bookmarks.push(bookmark.clone());
    bookmark
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::lesson::QuizQuestion;

    fn video(p: f64, t: f64, pos: f64) -> VideoProgressRequest {
        VideoProgressRequest {
            watch_percentage: p,
            watch_time: t,
            position: pos,
        }
    }

    fn four_question_quiz() -> QuizDefinition {
        QuizDefinition {
            questions: (1..=4)
                .map(|i| QuizQuestion {
                    id: format!("q{}", i),
                    prompt: String::new(),
                    correct_answer: format!("a{}", i),
                    points: 1,
                })
                .collect(),
            passing_score: 70.0,
            max_attempts: 3,
        }
    }

    fn answers(correct: usize) -> Vec<QuizAnswer> {
        (1..=4)
            .map(|i| QuizAnswer {
                question_id: format!("q{}", i),
                answer: if i <= correct {
                    format!("a{}", i)
                } else {
                    "wrong".to_string()
                },
            })
            .collect()
    }

    #[test]
    fn video_merge_keeps_maximum_regardless_of_order() {
        let events = [video(40.0, 120.0, 50.0), video(95.0, 300.0, 280.0), video(60.0, 200.0, 10.0)];

        let mut slice: Option<VideoProgress> = None;
        for event in events.iter() {
            slice = Some(evaluate_video(slice.as_ref(), event).slice);
        }
        let forward = slice.unwrap();

        let mut slice: Option<VideoProgress> = None;
        for event in events.iter().rev() {
            slice = Some(evaluate_video(slice.as_ref(), event).slice);
        }
        let backward = slice.unwrap();

        assert_eq!(forward.watch_percentage, 95.0);
        assert_eq!(forward.watch_time, 300.0);
        assert_eq!(backward.watch_percentage, 95.0);
        assert_eq!(backward.watch_time, 300.0);
        // position is last-writer, seeking back is allowed
        assert_eq!(forward.last_position, 10.0);
        assert_eq!(backward.last_position, 50.0);
    }

    #[test]
    fn video_signal_reports_merged_percentage() {
        let first = evaluate_video(None, &video(92.0, 10.0, 0.0));
        let second = evaluate_video(Some(&first.slice), &video(30.0, 5.0, 0.0));
        assert_eq!(
            second.signal,
            CompletionSignal::Video {
                watch_percentage: 92.0
            }
        );
    }

    #[test]
    fn watch_session_duration_and_order_check() {
        let start = Utc::now();
        let session = WatchSessionRequest {
            start_time: start,
            end_time: start + chrono::Duration::seconds(95),
            watch_percentage: 40.0,
        };
        let slice = evaluate_watch_session(None, &session).unwrap();
        assert_eq!(slice.sessions.len(), 1);
        assert_eq!(slice.sessions[0].duration_seconds, 95);
        assert_eq!(slice.watch_percentage, 0.0);

        let backwards = WatchSessionRequest {
            start_time: start,
            end_time: start - chrono::Duration::seconds(1),
            watch_percentage: 10.0,
        };
        assert!(evaluate_watch_session(Some(&slice), &backwards).is_err());
    }

    #[test]
    fn reading_merge_is_monotonic() {
        let first = evaluate_reading(
            None,
            &ReadingProgressRequest {
                read_percentage: 70.0,
                read_time: 100.0,
                position: 700.0,
            },
        );
        let second = evaluate_reading(
            Some(&first.slice),
            &ReadingProgressRequest {
                read_percentage: 20.0,
                read_time: 30.0,
                position: 200.0,
            },
        );
        assert_eq!(second.slice.read_percentage, 70.0);
        assert_eq!(second.slice.read_time, 100.0);
        assert_eq!(second.slice.last_position, 200.0);
    }

    #[test]
    fn quiz_three_of_four_scores_75_and_passes() {
        let eval = evaluate_quiz(&four_question_quiz(), None, &answers(3), Utc::now()).unwrap();
        assert_eq!(eval.score, 75);
        assert!(eval.passed);
        assert_eq!(eval.attempt, 1);
        assert_eq!(eval.slice.answers.len(), 4);
        assert!(eval.slice.answers.iter().all(|a| a.attempt == 1));
        assert_eq!(eval.results.iter().filter(|r| r.correct).count(), 3);
    }

    #[test]
    fn quiz_weighted_points_round() {
        let mut def = four_question_quiz();
        def.questions[0].points = 2;
        // 2 + 1 earned of 5 total = 60%
        let eval = evaluate_quiz(&def, None, &answers(2), Utc::now()).unwrap();
        assert_eq!(eval.score, 60);
        assert!(!eval.passed);
    }

    #[test]
    fn quiz_best_score_tracks_max_and_attempts_run_out() {
        let def = four_question_quiz();
        let first = evaluate_quiz(&def, None, &answers(2), Utc::now()).unwrap();
        let second = evaluate_quiz(&def, Some(&first.slice), &answers(1), Utc::now()).unwrap();
        assert_eq!(second.slice.best_score, 50);
        assert_eq!(second.slice.last_score, 25);

        let third = evaluate_quiz(&def, Some(&second.slice), &answers(0), Utc::now()).unwrap();
        assert_eq!(
            third.signal,
            CompletionSignal::Quiz {
                score: 0,
                passed: false,
                attempts_exhausted: true
            }
        );

        let fourth = evaluate_quiz(&def, Some(&third.slice), &answers(4), Utc::now());
        assert!(matches!(
            fourth,
            Err(ProgressError::AttemptsExhausted {
                attempts: 3,
                max_attempts: 3
            })
        ));
    }

    #[test]
    fn quiz_rejects_unknown_question() {
        let bad = vec![QuizAnswer {
            question_id: "nope".to_string(),
            answer: "x".to_string(),
        }];
        let result = evaluate_quiz(&four_question_quiz(), None, &bad, Utc::now());
        assert!(matches!(result, Err(ProgressError::InvalidInput(_))));
    }

    #[test]
    fn submission_is_replaceable_until_graded() {
        let now = Utc::now();
        let first = SubmitAssignmentRequest {
            text: Some("draft".to_string()),
            ..Default::default()
        };
        let second = SubmitAssignmentRequest {
            files: vec!["report.pdf".to_string()],
            ..Default::default()
        };
        let slice = evaluate_submission(None, &first, now).unwrap();
        let slice = evaluate_submission(Some(&slice), &second, now).unwrap();
        assert_eq!(slice.submission.as_ref().unwrap().files, vec!["report.pdf"]);
        assert!(slice.submission.as_ref().unwrap().text.is_none());

        let grade = GradeAssignmentRequest {
            learner_id: "u1".to_string(),
            score: 90.0,
            feedback: None,
            revise: false,
            expected_grade_version: None,
        };
        let graded = evaluate_grade(Some(&slice), &grade, "tutor", 70.0, now).unwrap();
        assert!(matches!(
            evaluate_submission(Some(&graded.slice), &first, now),
            Err(ProgressError::AlreadyGraded(_))
        ));
    }

    #[test]
    fn regrade_requires_explicit_current_version() {
        let now = Utc::now();
        let submitted = evaluate_submission(
            None,
            &SubmitAssignmentRequest {
                text: Some("essay".to_string()),
                ..Default::default()
            },
            now,
        )
        .unwrap();
        let mut grade = GradeAssignmentRequest {
            learner_id: "u1".to_string(),
            score: 65.0,
            feedback: Some("needs work".to_string()),
            revise: false,
            expected_grade_version: None,
        };
        let first = evaluate_grade(Some(&submitted), &grade, "tutor", 70.0, now).unwrap();
        assert_eq!(first.slice.grade_version, 1);
        assert_eq!(first.slice.graded_by.as_deref(), Some("tutor"));

        grade.score = 80.0;
        assert!(matches!(
            evaluate_grade(Some(&first.slice), &grade, "tutor", 70.0, now),
            Err(ProgressError::AlreadyGraded(_))
        ));

        grade.revise = true;
        grade.expected_grade_version = Some(0);
        assert!(matches!(
            evaluate_grade(Some(&first.slice), &grade, "tutor", 70.0, now),
            Err(ProgressError::AlreadyGraded(_))
        ));

        grade.expected_grade_version = Some(1);
        let revised = evaluate_grade(Some(&first.slice), &grade, "tutor", 70.0, now).unwrap();
        assert_eq!(revised.slice.score, Some(80.0));
        assert_eq!(revised.slice.grade_version, 2);
    }

    #[test]
    fn grading_without_submission_is_rejected() {
        let grade = GradeAssignmentRequest {
            learner_id: "u1".to_string(),
            score: 90.0,
            feedback: None,
            revise: false,
            expected_grade_version: None,
        };
        assert!(evaluate_grade(None, &grade, "tutor", 70.0, Utc::now()).is_err());
    }
}
