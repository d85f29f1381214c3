#![allow(dead_code)]

use axum::Router;
use chrono::Utc;
use lesson_progress_api::{
    config::Config,
    create_router,
    middlewares::auth::{JwtClaims, JwtService},
    models::{
        enrollment::Enrollment,
        lesson::{
            AssignmentDefinition, CompletionCriteria, ContentType, Lesson, QuizDefinition,
            QuizQuestion,
        },
    },
    services::{
        event_publisher::RecordingEventPublisher, memory_store::InMemoryProgressStore,
        progress_service::ProgressService, AppState,
    },
};
use std::sync::Arc;

pub const COURSE: &str = "course-1";
pub const OTHER_COURSE: &str = "course-2";
pub const LEARNER: &str = "learner-1";
pub const ENROLLMENT: &str = "enrollment-1";
pub const TUTOR: &str = "tutor-1";
pub const OTHER_TUTOR: &str = "tutor-2";

pub const VIDEO_LESSON: &str = "lesson-video";
pub const READING_LESSON: &str = "lesson-reading";
pub const QUIZ_LESSON: &str = "lesson-quiz";
pub const ASSIGNMENT_LESSON: &str = "lesson-assignment";
pub const BONUS_LESSON: &str = "lesson-bonus";
pub const FOREIGN_LESSON: &str = "lesson-foreign";

const TEST_JWT_SECRET: &str = "test-secret";

/// In-memory backends plus a service wired to them.
pub struct TestContext {
    pub store: Arc<InMemoryProgressStore>,
    pub events: Arc<RecordingEventPublisher>,
    pub service: ProgressService,
}

pub fn test_config() -> Config {
    Config {
        mongo_uri: "mongodb://localhost:27017".to_string(),
        redis_uri: "redis://127.0.0.1:6379/0".to_string(),
        mongo_database: "courseflow_test".to_string(),
        jwt_secret: TEST_JWT_SECRET.to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        events_channel: "progress_events_test".to_string(),
        metrics_auth: Some("ops:secret".to_string()),
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn lesson(id: &str, number: u32, content_type: ContentType, criteria: CompletionCriteria) -> Lesson {
    Lesson {
        id: id.to_string(),
        course_id: COURSE.to_string(),
        lesson_number: number,
        title: format!("Lesson {}", number),
        content_type,
        completion_criteria: criteria,
        required_for_completion: true,
        tutor_id: Some(TUTOR.to_string()),
        quiz: None,
        assignment: None,
        media: None,
    }
}

fn question(id: &str, answer: &str) -> QuizQuestion {
    QuizQuestion {
        id: id.to_string(),
        prompt: format!("Question {}", id),
        correct_answer: answer.to_string(),
        points: 1,
    }
}

/// Course with four required lessons (video, reading, quiz, assignment) and
/// one optional document, plus a lesson from a course the learner never
/// enrolled in.
pub fn seed_course(store: &InMemoryProgressStore) {
    store.insert_lesson(lesson(
        VIDEO_LESSON,
        1,
        ContentType::Video,
        CompletionCriteria::Watch90Percent,
    ));
    store.insert_lesson(lesson(
        READING_LESSON,
        2,
        ContentType::Reading,
        CompletionCriteria::ReadComplete,
    ));

    let mut quiz = lesson(QUIZ_LESSON, 3, ContentType::Quiz, CompletionCriteria::PassQuiz);
    quiz.quiz = Some(QuizDefinition {
        questions: vec![
            question("q1", "4"),
            question("q2", "Paris"),
            question("q3", "blue"),
            question("q4", "42"),
        ],
        passing_score: 70.0,
        max_attempts: 3,
    });
    store.insert_lesson(quiz);

    let mut assignment = lesson(
        ASSIGNMENT_LESSON,
        4,
        ContentType::Assignment,
        CompletionCriteria::SubmitAssignment,
    );
    assignment.assignment = Some(AssignmentDefinition {
        due_date: None,
        passing_score: 70.0,
    });
    store.insert_lesson(assignment);

    let mut bonus = lesson(
        BONUS_LESSON,
        5,
        ContentType::Document,
        CompletionCriteria::ReadComplete,
    );
    bonus.required_for_completion = false;
    store.insert_lesson(bonus);

    let mut foreign = lesson(
        FOREIGN_LESSON,
        1,
        ContentType::Video,
        CompletionCriteria::Watch90Percent,
    );
    foreign.course_id = OTHER_COURSE.to_string();
    foreign.tutor_id = Some(OTHER_TUTOR.to_string());
    store.insert_lesson(foreign);

    store.insert_enrollment(Enrollment {
        id: ENROLLMENT.to_string(),
        learner_id: LEARNER.to_string(),
        course_id: COURSE.to_string(),
        progress: 0,
        last_accessed_at: None,
        enrolled_at: Utc::now(),
        version: 0,
    });
}

pub fn create_test_context() -> TestContext {
    init_tracing();

    let store = Arc::new(InMemoryProgressStore::new());
    seed_course(&store);
    let events = Arc::new(RecordingEventPublisher::new());
    let service = ProgressService::new(store.clone(), events.clone());

    TestContext {
        store,
        events,
        service,
    }
}

/// Router over seeded in-memory backends, same routes and middleware as the
/// server binary.
pub fn create_test_app() -> (Router, TestContext) {
    let context = create_test_context();
    let state = AppState::with_backends(
        test_config(),
        context.store.clone(),
        context.events.clone(),
    );
    (create_router(Arc::new(state)), context)
}

pub fn token_for(user_id: &str, role: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = JwtClaims {
        sub: user_id.to_string(),
        role: role.to_string(),
        exp: (now + 3600) as usize,
        iat: now as usize,
    };
    JwtService::new(TEST_JWT_SECRET)
        .generate_token(&claims)
        .expect("Failed to sign test token")
}
