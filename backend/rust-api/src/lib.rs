use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{ProgressError, StoreError};
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn_with_state(
                    app_state.clone(),
                    handlers::metrics_auth_middleware,
                )),
        )
        // Protected endpoints (require JWT)
        .nest(
            "/api/v1/progress",
            progress_routes().layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::auth::auth_middleware,
            )),
        )
        .with_state(app_state)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn progress_routes() -> Router<Arc<AppState>> {
    let tutor_routes = Router::new()
        .route(
            "/lessons/{id}/assignment/grade",
            post(handlers::progress::grade_assignment),
        )
        .route(
            "/lessons/{id}/reset",
            post(handlers::progress::reset_lesson_progress),
        )
        .route_layer(middleware::from_fn(
            middlewares::auth::tutor_guard_middleware,
        ));

    Router::new()
        .route("/lessons/{id}", get(handlers::progress::get_lesson_progress))
        .route("/lessons/{id}/start", post(handlers::progress::start_lesson))
        .route(
            "/lessons/{id}/video",
            post(handlers::progress::record_video_progress),
        )
        .route(
            "/lessons/{id}/video/sessions",
            post(handlers::progress::record_watch_session),
        )
        .route(
            "/lessons/{id}/reading",
            post(handlers::progress::record_reading_progress),
        )
        .route("/lessons/{id}/quiz", post(handlers::progress::submit_quiz))
        .route(
            "/lessons/{id}/assignment",
            post(handlers::progress::submit_assignment),
        )
        .route("/lessons/{id}/notes", post(handlers::progress::add_note))
        .route(
            "/lessons/{id}/bookmarks",
            post(handlers::progress::add_bookmark),
        )
        .route(
            "/courses/{course_id}",
            get(handlers::progress::get_course_progress),
        )
        .merge(tutor_routes)
}
