pub mod health;
pub mod templates;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::{middleware, AppState};

pub fn app(state: AppState) -> Router {
    let staff_api = Router::new()
        .route(
            "/api/templates/:id/questions",
            get(templates::get_questions).put(templates::reconcile_questions),
        )
        .route(
            "/api/templates/:id/status",
            post(templates::update_status),
        )
        .layer(axum::middleware::from_fn(middleware::auth::require_staff));

    Router::new()
        .route("/health", get(health::health))
        .merge(staff_api)
        .with_state(state)
        .layer(middleware::cors::permissive_cors())
        .layer(TraceLayer::new_for_http())
}
