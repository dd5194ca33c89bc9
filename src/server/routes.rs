use axum::extract::DefaultBodyLimit;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::state::AppState;

const MULTIPART_OVERHEAD: usize = 4 * 1024;

pub fn create_router(state: AppState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/api/describe", post(handlers::describe_image))
        .route("/api/sessions", post(handlers::create_session))
        .route(
            "/api/sessions/:id",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route(
            "/api/sessions/:id/image",
            post(handlers::upload_image)
                .layer(DefaultBodyLimit::max(max_upload_bytes + MULTIPART_OVERHEAD)),
        )
        .route("/api/sessions/:id/fields", patch(handlers::edit_fields))
        .route("/api/sessions/:id/analyze", post(handlers::analyze))
        .route("/api/sessions/:id/location", post(handlers::locate))
        .route("/api/sessions/:id/submit", post(handlers::submit))
        .route("/api/sessions/:id/reset", post(handlers::reset))
        // data URIs inflate uploads by a third
        .layer(DefaultBodyLimit::max(max_upload_bytes + max_upload_bytes / 2))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
