mod page;
mod report;
mod sessions;

#[cfg(test)]
mod tests;

use crate::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub fn get_routes(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(page::index))
        .route("/api/follow-ups", get(sessions::follow_ups))
        .route("/api/sessions", post(sessions::create))
        .route("/api/sessions/:id", delete(sessions::remove))
        .route(
            "/api/sessions/:id/image",
            post(sessions::upload_image).get(sessions::preview_image),
        )
        .route("/api/sessions/:id/question", post(sessions::ask))
        .route("/api/sessions/:id/report", get(report::download))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer({
            let cors = CorsLayer::new()
                .allow_methods(Any)
                .allow_headers(Any)
                .allow_origin(Any);
            cors
        })
        .with_state(state)
}
