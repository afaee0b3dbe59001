//! HTTP route definitions.

mod health;
mod sync;

use crate::AppState;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the application with its middleware.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(health::routes())
        .merge(sync::routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
