pub mod articles;
pub mod auth;
pub mod community;
pub mod health;
pub mod media;
pub mod users;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// The full JSON API with its layers applied.
pub fn app(state: AppState) -> Router {
    let max_image_bytes = state.config.images.max_bytes;

    Router::new()
        .merge(health::router())
        .merge(auth::router())
        .merge(articles::router())
        .merge(users::router())
        .merge(community::router())
        .merge(media::router(max_image_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
