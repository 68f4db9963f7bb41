pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod media;
pub mod posts;
pub mod routes;
pub mod state;
pub mod votes;

use axum::Router;
use state::AppState;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// The full application router with every route group mounted.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::users::router())
        .merge(routes::articles::router())
        .merge(routes::community::router())
        .merge(routes::photos::router())
        .merge(routes::votes::router())
        .merge(routes::images::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
