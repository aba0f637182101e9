use axum::Router;
use http::Method;
use tower_http::cors::{Any, CorsLayer};

use crate::routes::{graph, health};
use crate::state::AppState;

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::<AppState>::new()
        .nest("/health", health::router())
        .nest("/api/stocks", graph::router())
        .merge(graph::router())
        .layer(cors)
        .with_state(state)
}
