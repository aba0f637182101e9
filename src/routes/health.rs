use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use tracing::info;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    store_index: String,
    price_provider: &'static str,
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    info!("GET /health - Health check");
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK",
            store_index: state.config.elasticsearch_index.clone(),
            price_provider: state.price_provider.name(),
        }),
    )
}
