use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::AppError;
use crate::models::{GraphParams, HistoryPoint, HistoryQuery};
use crate::services::cancellation::cancel_after;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/:symbol/graph/:days", get(get_graph))
}

/// Bucketed close history with its moving average.
///
/// # Example
/// ```text
/// GET /AAPL/graph/90?step=7&window=30
/// GET /AAPL/graph/30?step=1&window=5&end=2024-03-10
/// ```
pub async fn get_graph(
    Path((symbol, days)): Path<(String, String)>,
    Query(params): Query<GraphParams>,
    State(state): State<AppState>,
) -> Result<Json<Vec<HistoryPoint>>, AppError> {
    let query = HistoryQuery::from_request_now(&symbol, &days, &params).map_err(|e| {
        warn!("Rejected graph request for {}: {}", symbol, e);
        e
    })?;

    info!(
        "GET /{}/graph/{} - step={} window={} end={}",
        query.symbol, query.lookback_days, query.period_days, query.mvavg_window_days, query.end_date
    );

    // Cancelled on deadline, or when this handler is dropped because the
    // client went away.
    let cancel = CancellationToken::new();
    let _drop_guard = cancel.clone().drop_guard();
    let deadline = cancel_after(cancel.clone(), state.config.request_timeout);

    let result = state.history_service().get_history(&query, &cancel).await;
    deadline.abort();

    let points = result.map_err(|e| {
        match &e {
            AppError::Cancelled => warn!("Graph request for {} cancelled", query.symbol),
            _ => error!("Failed to build graph for {}: {}", query.symbol, e),
        }
        e
    })?;

    Ok(Json(points))
}
