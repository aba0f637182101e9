use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::errors::AppError;
use crate::services::cancellation::run_cancellable;
use crate::store::HistoricalStore;

/// Latest stored date for `symbol` in `[window_start, window_end]`.
///
/// "Nothing stored" is not an error: the window start is returned so the
/// caller treats the whole window as missing. The result is always inside
/// the window.
pub async fn latest_stored_or_floor(
    store: &dyn HistoricalStore,
    symbol: &str,
    window_start: NaiveDate,
    window_end: NaiveDate,
    cancel: &CancellationToken,
) -> Result<NaiveDate, AppError> {
    let latest = run_cancellable(cancel, store.latest_close_date(symbol, window_start, window_end))
        .await?
        .map_err(|e| {
            error!("Failed to look up latest stored date for {}: {}", symbol, e);
            AppError::Store(e)
        })?;

    let clamped = latest.clamp(window_start, window_end.max(window_start));
    debug!("Latest stored date for {} in [{}, {}]: {}", symbol, window_start, window_end, clamped);
    Ok(clamped)
}
