use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::AppError;
use crate::models::{date_to_epoch_ms, HistoryPoint, HistoryQuery, RawBucket};
use crate::services::backfill_service::{BackfillOutcome, BackfillService};
use crate::services::cancellation::run_cancellable;
use crate::services::freshness::latest_stored_or_floor;
use crate::store::HistoricalStore;

/// Dates and bucket counts derived from a [`HistoryQuery`].
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPlan {
    pub moving_avg_bucket_count: u32,
    /// First day the caller asked to see.
    pub range_start: NaiveDate,
    /// `range_start` pushed back by the moving-average window (lead-in).
    pub lookback_start: NaiveDate,
    pub end_date: NaiveDate,
}

/// Number of buckets spanning at least `mvavg_window_days`.
pub fn moving_avg_bucket_count(mvavg_window_days: u32, period_days: u32) -> u32 {
    mvavg_window_days.div_ceil(period_days.max(1))
}

impl HistoryPlan {
    pub fn for_query(query: &HistoryQuery) -> Result<Self, AppError> {
        let range_start = query
            .end_date
            .checked_sub_signed(Duration::days(i64::from(query.lookback_days)))
            .ok_or_else(|| AppError::Validation("days reaches before the supported calendar".into()))?;
        let lookback_start = range_start
            .checked_sub_signed(Duration::days(i64::from(query.mvavg_window_days)))
            .ok_or_else(|| AppError::Validation("window reaches before the supported calendar".into()))?;

        Ok(Self {
            moving_avg_bucket_count: moving_avg_bucket_count(query.mvavg_window_days, query.period_days),
            range_start,
            lookback_start,
            end_date: query.end_date,
        })
    }
}

/// Keep buckets strictly after `range_start` midnight UTC that hold data.
pub fn visible_points(symbol: &str, range_start: NaiveDate, buckets: Vec<RawBucket>) -> Vec<HistoryPoint> {
    let range_start_ms = date_to_epoch_ms(range_start);

    buckets
        .into_iter()
        .filter(|b| b.start_ms > range_start_ms)
        .filter_map(|b| {
            b.avg_close.map(|avg_close| HistoryPoint {
                symbol: symbol.to_string(),
                bucket_start_ms: b.start_ms,
                avg_close,
                moving_avg: b.moving_avg,
            })
        })
        .collect()
}

/// Serves bucketed close history, backfilling the missing tail first.
#[derive(Clone)]
pub struct HistoryService {
    store: Arc<dyn HistoricalStore>,
    backfill: BackfillService,
}

impl HistoryService {
    pub fn new(store: Arc<dyn HistoricalStore>, backfill: BackfillService) -> Self {
        Self { store, backfill }
    }

    pub async fn get_history(
        &self,
        query: &HistoryQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<HistoryPoint>, AppError> {
        let plan = HistoryPlan::for_query(query)?;
        let symbol = query.symbol.as_str();

        if query.mvavg_window_days < query.period_days {
            warn!(
                "Moving-average window ({}d) for {} is shorter than the bucket period ({}d)",
                query.mvavg_window_days, symbol, query.period_days
            );
        }

        let latest = latest_stored_or_floor(
            self.store.as_ref(),
            symbol,
            plan.lookback_start,
            plan.end_date,
            cancel,
        )
        .await?;

        if latest < plan.end_date {
            let outcome = self
                .backfill
                .fetch_and_store(symbol, latest, plan.end_date, cancel)
                .await?;
            if let BackfillOutcome::ProviderFailed(reason) = &outcome {
                warn!("Serving possibly stale history for {}: {}", symbol, reason);
            }
        }

        let buckets = run_cancellable(
            cancel,
            self.store.aggregate_buckets(
                symbol,
                plan.lookback_start,
                plan.end_date,
                query.period_days,
                plan.moving_avg_bucket_count,
            ),
        )
        .await?
        .map_err(|e| {
            error!("Failed to aggregate history for {}: {}", symbol, e);
            AppError::Store(e)
        })?;

        let points = visible_points(symbol, plan.range_start, buckets);
        info!(
            "Returning {} history points for {} ({}d buckets, {} bucket moving average)",
            points.len(),
            symbol,
            query.period_days,
            plan.moving_avg_bucket_count
        );
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::indicators::bucket_start_ms;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn query(period: u32, window: u32, end: NaiveDate, days: u32) -> HistoryQuery {
        HistoryQuery {
            symbol: "ACME".into(),
            period_days: period,
            mvavg_window_days: window,
            end_date: end,
            lookback_days: days,
        }
    }

    #[test]
    fn test_moving_avg_bucket_count_rounds_up() {
        assert_eq!(moving_avg_bucket_count(30, 7), 5);
        assert_eq!(moving_avg_bucket_count(28, 7), 4);
        assert_eq!(moving_avg_bucket_count(1, 1), 1);
        assert_eq!(moving_avg_bucket_count(3, 7), 1);
    }

    #[test]
    fn test_plan_dates() {
        let plan = HistoryPlan::for_query(&query(7, 20, date(2024, 3, 10), 30)).unwrap();

        assert_eq!(plan.range_start, date(2024, 2, 9));
        assert_eq!(plan.lookback_start, date(2024, 1, 20));
        assert_eq!(plan.moving_avg_bucket_count, 3);
    }

    #[test]
    fn test_plan_rejects_out_of_calendar_lookback() {
        let result = HistoryPlan::for_query(&query(1, 1, date(2024, 3, 10), u32::MAX));
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_visible_points_filters_lead_in_and_empty_buckets() {
        let range_start = date(2024, 2, 9);
        let at_start = bucket_start_ms(range_start, 1);
        let day = 86_400_000;

        let buckets = vec![
            RawBucket { start_ms: at_start - day, avg_close: Some(1.0), moving_avg: None },
            // exactly at range start: excluded, the filter is strict
            RawBucket { start_ms: at_start, avg_close: Some(2.0), moving_avg: Some(1.0) },
            RawBucket { start_ms: at_start + day, avg_close: None, moving_avg: Some(1.5) },
            RawBucket { start_ms: at_start + 2 * day, avg_close: Some(4.0), moving_avg: None },
        ];

        let points = visible_points("ACME", range_start, buckets);

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].bucket_start_ms, at_start + 2 * day);
        assert_eq!(points[0].avg_close, 4.0);
        assert_eq!(points[0].moving_avg, None);
        assert_eq!(points[0].symbol, "ACME");
    }
}
