use std::sync::Arc;

use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::AppError;
use crate::external::price_provider::{ExternalPricePoint, PriceProvider, PriceProviderError};
use crate::models::PriceRecord;
use crate::services::cancellation::run_cancellable;
use crate::services::failure_cache::{FailureCache, FailureType};
use crate::store::HistoricalStore;

/// What a backfill attempt did.
#[derive(Debug, Clone, PartialEq)]
pub enum BackfillOutcome {
    /// Nothing missing, the provider was not called.
    UpToDate,
    /// The provider recently reported the symbol unknown or throttled us.
    Suppressed,
    /// The provider failed; existing store contents are used as-is.
    ProviderFailed(String),
    /// Number of records written.
    Stored(usize),
}

/// Pulls missing daily records from the market-data provider into the store.
#[derive(Clone)]
pub struct BackfillService {
    store: Arc<dyn HistoricalStore>,
    provider: Arc<dyn PriceProvider>,
    failure_cache: FailureCache,
}

impl BackfillService {
    pub fn new(
        store: Arc<dyn HistoricalStore>,
        provider: Arc<dyn PriceProvider>,
        failure_cache: FailureCache,
    ) -> Self {
        Self { store, provider, failure_cache }
    }

    /// Fetch `[date_begin, date_end]` for `symbol` and upsert every bar.
    ///
    /// Provider failures never surface as errors: they are logged and turned
    /// into [`BackfillOutcome::ProviderFailed`]. Store failures and
    /// cancellation do propagate.
    pub async fn fetch_and_store(
        &self,
        symbol: &str,
        date_begin: NaiveDate,
        date_end: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<BackfillOutcome, AppError> {
        if date_begin >= date_end {
            return Ok(BackfillOutcome::UpToDate);
        }

        if let Some(failure) = self.failure_cache.is_failed(symbol) {
            info!(
                "⚠️ Skipping backfill for {} - last attempt failed ({:?}) at {}",
                symbol, failure.error_type, failure.failed_at
            );
            return Ok(BackfillOutcome::Suppressed);
        }

        info!(
            "Backfilling {} from {} to {} via {}",
            symbol,
            date_begin,
            date_end,
            self.provider.name()
        );

        let fetched = run_cancellable(
            cancel,
            self.provider.fetch_daily_range(symbol, date_begin, date_end),
        )
        .await?;

        let bars = match fetched {
            Ok(bars) => bars,
            Err(e) => return Ok(self.provider_failed(symbol, e)),
        };

        let records = to_records(symbol, date_begin, date_end, bars);
        if records.is_empty() {
            info!("Provider returned no trading days for {} in [{}, {}]", symbol, date_begin, date_end);
            self.failure_cache.clear(symbol);
            return Ok(BackfillOutcome::Stored(0));
        }

        run_cancellable(cancel, self.store.upsert_many(&records))
            .await?
            .map_err(|e| {
                error!("Failed to store backfilled prices for {}: {}", symbol, e);
                AppError::Store(e)
            })?;

        self.failure_cache.clear(symbol);
        info!("✓ Stored {} daily prices for {}", records.len(), symbol);
        Ok(BackfillOutcome::Stored(records.len()))
    }

    fn provider_failed(&self, symbol: &str, err: PriceProviderError) -> BackfillOutcome {
        warn!(
            "Unable to retrieve prices for {} from {}: {}. Serving stored data only",
            symbol,
            self.provider.name(),
            err
        );
        if let Some(kind) = FailureType::for_error(&err) {
            self.failure_cache.record_failure(symbol, kind);
        }
        BackfillOutcome::ProviderFailed(err.to_string())
    }
}

/// Bars outside the requested range or with non-positive prices are dropped.
fn to_records(
    symbol: &str,
    date_begin: NaiveDate,
    date_end: NaiveDate,
    bars: Vec<ExternalPricePoint>,
) -> Vec<PriceRecord> {
    bars.into_iter()
        .filter(|bar| bar.date >= date_begin && bar.date <= date_end)
        .filter(|bar| {
            let valid = [bar.open, bar.high, bar.low, bar.close]
                .iter()
                .all(|p| p.is_finite() && *p > 0.0);
            if !valid {
                warn!("Dropping invalid bar for {} on {}", symbol, bar.date);
            }
            valid
        })
        .map(|bar| PriceRecord {
            symbol: symbol.to_string(),
            date: bar.date,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn bar(day: NaiveDate, close: f64) -> ExternalPricePoint {
        ExternalPricePoint {
            date: day,
            open: close,
            high: close,
            low: close,
            close,
            volume: 10,
        }
    }

    enum Reply {
        Bars(Vec<ExternalPricePoint>),
        Malformed,
        UnknownSymbol,
    }

    /// Serves a fixed reply and records requested ranges.
    struct FakeProvider {
        reply: Reply,
        calls: Mutex<Vec<(NaiveDate, NaiveDate)>>,
    }

    impl FakeProvider {
        fn replying(reply: Reply) -> Arc<Self> {
            Arc::new(Self { reply, calls: Mutex::new(Vec::new()) })
        }

        fn serving(bars: Vec<ExternalPricePoint>) -> Arc<Self> {
            Self::replying(Reply::Bars(bars))
        }
    }

    #[async_trait]
    impl PriceProvider for FakeProvider {
        async fn fetch_daily_range(
            &self,
            _ticker: &str,
            begin: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<ExternalPricePoint>, PriceProviderError> {
            self.calls.lock().push((begin, end));
            match &self.reply {
                Reply::Bars(bars) => Ok(bars.clone()),
                Reply::Malformed => Err(PriceProviderError::Parse("unexpected token".into())),
                Reply::UnknownSymbol => Err(PriceProviderError::NotFound),
            }
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    #[tokio::test]
    async fn test_noop_when_range_is_empty() {
        let store = Arc::new(InMemoryStore::new());
        let provider = FakeProvider::serving(vec![]);
        let service = BackfillService::new(store, provider.clone(), FailureCache::new());

        let outcome = service
            .fetch_and_store("ACME", date(2024, 1, 10), date(2024, 1, 10), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, BackfillOutcome::UpToDate);
        assert!(provider.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stores_only_bars_inside_range() {
        let store = Arc::new(InMemoryStore::new());
        let provider = FakeProvider::serving(vec![
            bar(date(2023, 12, 31), 9.0),
            bar(date(2024, 1, 2), 10.0),
            bar(date(2024, 1, 3), 11.0),
            bar(date(2024, 1, 11), 12.0),
        ]);
        let service = BackfillService::new(store.clone(), provider.clone(), FailureCache::new());

        let outcome = service
            .fetch_and_store("ACME", date(2024, 1, 1), date(2024, 1, 10), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, BackfillOutcome::Stored(2));
        assert_eq!(store.len(), 2);
        assert_eq!(*provider.calls.lock(), vec![(date(2024, 1, 1), date(2024, 1, 10))]);
    }

    #[tokio::test]
    async fn test_malformed_response_is_swallowed_and_retried_next_call() {
        let store = Arc::new(InMemoryStore::new());
        let provider = FakeProvider::replying(Reply::Malformed);
        let cache = FailureCache::new();
        let service = BackfillService::new(store.clone(), provider.clone(), cache.clone());

        let outcome = service
            .fetch_and_store("ACME", date(2024, 1, 1), date(2024, 1, 10), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, BackfillOutcome::ProviderFailed(_)));
        assert!(store.is_empty());
        assert!(cache.is_failed("ACME").is_none());

        let again = service
            .fetch_and_store("ACME", date(2024, 1, 1), date(2024, 1, 10), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(again, BackfillOutcome::ProviderFailed(_)));
        assert_eq!(provider.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_symbol_suppresses_later_backfills() {
        let store = Arc::new(InMemoryStore::new());
        let provider = FakeProvider::replying(Reply::UnknownSymbol);
        let cache = FailureCache::new();
        let service = BackfillService::new(store, provider.clone(), cache.clone());

        let outcome = service
            .fetch_and_store("NOPE", date(2024, 1, 1), date(2024, 1, 10), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, BackfillOutcome::ProviderFailed(_)));
        assert_eq!(cache.is_failed("NOPE").unwrap().error_type, FailureType::NotFound);

        let again = service
            .fetch_and_store("NOPE", date(2024, 1, 1), date(2024, 1, 10), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(again, BackfillOutcome::Suppressed);
        assert_eq!(provider.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_propagates() {
        let store = Arc::new(InMemoryStore::new());
        let provider = FakeProvider::serving(vec![bar(date(2024, 1, 2), 10.0)]);
        let service = BackfillService::new(store.clone(), provider, FailureCache::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = service
            .fetch_and_store("ACME", date(2024, 1, 1), date(2024, 1, 10), &cancel)
            .await;

        assert!(matches!(result, Err(AppError::Cancelled)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_invalid_bars_are_dropped() {
        let mut broken = bar(date(2024, 1, 3), 10.0);
        broken.low = 0.0;

        let records = to_records(
            "ACME",
            date(2024, 1, 1),
            date(2024, 1, 10),
            vec![bar(date(2024, 1, 2), 10.0), broken],
        );

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].symbol, "ACME");
    }
}
