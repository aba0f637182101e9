pub mod elasticsearch;
pub mod memory;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::models::{PriceRecord, RawBucket};

pub use elasticsearch::ElasticsearchStore;
pub use memory::InMemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store rejected request ({status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error("malformed store response: {0}")]
    Malformed(String),
}

/// Persistent home of daily price records.
///
/// Implementations never retry; errors are surfaced to the caller as-is.
#[async_trait]
pub trait HistoricalStore: Send + Sync {
    /// Date of the most recent record for `symbol` with a date in
    /// `[range_start, range_end]`, or `range_start` when there is none.
    async fn latest_close_date(
        &self,
        symbol: &str,
        range_start: NaiveDate,
        range_end: NaiveDate,
    ) -> Result<NaiveDate, StoreError>;

    /// Write or overwrite the record keyed by symbol + date.
    async fn upsert(&self, record: &PriceRecord) -> Result<(), StoreError>;

    async fn upsert_many(&self, records: &[PriceRecord]) -> Result<(), StoreError> {
        for record in records {
            self.upsert(record).await?;
        }
        Ok(())
    }

    /// Contiguous `bucket_period_days` wide buckets covering
    /// `[range_start, range_end]`, ascending, each carrying the average close
    /// and the trailing linear moving average over `moving_avg_bucket_count`
    /// buckets.
    async fn aggregate_buckets(
        &self,
        symbol: &str,
        range_start: NaiveDate,
        range_end: NaiveDate,
        bucket_period_days: u32,
        moving_avg_bucket_count: u32,
    ) -> Result<Vec<RawBucket>, StoreError>;

    /// Prepare the backing storage. No-op by default.
    async fn ensure_index(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
