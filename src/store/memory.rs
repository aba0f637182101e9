use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;

use crate::models::{PriceRecord, RawBucket};
use crate::services::indicators::{bucket_start_ms, bucket_starts, with_moving_average};
use crate::store::{HistoricalStore, StoreError};

/// In-process store keyed by (symbol, date).
///
/// Used with `STORE_BACKEND=memory` for local runs and as the store behind
/// the pipeline tests. Bucketing follows the same epoch alignment as the
/// Elasticsearch histogram.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    records: Arc<RwLock<BTreeMap<(String, NaiveDate), PriceRecord>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = PriceRecord>) -> Self {
        let store = Self::new();
        {
            let mut map = store.records.write();
            for record in records {
                map.insert((record.symbol.clone(), record.date), record);
            }
        }
        store
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn get(&self, symbol: &str, date: NaiveDate) -> Option<PriceRecord> {
        self.records.read().get(&(symbol.to_string(), date)).cloned()
    }

    fn closes_in_range(&self, symbol: &str, range_start: NaiveDate, range_end: NaiveDate) -> Vec<(NaiveDate, f64)> {
        let map = self.records.read();
        map.range((symbol.to_string(), range_start)..=(symbol.to_string(), range_end))
            .map(|((_, date), record)| (*date, record.close))
            .collect()
    }
}

#[async_trait]
impl HistoricalStore for InMemoryStore {
    async fn latest_close_date(
        &self,
        symbol: &str,
        range_start: NaiveDate,
        range_end: NaiveDate,
    ) -> Result<NaiveDate, StoreError> {
        if range_end < range_start {
            return Ok(range_start);
        }

        Ok(self
            .closes_in_range(symbol, range_start, range_end)
            .last()
            .map(|(date, _)| *date)
            .unwrap_or(range_start))
    }

    async fn upsert(&self, record: &PriceRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .insert((record.symbol.clone(), record.date), record.clone());
        Ok(())
    }

    async fn aggregate_buckets(
        &self,
        symbol: &str,
        range_start: NaiveDate,
        range_end: NaiveDate,
        bucket_period_days: u32,
        moving_avg_bucket_count: u32,
    ) -> Result<Vec<RawBucket>, StoreError> {
        if bucket_period_days == 0 {
            return Err(StoreError::Rejected {
                status: 400,
                reason: "bucket period must be positive".to_string(),
            });
        }

        let starts = bucket_starts(range_start, range_end, bucket_period_days);
        let mut sums: BTreeMap<i64, (f64, u32)> = starts.iter().map(|&s| (s, (0.0, 0))).collect();

        if range_start <= range_end {
            for (date, close) in self.closes_in_range(symbol, range_start, range_end) {
                let entry = sums.entry(bucket_start_ms(date, bucket_period_days)).or_insert((0.0, 0));
                entry.0 += close;
                entry.1 += 1;
            }
        }

        let averages = sums
            .into_iter()
            .map(|(start, (sum, count))| {
                let avg = (count > 0).then(|| sum / f64::from(count));
                (start, avg)
            })
            .collect();

        Ok(with_moving_average(averages, moving_avg_bucket_count))
    }
}
