use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::models::{PriceRecord, RawBucket};
use crate::services::indicators::{bucket_starts, with_moving_average};
use crate::store::{HistoricalStore, StoreError};

/// Elasticsearch-backed store talking plain JSON over HTTP.
///
/// Writes use `refresh=wait_for` so a record is searchable by the time the
/// call returns.
pub struct ElasticsearchStore {
    client: reqwest::Client,
    base_url: String,
    index: String,
}

impl ElasticsearchStore {
    pub fn new(base_url: &str, index: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Runs a `_search` on the index. `None` means the index does not exist.
    async fn search(&self, body: &Value) -> Result<Option<SearchResponse>, StoreError> {
        let resp = self
            .client
            .post(self.url(&format!("{}/_search", self.index)))
            .json(body)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 404 {
            let text = resp.text().await.unwrap_or_default();
            if text.contains("index_not_found_exception") {
                debug!("Index {} does not exist yet", self.index);
                return Ok(None);
            }
            return Err(StoreError::Rejected { status: 404, reason: text });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                reason: text,
            });
        }

        resp.json::<SearchResponse>()
            .await
            .map(Some)
            .map_err(|e| StoreError::Malformed(e.to_string()))
    }
}

fn symbol_in_range(symbol: &str, range_start: NaiveDate, range_end: NaiveDate) -> Value {
    json!({
        "bool": {
            "filter": [
                { "term": { "symbol": symbol } },
                {
                    "range": {
                        "date": {
                            "gte": range_start.format("%Y-%m-%d").to_string(),
                            "lte": range_end.format("%Y-%m-%d").to_string(),
                            "format": "yyyy-MM-dd"
                        }
                    }
                }
            ]
        }
    })
}

pub(crate) fn latest_query(symbol: &str, range_start: NaiveDate, range_end: NaiveDate) -> Value {
    json!({
        "size": 1,
        "_source": ["date"],
        "sort": [{ "date": { "order": "desc" } }],
        "query": symbol_in_range(symbol, range_start, range_end)
    })
}

pub(crate) fn histogram_query(
    symbol: &str,
    range_start: NaiveDate,
    range_end: NaiveDate,
    bucket_period_days: u32,
) -> Value {
    let min = range_start.format("%Y-%m-%d").to_string();
    let max = range_end.format("%Y-%m-%d").to_string();

    json!({
        "size": 0,
        "query": symbol_in_range(symbol, range_start, range_end),
        "aggs": {
            "time_agg": {
                "date_histogram": {
                    "field": "date",
                    "fixed_interval": format!("{}d", bucket_period_days),
                    "min_doc_count": 0,
                    "format": "yyyy-MM-dd",
                    "extended_bounds": { "min": min, "max": max },
                    "order": { "_key": "asc" }
                },
                "aggs": {
                    "avg_close": { "avg": { "field": "close" } }
                }
            }
        }
    })
}

fn index_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "symbol": { "type": "keyword" },
                "date": { "type": "date", "format": "strict_date_optional_time||yyyy-MM-dd" },
                "open": { "type": "double" },
                "high": { "type": "double" },
                "low": { "type": "double" },
                "close": { "type": "double" },
                "volume": { "type": "long" }
            }
        }
    })
}

/// Stored dates come as `YYYY-MM-DD`, or `YYYY-MM-DDTHH:MM:SS` for documents
/// written by older indexers.
fn parse_stored_date(raw: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").map(|dt| dt.date()))
        .map_err(|e| StoreError::Malformed(format!("unparseable stored date '{}': {}", raw, e)))
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Hits,
    aggregations: Option<Aggregations>,
}

#[derive(Debug, Deserialize)]
struct Hits {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_source")]
    source: StoredDate,
}

#[derive(Debug, Deserialize)]
struct StoredDate {
    date: String,
}

#[derive(Debug, Deserialize)]
struct Aggregations {
    time_agg: TimeAgg,
}

#[derive(Debug, Deserialize)]
struct TimeAgg {
    buckets: Vec<HistogramBucket>,
}

#[derive(Debug, Deserialize)]
struct HistogramBucket {
    key: i64,
    avg_close: MetricValue,
}

#[derive(Debug, Deserialize)]
struct MetricValue {
    value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    status: u16,
    error: Option<Value>,
}

#[async_trait]
impl HistoricalStore for ElasticsearchStore {
    async fn latest_close_date(
        &self,
        symbol: &str,
        range_start: NaiveDate,
        range_end: NaiveDate,
    ) -> Result<NaiveDate, StoreError> {
        let Some(res) = self.search(&latest_query(symbol, range_start, range_end)).await? else {
            return Ok(range_start);
        };

        match res.hits.hits.first() {
            Some(hit) => parse_stored_date(&hit.source.date),
            None => Ok(range_start),
        }
    }

    async fn upsert(&self, record: &PriceRecord) -> Result<(), StoreError> {
        let resp = self
            .client
            .put(self.url(&format!("{}/_doc/{}", self.index, record.document_id())))
            .query(&[("refresh", "wait_for")])
            .json(record)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                reason: text,
            });
        }
        Ok(())
    }

    async fn upsert_many(&self, records: &[PriceRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut body = String::new();
        for record in records {
            let action = json!({ "index": { "_index": self.index, "_id": record.document_id() } });
            let doc = serde_json::to_string(record).map_err(|e| StoreError::Malformed(e.to_string()))?;
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&doc);
            body.push('\n');
        }

        let resp = self
            .client
            .post(self.url("_bulk"))
            .query(&[("refresh", "wait_for")])
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                reason: text,
            });
        }

        let bulk: BulkResponse = resp
            .json()
            .await
            .map_err(|e| StoreError::Malformed(e.to_string()))?;

        if bulk.errors {
            let failed = bulk
                .items
                .iter()
                .flat_map(|item| item.values())
                .find(|item| item.error.is_some() || item.status >= 300);

            let (status, reason) = match failed {
                Some(item) => (
                    item.status,
                    format!(
                        "document {} failed: {}",
                        item.id.as_deref().unwrap_or("?"),
                        item.error.as_ref().map(Value::to_string).unwrap_or_default()
                    ),
                ),
                None => (500, "bulk request reported errors".to_string()),
            };
            return Err(StoreError::Rejected { status, reason });
        }

        debug!("Indexed {} documents into {}", records.len(), self.index);
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
        let query = histogram_query(symbol, range_start, range_end, bucket_period_days);

        let averages: HashMap<i64, Option<f64>> = match self.search(&query).await? {
            Some(res) => {
                let aggs = res
                    .aggregations
                    .ok_or_else(|| StoreError::Malformed("missing time_agg aggregation".into()))?;
                aggs.time_agg
                    .buckets
                    .into_iter()
                    .map(|b| (b.key, b.avg_close.value))
                    .collect()
            }
            None => HashMap::new(),
        };

        // Lay the engine's keys over the expected bucket grid so the result
        // always covers the whole range, even for an empty or missing index.
        let grid = bucket_starts(range_start, range_end, bucket_period_days);
        let on_grid: HashSet<i64> = grid.iter().copied().collect();
        let unexpected = averages.keys().filter(|key| !on_grid.contains(*key)).count();
        if unexpected > 0 {
            warn!(
                "{} histogram buckets for {} fell outside the expected grid",
                unexpected, symbol
            );
        }

        let buckets = grid
            .into_iter()
            .map(|start| (start, averages.get(&start).copied().flatten()))
            .collect();

        Ok(with_moving_average(buckets, moving_avg_bucket_count))
    }

    async fn ensure_index(&self) -> Result<(), StoreError> {
        let resp = self
            .client
            .put(self.url(&self.index))
            .json(&index_mapping())
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            info!("Created index {}", self.index);
            return Ok(());
        }

        let text = resp.text().await.unwrap_or_default();
        if text.contains("resource_already_exists_exception") {
            debug!("Index {} already exists", self.index);
            return Ok(());
        }

        Err(StoreError::Rejected {
            status: status.as_u16(),
            reason: text,
        })
    }
}
