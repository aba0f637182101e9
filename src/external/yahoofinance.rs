use crate::external::price_provider::{ExternalPricePoint, PriceProvider, PriceProviderError};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde::Deserialize;
use std::time::Duration as StdDuration;

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";

/// Yahoo Finance chart API. No API key required.
pub struct YahooFinanceProvider {
    client: reqwest::Client,
    base_url: String,
}

impl YahooFinanceProvider {
    pub fn new(timeout: StdDuration) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: StdDuration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("Mozilla/5.0 (compatible; stockgraph/0.1)")
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Debug, Deserialize)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
    error: Option<YahooError>,
}

#[derive(Debug, Deserialize)]
struct YahooError {
    description: String,
}

#[derive(Debug, Deserialize)]
struct YahooResult {
    // Absent when the range holds no trading days.
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: YahooIndicators,
}

#[derive(Debug, Deserialize)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
}

#[derive(Debug, Deserialize)]
struct YahooQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

fn epoch_seconds(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

#[async_trait]
impl PriceProvider for YahooFinanceProvider {
    async fn fetch_daily_range(
        &self,
        ticker: &str,
        begin: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ExternalPricePoint>, PriceProviderError> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, ticker);

        // period2 is exclusive, so ask up to the midnight after `end`
        let period1 = epoch_seconds(begin).to_string();
        let period2 = epoch_seconds(end + Duration::days(1)).to_string();

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("interval", "1d"),
                ("period1", period1.as_str()),
                ("period2", period2.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PriceProviderError::Network(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(PriceProviderError::NotFound);
        }
        if status.as_u16() == 429 {
            return Err(PriceProviderError::RateLimited);
        }
        if !status.is_success() {
            return Err(PriceProviderError::BadResponse(format!("HTTP {}", status)));
        }

        let body: YahooChartResponse = resp
            .json()
            .await
            .map_err(|e| PriceProviderError::Parse(e.to_string()))?;

        if let Some(error) = body.chart.error {
            if error.description.contains("No data found") {
                return Err(PriceProviderError::NotFound);
            }
            return Err(PriceProviderError::BadResponse(error.description));
        }

        let result = body
            .chart
            .result
            .and_then(|results| results.into_iter().next())
            .ok_or_else(|| PriceProviderError::BadResponse("No results in response".into()))?;

        if result.timestamp.is_empty() {
            return Ok(Vec::new());
        }

        let quote = result
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| PriceProviderError::BadResponse("No quote data in response".into()))?;

        let n = result.timestamp.len();
        if [quote.open.len(), quote.high.len(), quote.low.len(), quote.close.len(), quote.volume.len()]
            .iter()
            .any(|&len| len != n)
        {
            return Err(PriceProviderError::Parse(
                "Timestamp and quote arrays have different lengths".into(),
            ));
        }

        let mut points: Vec<ExternalPricePoint> = (0..n)
            .filter_map(|i| {
                // Null rows are market holidays or halted sessions
                let date = chrono::DateTime::from_timestamp(result.timestamp[i], 0)?.date_naive();
                Some(ExternalPricePoint {
                    date,
                    open: quote.open[i]?,
                    high: quote.high[i]?,
                    low: quote.low[i]?,
                    close: quote.close[i]?,
                    volume: quote.volume[i].unwrap_or(0),
                })
            })
            .filter(|p| p.date >= begin && p.date <= end)
            .collect();

        points.sort_by(|a, b| a.date.cmp(&b.date));
        points.dedup_by(|a, b| a.date == b.date);

        Ok(points)
    }

    fn name(&self) -> &'static str {
        "yahoo"
    }
}
