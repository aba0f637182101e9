use crate::external::price_provider::{ExternalPricePoint, PriceProvider, PriceProviderError};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co";

// compact returns roughly the latest 100 trading days
const COMPACT_CALENDAR_DAYS: i64 = 140;

pub struct AlphaVantageProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AlphaVantageProvider {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL, timeout)
    }

    pub fn with_base_url(api_key: String, base_url: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AvDailyResponse {
    #[serde(rename = "Time Series (Daily)")]
    time_series: Option<BTreeMap<String, AvDailyBar>>,

    // Throttled: { "Note": "Thank you for using Alpha Vantage! ... 5 calls per minute ..." }
    #[serde(rename = "Note")]
    note: Option<String>,

    #[serde(rename = "Information")]
    information: Option<String>,

    // Unknown symbol: { "Error Message": "Invalid API call. ..." }
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AvDailyBar {
    #[serde(rename = "1. open")]
    open: String,
    #[serde(rename = "2. high")]
    high: String,
    #[serde(rename = "3. low")]
    low: String,
    #[serde(rename = "4. close")]
    close: String,
    #[serde(rename = "5. volume")]
    volume: String,
}

fn parse_number<T: std::str::FromStr>(raw: &str) -> Result<T, PriceProviderError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| PriceProviderError::Parse(format!("'{}': {}", raw, e)))
}

#[async_trait]
impl PriceProvider for AlphaVantageProvider {
    async fn fetch_daily_range(
        &self,
        ticker: &str,
        begin: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ExternalPricePoint>, PriceProviderError> {
        let age_days = (Utc::now().date_naive() - begin).num_days();
        let outputsize = if age_days <= COMPACT_CALENDAR_DAYS { "compact" } else { "full" };

        let resp = self
            .client
            .get(format!("{}/query", self.base_url))
            .query(&[
                ("function", "TIME_SERIES_DAILY"),
                ("symbol", ticker),
                ("outputsize", outputsize),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PriceProviderError::Network(e.to_string()))?;

        let body = resp
            .json::<AvDailyResponse>()
            .await
            .map_err(|e| PriceProviderError::Parse(e.to_string()))?;

        if body.note.is_some() || body.information.is_some() {
            return Err(PriceProviderError::RateLimited);
        }

        if let Some(msg) = body.error_message {
            return Err(PriceProviderError::BadResponse(msg));
        }

        let series = body
            .time_series
            .ok_or_else(|| PriceProviderError::BadResponse("missing time series".into()))?;

        // Keys are "YYYY-MM-DD"; BTreeMap iterates ascending.
        let mut out = Vec::new();
        for (date_str, bar) in series {
            let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
                .map_err(|e| PriceProviderError::Parse(e.to_string()))?;
            if date < begin || date > end {
                continue;
            }

            out.push(ExternalPricePoint {
                date,
                open: parse_number(&bar.open)?,
                high: parse_number(&bar.high)?,
                low: parse_number(&bar.low)?,
                close: parse_number(&bar.close)?,
                volume: parse_number(&bar.volume)?,
            });
        }

        Ok(out)
    }

    fn name(&self) -> &'static str {
        "alphavantage"
    }
}
