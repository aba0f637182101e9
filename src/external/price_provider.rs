use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

/// One daily OHLCV bar as reported by a market-data provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalPricePoint {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

#[derive(Debug, Error)]
pub enum PriceProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("rate limited")]
    RateLimited,

    #[error("not found")]
    NotFound,
}

#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Daily bars for `ticker` with dates in `[begin, end]`, oldest first.
    async fn fetch_daily_range(
        &self,
        ticker: &str,
        begin: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ExternalPricePoint>, PriceProviderError>;

    fn name(&self) -> &'static str;
}
