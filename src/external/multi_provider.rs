use crate::external::price_provider::{ExternalPricePoint, PriceProvider, PriceProviderError};
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{info, warn};

/// Tries the primary provider first and falls back to the secondary one on
/// any error. When both fail the primary's error is returned, except that a
/// rate limit on the primary is reported as the fallback's error.
pub struct MultiProvider {
    primary: Box<dyn PriceProvider>,
    fallback: Box<dyn PriceProvider>,
}

impl MultiProvider {
    pub fn new(primary: Box<dyn PriceProvider>, fallback: Box<dyn PriceProvider>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl PriceProvider for MultiProvider {
    async fn fetch_daily_range(
        &self,
        ticker: &str,
        begin: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ExternalPricePoint>, PriceProviderError> {
        let primary_err = match self.primary.fetch_daily_range(ticker, begin, end).await {
            Ok(data) => return Ok(data),
            Err(e) => {
                warn!("{} failed for {}: {}. Trying {}", self.primary.name(), ticker, e, self.fallback.name());
                e
            }
        };

        match self.fallback.fetch_daily_range(ticker, begin, end).await {
            Ok(data) => {
                info!("✓ Fetched {} from fallback provider {}", ticker, self.fallback.name());
                Ok(data)
            }
            Err(fallback_err) => {
                warn!("{} failed for {}: {}", self.fallback.name(), ticker, fallback_err);
                match primary_err {
                    PriceProviderError::RateLimited => Err(fallback_err),
                    other => Err(other),
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "multi"
    }
}
