use std::sync::Arc;
use chrono::{DateTime, Utc, Duration};
use dashmap::DashMap;

use crate::external::price_provider::PriceProviderError;

/// Information about a failed backfill for a symbol
#[derive(Debug, Clone)]
pub struct FailureInfo {
    pub failed_at: DateTime<Utc>,
    pub error_type: FailureType,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureType {
    NotFound,       // Symbol unknown to the provider
    RateLimited,    // Temporary rate limit
}

impl FailureType {
    pub fn ttl_minutes(&self) -> i64 {
        match self {
            FailureType::NotFound => 60,
            FailureType::RateLimited => 5,
        }
    }

    /// Only failures that the next request would hit again are remembered.
    /// Network errors and bad or unparseable responses are retried on the
    /// next call.
    pub fn for_error(err: &PriceProviderError) -> Option<Self> {
        match err {
            PriceProviderError::NotFound => Some(FailureType::NotFound),
            PriceProviderError::RateLimited => Some(FailureType::RateLimited),
            PriceProviderError::Network(_)
            | PriceProviderError::BadResponse(_)
            | PriceProviderError::Parse(_) => None,
        }
    }
}

/// Thread-safe cache of symbols the provider does not know or is currently
/// throttling. Backfills for those symbols are skipped until the entry expires.
#[derive(Clone)]
pub struct FailureCache {
    cache: Arc<DashMap<String, FailureInfo>>,
    enabled: bool,
}

impl Default for FailureCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FailureCache {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(DashMap::new()),
            enabled: true,
        }
    }

    /// A cache that never remembers anything.
    pub fn disabled() -> Self {
        Self {
            cache: Arc::new(DashMap::new()),
            enabled: false,
        }
    }

    /// Check if a symbol is in the failure cache and the failure is still valid
    pub fn is_failed(&self, symbol: &str) -> Option<FailureInfo> {
        self.is_failed_at(symbol, Utc::now())
    }

    fn is_failed_at(&self, symbol: &str, now: DateTime<Utc>) -> Option<FailureInfo> {
        if let Some(entry) = self.cache.get(symbol) {
            let info = entry.value().clone();
            let expiry = info.failed_at + Duration::minutes(info.ttl_minutes);

            if now < expiry {
                return Some(info);
            }
            drop(entry); // Release the read lock
            self.cache.remove(symbol);
        }
        None
    }

    pub fn record_failure(&self, symbol: &str, error_type: FailureType) {
        if !self.enabled {
            return;
        }

        let info = FailureInfo {
            failed_at: Utc::now(),
            ttl_minutes: error_type.ttl_minutes(),
            error_type,
        };

        self.cache.insert(symbol.to_string(), info);
    }

    /// Clear a symbol from the failure cache (e.g., after successful fetch)
    pub fn clear(&self, symbol: &str) {
        self.cache.remove(symbol);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
