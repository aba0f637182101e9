use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Elasticsearch,
    Memory,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderKind {
    Yahoo,
    AlphaVantage,
    Multi,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub store_backend: StoreBackend,
    pub elasticsearch_url: String,
    pub elasticsearch_index: String,
    pub price_provider: ProviderKind,
    pub alphavantage_api_key: Option<String>,
    pub request_timeout: Duration,
    pub failure_cache_enabled: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; `from_env` passes the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let bind_raw = get("BIND_ADDR", "0.0.0.0:3000");
        let bind_addr = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            name: "BIND_ADDR",
            value: bind_raw.clone(),
        })?;

        let store_raw = get("STORE_BACKEND", "elasticsearch");
        let store_backend = match store_raw.to_lowercase().as_str() {
            "elasticsearch" | "es" => StoreBackend::Elasticsearch,
            "memory" => StoreBackend::Memory,
            _ => {
                return Err(ConfigError::Invalid {
                    name: "STORE_BACKEND",
                    value: store_raw,
                })
            }
        };

        let provider_raw = get("PRICE_PROVIDER", "yahoo");
        let price_provider = match provider_raw.to_lowercase().as_str() {
            "yahoo" => ProviderKind::Yahoo,
            "alphavantage" => ProviderKind::AlphaVantage,
            "multi" => ProviderKind::Multi,
            _ => {
                return Err(ConfigError::Invalid {
                    name: "PRICE_PROVIDER",
                    value: provider_raw,
                })
            }
        };

        let timeout_raw = get("REQUEST_TIMEOUT_SECS", "30");
        let timeout_secs: u64 = timeout_raw.parse().map_err(|_| ConfigError::Invalid {
            name: "REQUEST_TIMEOUT_SECS",
            value: timeout_raw.clone(),
        })?;

        let cache_raw = get("BACKFILL_FAILURE_CACHE", "true");
        let failure_cache_enabled = cache_raw.parse().map_err(|_| ConfigError::Invalid {
            name: "BACKFILL_FAILURE_CACHE",
            value: cache_raw.clone(),
        })?;

        let config = Self {
            bind_addr,
            store_backend,
            elasticsearch_url: get("ELASTICSEARCH_URL", "http://localhost:9200"),
            elasticsearch_index: get("ELASTICSEARCH_INDEX", "stocks-hist"),
            price_provider,
            alphavantage_api_key: lookup("ALPHAVANTAGE_API_KEY").filter(|k| !k.is_empty()),
            request_timeout: Duration::from_secs(timeout_secs),
            failure_cache_enabled,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                name: "REQUEST_TIMEOUT_SECS",
                value: "0".to_string(),
            });
        }
        if self.elasticsearch_index.is_empty() {
            return Err(ConfigError::Missing("ELASTICSEARCH_INDEX"));
        }
        if matches!(self.price_provider, ProviderKind::AlphaVantage | ProviderKind::Multi)
            && self.alphavantage_api_key.is_none()
        {
            return Err(ConfigError::Missing("ALPHAVANTAGE_API_KEY"));
        }
        Ok(())
    }
}
