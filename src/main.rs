use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use stockgraph_backend::app;
use stockgraph_backend::config::{AppConfig, ProviderKind, StoreBackend};
use stockgraph_backend::external::alphavantage::AlphaVantageProvider;
use stockgraph_backend::external::multi_provider::MultiProvider;
use stockgraph_backend::external::price_provider::PriceProvider;
use stockgraph_backend::external::yahoofinance::YahooFinanceProvider;
use stockgraph_backend::logging::{init_logging, LoggingConfig};
use stockgraph_backend::services::failure_cache::FailureCache;
use stockgraph_backend::state::AppState;
use stockgraph_backend::store::{ElasticsearchStore, HistoricalStore, InMemoryStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging FIRST
    init_logging(LoggingConfig::from_env()).map_err(|e| anyhow::anyhow!("logging setup failed: {}", e))?;

    let config = AppConfig::from_env().context("invalid configuration")?;

    let store: Arc<dyn HistoricalStore> = match config.store_backend {
        StoreBackend::Elasticsearch => {
            tracing::info!(
                "🗄️ Using Elasticsearch store at {} (index {})",
                config.elasticsearch_url,
                config.elasticsearch_index
            );
            Arc::new(
                ElasticsearchStore::new(
                    &config.elasticsearch_url,
                    &config.elasticsearch_index,
                    config.request_timeout,
                )
                .context("failed to build Elasticsearch client")?,
            )
        }
        StoreBackend::Memory => {
            tracing::warn!("🗄️ Using in-memory store; prices are lost on restart");
            Arc::new(InMemoryStore::new())
        }
    };

    if let Err(e) = store.ensure_index().await {
        // The service still answers from whatever is reachable later on.
        tracing::error!("Could not prepare the price index: {}", e);
    }

    let price_provider = build_provider(&config);
    tracing::info!("📊 Using price provider: {}", price_provider.name());

    let failure_cache = if config.failure_cache_enabled {
        FailureCache::new()
    } else {
        FailureCache::disabled()
    };

    let addr = config.bind_addr;
    let state = AppState {
        store,
        price_provider,
        failure_cache,
        config: Arc::new(config),
    };
    let app = app::create_app(state);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("🚀 Stock graph backend running at http://{}/", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_provider(config: &AppConfig) -> Arc<dyn PriceProvider> {
    let timeout = config.request_timeout;
    // validate() guarantees the key for alphavantage and multi
    let api_key = config.alphavantage_api_key.clone().unwrap_or_default();

    match config.price_provider {
        ProviderKind::Yahoo => Arc::new(YahooFinanceProvider::new(timeout)),
        ProviderKind::AlphaVantage => Arc::new(AlphaVantageProvider::new(api_key, timeout)),
        ProviderKind::Multi => Arc::new(MultiProvider::new(
            Box::new(YahooFinanceProvider::new(timeout)),
            Box::new(AlphaVantageProvider::new(api_key, timeout)),
        )),
    }
}
