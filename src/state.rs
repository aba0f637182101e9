use std::sync::Arc;

use crate::config::AppConfig;
use crate::external::price_provider::PriceProvider;
use crate::services::backfill_service::BackfillService;
use crate::services::failure_cache::FailureCache;
use crate::services::history_service::HistoryService;
use crate::store::HistoricalStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn HistoricalStore>,
    pub price_provider: Arc<dyn PriceProvider>,
    pub failure_cache: FailureCache,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn history_service(&self) -> HistoryService {
        let backfill = BackfillService::new(
            self.store.clone(),
            self.price_provider.clone(),
            self.failure_cache.clone(),
        );
        HistoryService::new(self.store.clone(), backfill)
    }
}
