pub mod backfill_service;
pub mod cancellation;
pub mod failure_cache;
pub mod freshness;
pub mod history_service;
pub mod indicators;
