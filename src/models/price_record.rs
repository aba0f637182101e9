use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// One trading day for one symbol. Identity is symbol + date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl PriceRecord {
    /// Document id used by the store, e.g. `ACME_2024-01-10`.
    pub fn document_id(&self) -> String {
        format!("{}_{}", self.symbol, self.date.format("%Y-%m-%d"))
    }
}
