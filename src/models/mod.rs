mod history;
mod price_record;

pub use history::{date_to_epoch_ms, GraphParams, HistoryPoint, HistoryQuery, RawBucket};
pub use price_record::PriceRecord;
