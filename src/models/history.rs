use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Upper bound for `days` and `window`: one hundred years of daily buckets.
pub const MAX_SPAN_DAYS: u32 = 36_500;

const MAX_SYMBOL_LEN: usize = 20;

/// One bucket as returned by the store, before any filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBucket {
    pub start_ms: i64,
    pub avg_close: Option<f64>,
    pub moving_avg: Option<f64>,
}

// Wire names match the graph frontend: mstime / close / mv_close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub symbol: String,
    #[serde(rename = "mstime")]
    pub bucket_start_ms: i64,
    #[serde(rename = "close")]
    pub avg_close: f64,
    #[serde(rename = "mv_close")]
    pub moving_avg: Option<f64>,
}

/// Raw query string of the graph endpoint. Everything is optional here so
/// that missing or malformed values turn into validation errors instead of
/// extractor rejections.
#[derive(Debug, Default, Deserialize)]
pub struct GraphParams {
    pub window: Option<String>,
    pub step: Option<String>,
    pub end: Option<String>,
}

/// Validated parameters of a history request.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub symbol: String,
    pub period_days: u32,
    pub mvavg_window_days: u32,
    pub end_date: NaiveDate,
    pub lookback_days: u32,
}

impl HistoryQuery {
    /// Build a query from the path segments and query string.
    ///
    /// `today` is injected so the "yesterday" default can be tested.
    pub fn from_request(
        symbol: &str,
        days: &str,
        params: &GraphParams,
        today: NaiveDate,
    ) -> Result<Self, AppError> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(AppError::Validation("symbol must not be empty".to_string()));
        }
        if symbol.len() > MAX_SYMBOL_LEN || !symbol.chars().all(is_ticker_char) {
            return Err(AppError::Validation(format!("'{}' is not a valid ticker symbol", symbol)));
        }

        let lookback_days = at_most("days", parse_positive("days", Some(days))?)?;
        let mvavg_window_days = at_most("window", parse_positive("window", params.window.as_deref())?)?;
        let period_days = parse_positive("step", params.step.as_deref())?;

        let end_date = match params.end.as_deref() {
            Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
                AppError::Validation(format!("end must be a YYYY-MM-DD date, got '{}'", raw))
            })?,
            None => today - Duration::days(1),
        };

        Ok(Self {
            symbol,
            period_days,
            mvavg_window_days,
            end_date,
            lookback_days,
        })
    }

    pub fn from_request_now(symbol: &str, days: &str, params: &GraphParams) -> Result<Self, AppError> {
        Self::from_request(symbol, days, params, Utc::now().date_naive())
    }
}

fn parse_positive(name: &str, raw: Option<&str>) -> Result<u32, AppError> {
    let raw = raw.ok_or_else(|| AppError::Validation(format!("parameter {} is missing", name)))?;
    match raw.trim().parse::<u32>() {
        Ok(0) => Err(AppError::Validation(format!("parameter {} must be positive", name))),
        Ok(v) => Ok(v),
        Err(_) => Err(AppError::Validation(format!(
            "parameter {} must be a positive integer, got '{}'",
            name, raw
        ))),
    }
}

// Letters, digits and the punctuation used by exchange suffixes, share
// classes, indices and currency pairs (BRK-B, RY.TO, ^GSPC, EURUSD=X).
fn is_ticker_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '=')
}

fn at_most(name: &str, value: u32) -> Result<u32, AppError> {
    if value > MAX_SPAN_DAYS {
        return Err(AppError::Validation(format!(
            "parameter {} must be at most {}, got {}",
            name, MAX_SPAN_DAYS, value
        )));
    }
    Ok(value)
}

/// Milliseconds since the Unix epoch of `date` at 00:00 UTC.
pub fn date_to_epoch_ms(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(window: Option<&str>, step: Option<&str>, end: Option<&str>) -> GraphParams {
        GraphParams {
            window: window.map(str::to_string),
            step: step.map(str::to_string),
            end: end.map(str::to_string),
        }
    }

    #[test]
    fn test_defaults_end_date_to_yesterday() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
        let query = HistoryQuery::from_request("acme", "30", &params(Some("20"), Some("7"), None), today)
            .unwrap();

        assert_eq!(query.symbol, "ACME");
        assert_eq!(query.end_date, NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
        assert_eq!(query.period_days, 7);
        assert_eq!(query.mvavg_window_days, 20);
        assert_eq!(query.lookback_days, 30);
    }

    #[test]
    fn test_explicit_end_date() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
        let query = HistoryQuery::from_request(
            "ACME",
            "5",
            &params(Some("1"), Some("1"), Some("2024-01-10")),
            today,
        )
        .unwrap();

        assert_eq!(query.end_date, NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
    }

    #[test]
    fn test_missing_window_is_validation_error() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
        let err = HistoryQuery::from_request("ACME", "30", &params(None, Some("7"), None), today)
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(ref msg) if msg.contains("window")));
    }

    #[test]
    fn test_rejects_zero_and_garbage() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();

        let zero_step = HistoryQuery::from_request("ACME", "30", &params(Some("5"), Some("0"), None), today);
        assert!(matches!(zero_step, Err(AppError::Validation(_))));

        let bad_days = HistoryQuery::from_request("ACME", "abc", &params(Some("5"), Some("1"), None), today);
        assert!(matches!(bad_days, Err(AppError::Validation(_))));

        let bad_end = HistoryQuery::from_request(
            "ACME",
            "30",
            &params(Some("5"), Some("1"), Some("10/01/2024")),
            today,
        );
        assert!(matches!(bad_end, Err(AppError::Validation(_))));

        let blank_symbol = HistoryQuery::from_request("  ", "30", &params(Some("5"), Some("1"), None), today);
        assert!(matches!(blank_symbol, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_rejects_spans_over_the_cap() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();

        let long_days = HistoryQuery::from_request("ACME", "40000", &params(Some("20"), Some("1"), None), today);
        assert!(matches!(long_days, Err(AppError::Validation(ref msg)) if msg.contains("days")));

        let long_window = HistoryQuery::from_request("ACME", "30", &params(Some("20000000"), Some("1"), None), today);
        assert!(matches!(long_window, Err(AppError::Validation(ref msg)) if msg.contains("window")));

        let cap = MAX_SPAN_DAYS.to_string();
        let at_cap = HistoryQuery::from_request("ACME", &cap, &params(Some(&cap), Some("1"), None), today);
        assert!(at_cap.is_ok());
    }

    #[test]
    fn test_symbol_charset() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
        let ok = |symbol: &str| HistoryQuery::from_request(symbol, "30", &params(Some("5"), Some("1"), None), today);

        assert_eq!(ok("brk-b").unwrap().symbol, "BRK-B");
        assert!(ok("^GSPC").is_ok());
        assert!(ok("EURUSD=X").is_ok());
        assert!(ok("RY.TO").is_ok());

        assert!(matches!(ok("A?B"), Err(AppError::Validation(_))));
        assert!(matches!(ok("A/B"), Err(AppError::Validation(_))));
        assert!(matches!(ok("A B"), Err(AppError::Validation(_))));
        assert!(matches!(ok(&"X".repeat(21)), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_history_point_wire_names() {
        let point = HistoryPoint {
            symbol: "ACME".to_string(),
            bucket_start_ms: 1_704_067_200_000,
            avg_close: 12.5,
            moving_avg: None,
        };

        let json = serde_json::to_value(&point).unwrap();
        assert_eq!(json["mstime"], 1_704_067_200_000_i64);
        assert_eq!(json["close"], 12.5);
        assert!(json["mv_close"].is_null());
    }

    #[test]
    fn test_date_to_epoch_ms() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 9).unwrap();
        assert_eq!(date_to_epoch_ms(date), 1_707_436_800_000);
    }
}
