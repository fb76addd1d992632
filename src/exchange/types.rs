//! Shared data types for exchange adapters.

use chrono::DateTime;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fmt;
use tracing::warn;

/// One observed funding settlement, normalized across exchanges.
///
/// Uniqueness key is (exchange, symbol, funding_time); the store upserts
/// on that key so replaying the same window is harmless.
#[derive(Debug, Clone, PartialEq)]
pub struct FundingRecord {
    /// Exchange id (e.g. "binance", "hl-xyz")
    pub exchange: String,
    /// Normalized base asset (e.g. "BTC")
    pub symbol: String,
    /// Signed decimal fraction (0.0003 = 0.03%)
    pub funding_rate: Decimal,
    /// Settlement time, millisecond epoch
    pub funding_time: i64,
    /// Nominal funding cadence at capture time
    pub interval_hours: f64,
}

/// Funding rates outside ±1% are treated as upstream glitches and dropped
/// at the adapter boundary, before they can reach storage.
pub fn rate_in_range(rate: Decimal) -> bool {
    rate >= dec!(-0.01) && rate <= dec!(0.01)
}

/// Build a validated record, or drop it with a warning.
pub(crate) fn make_record(
    exchange: &str,
    symbol: &str,
    funding_rate: Decimal,
    funding_time: i64,
    interval_hours: f64,
) -> Option<FundingRecord> {
    if !rate_in_range(funding_rate) {
        warn!(
            "[{}] Rate {} for {} out of range, skipping",
            exchange, funding_rate, symbol
        );
        return None;
    }
    Some(FundingRecord {
        exchange: exchange.to_string(),
        symbol: symbol.to_string(),
        funding_rate,
        funding_time,
        interval_hours,
    })
}

/// Outcome of one fetch attempt, written to the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Success,
    Empty,
    Error,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Success => "success",
            FetchStatus::Empty => "empty",
            FetchStatus::Error => "error",
        }
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement timestamps arrive as epoch milliseconds on most venues, but
/// some return stringified integers or ISO-8601 text.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EpochMillis {
    Int(i64),
    Text(String),
}

impl EpochMillis {
    /// Resolve to millisecond epoch, or `None` when unparseable.
    pub fn as_millis(&self) -> Option<i64> {
        match self {
            EpochMillis::Int(ms) => Some(*ms),
            EpochMillis::Text(s) => {
                if let Ok(ms) = s.parse::<i64>() {
                    return Some(ms);
                }
                DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.timestamp_millis())
            }
        }
    }
}
