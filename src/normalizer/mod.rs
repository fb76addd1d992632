//! Cross-exchange time normalization for funding rate comparison.
//!
//! Venues settle funding at different cadences (1h vs 8h), so summing
//! each venue's records over its own native window inflates or deflates
//! the comparison. The normalizer anchors every venue to the settlement
//! window actually covered by the longest-interval exchange holding the
//! symbol, so each contribution spans the same real time period.

use crate::store::FundingStore;
use anyhow::Result;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::debug;

/// One exchange's rate sum over the anchored comparison window.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedWindow {
    pub rate_sum: Decimal,
    pub count: usize,
    pub start: i64,
    pub end: i64,
    pub interval_hours: f64,
}

/// Annualize a decimal rate sum accumulated over `days` into a
/// percentage: 0.0003 over 1 day -> 10.95.
pub fn annualized_pct(rate_sum: Decimal, days: f64) -> f64 {
    if days <= 0.0 {
        return 0.0;
    }
    rate_sum.to_f64().unwrap_or(0.0) * (365.0 / days) * 100.0
}

/// Convert a decimal rate sum to a percentage.
pub fn rate_sum_to_percent(rate_sum: Decimal) -> f64 {
    rate_sum.to_f64().unwrap_or(0.0) * 100.0
}

pub struct TimeNormalizer<'a> {
    store: &'a FundingStore,
}

impl<'a> TimeNormalizer<'a> {
    pub fn new(store: &'a FundingStore) -> Self {
        Self { store }
    }

    /// Normalized rate sums per exchange for one symbol over
    /// [start_time_ms, end_time_ms].
    ///
    /// The reference exchange's settlements inside the window define
    /// `actualStart`; every exchange then sums over
    /// [actualStart, end_time_ms]. With no reference settlements in the
    /// window (sparse data), falls back to naive per-exchange sums over
    /// the literal requested window.
    pub fn get_normalized_rates(
        &self,
        symbol: &str,
        start_time_ms: i64,
        end_time_ms: i64,
    ) -> Result<BTreeMap<String, NormalizedWindow>> {
        let exchanges = self.store.get_exchanges_for_symbol(symbol)?;
        if exchanges.is_empty() {
            return Ok(BTreeMap::new());
        }

        let Some((ref_exchange, _)) = self.store.get_reference_exchange(symbol)? else {
            return self.simple_sum(symbol, &exchanges, start_time_ms, end_time_ms);
        };
        let ref_times =
            self.store
                .get_funding_times(&ref_exchange, symbol, start_time_ms, end_time_ms)?;
        let (Some(&actual_start), Some(&actual_end)) = (ref_times.first(), ref_times.last())
        else {
            debug!(
                "{}: reference {} has no settlements in window, using naive sums",
                symbol, ref_exchange
            );
            return self.simple_sum(symbol, &exchanges, start_time_ms, end_time_ms);
        };

        let mut results = BTreeMap::new();
        for exchange in &exchanges {
            let rates = self
                .store
                .get_funding_rates(exchange, symbol, actual_start, end_time_ms)?;
            if rates.is_empty() {
                continue;
            }
            results.insert(
                exchange.clone(),
                NormalizedWindow {
                    rate_sum: rates.iter().map(|r| r.funding_rate).sum(),
                    count: rates.len(),
                    start: actual_start,
                    end: actual_end,
                    interval_hours: rates[0].interval_hours,
                },
            );
        }

        Ok(results)
    }

    fn simple_sum(
        &self,
        symbol: &str,
        exchanges: &[String],
        start_time: i64,
        end_time: i64,
    ) -> Result<BTreeMap<String, NormalizedWindow>> {
        let mut results = BTreeMap::new();
        for exchange in exchanges {
            let rates = self
                .store
                .get_funding_rates(exchange, symbol, start_time, end_time)?;
            if rates.is_empty() {
                continue;
            }
            results.insert(
                exchange.clone(),
                NormalizedWindow {
                    rate_sum: rates.iter().map(|r| r.funding_rate).sum(),
                    count: rates.len(),
                    start: start_time,
                    end: end_time,
                    interval_hours: rates[0].interval_hours,
                },
            );
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::types::FundingRecord;
    use rust_decimal_macros::dec;

    const HOUR: i64 = 3_600_000;

    fn record(exchange: &str, time: i64, rate: Decimal, interval: f64) -> FundingRecord {
        FundingRecord {
            exchange: exchange.to_string(),
            symbol: "BTC".to_string(),
            funding_rate: rate,
            funding_time: time,
            interval_hours: interval,
        }
    }

    /// An 8h venue anchors a 1h venue: the hourly records before the
    /// first 8h settlement in the window must not count.
    #[test]
    fn test_anchoring_trims_leading_hourly_records() {
        let store = FundingStore::new(":memory:").unwrap();
        let t0 = 1_700_000_000_000;

        // 8h venue settles at t0+8h and t0+16h
        store
            .insert_funding_rates(&[
                record("binance", t0 + 8 * HOUR, dec!(0.0001), 8.0),
                record("binance", t0 + 16 * HOUR, dec!(0.0001), 8.0),
            ])
            .unwrap();
        // 1h venue settles every hour from t0+1h; rates of 0.00001 each
        let hourly: Vec<FundingRecord> = (1..=16)
            .map(|i| record("hyperliquid", t0 + i * HOUR, dec!(0.00001), 1.0))
            .collect();
        store.insert_funding_rates(&hourly).unwrap();

        let normalizer = TimeNormalizer::new(&store);
        let results = normalizer
            .get_normalized_rates("BTC", t0, t0 + 16 * HOUR)
            .unwrap();

        let binance = &results["binance"];
        assert_eq!(binance.rate_sum, dec!(0.0002));
        assert_eq!(binance.count, 2);
        assert_eq!(binance.start, t0 + 8 * HOUR);
        assert_eq!(binance.end, t0 + 16 * HOUR);

        // Hourly venue contributes only the 9 settlements in
        // [t0+8h, t0+16h], not all 16
        let hyperliquid = &results["hyperliquid"];
        assert_eq!(hyperliquid.count, 9);
        assert_eq!(hyperliquid.rate_sum, dec!(0.00009));
        assert_eq!(hyperliquid.interval_hours, 1.0);
    }

    #[test]
    fn test_fallback_when_reference_has_no_settlements_in_window() {
        let store = FundingStore::new(":memory:").unwrap();
        let t0 = 1_700_000_000_000;

        // Reference (8h) data exists only far outside the query window
        store
            .insert_funding_rates(&[record("binance", t0 - 100 * HOUR, dec!(0.0005), 8.0)])
            .unwrap();
        store
            .insert_funding_rates(&[
                record("hyperliquid", t0 + HOUR, dec!(0.00001), 1.0),
                record("hyperliquid", t0 + 2 * HOUR, dec!(0.00002), 1.0),
            ])
            .unwrap();

        let normalizer = TimeNormalizer::new(&store);
        let results = normalizer
            .get_normalized_rates("BTC", t0, t0 + 3 * HOUR)
            .unwrap();

        // Naive path: each venue over the literal window
        assert!(!results.contains_key("binance"));
        let hyperliquid = &results["hyperliquid"];
        assert_eq!(hyperliquid.rate_sum, dec!(0.00003));
        assert_eq!(hyperliquid.start, t0);
    }

    #[test]
    fn test_unknown_symbol_yields_empty_map() {
        let store = FundingStore::new(":memory:").unwrap();
        let normalizer = TimeNormalizer::new(&store);
        let results = normalizer.get_normalized_rates("BTC", 0, 1_000).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_annualized_pct() {
        // 0.0003 per day -> 0.0003 * 365 * 100 = 10.95%
        assert!((annualized_pct(dec!(0.0003), 1.0) - 10.95).abs() < 1e-9);
        assert_eq!(annualized_pct(dec!(0.5), 0.0), 0.0);
        assert_eq!(rate_sum_to_percent(dec!(0.0003)), 0.03);
    }
}
