//! Lighter funding rate adapter (hourly cadence).
//!
//! Quirkiest of the sources: markets are numbered rather than named, so a
//! one-time orderBooks lookup maps symbol → market_id and is cached for
//! the adapter's lifetime. The fundings endpoint ignores the provided
//! start, returns fixed 750-row batches ending at `end_timestamp`
//! (seconds), and reports rates 100x larger than the shared decimal
//! convention with a separate direction field for the sign.

use crate::exchange::http::HttpCore;
use crate::exchange::traits::ExchangeAdapter;
use crate::exchange::types::{make_record, FundingRecord};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;

const BASE_URL: &str = "https://mainnet.zklighter.elliot.ai";

pub const NAME: &str = "lighter";
const INTERVAL_HOURS: f64 = 1.0;
const BATCH_SIZE: usize = 750;
const MAX_ITERATIONS: usize = 500;
const PAGE_DELAY: Duration = Duration::from_millis(150);

/// The fundings endpoint reports rates ~100x the decimal convention the
/// other venues use.
const RATE_DIVISOR: Decimal = dec!(100);

pub struct LighterAdapter {
    http: HttpCore,
    base_url: String,
    page_delay: Duration,
    /// symbol → market_id, populated once per adapter instance.
    market_ids: OnceCell<HashMap<String, i64>>,
}

#[derive(Debug, Deserialize)]
struct OrderBooksResponse {
    #[serde(default = "Vec::new")]
    order_books: Vec<OrderBook>,
}

#[derive(Debug, Deserialize)]
struct OrderBook {
    symbol: String,
    market_id: i64,
}

#[derive(Debug, Deserialize)]
struct FundingsResponse {
    code: i64,
    #[serde(default = "Vec::new")]
    fundings: Vec<WireFunding>,
}

#[derive(Debug, Deserialize)]
struct WireFunding {
    /// Settlement time, epoch seconds
    timestamp: i64,
    rate: Decimal,
    #[serde(default)]
    direction: String,
}

impl LighterAdapter {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: HttpCore::new().context("Failed to create Lighter HTTP core")?,
            base_url: base_url.to_string(),
            page_delay: PAGE_DELAY,
            market_ids: OnceCell::new(),
        })
    }

    #[cfg(test)]
    pub(crate) fn without_page_delay(mut self) -> Self {
        self.page_delay = Duration::ZERO;
        self
    }

    async fn market_ids(&self) -> Result<&HashMap<String, i64>> {
        self.market_ids
            .get_or_try_init(|| async {
                let url = format!("{}/api/v1/orderBooks", self.base_url);
                let Some(books) = self
                    .http
                    .get_json::<OrderBooksResponse>(NAME, &url, &[])
                    .await
                else {
                    bail!("[{NAME}] orderBooks unavailable");
                };

                let map: HashMap<String, i64> = books
                    .order_books
                    .into_iter()
                    .map(|b| (b.symbol, b.market_id))
                    .collect();
                info!("[{}] Discovered {} markets", NAME, map.len());
                Ok(map)
            })
            .await
    }
}

#[async_trait]
impl ExchangeAdapter for LighterAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn interval_hours(&self) -> f64 {
        INTERVAL_HOURS
    }

    fn resolve_symbol(&self, base: &str) -> String {
        base.to_string()
    }

    async fn list_symbols(&self) -> Result<Vec<String>> {
        let mut symbols: Vec<String> = self.market_ids().await?.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }

    async fn fetch_funding_history(
        &self,
        symbol: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
        _limit: usize,
    ) -> Result<Vec<FundingRecord>> {
        let Some(&market_id) = self.market_ids().await?.get(&self.resolve_symbol(symbol)) else {
            info!("[{}] {}: not found in orderBooks", NAME, symbol);
            return Ok(Vec::new());
        };

        let now_sec = Utc::now().timestamp();
        let target_start_sec = start_time.map_or(now_sec - 365 * 86_400, |ms| ms / 1000);
        let mut cursor_end_sec = end_time.map_or(now_sec, |ms| ms / 1000);

        let url = format!("{}/api/v1/fundings", self.base_url);
        let mut all_records: Vec<FundingRecord> = Vec::new();

        for _ in 0..MAX_ITERATIONS {
            let query = [
                ("market_id", market_id.to_string()),
                ("resolution", "1h".to_string()),
                ("start_timestamp", target_start_sec.to_string()),
                ("end_timestamp", cursor_end_sec.to_string()),
                ("count_back", BATCH_SIZE.to_string()),
            ];

            let page = self
                .http
                .get_json::<FundingsResponse>(NAME, &url, &query)
                .await;
            let fundings = match page {
                Some(resp) if resp.code == 200 => resp.fundings,
                Some(resp) => {
                    if all_records.is_empty() {
                        bail!("[{NAME}] fundings code {} for {}", resp.code, symbol);
                    }
                    break;
                }
                None => break,
            };
            if fundings.is_empty() {
                break;
            }

            let batch_len = fundings.len();
            let mut oldest_sec = i64::MAX;
            for item in &fundings {
                oldest_sec = oldest_sec.min(item.timestamp);

                let mut rate = item.rate / RATE_DIVISOR;
                // direction "short" means longs receive: flip the sign
                if item.direction == "short" {
                    rate = -rate.abs();
                }

                if let Some(rec) =
                    make_record(NAME, symbol, rate, item.timestamp * 1000, self.interval_hours())
                {
                    all_records.push(rec);
                }
            }

            if oldest_sec <= target_start_sec {
                break;
            }
            cursor_end_sec = oldest_sec - 1;

            if batch_len < BATCH_SIZE {
                break;
            }
            tokio::time::sleep(self.page_delay).await;
        }

        if let Some(start) = start_time {
            all_records.retain(|r| r.funding_time >= start);
        }
        if let Some(end) = end_time {
            all_records.retain(|r| r.funding_time <= end);
        }
        all_records.sort_by_key(|r| r.funding_time);

        info!(
            "[{}] {}: fetched {} historical records",
            NAME,
            symbol,
            all_records.len()
        );
        Ok(all_records)
    }
}
