//! Bybit linear perpetual funding rate adapter.
//!
//! The v5 funding-history endpoint returns newest-first pages and takes no
//! start cursor, so this adapter converges backward internally: each page
//! moves `endTime` to one millisecond before the oldest settlement seen,
//! capped at 100 pages, then the batch is range-filtered and re-sorted
//! ascending before it is handed to the collector.

use crate::exchange::http::HttpCore;
use crate::exchange::traits::ExchangeAdapter;
use crate::exchange::types::{make_record, FundingRecord};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

const BASE_URL: &str = "https://api.bybit.com";

pub const NAME: &str = "bybit";
const INTERVAL_HOURS: f64 = 8.0;
const MAX_PAGES: usize = 100;
const PAGE_DELAY: Duration = Duration::from_millis(200);

pub struct BybitAdapter {
    http: HttpCore,
    base_url: String,
    page_delay: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    ret_code: i64,
    result: T,
}

#[derive(Debug, Deserialize)]
struct ListResult<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentInfo {
    symbol: String,
    status: String,
    settle_coin: String,
    contract_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFundingRate {
    funding_rate: Decimal,
    funding_rate_timestamp: String,
}

impl BybitAdapter {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: HttpCore::new().context("Failed to create Bybit HTTP core")?,
            base_url: base_url.to_string(),
            page_delay: PAGE_DELAY,
        })
    }

    #[cfg(test)]
    pub(crate) fn without_page_delay(mut self) -> Self {
        self.page_delay = Duration::ZERO;
        self
    }
}

#[async_trait]
impl ExchangeAdapter for BybitAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn interval_hours(&self) -> f64 {
        INTERVAL_HOURS
    }

    fn resolve_symbol(&self, base: &str) -> String {
        format!("{base}USDT")
    }

    async fn list_symbols(&self) -> Result<Vec<String>> {
        let url = format!("{}/v5/market/instruments-info", self.base_url);
        let query = [
            ("category", "linear".to_string()),
            ("limit", "1000".to_string()),
        ];
        let Some(envelope) = self
            .http
            .get_json::<Envelope<ListResult<InstrumentInfo>>>(NAME, &url, &query)
            .await
        else {
            bail!("[{NAME}] instruments-info unavailable");
        };
        if envelope.ret_code != 0 {
            bail!("[{NAME}] instruments-info retCode {}", envelope.ret_code);
        }

        let mut symbols: Vec<String> = envelope
            .result
            .list
            .into_iter()
            .filter(|i| {
                i.status == "Trading"
                    && i.settle_coin == "USDT"
                    && i.contract_type == "LinearPerpetual"
            })
            .filter_map(|i| i.symbol.strip_suffix("USDT").map(str::to_string))
            .collect();
        symbols.sort();

        info!("[{}] Found {} perpetual markets", NAME, symbols.len());
        Ok(symbols)
    }

    async fn fetch_funding_history(
        &self,
        symbol: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
        _limit: usize,
    ) -> Result<Vec<FundingRecord>> {
        let pair = self.resolve_symbol(symbol);
        let url = format!("{}/v5/market/funding/history", self.base_url);

        let target_start =
            start_time.unwrap_or_else(|| Utc::now().timestamp_millis() - 365 * 86_400_000);
        let mut cursor_end = end_time;
        let mut all_records: Vec<FundingRecord> = Vec::new();

        for _ in 0..MAX_PAGES {
            let mut query = vec![
                ("category", "linear".to_string()),
                ("symbol", pair.clone()),
                ("limit", "200".to_string()),
            ];
            if let Some(end) = cursor_end {
                query.push(("endTime", end.to_string()));
            }

            let page = self
                .http
                .get_json::<Envelope<ListResult<WireFundingRate>>>(NAME, &url, &query)
                .await;
            let items = match page {
                Some(envelope) if envelope.ret_code == 0 => envelope.result.list,
                Some(envelope) => {
                    if all_records.is_empty() {
                        bail!("[{NAME}] funding history retCode {}", envelope.ret_code);
                    }
                    warn!(
                        "[{}] {} retCode {} mid-pagination, keeping partial batch",
                        NAME, symbol, envelope.ret_code
                    );
                    break;
                }
                None => break,
            };
            if items.is_empty() {
                break;
            }

            let mut oldest = i64::MAX;
            for item in &items {
                let Ok(ts) = item.funding_rate_timestamp.parse::<i64>() else {
                    continue;
                };
                oldest = oldest.min(ts);
                if let Some(rec) =
                    make_record(NAME, symbol, item.funding_rate, ts, self.interval_hours())
                {
                    all_records.push(rec);
                }
            }

            if oldest == i64::MAX || oldest <= target_start {
                break;
            }
            cursor_end = Some(oldest - 1);

            tokio::time::sleep(self.page_delay).await;
        }

        if let Some(start) = start_time {
            all_records.retain(|r| r.funding_time >= start);
        }
        all_records.sort_by_key(|r| r.funding_time);
        Ok(all_records)
    }
}
