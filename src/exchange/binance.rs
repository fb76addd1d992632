//! Binance USDⓈ-M futures funding rate adapter.
//!
//! Forward pagination over `startTime`/`endTime`; the collector loop
//! advances the cursor past the latest returned settlement.

use crate::exchange::http::HttpCore;
use crate::exchange::traits::ExchangeAdapter;
use crate::exchange::types::{make_record, FundingRecord};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

const BASE_URL: &str = "https://fapi.binance.com";

pub const NAME: &str = "binance";
const INTERVAL_HOURS: f64 = 8.0;

pub struct BinanceAdapter {
    http: HttpCore,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<InstrumentInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentInfo {
    base_asset: String,
    quote_asset: String,
    contract_type: String,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFundingRate {
    funding_rate: Decimal,
    funding_time: i64,
}

impl BinanceAdapter {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: HttpCore::new().context("Failed to create Binance HTTP core")?,
            base_url: base_url.to_string(),
        })
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
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
        let url = format!("{}/fapi/v1/exchangeInfo", self.base_url);
        let Some(info) = self.http.get_json::<ExchangeInfo>(NAME, &url, &[]).await else {
            bail!("[{NAME}] exchangeInfo unavailable");
        };

        let mut symbols: Vec<String> = info
            .symbols
            .into_iter()
            .filter(|s| {
                s.contract_type == "PERPETUAL" && s.quote_asset == "USDT" && s.status == "TRADING"
            })
            .map(|s| s.base_asset)
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
        limit: usize,
    ) -> Result<Vec<FundingRecord>> {
        let pair = self.resolve_symbol(symbol);
        let url = format!("{}/fapi/v1/fundingRate", self.base_url);

        let mut query = vec![
            ("symbol", pair),
            ("limit", limit.min(1000).to_string()),
        ];
        if let Some(start) = start_time {
            query.push(("startTime", start.to_string()));
        }
        if let Some(end) = end_time {
            query.push(("endTime", end.to_string()));
        }

        let Some(rows) = self
            .http
            .get_json::<Vec<WireFundingRate>>(NAME, &url, &query)
            .await
        else {
            return Ok(Vec::new());
        };

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                make_record(
                    NAME,
                    symbol,
                    row.funding_rate,
                    row.funding_time,
                    self.interval_hours(),
                )
            })
            .collect())
    }
}
