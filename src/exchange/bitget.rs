//! Bitget USDT-futures funding rate adapter.
//!
//! Same page-limited single-page shape as OKX, with an `endTime` cursor.

use crate::exchange::http::HttpCore;
use crate::exchange::traits::ExchangeAdapter;
use crate::exchange::types::{make_record, FundingRecord};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

const BASE_URL: &str = "https://api.bitget.com";

pub const NAME: &str = "bitget";
const INTERVAL_HOURS: f64 = 8.0;
const PAGE_SIZE: usize = 100;
const OK_CODE: &str = "00000";

pub struct BitgetAdapter {
    http: HttpCore,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TickerInfo {
    symbol: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFundingRate {
    funding_rate: Decimal,
    funding_time: String,
}

impl BitgetAdapter {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: HttpCore::new().context("Failed to create Bitget HTTP core")?,
            base_url: base_url.to_string(),
        })
    }
}

#[async_trait]
impl ExchangeAdapter for BitgetAdapter {
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
        let url = format!("{}/api/v2/mix/market/tickers", self.base_url);
        let query = [("productType", "USDT-FUTURES".to_string())];
        let Some(envelope) = self
            .http
            .get_json::<Envelope<TickerInfo>>(NAME, &url, &query)
            .await
        else {
            bail!("[{NAME}] tickers listing unavailable");
        };
        if envelope.code != OK_CODE {
            bail!("[{NAME}] tickers listing code {}", envelope.code);
        }

        let mut symbols: Vec<String> = envelope
            .data
            .into_iter()
            .filter_map(|t| t.symbol.strip_suffix("USDT").map(str::to_string))
            .collect();
        symbols.sort();

        info!("[{}] Found {} perpetual markets", NAME, symbols.len());
        Ok(symbols)
    }

    async fn fetch_funding_history(
        &self,
        symbol: &str,
        _start_time: Option<i64>,
        end_time: Option<i64>,
        limit: usize,
    ) -> Result<Vec<FundingRecord>> {
        let pair = self.resolve_symbol(symbol);
        let url = format!("{}/api/v2/mix/market/history-fund-rate", self.base_url);

        let mut query = vec![
            ("symbol", pair),
            ("productType", "USDT-FUTURES".to_string()),
            ("pageSize", limit.min(PAGE_SIZE).to_string()),
        ];
        if let Some(end) = end_time {
            query.push(("endTime", end.to_string()));
        }

        let Some(envelope) = self
            .http
            .get_json::<Envelope<WireFundingRate>>(NAME, &url, &query)
            .await
        else {
            return Ok(Vec::new());
        };
        if envelope.code != OK_CODE {
            bail!("[{NAME}] funding history code {}", envelope.code);
        }

        Ok(envelope
            .data
            .into_iter()
            .filter_map(|row| {
                let ts = row.funding_time.parse::<i64>().ok()?;
                make_record(NAME, symbol, row.funding_rate, ts, self.interval_hours())
            })
            .collect())
    }
}
