//! Hyperliquid funding rate adapter (hourly cadence).
//!
//! All queries go through a single `/info` endpoint with a typed POST
//! body. Settlement times may arrive as epoch milliseconds or ISO-8601
//! strings depending on the record's age.

use crate::exchange::http::HttpCore;
use crate::exchange::traits::ExchangeAdapter;
use crate::exchange::types::{make_record, EpochMillis, FundingRecord};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

pub(crate) const BASE_URL: &str = "https://api.hyperliquid.xyz";

pub const NAME: &str = "hyperliquid";
const INTERVAL_HOURS: f64 = 1.0;

pub struct HyperliquidAdapter {
    http: HttpCore,
    base_url: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub(crate) enum InfoRequest {
    Meta {
        #[serde(skip_serializing_if = "Option::is_none")]
        dex: Option<String>,
    },
    PerpDexs,
    #[serde(rename_all = "camelCase")]
    FundingHistory {
        coin: String,
        start_time: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        end_time: Option<i64>,
    },
}

#[derive(Debug, Deserialize)]
pub(crate) struct Meta {
    #[serde(default = "Vec::new")]
    pub universe: Vec<UniverseEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UniverseEntry {
    pub name: String,
    #[serde(default)]
    pub is_delisted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireFundingRate {
    pub funding_rate: Decimal,
    pub time: EpochMillis,
}

/// Shared funding-history fetch for the main dex and HIP3 sub-exchanges.
pub(crate) async fn fetch_history(
    http: &HttpCore,
    base_url: &str,
    exchange: &str,
    symbol: &str,
    coin: String,
    start_time: Option<i64>,
    end_time: Option<i64>,
    interval_hours: f64,
) -> Result<Vec<FundingRecord>> {
    let url = format!("{base_url}/info");
    let request = InfoRequest::FundingHistory {
        coin,
        start_time: start_time.unwrap_or_else(|| Utc::now().timestamp_millis() - 365 * 86_400_000),
        end_time,
    };

    let Some(rows) = http
        .post_json::<Vec<WireFundingRate>, _>(exchange, &url, &request)
        .await
    else {
        return Ok(Vec::new());
    };

    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let ts = row.time.as_millis()?;
            make_record(exchange, symbol, row.funding_rate, ts, interval_hours)
        })
        .collect())
}

impl HyperliquidAdapter {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: HttpCore::new().context("Failed to create Hyperliquid HTTP core")?,
            base_url: base_url.to_string(),
        })
    }
}

#[async_trait]
impl ExchangeAdapter for HyperliquidAdapter {
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
        let url = format!("{}/info", self.base_url);
        let Some(meta) = self
            .http
            .post_json::<Meta, _>(NAME, &url, &InfoRequest::Meta { dex: None })
            .await
        else {
            bail!("[{NAME}] meta unavailable");
        };

        let mut symbols: Vec<String> = meta
            .universe
            .into_iter()
            .filter(|u| !u.is_delisted)
            .map(|u| u.name)
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
        fetch_history(
            &self.http,
            &self.base_url,
            NAME,
            symbol,
            self.resolve_symbol(symbol),
            start_time,
            end_time,
            self.interval_hours(),
        )
        .await
    }
}
