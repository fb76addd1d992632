//! Binance open-interest ranking job.
//!
//! Unlike funding history, per-symbol open interest has no pagination
//! state, so the fetches run concurrently through a bounded worker pool
//! instead of the sequential cursor loop the funding path uses.

use crate::exchange::http::HttpCore;
use crate::store::{FundingStore, OiRecord};
use anyhow::{bail, Context, Result};
use futures_util::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{error, info};

const BASE_URL: &str = "https://fapi.binance.com";
const SOURCE: &str = "binance-oi";
const QUOTE_SUFFIXES: [&str; 3] = ["USDT", "BUSD", "USDC"];

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    #[serde(default = "Vec::new")]
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    contract_type: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct PriceTicker {
    symbol: String,
    price: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenInterestResponse {
    open_interest: Decimal,
}

pub struct OpenInterestJob {
    http: HttpCore,
    base_url: String,
    top_n: usize,
    workers: usize,
}

impl OpenInterestJob {
    pub fn new(top_n: usize, workers: usize) -> Result<Self> {
        Self::with_base_url(BASE_URL, top_n, workers)
    }

    pub fn with_base_url(base_url: &str, top_n: usize, workers: usize) -> Result<Self> {
        Ok(Self {
            http: HttpCore::new().context("Failed to create OI HTTP core")?,
            base_url: base_url.to_string(),
            top_n,
            workers: workers.max(1),
        })
    }

    /// Fetch open interest for every active perpetual, keep the top N
    /// by USD value, and replace the stored ranking.
    pub async fn run(&self, store: &FundingStore) -> Result<Vec<OiRecord>> {
        info!("Starting open interest update");

        let symbols = self.list_perp_symbols().await?;
        info!("Found {} perpetual contracts", symbols.len());

        let prices = self.fetch_prices().await?;

        let total = symbols.len();
        let mut ranked: Vec<OiRecord> = Vec::new();
        let mut failures = 0usize;

        let mut fetches = stream::iter(symbols.into_iter().map(|symbol| async move {
            let oi = self.fetch_open_interest(&symbol).await;
            (symbol, oi)
        }))
        .buffer_unordered(self.workers);

        while let Some((symbol, oi)) = fetches.next().await {
            let Some(open_interest) = oi else {
                failures += 1;
                continue;
            };
            let price = prices.get(&symbol).copied().unwrap_or(Decimal::ZERO);
            if price <= Decimal::ZERO || open_interest <= Decimal::ZERO {
                continue;
            }
            ranked.push(OiRecord {
                symbol: strip_quote_suffix(&symbol),
                open_interest,
                oi_usd: open_interest * price,
                price,
                rank: 0,
            });
        }

        if failures * 10 > total * 3 {
            error!("High failure rate: {}/{} symbols failed", failures, total);
        }

        ranked.sort_by(|a, b| b.oi_usd.cmp(&a.oi_usd));
        ranked.truncate(self.top_n);
        for (i, rec) in ranked.iter_mut().enumerate() {
            rec.rank = (i + 1) as u32;
        }

        store.replace_oi_data(&ranked)?;
        for rec in &ranked {
            info!("  #{} {}: ${}", rec.rank, rec.symbol, rec.oi_usd.round());
        }
        info!(
            "OI update complete ({} failures out of {} symbols)",
            failures, total
        );

        Ok(ranked)
    }

    async fn list_perp_symbols(&self) -> Result<Vec<String>> {
        let url = format!("{}/fapi/v1/exchangeInfo", self.base_url);
        let Some(info) = self.http.get_json::<ExchangeInfo>(SOURCE, &url, &[]).await else {
            bail!("exchangeInfo unavailable");
        };
        Ok(info
            .symbols
            .into_iter()
            .filter(|s| {
                s.contract_type == "PERPETUAL"
                    && s.status == "TRADING"
                    && s.symbol.ends_with("USDT")
            })
            .map(|s| s.symbol)
            .collect())
    }

    async fn fetch_prices(&self) -> Result<HashMap<String, Decimal>> {
        let url = format!("{}/fapi/v1/ticker/price", self.base_url);
        let Some(tickers) = self
            .http
            .get_json::<Vec<PriceTicker>>(SOURCE, &url, &[])
            .await
        else {
            bail!("price tickers unavailable");
        };
        Ok(tickers.into_iter().map(|t| (t.symbol, t.price)).collect())
    }

    async fn fetch_open_interest(&self, symbol: &str) -> Option<Decimal> {
        let url = format!("{}/fapi/v1/openInterest", self.base_url);
        let query = [("symbol", symbol.to_string())];
        self.http
            .get_json::<OpenInterestResponse>(SOURCE, &url, &query)
            .await
            .map(|r| r.open_interest)
    }
}

fn strip_quote_suffix(symbol: &str) -> String {
    for suffix in QUOTE_SUFFIXES {
        if let Some(base) = symbol.strip_suffix(suffix) {
            return base.to_string();
        }
    }
    symbol.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn ranks_by_usd_open_interest_and_strips_quote_suffix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/exchangeInfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "symbols": [
                    {"symbol": "BTCUSDT", "contractType": "PERPETUAL", "status": "TRADING"},
                    {"symbol": "ETHUSDT", "contractType": "PERPETUAL", "status": "TRADING"},
                    {"symbol": "OLDUSDT", "contractType": "PERPETUAL", "status": "SETTLING"},
                    {"symbol": "BTCUSD_240628", "contractType": "CURRENT_QUARTER", "status": "TRADING"}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/ticker/price"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"symbol": "BTCUSDT", "price": "60000"},
                {"symbol": "ETHUSDT", "price": "3000"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/openInterest"))
            .and(query_param("symbol", "BTCUSDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"openInterest": "100", "symbol": "BTCUSDT"}),
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/openInterest"))
            .and(query_param("symbol", "ETHUSDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"openInterest": "5000", "symbol": "ETHUSDT"}),
            ))
            .mount(&server)
            .await;

        let store = FundingStore::new(":memory:").unwrap();
        let job = OpenInterestJob::with_base_url(&server.uri(), 10, 4).unwrap();
        let ranked = job.run(&store).await.unwrap();

        // ETH: 5000 * 3000 = 15M > BTC: 100 * 60000 = 6M
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].symbol, "ETH");
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[0].oi_usd, dec!(15000000));
        assert_eq!(ranked[1].symbol, "BTC");

        let stored = store.get_oi_ranking().unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].symbol, "ETH");
    }

    #[test]
    fn test_strip_quote_suffix() {
        assert_eq!(strip_quote_suffix("BTCUSDT"), "BTC");
        assert_eq!(strip_quote_suffix("ETHUSDC"), "ETH");
        assert_eq!(strip_quote_suffix("WEIRD"), "WEIRD");
    }
}
