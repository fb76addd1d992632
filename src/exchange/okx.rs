//! OKX perpetual swap funding rate adapter.
//!
//! Single-page primitive capped at 100 rows with a `before` cursor; the
//! small page size means the collector loop makes more round-trips here
//! than on venues with 1000-row pages.

use crate::exchange::http::HttpCore;
use crate::exchange::traits::ExchangeAdapter;
use crate::exchange::types::{make_record, FundingRecord};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

const BASE_URL: &str = "https://www.okx.com";

pub const NAME: &str = "okx";
const INTERVAL_HOURS: f64 = 8.0;
const PAGE_SIZE: usize = 100;

pub struct OkxAdapter {
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
#[serde(rename_all = "camelCase")]
struct InstrumentInfo {
    inst_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFundingRate {
    funding_rate: Decimal,
    funding_time: String,
}

impl OkxAdapter {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: HttpCore::new().context("Failed to create OKX HTTP core")?,
            base_url: base_url.to_string(),
        })
    }
}

#[async_trait]
impl ExchangeAdapter for OkxAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn interval_hours(&self) -> f64 {
        INTERVAL_HOURS
    }

    fn resolve_symbol(&self, base: &str) -> String {
        format!("{base}-USDT-SWAP")
    }

    async fn list_symbols(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/v5/public/instruments", self.base_url);
        let query = [("instType", "SWAP".to_string())];
        let Some(envelope) = self
            .http
            .get_json::<Envelope<InstrumentInfo>>(NAME, &url, &query)
            .await
        else {
            bail!("[{NAME}] instruments listing unavailable");
        };
        if envelope.code != "0" {
            bail!("[{NAME}] instruments listing code {}", envelope.code);
        }

        let mut symbols: Vec<String> = envelope
            .data
            .into_iter()
            .filter_map(|i| i.inst_id.strip_suffix("-USDT-SWAP").map(str::to_string))
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
        let inst_id = self.resolve_symbol(symbol);
        let url = format!("{}/api/v5/public/funding-rate-history", self.base_url);

        let mut query = vec![
            ("instId", inst_id),
            ("limit", limit.min(PAGE_SIZE).to_string()),
        ];
        if let Some(end) = end_time {
            query.push(("before", end.to_string()));
        }

        let Some(envelope) = self
            .http
            .get_json::<Envelope<WireFundingRate>>(NAME, &url, &query)
            .await
        else {
            return Ok(Vec::new());
        };
        if envelope.code != "0" {
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

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn parses_string_timestamps() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v5/public/funding-rate-history"))
            .and(query_param("instId", "BTC-USDT-SWAP"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": "0",
                "data": [
                    {"fundingRate": "0.0001", "fundingTime": "1700000000000"},
                    {"fundingRate": "0.0002", "fundingTime": "garbage"}
                ]
            })))
            .mount(&server)
            .await;

        let adapter = OkxAdapter::with_base_url(&server.uri()).unwrap();
        let records = adapter
            .fetch_funding_history("BTC", None, None, 100)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].funding_time, 1_700_000_000_000);
    }
}
