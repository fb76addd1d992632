//! Hyperliquid HIP3 deployer sub-exchange adapters.
//!
//! Each HIP3 deployer (xyz, cash, ...) runs its own perp markets on the
//! shared Hyperliquid API, keyed by `"<deployer>:<asset>"` coins. The
//! deployer set and each deployer's active market list are discovered at
//! runtime via a two-step listing call, producing one adapter instance
//! per deployer rather than a compile-time type per deployer.

use crate::exchange::http::HttpCore;
use crate::exchange::hyperliquid::{self, InfoRequest, Meta};
use crate::exchange::traits::ExchangeAdapter;
use crate::exchange::types::FundingRecord;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, info};

const INTERVAL_HOURS: f64 = 1.0;

/// One active market on a deployer: the API coin ("xyz:TSLA") and the
/// normalized asset ("TSLA").
#[derive(Debug, Clone)]
pub struct Hip3Market {
    pub coin: String,
    pub asset: String,
}

pub struct Hip3Adapter {
    http: HttpCore,
    base_url: String,
    deployer: String,
    name: String,
    markets: Vec<Hip3Market>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DexEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    full_name: String,
}

fn split_market(coin: &str) -> Hip3Market {
    let asset = coin.split_once(':').map_or(coin, |(_, asset)| asset);
    Hip3Market {
        coin: coin.to_string(),
        asset: asset.to_string(),
    }
}

async fn fetch_deployer_markets(
    http: &HttpCore,
    base_url: &str,
    deployer: &str,
) -> Result<Vec<Hip3Market>> {
    let url = format!("{base_url}/info");
    let request = InfoRequest::Meta {
        dex: Some(deployer.to_string()),
    };
    let Some(meta) = http.post_json::<Meta, _>(deployer, &url, &request).await else {
        bail!("[hl-{deployer}] meta unavailable");
    };

    Ok(meta
        .universe
        .into_iter()
        .filter(|u| !u.is_delisted)
        .map(|u| split_market(&u.name))
        .collect())
}

/// Discover all HIP3 deployers and build one adapter per deployer.
///
/// Deployers whose market listing fails are kept with an empty market
/// list; their symbols resolve lazily on the next `list_symbols` call.
pub async fn discover_adapters(base_url: &str) -> Result<Vec<Hip3Adapter>> {
    let http = HttpCore::new().context("Failed to create HIP3 HTTP core")?;
    let url = format!("{base_url}/info");

    // The main dex appears as a null entry; skip it.
    let Some(dexs) = http
        .post_json::<Vec<Option<DexEntry>>, _>("hip3", &url, &InfoRequest::PerpDexs)
        .await
    else {
        bail!("perpDexs listing unavailable");
    };

    let mut adapters = Vec::new();
    for entry in dexs.into_iter().flatten() {
        if entry.name.is_empty() {
            continue;
        }
        let markets = match fetch_deployer_markets(&http, base_url, &entry.name).await {
            Ok(markets) => {
                info!(
                    "HIP3 deployer '{}' ({}): {} active markets",
                    entry.name,
                    entry.full_name,
                    markets.len()
                );
                markets
            }
            Err(e) => {
                error!("Failed to fetch markets for dex={}: {e:#}", entry.name);
                Vec::new()
            }
        };
        adapters.push(Hip3Adapter {
            http: http.clone(),
            base_url: base_url.to_string(),
            name: format!("hl-{}", entry.name),
            deployer: entry.name,
            markets,
        });
    }

    Ok(adapters)
}

/// Discover adapters on the production API.
pub async fn discover() -> Result<Vec<Hip3Adapter>> {
    discover_adapters(hyperliquid::BASE_URL).await
}

impl Hip3Adapter {
    /// Deployer id without the "hl-" exchange prefix.
    pub fn deployer(&self) -> &str {
        &self.deployer
    }
}

#[async_trait]
impl ExchangeAdapter for Hip3Adapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval_hours(&self) -> f64 {
        INTERVAL_HOURS
    }

    fn resolve_symbol(&self, base: &str) -> String {
        format!("{}:{}", self.deployer, base)
    }

    async fn list_symbols(&self) -> Result<Vec<String>> {
        let markets = if self.markets.is_empty() {
            fetch_deployer_markets(&self.http, &self.base_url, &self.deployer).await?
        } else {
            self.markets.clone()
        };

        let mut symbols: Vec<String> = markets.into_iter().map(|m| m.asset).collect();
        symbols.sort();
        symbols.dedup();
        Ok(symbols)
    }

    async fn fetch_funding_history(
        &self,
        symbol: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
        _limit: usize,
    ) -> Result<Vec<FundingRecord>> {
        hyperliquid::fetch_history(
            &self.http,
            &self.base_url,
            &self.name,
            symbol,
            self.resolve_symbol(symbol),
            start_time,
            end_time,
            self.interval_hours(),
        )
        .await
    }
}
