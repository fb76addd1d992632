//! Exchange adapters and the shared fetch plumbing.

pub mod binance;
pub mod bitget;
pub mod bybit;
pub mod hip3;
pub mod http;
pub mod hyperliquid;
pub mod lighter;
pub mod okx;
pub mod traits;
pub mod types;

pub use traits::ExchangeAdapter;
pub use types::{FetchStatus, FundingRecord};

use crate::config::ExchangesConfig;
use anyhow::Result;
use tracing::{info, warn};

/// Build the enabled static adapters plus any runtime-discovered HIP3
/// deployer sub-exchanges.
///
/// HIP3 discovery failure is logged and skipped rather than aborting the
/// run; the static venues are independent of it.
pub async fn build_enabled_adapters(
    exchanges: &ExchangesConfig,
) -> Result<Vec<Box<dyn ExchangeAdapter>>> {
    let mut adapters: Vec<Box<dyn ExchangeAdapter>> = Vec::new();

    if exchanges.binance {
        adapters.push(Box::new(binance::BinanceAdapter::new()?));
    }
    if exchanges.bybit {
        adapters.push(Box::new(bybit::BybitAdapter::new()?));
    }
    if exchanges.okx {
        adapters.push(Box::new(okx::OkxAdapter::new()?));
    }
    if exchanges.bitget {
        adapters.push(Box::new(bitget::BitgetAdapter::new()?));
    }
    if exchanges.hyperliquid {
        adapters.push(Box::new(hyperliquid::HyperliquidAdapter::new()?));
    }
    if exchanges.lighter {
        adapters.push(Box::new(lighter::LighterAdapter::new()?));
    }

    if exchanges.hip3 {
        match hip3::discover().await {
            Ok(discovered) => {
                for adapter in discovered {
                    adapters.push(Box::new(adapter));
                }
            }
            Err(e) => warn!("HIP3 discovery failed, continuing without: {e:#}"),
        }
    }

    info!(
        "Active exchanges: {}",
        adapters
            .iter()
            .map(|a| a.name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(adapters)
}

/// Drop HIP3 sub-exchanges whose deployer is not on the allow-list.
/// Static venues pass through untouched; bulk backfill skips this
/// filter and takes every discovered deployer.
pub fn retain_allowed_hip3(
    adapters: Vec<Box<dyn ExchangeAdapter>>,
    allowed: &[String],
) -> Vec<Box<dyn ExchangeAdapter>> {
    adapters
        .into_iter()
        .filter(|adapter| match adapter.name().strip_prefix("hl-") {
            Some(deployer) => {
                let keep = allowed.iter().any(|a| a == deployer);
                if !keep {
                    info!("Skipping {} (not in allowed deployers)", adapter.name());
                }
                keep
            }
            None => true,
        })
        .collect()
}
