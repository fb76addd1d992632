//! Venue-agnostic adapter contract for funding-history sources.
//!
//! One concrete adapter per exchange encapsulates that venue's wire
//! protocol for symbol discovery and funding-history retrieval, plus its
//! pagination direction and cursor semantics. Forward-paginating venues
//! expose a single page-fetch primitive and let the collector loop drive
//! the cursor; newest-first venues (Bybit, Lighter) converge backward
//! internally and return an ascending, range-filtered batch.

use crate::exchange::types::FundingRecord;
use async_trait::async_trait;

/// Contract every exchange variant implements.
///
/// `list_symbols` failures surface as errors so the update cycle can count
/// them against the exchange's failure streak. `fetch_funding_history`
/// returns `Ok(vec![])` when retries were exhausted — callers must treat
/// an empty page as "try again later", never as confirmed absence of data.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Exchange id used as the storage key (e.g. "binance", "hl-xyz").
    fn name(&self) -> &str;

    /// Advertised time between funding settlements.
    fn interval_hours(&self) -> f64;

    /// Convert a normalized base symbol (BTC) to the venue's native
    /// market identifier (BTCUSDT, BTC-USDT-SWAP, xyz:TSLA, ...).
    fn resolve_symbol(&self, base: &str) -> String;

    /// Query the venue's instrument listing, filtered to active linear
    /// perpetuals in the quote asset, as normalized base symbols.
    async fn list_symbols(&self) -> anyhow::Result<Vec<String>>;

    /// Fetch funding history for one symbol. `start_time`/`end_time` are
    /// millisecond epochs; `limit` caps the page size where the venue
    /// supports it.
    async fn fetch_funding_history(
        &self,
        symbol: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: usize,
    ) -> anyhow::Result<Vec<FundingRecord>>;
}
