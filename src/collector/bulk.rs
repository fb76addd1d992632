//! Bulk backfill across all enabled exchanges.
//!
//! Runs once at bootstrap: optionally discovers the symbol universe as
//! the union of every venue's listing, then walks each (exchange,
//! symbol) pair sequentially with the shared forward pagination loop.
//! Resume is free — the loop starts from the newest stored settlement,
//! so an interrupted run picks up where it stopped.

use crate::exchange::ExchangeAdapter;
use crate::exchange::types::FetchStatus;
use crate::store::FundingStore;
use anyhow::Result;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{error, info, warn};

const MAX_PAGES: usize = 500;
const PAGE_LIMIT: usize = 1000;
const PAGE_DELAY: Duration = Duration::from_millis(200);
const HISTORY_ENDPOINT: &str = "fetch_funding_history";

pub struct BulkCollector<'a> {
    store: &'a FundingStore,
    page_delay: Duration,
}

impl<'a> BulkCollector<'a> {
    pub fn new(store: &'a FundingStore) -> Self {
        Self {
            store,
            page_delay: PAGE_DELAY,
        }
    }

    #[cfg(test)]
    pub(crate) fn without_page_delay(mut self) -> Self {
        self.page_delay = Duration::ZERO;
        self
    }

    /// Resolve the symbol set for a bootstrap run: an explicit list wins,
    /// `discover` forces a fresh union, otherwise the configured list is
    /// used when present and discovery is the last resort.
    pub async fn resolve_symbols(
        adapters: &[Box<dyn ExchangeAdapter>],
        explicit: Vec<String>,
        discover: bool,
        configured: Option<&Vec<String>>,
    ) -> Vec<String> {
        if !explicit.is_empty() {
            return explicit;
        }
        if !discover {
            if let Some(configured) = configured.filter(|s| !s.is_empty()) {
                info!("Using {} configured symbols", configured.len());
                return configured.clone();
            }
        }
        Self::discover_all_symbols(adapters).await
    }

    /// Union of every adapter's listed symbols. A venue whose listing
    /// fails contributes nothing but does not abort discovery.
    pub async fn discover_all_symbols(adapters: &[Box<dyn ExchangeAdapter>]) -> Vec<String> {
        let mut all: BTreeSet<String> = BTreeSet::new();
        for adapter in adapters {
            match adapter.list_symbols().await {
                Ok(symbols) => {
                    info!("[{}] Discovered {} symbols", adapter.name(), symbols.len());
                    all.extend(symbols);
                }
                Err(e) => error!("[{}] Failed to discover symbols: {e:#}", adapter.name()),
            }
        }
        info!("Total unique symbols across all exchanges: {}", all.len());
        all.into_iter().collect()
    }

    /// Backfill every (adapter, symbol) pair over [start_time, end_time].
    /// Returns the total records inserted.
    pub async fn collect_all(
        &self,
        adapters: &[Box<dyn ExchangeAdapter>],
        symbols: &[String],
        start_time: i64,
        end_time: i64,
    ) -> Result<usize> {
        if symbols.is_empty() {
            warn!("No symbols to collect; pass --discover or an explicit list");
            return Ok(0);
        }

        info!(
            "Collecting {} symbols from {} exchanges",
            symbols.len(),
            adapters.len()
        );

        let mut total = 0;
        for adapter in adapters {
            for symbol in symbols {
                total += self
                    .collect_pair(adapter.as_ref(), symbol, start_time, end_time)
                    .await?;
            }
        }
        Ok(total)
    }

    /// Paginate one (exchange, symbol) pair forward and persist the
    /// result. A fetch error ends the pair's pagination but keeps the
    /// pages already collected; only storage errors propagate.
    pub async fn collect_pair(
        &self,
        adapter: &dyn ExchangeAdapter,
        symbol: &str,
        start_time: i64,
        end_time: i64,
    ) -> Result<usize> {
        let name = adapter.name();

        // Resume past what is already stored
        let mut cursor = start_time;
        if let Some(latest) = self.store.get_latest_funding_time(name, symbol)? {
            if latest >= cursor {
                cursor = latest + 1;
            }
        }

        let mut collected = Vec::new();
        for _ in 0..MAX_PAGES {
            let page = match adapter
                .fetch_funding_history(symbol, Some(cursor), Some(end_time), PAGE_LIMIT)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    error!("[{}] {}: fetch error: {e:#}", name, symbol);
                    self.store.log_fetch(
                        name,
                        symbol,
                        HISTORY_ENDPOINT,
                        FetchStatus::Error,
                        collected.len(),
                        Some(&format!("{e:#}")),
                    )?;
                    break;
                }
            };
            if page.is_empty() {
                break;
            }

            let newest = page.iter().map(|r| r.funding_time).max().unwrap_or(cursor);
            collected.extend(page);

            // Converged on the window end, or the venue ignored our cursor
            if newest >= end_time - 1000 || newest <= cursor {
                break;
            }
            cursor = newest + 1;

            tokio::time::sleep(self.page_delay).await;
        }

        if collected.is_empty() {
            self.store
                .log_fetch(name, symbol, HISTORY_ENDPOINT, FetchStatus::Empty, 0, None)?;
            return Ok(0);
        }

        let inserted = self.store.insert_funding_rates(&collected)?;
        self.store.log_fetch(
            name,
            symbol,
            HISTORY_ENDPOINT,
            FetchStatus::Success,
            inserted,
            None,
        )?;
        info!("[{}] {}: inserted {} records", name, symbol, inserted);
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::types::FundingRecord;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    /// Serves a fixed ascending series one slice at a time, like a
    /// forward-paginating venue with a small page size.
    struct PagedFake {
        times: Vec<i64>,
        page_size: usize,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl ExchangeAdapter for PagedFake {
        fn name(&self) -> &str {
            "fake"
        }
        fn interval_hours(&self) -> f64 {
            8.0
        }
        fn resolve_symbol(&self, base: &str) -> String {
            base.to_string()
        }
        async fn list_symbols(&self) -> Result<Vec<String>> {
            Ok(vec!["BTC".to_string()])
        }
        async fn fetch_funding_history(
            &self,
            symbol: &str,
            start_time: Option<i64>,
            end_time: Option<i64>,
            _limit: usize,
        ) -> Result<Vec<FundingRecord>> {
            *self.calls.lock().unwrap() += 1;
            let start = start_time.unwrap_or(i64::MIN);
            let end = end_time.unwrap_or(i64::MAX);
            Ok(self
                .times
                .iter()
                .filter(|&&t| t >= start && t <= end)
                .take(self.page_size)
                .map(|&t| FundingRecord {
                    exchange: "fake".to_string(),
                    symbol: symbol.to_string(),
                    funding_rate: dec!(0.0001),
                    funding_time: t,
                    interval_hours: 8.0,
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn paginates_to_window_end_and_resumes_from_stored_data() {
        let store = FundingStore::new(":memory:").unwrap();
        let adapter = PagedFake {
            times: vec![10_000, 20_000, 30_000, 40_000, 50_000],
            page_size: 2,
            calls: Mutex::new(0),
        };
        let collector = BulkCollector::new(&store).without_page_delay();

        let inserted = collector
            .collect_pair(&adapter, "BTC", 0, 60_000)
            .await
            .unwrap();
        assert_eq!(inserted, 5);
        assert_eq!(
            store.get_latest_funding_time("fake", "BTC").unwrap(),
            Some(50_000)
        );

        // Second run resumes past 50_000 and finds nothing new
        let inserted = collector
            .collect_pair(&adapter, "BTC", 0, 60_000)
            .await
            .unwrap();
        assert_eq!(inserted, 0);
    }

    #[tokio::test]
    async fn symbol_resolution_prefers_explicit_then_config_then_discovery() {
        let adapters: Vec<Box<dyn ExchangeAdapter>> = vec![Box::new(PagedFake {
            times: vec![],
            page_size: 2,
            calls: Mutex::new(0),
        })];
        let configured = vec!["ETH".to_string(), "SOL".to_string()];

        // Explicit list wins over everything
        let symbols = BulkCollector::resolve_symbols(
            &adapters,
            vec!["DOGE".to_string()],
            false,
            Some(&configured),
        )
        .await;
        assert_eq!(symbols, vec!["DOGE"]);

        // No explicit list: the configured fallback is used as-is
        let symbols =
            BulkCollector::resolve_symbols(&adapters, Vec::new(), false, Some(&configured)).await;
        assert_eq!(symbols, vec!["ETH", "SOL"]);

        // Discovery overrides the configured list
        let symbols =
            BulkCollector::resolve_symbols(&adapters, Vec::new(), true, Some(&configured)).await;
        assert_eq!(symbols, vec!["BTC"]);

        // Nothing configured at all: discovery is the last resort
        let symbols = BulkCollector::resolve_symbols(&adapters, Vec::new(), false, None).await;
        assert_eq!(symbols, vec!["BTC"]);
    }

    #[tokio::test]
    async fn stops_on_no_progress_cursor() {
        let store = FundingStore::new(":memory:").unwrap();
        // Single settlement far from the window end: the second page
        // would repeat it, so the loop must stop on no progress.
        let adapter = PagedFake {
            times: vec![10_000],
            page_size: 2,
            calls: Mutex::new(0),
        };
        let collector = BulkCollector::new(&store).without_page_delay();

        let inserted = collector
            .collect_pair(&adapter, "BTC", 10_000, 99_000_000)
            .await
            .unwrap();
        assert_eq!(inserted, 1);
        assert!(*adapter.calls.lock().unwrap() <= 2);
    }
}
