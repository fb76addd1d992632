//! Scheduled incremental update cycle.
//!
//! Designed to run hourly from an external scheduler. Per exchange:
//! discover newly listed assets (short history pull), close gaps on
//! known assets (capped backfill after long downtime), and flag funding
//! interval changes. Exchanges fail independently — one venue's outage
//! bumps its failure streak and never blocks the rest of the cycle.

use crate::collector::bulk::BulkCollector;
use crate::collector::failure::FailureTracker;
use crate::config::CollectionConfig;
use crate::exchange::ExchangeAdapter;
use crate::store::FundingStore;
use anyhow::Result;
use chrono::Utc;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{error, info, warn};

const MS_PER_HOUR: i64 = 3_600_000;
const MS_PER_DAY: i64 = 86_400_000;
const INTERVAL_CHECK_DEPTH: usize = 10;
const SYMBOL_DELAY: Duration = Duration::from_millis(100);

/// Totals reported at the end of a cycle.
#[derive(Debug, Default)]
pub struct CycleSummary {
    pub records: usize,
    pub new_assets: Vec<String>,
    pub exchanges_ok: usize,
    pub exchanges_failed: usize,
}

#[derive(Debug, Default)]
struct ExchangeStats {
    records: usize,
    new_assets: Vec<String>,
}

/// Where a symbol's backfill should start, or `None` to skip it.
///
/// A fresh gap below the threshold is not worth a round-trip; a gap
/// beyond the cap is truncated to the cap; anything else resumes right
/// after the newest stored settlement. Unknown symbols get the short
/// new-asset history window.
fn resume_start(last_ts: Option<i64>, now_ms: i64, config: &CollectionConfig) -> Option<i64> {
    let Some(last_ts) = last_ts else {
        return Some(now_ms - i64::from(config.new_asset_history_days) * MS_PER_DAY);
    };

    let gap_ms = now_ms - last_ts;
    if gap_ms < config.gap_threshold_minutes * 60_000 {
        return None;
    }

    let max_ms = i64::from(config.max_backfill_days) * MS_PER_DAY;
    if gap_ms > max_ms {
        Some(now_ms - max_ms)
    } else {
        Some(last_ts + 1)
    }
}

/// Compare the two most recent observed funding intervals; a shift
/// larger than half an hour means the venue changed the symbol's
/// cadence. Input is settlement times, newest first.
fn interval_change(times_desc: &[i64]) -> Option<(f64, f64)> {
    if times_desc.len() < 3 {
        return None;
    }
    let intervals_h: Vec<f64> = times_desc
        .windows(2)
        .map(|w| (w[0] - w[1]) as f64 / MS_PER_HOUR as f64)
        .collect();
    let recent = intervals_h[0];
    let previous = intervals_h[1];
    if (recent - previous).abs() > 0.5 {
        Some((previous, recent))
    } else {
        None
    }
}

pub struct UpdateOrchestrator<'a> {
    store: &'a FundingStore,
    collector: BulkCollector<'a>,
    config: CollectionConfig,
    symbol_delay: Duration,
}

impl<'a> UpdateOrchestrator<'a> {
    pub fn new(store: &'a FundingStore, config: CollectionConfig) -> Self {
        Self {
            store,
            collector: BulkCollector::new(store),
            config,
            symbol_delay: SYMBOL_DELAY,
        }
    }

    #[cfg(test)]
    pub(crate) fn without_delays(mut self) -> Self {
        self.collector = self.collector.without_page_delay();
        self.symbol_delay = Duration::ZERO;
        self
    }

    /// Run one full update cycle over the given adapters.
    ///
    /// The failure tracker is loaded once, updated per exchange, and
    /// persisted once at the end so a crash mid-cycle loses at most one
    /// cycle's worth of streak updates.
    pub async fn run(&self, adapters: &[Box<dyn ExchangeAdapter>]) -> Result<CycleSummary> {
        info!("Starting update cycle");
        let now_ms = Utc::now().timestamp_millis();
        let mut tracker = FailureTracker::load(
            &self.config.failure_tracker_path,
            self.config.failure_threshold,
        );

        let mut summary = CycleSummary::default();
        for adapter in adapters {
            let name = adapter.name();
            if tracker.is_benched(name) {
                warn!(
                    "{}: benched after {} consecutive failures, retrying anyway",
                    name,
                    tracker.failure_count(name)
                );
            }

            info!("Checking {}...", name);
            match self.process_exchange(adapter.as_ref(), now_ms).await {
                Ok(stats) => {
                    summary.records += stats.records;
                    summary.new_assets.extend(stats.new_assets);
                    summary.exchanges_ok += 1;
                    tracker.record_success(name);
                }
                Err(e) => {
                    error!("{}: FAILED - {e:#}", name);
                    summary.exchanges_failed += 1;
                    tracker.record_failure(name);
                }
            }
        }

        if let Err(e) = tracker.persist() {
            warn!("Failed to persist failure tracker: {e:#}");
        }

        self.log_summary(&summary);
        Ok(summary)
    }

    /// Discover new assets and close gaps for one exchange. Any error
    /// here (listing or storage) counts one failure against the venue.
    async fn process_exchange(
        &self,
        adapter: &dyn ExchangeAdapter,
        now_ms: i64,
    ) -> Result<ExchangeStats> {
        let name = adapter.name();
        let mut stats = ExchangeStats::default();

        let api_symbols: BTreeSet<String> = adapter.list_symbols().await?.into_iter().collect();
        let db_symbols: BTreeSet<String> =
            self.store.get_symbols_for_exchange(name)?.into_iter().collect();
        let new_symbols: Vec<&String> = api_symbols.difference(&db_symbols).collect();

        info!(
            "{}: {} symbols on API, {} in DB{}",
            name,
            api_symbols.len(),
            db_symbols.len(),
            if new_symbols.is_empty() {
                String::new()
            } else {
                format!(" ({} NEW)", new_symbols.len())
            }
        );

        // New listings first: short history pull
        for symbol in &new_symbols {
            info!(
                "  {} {}: new asset, fetching {}-day history",
                name, symbol, self.config.new_asset_history_days
            );
            let count = self.backfill_symbol(adapter, symbol, now_ms).await?;
            info!("  {} {}: inserted {} historical records", name, symbol, count);
            stats.records += count;
            stats.new_assets.push((*symbol).clone());
            tokio::time::sleep(self.symbol_delay).await;
        }

        // Then gap-fill symbols present on both sides
        for symbol in api_symbols.intersection(&db_symbols) {
            let count = self.backfill_symbol(adapter, symbol, now_ms).await?;
            if count > 0 {
                info!("  {} {}: inserted {} new records", name, symbol, count);
                self.check_interval_change(name, symbol)?;
            }
            stats.records += count;
            tokio::time::sleep(self.symbol_delay).await;
        }

        Ok(stats)
    }

    async fn backfill_symbol(
        &self,
        adapter: &dyn ExchangeAdapter,
        symbol: &str,
        now_ms: i64,
    ) -> Result<usize> {
        let last_ts = self.store.get_latest_funding_time(adapter.name(), symbol)?;
        let Some(start_ms) = resume_start(last_ts, now_ms, &self.config) else {
            return Ok(0);
        };

        if let Some(last_ts) = last_ts {
            let gap_hours = (now_ms - last_ts) / MS_PER_HOUR;
            if now_ms - last_ts > i64::from(self.config.max_backfill_days) * MS_PER_DAY {
                info!(
                    "  {} {}: gap {}h exceeds {}d, capping backfill",
                    adapter.name(),
                    symbol,
                    gap_hours,
                    self.config.max_backfill_days
                );
            }
        }

        self.collector
            .collect_pair(adapter, symbol, start_ms, now_ms)
            .await
    }

    fn check_interval_change(&self, exchange: &str, symbol: &str) -> Result<()> {
        let times =
            self.store
                .get_distinct_funding_times(exchange, symbol, INTERVAL_CHECK_DEPTH)?;
        if let Some((previous, recent)) = interval_change(&times) {
            info!(
                "  Interval change detected: {} on {} ({:.1}h -> {:.1}h)",
                symbol, exchange, previous, recent
            );
        }
        Ok(())
    }

    fn log_summary(&self, summary: &CycleSummary) {
        let total = summary.exchanges_ok + summary.exchanges_failed;
        info!("Update cycle complete");
        info!("  Total records inserted: {}", summary.records);
        if !summary.new_assets.is_empty() {
            info!(
                "  New assets discovered: {} ({})",
                summary.new_assets.len(),
                summary.new_assets[..summary.new_assets.len().min(20)].join(", ")
            );
        }
        info!(
            "  Exchanges updated: {}/{}{}",
            summary.exchanges_ok,
            total,
            if summary.exchanges_failed > 0 {
                format!(" ({} failed)", summary.exchanges_failed)
            } else {
                String::new()
            }
        );
        let next_run = Utc::now() + chrono::Duration::hours(1);
        info!("  Next scheduled run: {}", next_run.format("%Y-%m-%d %H:%M:%S"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::types::FundingRecord;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    fn config() -> CollectionConfig {
        CollectionConfig::default()
    }

    #[test]
    fn test_fresh_data_is_skipped() {
        let now = 1_700_000_000_000;
        // 25 minutes old: under the 30-minute threshold
        assert_eq!(resume_start(Some(now - 25 * 60_000), now, &config()), None);
    }

    #[test]
    fn test_stale_data_resumes_after_last_settlement() {
        let now = 1_700_000_000_000;
        let last = now - 2 * MS_PER_HOUR;
        assert_eq!(resume_start(Some(last), now, &config()), Some(last + 1));
    }

    #[test]
    fn test_huge_gap_is_capped() {
        let now = 1_700_000_000_000;
        let last = now - 400 * MS_PER_DAY;
        assert_eq!(
            resume_start(Some(last), now, &config()),
            Some(now - 365 * MS_PER_DAY)
        );
    }

    #[test]
    fn test_new_asset_gets_short_history() {
        let now = 1_700_000_000_000;
        assert_eq!(
            resume_start(None, now, &config()),
            Some(now - 30 * MS_PER_DAY)
        );
    }

    #[test]
    fn test_interval_change_detection() {
        let h = MS_PER_HOUR;
        // 8h cadence shifted to 1h: newest-first [t, t-1h, t-9h, t-17h]
        let t = 1_700_000_000_000;
        let times = vec![t, t - h, t - 9 * h, t - 17 * h];
        assert_eq!(interval_change(&times), Some((8.0, 1.0)));

        // Steady 8h cadence
        let times = vec![t, t - 8 * h, t - 16 * h];
        assert_eq!(interval_change(&times), None);

        // Too little history
        assert_eq!(interval_change(&[t, t - h]), None);
    }

    /// Lists one known and one new symbol, serves a fixed series.
    struct FakeExchange {
        times: Vec<i64>,
    }

    #[async_trait]
    impl ExchangeAdapter for FakeExchange {
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
            Ok(vec!["BTC".to_string(), "NEW".to_string()])
        }
        async fn fetch_funding_history(
            &self,
            symbol: &str,
            start_time: Option<i64>,
            end_time: Option<i64>,
            _limit: usize,
        ) -> Result<Vec<FundingRecord>> {
            let start = start_time.unwrap_or(i64::MIN);
            let end = end_time.unwrap_or(i64::MAX);
            Ok(self
                .times
                .iter()
                .filter(|&&t| t >= start && t <= end)
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
    async fn cycle_pulls_new_asset_history_and_gap_fills_known_symbols() {
        let store = FundingStore::new(":memory:").unwrap();
        let now = Utc::now().timestamp_millis();

        // BTC is already tracked up to 2h ago; NEW has never been seen
        store
            .insert_funding_rates(&[FundingRecord {
                exchange: "fake".to_string(),
                symbol: "BTC".to_string(),
                funding_rate: dec!(0.0001),
                funding_time: now - 2 * MS_PER_HOUR,
                interval_hours: 8.0,
            }])
            .unwrap();

        let dir = std::env::temp_dir().join("fm-update-test");
        let mut cfg = config();
        cfg.failure_tracker_path = dir.join("tracker.json").to_string_lossy().into_owned();

        let adapter = FakeExchange {
            times: vec![now - MS_PER_HOUR, now - 30 * 60_000],
        };
        let adapters: Vec<Box<dyn ExchangeAdapter>> = vec![Box::new(adapter)];

        let orchestrator = UpdateOrchestrator::new(&store, cfg).without_delays();
        let summary = orchestrator.run(&adapters).await.unwrap();

        assert_eq!(summary.exchanges_ok, 1);
        assert_eq!(summary.new_assets, vec!["NEW".to_string()]);
        // NEW got both settlements, BTC got both newer than its stored row
        assert_eq!(summary.records, 4);
        assert_eq!(
            store.get_latest_funding_time("fake", "NEW").unwrap(),
            Some(now - 30 * 60_000)
        );
    }

    #[tokio::test]
    async fn listing_failure_counts_against_the_exchange() {
        struct BrokenExchange;

        #[async_trait]
        impl ExchangeAdapter for BrokenExchange {
            fn name(&self) -> &str {
                "broken"
            }
            fn interval_hours(&self) -> f64 {
                8.0
            }
            fn resolve_symbol(&self, base: &str) -> String {
                base.to_string()
            }
            async fn list_symbols(&self) -> Result<Vec<String>> {
                anyhow::bail!("listing down")
            }
            async fn fetch_funding_history(
                &self,
                _symbol: &str,
                _start_time: Option<i64>,
                _end_time: Option<i64>,
                _limit: usize,
            ) -> Result<Vec<FundingRecord>> {
                Ok(Vec::new())
            }
        }

        let store = FundingStore::new(":memory:").unwrap();
        let dir = std::env::temp_dir().join("fm-update-test-broken");
        let mut cfg = config();
        cfg.failure_tracker_path = dir.join("tracker.json").to_string_lossy().into_owned();
        let _ = std::fs::remove_file(&cfg.failure_tracker_path);

        let adapters: Vec<Box<dyn ExchangeAdapter>> = vec![Box::new(BrokenExchange)];
        let orchestrator = UpdateOrchestrator::new(&store, cfg.clone()).without_delays();

        let summary = orchestrator.run(&adapters).await.unwrap();
        assert_eq!(summary.exchanges_failed, 1);
        assert_eq!(summary.exchanges_ok, 0);

        let tracker = FailureTracker::load(&cfg.failure_tracker_path, cfg.failure_threshold);
        assert_eq!(tracker.failure_count("broken"), 1);
    }
}
