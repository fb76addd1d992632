//! SQLite storage for collected funding data.
//!
//! One row per (exchange, symbol, funding_time); re-fetching a settled
//! window upserts instead of duplicating, so collection runs are
//! idempotent. Rates are stored as TEXT to keep `Decimal` precision
//! through the round-trip. A fetch log records every collection attempt
//! and an `oi_data` table holds the latest open-interest ranking.

use crate::exchange::types::{FetchStatus, FundingRecord};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// One open-interest ranking row.
#[derive(Debug, Clone)]
pub struct OiRecord {
    pub symbol: String,
    pub open_interest: Decimal,
    pub oi_usd: Decimal,
    pub price: Decimal,
    pub rank: u32,
}

/// Per-exchange record counts and freshness, for cycle summaries.
#[derive(Debug, Clone)]
pub struct ExchangeStatus {
    pub exchange: String,
    pub symbols: u64,
    pub records: u64,
    pub latest_funding_time: Option<i64>,
}

/// SQLite-backed funding rate store.
pub struct FundingStore {
    conn: Connection,
}

impl FundingStore {
    /// Open (or create) the database and initialize the schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let store = Self { conn };
        store.init_schema()?;

        info!("Funding store initialized at {:?}", db_path.as_ref());
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- Settled funding rates, one row per settlement
            CREATE TABLE IF NOT EXISTS funding_rates (
                exchange TEXT NOT NULL,
                symbol TEXT NOT NULL,
                funding_time INTEGER NOT NULL,
                funding_rate TEXT NOT NULL,
                interval_hours REAL NOT NULL,
                fetched_at INTEGER NOT NULL,
                PRIMARY KEY (exchange, symbol, funding_time)
            );
            CREATE INDEX IF NOT EXISTS idx_rates_symbol_time
                ON funding_rates(symbol, funding_time);

            -- Collection attempt audit trail
            CREATE TABLE IF NOT EXISTS fetch_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                fetched_at INTEGER NOT NULL,
                exchange TEXT NOT NULL,
                symbol TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                status TEXT NOT NULL,
                records INTEGER NOT NULL,
                message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_fetch_log_exchange
                ON fetch_log(exchange, fetched_at);

            -- Latest open-interest ranking (replaced wholesale each run)
            CREATE TABLE IF NOT EXISTS oi_data (
                symbol TEXT PRIMARY KEY,
                open_interest TEXT NOT NULL,
                oi_usd TEXT NOT NULL,
                price TEXT NOT NULL,
                rank INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Upsert a batch of funding records in one transaction.
    ///
    /// Returns the number of rows written. Conflicting rows are updated
    /// in place, so replaying an overlapping window is harmless.
    pub fn insert_funding_rates(&self, records: &[FundingRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let fetched_at = Utc::now().timestamp_millis();
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                r#"
                INSERT INTO funding_rates
                    (exchange, symbol, funding_time, funding_rate, interval_hours, fetched_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(exchange, symbol, funding_time) DO UPDATE SET
                    funding_rate = excluded.funding_rate,
                    interval_hours = excluded.interval_hours,
                    fetched_at = excluded.fetched_at
                "#,
            )?;
            for rec in records {
                stmt.execute(params![
                    rec.exchange,
                    rec.symbol,
                    rec.funding_time,
                    rec.funding_rate.to_string(),
                    rec.interval_hours,
                    fetched_at,
                ])?;
            }
        }
        tx.commit()?;

        Ok(records.len())
    }

    /// Newest stored settlement time for one (exchange, symbol).
    pub fn get_latest_funding_time(&self, exchange: &str, symbol: &str) -> Result<Option<i64>> {
        let latest = self
            .conn
            .query_row(
                "SELECT MAX(funding_time) FROM funding_rates WHERE exchange = ?1 AND symbol = ?2",
                params![exchange, symbol],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?
            .flatten();
        Ok(latest)
    }

    /// Stored rates for one (exchange, symbol) in a window, ascending.
    pub fn get_funding_rates(
        &self,
        exchange: &str,
        symbol: &str,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<FundingRecord>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT exchange, symbol, funding_rate, funding_time, interval_hours
            FROM funding_rates
            WHERE exchange = ?1 AND symbol = ?2
              AND funding_time >= ?3 AND funding_time <= ?4
            ORDER BY funding_time ASC
            "#,
        )?;

        let rows = stmt
            .query_map(params![exchange, symbol, start_time, end_time], |row| {
                Ok(FundingRecord {
                    exchange: row.get(0)?,
                    symbol: row.get(1)?,
                    funding_rate: Decimal::from_str(&row.get::<_, String>(2)?)
                        .unwrap_or_default(),
                    funding_time: row.get(3)?,
                    interval_hours: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Exchanges holding data for a symbol, sorted by id.
    pub fn get_exchanges_for_symbol(&self, symbol: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT DISTINCT exchange FROM funding_rates WHERE symbol = ?1 ORDER BY exchange ASC",
        )?;
        let exchanges = stmt
            .query_map(params![symbol], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(exchanges)
    }

    /// The exchange whose settlements anchor normalization for a symbol:
    /// the one with the longest nominal interval, ties broken by
    /// exchange id ascending.
    pub fn get_reference_exchange(&self, symbol: &str) -> Result<Option<(String, f64)>> {
        let reference = self
            .conn
            .query_row(
                r#"
                SELECT exchange, MAX(interval_hours)
                FROM funding_rates
                WHERE symbol = ?1
                GROUP BY exchange
                ORDER BY MAX(interval_hours) DESC, exchange ASC
                LIMIT 1
                "#,
                params![symbol],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(reference)
    }

    /// Settlement times for one (exchange, symbol) in a window, ascending.
    pub fn get_funding_times(
        &self,
        exchange: &str,
        symbol: &str,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT funding_time
            FROM funding_rates
            WHERE exchange = ?1 AND symbol = ?2
              AND funding_time >= ?3 AND funding_time <= ?4
            ORDER BY funding_time ASC
            "#,
        )?;
        let times = stmt
            .query_map(params![exchange, symbol, start_time, end_time], |row| {
                row.get(0)
            })?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(times)
    }

    /// Most recent distinct settlement times for one (exchange, symbol),
    /// newest first. Feeds interval-change detection.
    pub fn get_distinct_funding_times(
        &self,
        exchange: &str,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT DISTINCT funding_time
            FROM funding_rates
            WHERE exchange = ?1 AND symbol = ?2
            ORDER BY funding_time DESC
            LIMIT ?3
            "#,
        )?;
        let times = stmt
            .query_map(params![exchange, symbol, limit], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(times)
    }

    /// Symbols already tracked for an exchange, sorted.
    pub fn get_symbols_for_exchange(&self, exchange: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT DISTINCT symbol FROM funding_rates WHERE exchange = ?1 ORDER BY symbol ASC",
        )?;
        let symbols = stmt
            .query_map(params![exchange], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(symbols)
    }

    /// Append one collection attempt to the audit trail. `endpoint` is
    /// the adapter operation that produced the attempt.
    pub fn log_fetch(
        &self,
        exchange: &str,
        symbol: &str,
        endpoint: &str,
        status: FetchStatus,
        records: usize,
        message: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO fetch_log (fetched_at, exchange, symbol, endpoint, status, records, message)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                Utc::now().timestamp_millis(),
                exchange,
                symbol,
                endpoint,
                status.as_str(),
                records,
                message,
            ],
        )?;
        Ok(())
    }

    /// Most recent collection attempt across all exchanges.
    pub fn get_last_update_time(&self) -> Result<Option<i64>> {
        let last = self
            .conn
            .query_row("SELECT MAX(fetched_at) FROM fetch_log", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .optional()?
            .flatten();
        Ok(last)
    }

    /// Replace the open-interest ranking with a fresh top-N batch.
    pub fn replace_oi_data(&self, records: &[OiRecord]) -> Result<()> {
        let updated_at = Utc::now().timestamp_millis();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM oi_data", [])?;
        {
            let mut stmt = tx.prepare_cached(
                r#"
                INSERT INTO oi_data (symbol, open_interest, oi_usd, price, rank, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for rec in records {
                stmt.execute(params![
                    rec.symbol,
                    rec.open_interest.to_string(),
                    rec.oi_usd.to_string(),
                    rec.price.to_string(),
                    rec.rank,
                    updated_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Current open-interest ranking, best rank first.
    pub fn get_oi_ranking(&self) -> Result<Vec<OiRecord>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT symbol, open_interest, oi_usd, price, rank
            FROM oi_data
            ORDER BY rank ASC
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(OiRecord {
                    symbol: row.get(0)?,
                    open_interest: Decimal::from_str(&row.get::<_, String>(1)?)
                        .unwrap_or_default(),
                    oi_usd: Decimal::from_str(&row.get::<_, String>(2)?).unwrap_or_default(),
                    price: Decimal::from_str(&row.get::<_, String>(3)?).unwrap_or_default(),
                    rank: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Per-exchange counts and freshness.
    pub fn get_exchange_status(&self) -> Result<Vec<ExchangeStatus>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT exchange, COUNT(DISTINCT symbol), COUNT(*), MAX(funding_time)
            FROM funding_rates
            GROUP BY exchange
            ORDER BY exchange ASC
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ExchangeStatus {
                    exchange: row.get(0)?,
                    symbols: row.get(1)?,
                    records: row.get(2)?,
                    latest_funding_time: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Total stored funding rows.
    pub fn get_total_records(&self) -> Result<u64> {
        let total = self
            .conn
            .query_row("SELECT COUNT(*) FROM funding_rates", [], |row| row.get(0))?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record(exchange: &str, symbol: &str, time: i64, rate: Decimal) -> FundingRecord {
        FundingRecord {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            funding_rate: rate,
            funding_time: time,
            interval_hours: if exchange == "binance" { 8.0 } else { 1.0 },
        }
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let store = FundingStore::new(":memory:").unwrap();

        let batch = vec![
            record("binance", "BTC", 1_000, dec!(0.0001)),
            record("binance", "BTC", 2_000, dec!(0.0002)),
        ];
        store.insert_funding_rates(&batch).unwrap();
        // Replay with a corrected rate for the same settlement
        let replay = vec![record("binance", "BTC", 2_000, dec!(0.0003))];
        store.insert_funding_rates(&replay).unwrap();

        assert_eq!(store.get_total_records().unwrap(), 2);
        let rows = store.get_funding_rates("binance", "BTC", 0, 10_000).unwrap();
        assert_eq!(rows[1].funding_rate, dec!(0.0003));
    }

    #[test]
    fn test_latest_funding_time() {
        let store = FundingStore::new(":memory:").unwrap();
        assert_eq!(store.get_latest_funding_time("binance", "BTC").unwrap(), None);

        store
            .insert_funding_rates(&[
                record("binance", "BTC", 1_000, dec!(0.0001)),
                record("binance", "BTC", 5_000, dec!(0.0001)),
            ])
            .unwrap();
        assert_eq!(
            store.get_latest_funding_time("binance", "BTC").unwrap(),
            Some(5_000)
        );
    }

    #[test]
    fn test_reference_exchange_prefers_longest_interval_then_id() {
        let store = FundingStore::new(":memory:").unwrap();
        store
            .insert_funding_rates(&[
                record("hyperliquid", "BTC", 1_000, dec!(0.0001)),
                record("binance", "BTC", 1_000, dec!(0.0001)),
            ])
            .unwrap();

        let (exchange, interval) = store.get_reference_exchange("BTC").unwrap().unwrap();
        assert_eq!(exchange, "binance");
        assert_eq!(interval, 8.0);

        // Two 8h exchanges tie: lexicographically smaller id wins
        store
            .insert_funding_rates(&[FundingRecord {
                exchange: "bybit".to_string(),
                symbol: "ETH".to_string(),
                funding_rate: dec!(0.0001),
                funding_time: 1_000,
                interval_hours: 8.0,
            }])
            .unwrap();
        store
            .insert_funding_rates(&[FundingRecord {
                exchange: "okx".to_string(),
                symbol: "ETH".to_string(),
                funding_rate: dec!(0.0001),
                funding_time: 1_000,
                interval_hours: 8.0,
            }])
            .unwrap();
        let (exchange, _) = store.get_reference_exchange("ETH").unwrap().unwrap();
        assert_eq!(exchange, "bybit");
    }

    #[test]
    fn test_fetch_log_and_status() {
        let store = FundingStore::new(":memory:").unwrap();
        assert_eq!(store.get_last_update_time().unwrap(), None);

        store
            .insert_funding_rates(&[record("binance", "BTC", 1_000, dec!(0.0001))])
            .unwrap();
        store
            .log_fetch(
                "binance",
                "BTC",
                "fetch_funding_history",
                FetchStatus::Success,
                1,
                None,
            )
            .unwrap();

        let status = store.get_exchange_status().unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].exchange, "binance");
        assert_eq!(status[0].records, 1);
        assert_eq!(status[0].latest_funding_time, Some(1_000));
        assert!(store.get_last_update_time().unwrap().is_some());
    }

    #[test]
    fn test_oi_ranking_replaced_wholesale() {
        let store = FundingStore::new(":memory:").unwrap();
        store
            .replace_oi_data(&[OiRecord {
                symbol: "BTCUSDT".to_string(),
                open_interest: dec!(90000),
                oi_usd: dec!(5400000000),
                price: dec!(60000),
                rank: 1,
            }])
            .unwrap();
        store
            .replace_oi_data(&[OiRecord {
                symbol: "ETHUSDT".to_string(),
                open_interest: dec!(800000),
                oi_usd: dec!(2400000000),
                price: dec!(3000),
                rank: 1,
            }])
            .unwrap();

        let ranking = store.get_oi_ranking().unwrap();
        assert_eq!(ranking.len(), 1);
        assert_eq!(ranking[0].symbol, "ETHUSDT");
    }
}
