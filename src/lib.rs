//! # Funding Matrix
//!
//! Cross-exchange perpetual funding rate collector: pulls settled
//! funding rates from centralized and on-chain venues, persists them
//! into an idempotent SQLite time series, and normalizes heterogeneous
//! settlement cadences into a common comparison window.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Per-venue adapters and the shared retrying HTTP core
//! - `store`: SQLite persistence (funding rates, fetch log, OI ranking)
//! - `collector`: Bulk backfill and the scheduled incremental update cycle
//! - `normalizer`: Cross-exchange time normalization and APR helpers
//! - `oi`: Binance open-interest ranking job

pub mod collector;
pub mod config;
pub mod exchange;
pub mod normalizer;
pub mod oi;
pub mod store;

pub use config::Config;
