//! Consecutive-failure tracking across update cycles.
//!
//! Counts survive process restarts via a small JSON file. An exchange
//! that fails `threshold` cycles in a row is benched until a cycle
//! succeeds for it again; one success clears the streak entirely.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrackerState {
    #[serde(default)]
    failures: BTreeMap<String, u32>,
}

#[derive(Debug)]
pub struct FailureTracker {
    path: PathBuf,
    threshold: u32,
    state: TrackerState,
}

impl FailureTracker {
    /// Load tracker state from disk; a missing or unreadable file starts
    /// a fresh tracker rather than failing the cycle.
    pub fn load<P: AsRef<Path>>(path: P, threshold: u32) -> Self {
        let path = path.as_ref().to_path_buf();
        let state = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Failure tracker at {:?} is corrupt, resetting: {}", path, e);
                TrackerState::default()
            }),
            Err(_) => TrackerState::default(),
        };
        Self {
            path,
            threshold,
            state,
        }
    }

    /// Write the current state back to disk. Called once per cycle after
    /// all exchanges are processed.
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let raw = serde_json::to_string_pretty(&self.state)
            .context("Failed to serialize failure tracker")?;
        fs::write(&self.path, raw)
            .with_context(|| format!("Failed to write failure tracker to {:?}", self.path))?;
        Ok(())
    }

    pub fn record_failure(&mut self, exchange: &str) {
        let count = self.state.failures.entry(exchange.to_string()).or_insert(0);
        *count += 1;
        warn!(
            "{}: consecutive failure {}/{}",
            exchange, count, self.threshold
        );
    }

    pub fn record_success(&mut self, exchange: &str) {
        if self.state.failures.remove(exchange).is_some() {
            info!("{}: failure streak cleared", exchange);
        }
    }

    /// True once an exchange has hit the consecutive-failure threshold.
    pub fn is_benched(&self, exchange: &str) -> bool {
        self.state
            .failures
            .get(exchange)
            .is_some_and(|&count| count >= self.threshold)
    }

    pub fn failure_count(&self, exchange: &str) -> u32 {
        self.state.failures.get(exchange).copied().unwrap_or(0)
    }
}
