//! Collection orchestrators: bulk backfill and the scheduled update cycle.

pub mod bulk;
pub mod failure;
pub mod update;

pub use bulk::BulkCollector;
pub use failure::FailureTracker;
pub use update::{CycleSummary, UpdateOrchestrator};
