//! Source health monitoring
//!
//! Tracks errors and successes per source over a rolling window, derives a
//! health score, quarantines sources that cross the configured thresholds
//! and classifies how each source can recover.
//!
//! ```text
//! score = max(0, 1 - 0.5*error_rate - 0.3*min(1, failures/max) - 0.2*min(1, recent/max_recent))
//! ```

mod recovery;
mod tracker;

pub use recovery::{RecoveryAction, RecoveryPlan};
pub use tracker::{ErrorRecord, HealthStats, QuarantineEntry, SourceHealthTracker};
