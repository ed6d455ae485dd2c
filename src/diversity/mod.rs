//! Diversity statistics and validation
//!
//! [`metrics`] holds the pure statistics; [`DiversityValidator`] checks a
//! batch against [`DiversityRequirements`] and explains every failure.

pub mod metrics;
mod validator;

pub use metrics::DistributionMetrics;
pub use validator::{DiversityReport, DiversityRequirements, DiversityTrend, DiversityValidator};
