//! Report and diagnostic types exposed by the orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::diversity::DiversityReport;
use crate::health::RecoveryPlan;
use crate::models::SourceState;

/// Phases of one `get_balanced_items` run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    HealthCheck,
    Retrieve,
    Balance,
    Validate,
    TopUp,
    Truncate,
}

/// Outcome of one top-up fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopUpResult {
    pub source_id: String,
    pub fetched: usize,
    pub error: Option<String>,
}

/// What happened during the most recent run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub phases: Vec<RunPhase>,
    pub eligible_sources: usize,
    pub quarantined_sources: Vec<String>,
    pub strategies_attempted: Vec<String>,
    pub strategy_used: Option<String>,
    pub used_fallback: bool,
    pub topup: Vec<TopUpResult>,
    pub diversity: Option<DiversityReport>,
    pub errors: Vec<String>,
    pub returned: usize,
    pub elapsed_ms: u64,
}

impl RunDiagnostics {
    pub(crate) fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            phases: Vec::new(),
            eligible_sources: 0,
            quarantined_sources: Vec::new(),
            strategies_attempted: Vec::new(),
            strategy_used: None,
            used_fallback: false,
            topup: Vec::new(),
            diversity: None,
            errors: Vec::new(),
            returned: 0,
            elapsed_ms: 0,
        }
    }

    pub fn visited(&self, phase: RunPhase) -> bool {
        self.phases.contains(&phase)
    }
}

/// A source that is failing or held out of rotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedSource {
    pub source_id: String,
    pub name: String,
    pub state: SourceState,
    pub consecutive_failures: u32,
    pub health_score: f64,
    pub last_error: Option<String>,
    pub recovery: RecoveryPlan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceHealthReport {
    pub generated_at: DateTime<Utc>,
    pub total_sources: usize,
    pub active_sources: usize,
    pub quarantined_sources: usize,
    pub inactive_sources: usize,
    pub failed_sources: Vec<FailedSource>,
    /// Items per source in the last returned batch
    pub per_source_counts: BTreeMap<String, usize>,
    pub diversity_score: f64,
    pub recommendations: Vec<String>,
}

/// Result of an explicit refresh
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub items_found: usize,
    /// Items whose dedup key the store had not seen
    pub new_items: usize,
    pub errors: Vec<String>,
}
