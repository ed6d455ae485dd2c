use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::metrics::DistributionMetrics;
use crate::balance::SourceKeyChain;
use crate::config::Config;
use crate::models::Item;

/// Thresholds a batch must meet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiversityRequirements {
    pub min_sources: usize,
    pub max_per_source: usize,
    pub min_diversity_score: f64,
    pub max_imbalance_ratio: f64,
    pub max_coefficient_of_variation: f64,
    pub max_gini: f64,
}

impl Default for DiversityRequirements {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl DiversityRequirements {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_sources: config.retrieval.min_sources,
            max_per_source: config.retrieval.max_per_source,
            min_diversity_score: config.diversity.min_diversity_score,
            max_imbalance_ratio: config.diversity.max_imbalance_ratio,
            max_coefficient_of_variation: config.diversity.max_coefficient_of_variation,
            max_gini: config.diversity.max_gini,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiversityReport {
    pub is_valid: bool,
    /// Balance index of the batch
    pub score: f64,
    pub distinct_source_count: usize,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub metrics: DistributionMetrics,
    pub source_counts: BTreeMap<String, usize>,
    /// Source with the most items, if any
    pub dominant_source: Option<String>,
}

/// Direction of diversity scores across successive reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiversityTrend {
    Improving,
    Stable,
    Declining,
}

/// Score change below which a trend counts as stable
const TREND_TOLERANCE: f64 = 0.05;

#[derive(Debug, Clone, Default)]
pub struct DiversityValidator {
    keys: SourceKeyChain,
}

impl DiversityValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_chain(keys: SourceKeyChain) -> Self {
        Self { keys }
    }

    /// Count items per source key
    pub fn source_counts(&self, items: &[Item]) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for item in items {
            *counts.entry(self.keys.key_for(item)).or_insert(0) += 1;
        }
        counts
    }

    pub fn validate(&self, items: &[Item], req: &DiversityRequirements) -> DiversityReport {
        self.validate_counts(self.source_counts(items), req)
    }

    pub fn validate_counts(
        &self,
        source_counts: BTreeMap<String, usize>,
        req: &DiversityRequirements,
    ) -> DiversityReport {
        let counts: Vec<usize> = source_counts.values().copied().collect();
        let metrics = DistributionMetrics::from_counts(&counts);
        let dominant_source = source_counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(k, _)| k.clone());
        let dominant = dominant_source.as_deref().unwrap_or("unknown");

        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        if metrics.distinct_sources < req.min_sources {
            issues.push(format!(
                "Only {} distinct sources (minimum {})",
                metrics.distinct_sources, req.min_sources
            ));
            recommendations.push(format!(
                "Fetch from {} more sources",
                req.min_sources - metrics.distinct_sources
            ));
        }
        if metrics.max_count > req.max_per_source {
            issues.push(format!(
                "Source '{}' contributes {} items (maximum {})",
                dominant, metrics.max_count, req.max_per_source
            ));
            recommendations.push(format!(
                "Cap '{}' at {} items",
                dominant, req.max_per_source
            ));
        }
        if metrics.distinct_sources > 0 && metrics.balance_index < req.min_diversity_score {
            issues.push(format!(
                "Balance index {:.3} below minimum {:.3}",
                metrics.balance_index, req.min_diversity_score
            ));
            recommendations.push("Rebalance with the even policy".to_string());
        }
        if metrics.distinct_sources > 0 && metrics.imbalance_ratio() > req.max_imbalance_ratio {
            issues.push(format!(
                "Imbalance ratio {:.1}:1 exceeds {:.1}:1, dominated by '{}'",
                metrics.imbalance_ratio(),
                req.max_imbalance_ratio,
                dominant
            ));
            recommendations.push(format!("Reduce items from '{dominant}'"));
        }
        if metrics.coefficient_of_variation > req.max_coefficient_of_variation {
            issues.push(format!(
                "Coefficient of variation {:.3} exceeds {:.3}",
                metrics.coefficient_of_variation, req.max_coefficient_of_variation
            ));
            recommendations.push("Even out per-source counts".to_string());
        }
        if metrics.gini > req.max_gini {
            issues.push(format!(
                "Gini coefficient {:.3} exceeds {:.3}, '{}' dominates",
                metrics.gini, req.max_gini, dominant
            ));
            recommendations.push(format!(
                "Add items from sources other than '{dominant}'"
            ));
        }

        DiversityReport {
            is_valid: issues.is_empty(),
            score: metrics.balance_index,
            distinct_source_count: metrics.distinct_sources,
            issues,
            recommendations,
            metrics,
            source_counts,
            dominant_source,
        }
    }

    /// Compare the mean score of the older and newer halves of `reports`
    pub fn trend(reports: &[DiversityReport]) -> DiversityTrend {
        if reports.len() < 2 {
            return DiversityTrend::Stable;
        }
        let mid = reports.len() / 2;
        let mean = |rs: &[DiversityReport]| rs.iter().map(|r| r.score).sum::<f64>() / rs.len() as f64;
        let delta = mean(&reports[mid..]) - mean(&reports[..mid]);

        if delta > TREND_TOLERANCE {
            DiversityTrend::Improving
        } else if delta < -TREND_TOLERANCE {
            DiversityTrend::Declining
        } else {
            DiversityTrend::Stable
        }
    }
}
