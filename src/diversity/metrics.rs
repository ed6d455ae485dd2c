//! Fairness statistics over per-source item counts
//!
//! With `n` distinct sources and `N` items:
//!
//! | Metric | Definition |
//! |---|---|
//! | mean | `N / n` |
//! | variance | `Σ(cᵢ - mean)² / n` |
//! | coefficient of variation | `stddev / mean` |
//! | Gini | `Σ(2(i+1) - n - 1)·cᵢ / (n·N)` over ascending counts |
//! | entropy score | `-Σ pᵢ log2 pᵢ / log2 n` |
//! | balance index | `max(0, 1 - variance / (N²/n))` |

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributionMetrics {
    pub total_items: usize,
    pub distinct_sources: usize,
    pub mean: f64,
    pub variance: f64,
    pub std_dev: f64,
    pub coefficient_of_variation: f64,
    pub gini: f64,
    pub entropy: f64,
    pub balance_index: f64,
    pub max_count: usize,
    pub min_count: usize,
}

impl DistributionMetrics {
    /// Compute every metric over the given counts. Zero counts are ignored.
    pub fn from_counts(counts: &[usize]) -> Self {
        let counts: Vec<usize> = counts.iter().copied().filter(|c| *c > 0).collect();
        let n = counts.len();
        let total: usize = counts.iter().sum();
        if n == 0 {
            return Self::default();
        }

        let mean = total as f64 / n as f64;
        let variance = counts
            .iter()
            .map(|c| (*c as f64 - mean).powi(2))
            .sum::<f64>()
            / n as f64;
        let std_dev = variance.sqrt();

        Self {
            total_items: total,
            distinct_sources: n,
            mean,
            variance,
            std_dev,
            coefficient_of_variation: std_dev / mean,
            gini: gini(&counts),
            entropy: entropy_score(&counts),
            balance_index: balance_index(&counts),
            max_count: counts.iter().copied().max().unwrap_or(0),
            min_count: counts.iter().copied().min().unwrap_or(0),
        }
    }

    /// `max / max(1, min)`
    pub fn imbalance_ratio(&self) -> f64 {
        self.max_count as f64 / self.min_count.max(1) as f64
    }
}

pub fn gini(counts: &[usize]) -> f64 {
    let n = counts.len();
    let total: usize = counts.iter().sum();
    if n == 0 || total == 0 {
        return 0.0;
    }

    let mut sorted = counts.to_vec();
    sorted.sort_unstable();
    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, c)| (2.0 * (i as f64 + 1.0) - n as f64 - 1.0) * *c as f64)
        .sum();
    (weighted / (n as f64 * total as f64)).max(0.0)
}

/// Normalized Shannon entropy. A single source has no spread and scores 0.
pub fn entropy_score(counts: &[usize]) -> f64 {
    let n = counts.iter().filter(|c| **c > 0).count();
    let total: usize = counts.iter().sum();
    if n <= 1 || total == 0 {
        return 0.0;
    }

    let entropy: f64 = counts
        .iter()
        .filter(|c| **c > 0)
        .map(|c| {
            let p = *c as f64 / total as f64;
            -p * p.log2()
        })
        .sum();
    (entropy / (n as f64).log2()).clamp(0.0, 1.0)
}

pub fn balance_index(counts: &[usize]) -> f64 {
    let n = counts.len();
    let total: usize = counts.iter().sum();
    if n == 0 || total == 0 {
        return 0.0;
    }

    let mean = total as f64 / n as f64;
    let variance = counts
        .iter()
        .map(|c| (*c as f64 - mean).powi(2))
        .sum::<f64>()
        / n as f64;
    let max_variance = (total as f64).powi(2) / n as f64;
    (1.0 - variance / max_variance).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_even_distribution() {
        let m = DistributionMetrics::from_counts(&[10, 10, 10, 10]);
        assert_eq!(m.gini, 0.0);
        assert!((m.entropy - 1.0).abs() < 1e-12);
        assert_eq!(m.balance_index, 1.0);
        assert_eq!(m.coefficient_of_variation, 0.0);
        assert_eq!(m.imbalance_ratio(), 1.0);
    }

    #[test]
    fn test_concentrated_distribution() {
        let m = DistributionMetrics::from_counts(&[37, 1, 1, 1]);
        assert!((m.gini - 0.675).abs() < 1e-12);
        assert!((m.variance - 243.0).abs() < 1e-9);
        assert!((m.balance_index - 0.3925).abs() < 1e-9);
        assert_eq!(m.max_count, 37);
        assert_eq!(m.min_count, 1);
    }

    #[test]
    fn test_gini_approaches_upper_bound() {
        // (n-1)/n as one source dominates
        let g = gini(&[1, 1, 1, 100_000]);
        assert!((g - 0.75).abs() < 0.001);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(DistributionMetrics::from_counts(&[]), DistributionMetrics::default());
        let single = DistributionMetrics::from_counts(&[7]);
        assert_eq!(single.entropy, 0.0);
        assert_eq!(single.balance_index, 1.0);
        assert_eq!(single.gini, 0.0);
    }

    proptest! {
        #[test]
        fn prop_balance_index_in_unit_range(counts in prop::collection::vec(1usize..500, 1..30)) {
            let b = balance_index(&counts);
            prop_assert!((0.0..=1.0).contains(&b));
        }

        #[test]
        fn prop_balance_index_one_iff_equal(counts in prop::collection::vec(1usize..50, 2..10)) {
            let equal = counts.iter().all(|c| *c == counts[0]);
            let b = balance_index(&counts);
            prop_assert_eq!(b == 1.0, equal);
        }

        #[test]
        fn prop_gini_bounded(counts in prop::collection::vec(1usize..500, 1..30)) {
            let n = counts.len() as f64;
            let g = gini(&counts);
            prop_assert!(g >= 0.0 && g <= (n - 1.0) / n + 1e-9);
        }

        #[test]
        fn prop_entropy_in_unit_range(counts in prop::collection::vec(1usize..500, 1..30)) {
            let e = entropy_score(&counts);
            prop_assert!((0.0..=1.0).contains(&e));
        }
    }
}
