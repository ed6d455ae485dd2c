//! Distribution balancing
//!
//! Groups a candidate batch by source key and re-samples it so no source
//! exceeds its allocation. Every policy honours `max_per_source`:
//!
//! - **even**: every source gets up to `max_per_source`, newest first
//! - **weighted**: sources get a share proportional to what they offered
//! - **priority**: listed sources get the full cap, others three quarters of it
//!
//! Output is always ordered newest first. No policy drops a source outright:
//! with a cap of at least one, every source keeps its newest item, so the
//! distinct-source minimum is left to validation and top-up.

pub mod keys;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

use crate::diversity::metrics::balance_index;
use crate::models::{sort_by_recency, Item};

pub use keys::{SourceKeyChain, UNKNOWN_SOURCE};

/// Allocation policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalancePolicy {
    #[default]
    Even,
    Weighted,
    Priority,
}

impl FromStr for BalancePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "even" => Ok(Self::Even),
            "weighted" => Ok(Self::Weighted),
            "priority" => Ok(Self::Priority),
            other => Err(format!("unknown balance policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceOptions {
    pub max_per_source: usize,
    /// Sources favoured by the priority policy
    pub priority_sources: Vec<String>,
    pub policy: BalancePolicy,
}

impl Default for BalanceOptions {
    fn default() -> Self {
        Self {
            max_per_source: 5,
            priority_sources: Vec::new(),
            policy: BalancePolicy::Even,
        }
    }
}

/// One source's share of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceShare {
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionReport {
    pub total_items: usize,
    pub distinct_sources: usize,
    pub per_source: BTreeMap<String, SourceShare>,
    pub mean: f64,
    pub max: usize,
    pub min: usize,
    /// Balance index in [0, 1]
    pub balance_score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct DistributionBalancer {
    keys: SourceKeyChain,
}

impl DistributionBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_chain(keys: SourceKeyChain) -> Self {
        Self { keys }
    }

    pub fn key_chain(&self) -> &SourceKeyChain {
        &self.keys
    }

    /// Group items by source key, dropping duplicates, each group newest first
    pub fn group(&self, items: Vec<Item>) -> BTreeMap<String, Vec<Item>> {
        let mut seen = HashSet::new();
        let mut groups: BTreeMap<String, Vec<Item>> = BTreeMap::new();
        for item in items {
            if !seen.insert(item.dedup_key()) {
                continue;
            }
            groups.entry(self.keys.key_for(&item)).or_default().push(item);
        }
        for group in groups.values_mut() {
            sort_by_recency(group);
        }
        groups
    }

    pub fn balance(&self, items: Vec<Item>, options: &BalanceOptions) -> Vec<Item> {
        let input = items.len();
        let groups = self.group(items);
        let allocations = allocate(&groups, options);

        let mut balanced: Vec<Item> = groups
            .into_iter()
            .flat_map(|(key, group)| {
                let take = allocations.get(&key).copied().unwrap_or(0);
                group.into_iter().take(take)
            })
            .collect();
        sort_by_recency(&mut balanced);

        tracing::debug!(
            policy = ?options.policy,
            input,
            output = balanced.len(),
            sources = allocations.len(),
            "Balanced batch"
        );
        balanced
    }

    pub fn distribution_report(&self, items: &[Item]) -> DistributionReport {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for item in items {
            *counts.entry(self.keys.key_for(item)).or_insert(0) += 1;
        }

        let total = items.len();
        let values: Vec<usize> = counts.values().copied().collect();
        let per_source = counts
            .into_iter()
            .map(|(key, count)| {
                let share = SourceShare {
                    count,
                    percentage: crate::utils::ratio(count, total) * 100.0,
                };
                (key, share)
            })
            .collect();

        DistributionReport {
            total_items: total,
            distinct_sources: values.len(),
            per_source,
            mean: crate::utils::ratio(total, values.len()),
            max: values.iter().copied().max().unwrap_or(0),
            min: values.iter().copied().min().unwrap_or(0),
            balance_score: balance_index(&values),
        }
    }
}

/// Items each source may keep under the policy, never above `max_per_source`
fn allocate(
    groups: &BTreeMap<String, Vec<Item>>,
    options: &BalanceOptions,
) -> HashMap<String, usize> {
    let cap = options.max_per_source;
    let available: usize = groups.values().map(Vec::len).sum();

    groups
        .iter()
        .map(|(key, group)| {
            let quota = match options.policy {
                BalancePolicy::Even => cap,
                BalancePolicy::Weighted => {
                    let target = available.min(cap * groups.len());
                    let share = target as f64 * group.len() as f64 / available.max(1) as f64;
                    (share.round() as usize).max(1)
                }
                BalancePolicy::Priority => {
                    if options.priority_sources.iter().any(|p| p == key) {
                        (cap as f64 * 1.5).ceil() as usize
                    } else {
                        ((cap as f64 * 0.75).floor() as usize).max(1)
                    }
                }
            };
            (key.clone(), quota.min(cap).min(group.len()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use proptest::prelude::*;

    fn batch(counts: &[(&str, usize)]) -> Vec<Item> {
        let now = Utc::now();
        counts
            .iter()
            .flat_map(|(source, n)| {
                (0..*n).map(move |i| {
                    Item::new(*source, i.to_string(), "t", format!("https://{source}.example/{i}"))
                        .published(now - Duration::minutes(i as i64))
                })
            })
            .collect()
    }

    fn counts_offered(pairs: &[(&str, usize)]) -> usize {
        pairs.iter().filter(|(_, n)| *n > 0).count()
    }

    fn per_source(items: &[Item]) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for item in items {
            *counts.entry(item.source_id.clone()).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn test_even_caps_each_source() {
        let balancer = DistributionBalancer::new();
        let options = BalanceOptions {
            max_per_source: 3,
            ..Default::default()
        };
        let out = balancer.balance(batch(&[("a", 10), ("b", 2), ("c", 5)]), &options);

        let counts = per_source(&out);
        assert_eq!(counts["a"], 3);
        assert_eq!(counts["b"], 2);
        assert_eq!(counts["c"], 3);
        assert!(out.windows(2).all(|w| w[0].recency() >= w[1].recency()));
    }

    #[test]
    fn test_even_keeps_newest() {
        let out = DistributionBalancer::new().balance(
            batch(&[("a", 4)]),
            &BalanceOptions {
                max_per_source: 2,
                ..Default::default()
            },
        );
        let ids: Vec<_> = out.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1"]);
    }

    #[test]
    fn test_weighted_is_proportional() {
        let options = BalanceOptions {
            max_per_source: 6,
            policy: BalancePolicy::Weighted,
            ..Default::default()
        };
        // 12 slots over 24 items: a offers 18, b offers 6
        let out = DistributionBalancer::new().balance(batch(&[("a", 18), ("b", 6)]), &options);
        let counts = per_source(&out);
        assert_eq!(counts["a"], 6);
        assert_eq!(counts["b"], 3);
    }

    #[test]
    fn test_priority_favours_listed_sources() {
        let options = BalanceOptions {
            max_per_source: 4,
            priority_sources: vec!["a".to_string()],
            policy: BalancePolicy::Priority,
            ..Default::default()
        };
        let out = DistributionBalancer::new().balance(batch(&[("a", 10), ("b", 10)]), &options);
        let counts = per_source(&out);
        assert_eq!(counts["a"], 4);
        assert_eq!(counts["b"], 3);
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let mut items = batch(&[("a", 2)]);
        items.push(items[0].clone());
        let out = DistributionBalancer::new().balance(items, &BalanceOptions::default());
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_distribution_report() {
        let report = DistributionBalancer::new().distribution_report(&batch(&[("a", 3), ("b", 1)]));
        assert_eq!(report.total_items, 4);
        assert_eq!(report.distinct_sources, 2);
        assert_eq!(report.per_source["a"].percentage, 75.0);
        assert_eq!(report.max, 3);
        assert_eq!(report.min, 1);
        assert_eq!(report.mean, 2.0);
        assert!(report.balance_score < 1.0);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("Weighted".parse::<BalancePolicy>(), Ok(BalancePolicy::Weighted));
        assert!("random".parse::<BalancePolicy>().is_err());
    }

    proptest! {
        #[test]
        fn prop_per_source_cap_holds(
            counts in prop::collection::vec(0usize..30, 1..8),
            cap in 1usize..10,
            policy in prop_oneof![
                Just(BalancePolicy::Even),
                Just(BalancePolicy::Weighted),
                Just(BalancePolicy::Priority),
            ],
        ) {
            let names: Vec<String> = (0..counts.len()).map(|i| format!("s{i}")).collect();
            let pairs: Vec<(&str, usize)> = names.iter().map(String::as_str).zip(counts.iter().copied()).collect();
            let options = BalanceOptions {
                max_per_source: cap,
                priority_sources: vec!["s0".to_string()],
                policy,
                ..Default::default()
            };

            let out = DistributionBalancer::new().balance(batch(&pairs), &options);
            let counts = per_source(&out);
            for count in counts.values() {
                prop_assert!(*count <= cap);
            }
            let offered = counts_offered(&pairs);
            prop_assert_eq!(counts.len(), offered);
        }
    }
}
