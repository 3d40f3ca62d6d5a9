/// Replica selection algorithms
use crate::core::{ReplicaCandidate, ReplicaRegistry};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Load balancing algorithm trait
pub trait LoadBalancingAlgorithm: Send + Sync {
    /// Select an index into the eligible replicas, given their weights
    fn select_index(&self, weights: &[usize]) -> Option<usize>;

    fn name(&self) -> &'static str;
}

/// Round-robin load balancing algorithm
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancingAlgorithm for RoundRobin {
    fn select_index(&self, weights: &[usize]) -> Option<usize> {
        if weights.is_empty() {
            return None;
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % weights.len();
        Some(index)
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

/// Weighted round-robin algorithm
pub struct WeightedRoundRobin {
    counter: AtomicUsize,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for WeightedRoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancingAlgorithm for WeightedRoundRobin {
    fn select_index(&self, weights: &[usize]) -> Option<usize> {
        if weights.is_empty() {
            return None;
        }

        let total_weight: usize = weights.iter().sum();
        if total_weight == 0 {
            let index = self.counter.fetch_add(1, Ordering::Relaxed) % weights.len();
            return Some(index);
        }

        let position = self.counter.fetch_add(1, Ordering::Relaxed) % total_weight;
        Some(index_for_position(weights, position))
    }

    fn name(&self) -> &'static str {
        "weighted_round_robin"
    }
}

/// Weighted random selection
pub struct WeightedRandom;

impl LoadBalancingAlgorithm for WeightedRandom {
    fn select_index(&self, weights: &[usize]) -> Option<usize> {
        if weights.is_empty() {
            return None;
        }

        let total_weight: usize = weights.iter().sum();
        let mut rng = rand::thread_rng();
        if total_weight == 0 {
            return Some(rng.gen_range(0..weights.len()));
        }

        let position = rng.gen_range(0..total_weight);
        Some(index_for_position(weights, position))
    }

    fn name(&self) -> &'static str {
        "weighted_random"
    }
}

fn index_for_position(weights: &[usize], position: usize) -> usize {
    let mut current_weight = 0;
    for (index, weight) in weights.iter().enumerate() {
        current_weight += weight;
        if position < current_weight {
            return index;
        }
    }
    weights.len() - 1
}

/// Configurable selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Unweighted round-robin over the healthy replicas
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    WeightedRandom,
}

impl SelectionStrategy {
    pub fn build(self) -> Box<dyn LoadBalancingAlgorithm> {
        match self {
            SelectionStrategy::RoundRobin => Box::new(RoundRobin::new()),
            SelectionStrategy::WeightedRoundRobin => Box::new(WeightedRoundRobin::new()),
            SelectionStrategy::WeightedRandom => Box::new(WeightedRandom),
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionStrategy::RoundRobin => write!(f, "round_robin"),
            SelectionStrategy::WeightedRoundRobin => write!(f, "weighted_round_robin"),
            SelectionStrategy::WeightedRandom => write!(f, "weighted_random"),
        }
    }
}

/// Picks the replica for the next read
///
/// Only replicas that are healthy and below the consecutive-error threshold
/// are eligible. `None` means no replica qualifies; the router treats that as
/// a failover to the primary.
pub struct ReplicaSelector {
    algorithm: Box<dyn LoadBalancingAlgorithm>,
    max_consecutive_errors: u32,
}

impl ReplicaSelector {
    pub fn new(strategy: SelectionStrategy, max_consecutive_errors: u32) -> Self {
        Self {
            algorithm: strategy.build(),
            max_consecutive_errors,
        }
    }

    pub fn algorithm_name(&self) -> &'static str {
        self.algorithm.name()
    }

    pub fn select<C>(&self, registry: &ReplicaRegistry<C>) -> Option<ReplicaCandidate<C>> {
        let mut candidates = registry.candidates(self.max_consecutive_errors);
        let weights: Vec<usize> = candidates.iter().map(|c| c.weight).collect();
        let index = self.algorithm.select_index(&weights)?;
        Some(candidates.swap_remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ReplicaConfig;

    #[test]
    fn test_round_robin() {
        let rr = RoundRobin::new();
        let weights = [1, 1, 1];

        assert_eq!(rr.select_index(&weights), Some(0));
        assert_eq!(rr.select_index(&weights), Some(1));
        assert_eq!(rr.select_index(&weights), Some(2));
        assert_eq!(rr.select_index(&weights), Some(0));
        assert_eq!(rr.select_index(&[]), None);
    }

    #[test]
    fn test_round_robin_ignores_weight() {
        let rr = RoundRobin::new();
        let weights = [5, 1];
        let mut counts = [0, 0];
        for _ in 0..10 {
            counts[rr.select_index(&weights).unwrap()] += 1;
        }
        assert_eq!(counts, [5, 5]);
    }

    #[test]
    fn test_weighted_round_robin() {
        let wrr = WeightedRoundRobin::new();
        let weights = [3, 1];

        let mut counts = [0, 0];
        for _ in 0..8 {
            if let Some(index) = wrr.select_index(&weights) {
                counts[index] += 1;
            }
        }

        assert_eq!(counts[0], 6);
        assert_eq!(counts[1], 2);
    }

    #[test]
    fn test_weighted_random_respects_zero_weight_neighbours() {
        let random = WeightedRandom;
        for _ in 0..100 {
            assert_eq!(random.select_index(&[0, 4, 0]), Some(1));
        }
        assert_eq!(random.select_index(&[]), None);
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(SelectionStrategy::default(), SelectionStrategy::RoundRobin);
        assert_eq!(SelectionStrategy::WeightedRandom.build().name(), "weighted_random");
        assert_eq!(
            SelectionStrategy::WeightedRoundRobin.to_string(),
            "weighted_round_robin"
        );
    }

    #[test]
    fn test_selector_skips_unhealthy_replicas() {
        let registry: ReplicaRegistry<()> = ReplicaRegistry::new();
        registry.insert(ReplicaConfig::new("r1", "a"), ()).unwrap();
        registry.insert(ReplicaConfig::new("r2", "b"), ()).unwrap();
        registry.update_health("r1", |health, _| {
            for _ in 0..3 {
                health.record_failure(3);
            }
        });

        let selector = ReplicaSelector::new(SelectionStrategy::RoundRobin, 3);
        for _ in 0..5 {
            assert_eq!(selector.select(&registry).unwrap().id, "r2");
        }
    }

    #[test]
    fn test_selector_none_when_all_unhealthy() {
        let registry: ReplicaRegistry<()> = ReplicaRegistry::new();
        registry.insert(ReplicaConfig::new("r1", "a"), ()).unwrap();
        registry.update_health("r1", |health, _| health.is_healthy = false);

        let selector = ReplicaSelector::new(SelectionStrategy::RoundRobin, 3);
        assert!(selector.select(&registry).is_none());
        assert!(selector.select(&ReplicaRegistry::<()>::new()).is_none());
    }

    #[test]
    fn test_selector_rotates_over_healthy_subset() {
        let registry: ReplicaRegistry<()> = ReplicaRegistry::new();
        for id in ["r1", "r2", "r3"] {
            registry.insert(ReplicaConfig::new(id, id), ()).unwrap();
        }

        let selector = ReplicaSelector::new(SelectionStrategy::RoundRobin, 3);
        let picks: Vec<String> = (0..6)
            .map(|_| selector.select(&registry).unwrap().id)
            .collect();
        assert_eq!(picks, vec!["r1", "r2", "r3", "r1", "r2", "r3"]);
    }
}
