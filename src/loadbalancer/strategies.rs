use crate::discovery::ServiceInstance;
use dashmap::DashMap;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Load balancing strategy
#[derive(Debug, Clone)]
pub enum LoadBalancingStrategy {
    /// Round-robin: rotate through the instances of each service
    RoundRobin(RoundRobinStrategy),
    /// Random: pick uniformly among the instances
    Random,
}

impl LoadBalancingStrategy {
    /// Select an instance for `service`; `instances` must not be empty
    pub fn select<'a>(&self, service: &str, instances: &'a [ServiceInstance]) -> &'a ServiceInstance {
        let index = match self {
            LoadBalancingStrategy::RoundRobin(strategy) => {
                strategy.next_index(service, instances.len())
            }
            LoadBalancingStrategy::Random => rand::thread_rng().gen_range(0..instances.len()),
        };

        &instances[index]
    }
}

/// Round-robin strategy state, one counter per service
#[derive(Debug, Clone, Default)]
pub struct RoundRobinStrategy {
    counters: Arc<DashMap<String, Arc<AtomicUsize>>>,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_index(&self, service: &str, len: usize) -> usize {
        let counter = match self.counters.get(service) {
            Some(counter) => counter.clone(),
            None => self
                .counters
                .entry(service.to_string())
                .or_default()
                .clone(),
        };

        counter.fetch_add(1, Ordering::Relaxed) % len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn instances(count: u16) -> Vec<ServiceInstance> {
        (0..count)
            .map(|i| ServiceInstance::new("orders", "http", &format!("10.0.0.{}", i), 3000 + i))
            .collect()
    }

    #[test]
    fn test_round_robin() {
        let instances = instances(3);
        let strategy = LoadBalancingStrategy::RoundRobin(RoundRobinStrategy::new());

        let picked: Vec<_> = (0..4)
            .map(|_| strategy.select("orders", &instances).port)
            .collect();
        assert_eq!(picked, vec![3000, 3001, 3002, 3000]);
    }

    #[test]
    fn test_round_robin_counters_are_per_service() {
        let instances = instances(3);
        let strategy = LoadBalancingStrategy::RoundRobin(RoundRobinStrategy::new());

        assert_eq!(strategy.select("orders", &instances).port, 3000);
        assert_eq!(strategy.select("orders", &instances).port, 3001);
        assert_eq!(strategy.select("products", &instances).port, 3000);
    }

    #[test]
    fn test_round_robin_is_deterministic() {
        let instances = instances(2);
        let a = LoadBalancingStrategy::RoundRobin(RoundRobinStrategy::new());
        let b = LoadBalancingStrategy::RoundRobin(RoundRobinStrategy::new());

        for _ in 0..5 {
            assert_eq!(
                a.select("orders", &instances).id,
                b.select("orders", &instances).id
            );
        }
    }

    #[test]
    fn test_random_stays_within_input() {
        let instances = instances(3);
        let strategy = LoadBalancingStrategy::Random;

        let mut counts = HashMap::new();
        for _ in 0..300 {
            let picked = strategy.select("orders", &instances);
            assert!(instances.iter().any(|i| i.id == picked.id));
            *counts.entry(picked.port).or_insert(0) += 1;
        }
        assert_eq!(counts.len(), 3);
    }
}
