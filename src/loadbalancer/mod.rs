pub mod strategies;

use crate::discovery::ServiceInstance;
use serde::{Deserialize, Serialize};
use strategies::{LoadBalancingStrategy, RoundRobinStrategy};
use tracing::debug;

/// Configured selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingPolicy {
    #[default]
    RoundRobin,
    Random,
}

/// Load balancer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    #[serde(default)]
    pub strategy: LoadBalancingPolicy,
}

/// Picks one instance out of the healthy set returned by discovery
#[derive(Debug, Clone)]
pub struct LoadBalancer {
    strategy: LoadBalancingStrategy,
}

impl LoadBalancer {
    /// Create a new load balancer
    pub fn new(config: &LoadBalancerConfig) -> Self {
        let strategy = match config.strategy {
            LoadBalancingPolicy::RoundRobin => {
                LoadBalancingStrategy::RoundRobin(RoundRobinStrategy::new())
            }
            LoadBalancingPolicy::Random => LoadBalancingStrategy::Random,
        };

        Self { strategy }
    }

    /// Select an instance for the request.
    ///
    /// # Panics
    ///
    /// Panics when `instances` is empty. Callers must treat an empty
    /// discovery result as "service unavailable" before picking.
    pub fn pick<'a>(&self, service: &str, instances: &'a [ServiceInstance]) -> &'a ServiceInstance {
        assert!(
            !instances.is_empty(),
            "load balancer invoked with no instances for service {}",
            service
        );

        let instance = self.strategy.select(service, instances);
        debug!(service = %service, instance = %instance.id, "Selected instance");
        instance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instances(count: u16) -> Vec<ServiceInstance> {
        (0..count)
            .map(|i| ServiceInstance::new("orders", "http", "10.0.0.1", 3000 + i))
            .collect()
    }

    #[test]
    fn test_round_robin_distribution() {
        let lb = LoadBalancer::new(&LoadBalancerConfig::default());
        let instances = instances(3);

        let urls: Vec<_> = (0..4).map(|_| lb.pick("orders", &instances).url.clone()).collect();
        assert_eq!(
            urls,
            vec![
                "http://10.0.0.1:3000",
                "http://10.0.0.1:3001",
                "http://10.0.0.1:3002",
                "http://10.0.0.1:3000",
            ]
        );
    }

    #[test]
    fn test_single_instance() {
        let lb = LoadBalancer::new(&LoadBalancerConfig {
            strategy: LoadBalancingPolicy::Random,
        });
        let instances = instances(1);

        for _ in 0..10 {
            assert_eq!(lb.pick("orders", &instances).port, 3000);
        }
    }

    #[test]
    #[should_panic(expected = "no instances")]
    fn test_empty_list_is_contract_violation() {
        let lb = LoadBalancer::new(&LoadBalancerConfig::default());
        lb.pick("orders", &[]);
    }

    #[test]
    fn test_policy_deserialization() {
        let config: LoadBalancerConfig = serde_yaml::from_str("strategy: random").unwrap();
        assert_eq!(config.strategy, LoadBalancingPolicy::Random);
    }
}
