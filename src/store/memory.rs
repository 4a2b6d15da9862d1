use super::StateStore;
use crate::circuit_breaker::CircuitRecord;
use crate::discovery::DiscoveryCacheEntry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;

/// In-process store backed by sharded concurrent maps
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    instances: Arc<DashMap<String, DiscoveryCacheEntry>>,
    circuits: Arc<DashMap<String, CircuitRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn cached_instances(&self, service: &str) -> Option<DiscoveryCacheEntry> {
        self.instances.get(service).map(|entry| entry.value().clone())
    }

    fn store_instances(&self, entry: DiscoveryCacheEntry) {
        self.instances.insert(entry.service_name.clone(), entry);
    }

    fn invalidate_instances(&self, service: &str) {
        self.instances.remove(service);
    }

    fn circuit(&self, service: &str) -> CircuitRecord {
        self.circuits
            .get(service)
            .map(|record| record.value().clone())
            .unwrap_or_default()
    }

    fn update_circuit(
        &self,
        service: &str,
        update: &mut dyn FnMut(&mut CircuitRecord),
    ) -> CircuitRecord {
        // The entry guard holds the shard write lock until it is dropped
        let mut record = self.circuits.entry(service.to_string()).or_default();
        update(record.value_mut());
        record.value().clone()
    }

    fn reset_circuit(&self, service: &str) {
        self.circuits
            .insert(service.to_string(), CircuitRecord::default());
    }

    fn known_services(&self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .instances
            .iter()
            .map(|entry| entry.key().clone())
            .chain(self.circuits.iter().map(|entry| entry.key().clone()))
            .collect();

        names.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use std::time::Duration;

    #[test]
    fn test_unknown_service_reads_closed() {
        let store = MemoryStore::new();
        let record = store.circuit("orders");
        assert_eq!(record.state, CircuitState::Closed);
        assert_eq!(record.stats.total_requests, 0);
        assert!(store.known_services().is_empty());
    }

    #[test]
    fn test_update_returns_snapshot() {
        let store = MemoryStore::new();
        let record = store.update_circuit("orders", &mut |record| {
            record.stats.total_requests += 1;
        });
        assert_eq!(record.stats.total_requests, 1);
        assert_eq!(store.circuit("orders").stats.total_requests, 1);
    }

    #[test]
    fn test_reset_replaces_record() {
        let store = MemoryStore::new();
        store.update_circuit("orders", &mut |record| {
            record.state = CircuitState::Open;
            record.stats.failed_requests = 7;
        });

        store.reset_circuit("orders");
        let record = store.circuit("orders");
        assert_eq!(record.state, CircuitState::Closed);
        assert_eq!(record.stats.failed_requests, 0);
    }

    #[test]
    fn test_instance_cache_roundtrip() {
        let store = MemoryStore::new();
        store.store_instances(DiscoveryCacheEntry::new(
            "orders",
            vec![],
            Duration::from_secs(60),
        ));
        assert!(store.cached_instances("orders").is_some());
        assert_eq!(store.known_services(), vec!["orders".to_string()]);

        store.invalidate_instances("orders");
        assert!(store.cached_instances("orders").is_none());
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let store = Arc::new(MemoryStore::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        store.update_circuit("orders", &mut |record| {
                            record.stats.total_requests += 1;
                        });
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.circuit("orders").stats.total_requests, 8000);
    }
}
