//! Shared runtime state: discovery cache entries and per-service circuit records.
//!
//! Components receive the store as `Arc<dyn StateStore>` instead of reaching
//! for module-level singletons, so tests can run against an isolated store.

mod memory;

pub use memory::MemoryStore;

use crate::circuit_breaker::CircuitRecord;
use crate::discovery::DiscoveryCacheEntry;

/// Key-value store for state shared by concurrent requests.
///
/// `update_circuit` must apply the mutation atomically for its key: no other
/// reader or writer may observe or interleave with a half-applied update.
pub trait StateStore: Send + Sync + std::fmt::Debug {
    /// Cached discovery result, fresh or not
    fn cached_instances(&self, service: &str) -> Option<DiscoveryCacheEntry>;

    fn store_instances(&self, entry: DiscoveryCacheEntry);

    fn invalidate_instances(&self, service: &str);

    /// Circuit record for a service; unknown services read as CLOSED with zero stats
    fn circuit(&self, service: &str) -> CircuitRecord;

    /// Atomically mutate the circuit record of a service and return the result
    fn update_circuit(
        &self,
        service: &str,
        update: &mut dyn FnMut(&mut CircuitRecord),
    ) -> CircuitRecord;

    /// Replace the circuit record of a service with a fresh CLOSED record
    fn reset_circuit(&self, service: &str);

    /// Every service with a cache entry or circuit record, sorted
    fn known_services(&self) -> Vec<String>;
}
