pub mod backend;
pub mod health;
pub mod types;

pub use backend::{ConsulBackend, DiscoveryBackend, KubernetesBackend, StaticBackend};
pub use health::{HealthProbe, HttpHealthProber};
pub use types::{
    ConsulConfig, DiscoveryCacheEntry, DiscoveryConfig, DiscoveryMethod, InstanceAddress,
    InstanceHealth, KubernetesConfig, ServiceInstance, StaticServiceConfig,
};

use crate::error::Result;
use crate::metrics;
use crate::store::StateStore;
use chrono::Utc;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Resolves service names to healthy instances.
///
/// Never fails: backend errors degrade to the static configuration and an
/// empty result is the "service unavailable" signal for the caller.
pub struct ServiceDiscovery {
    config: DiscoveryConfig,
    backend: DiscoveryBackend,
    fallback: StaticBackend,
    prober: Arc<dyn HealthProbe>,
    store: Arc<dyn StateStore>,
    high_load: AtomicBool,
}

impl std::fmt::Debug for ServiceDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDiscovery")
            .field("method", &self.backend.method())
            .field("high_load", &self.is_high_load())
            .finish()
    }
}

impl ServiceDiscovery {
    /// Create a discovery service using the HTTP health prober
    pub fn new(
        config: DiscoveryConfig,
        services: BTreeMap<String, StaticServiceConfig>,
        store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let prober = HttpHealthProber::new(config.probe_timeout(), config.health_path.clone())?;
        Self::with_prober(config, services, store, Arc::new(prober))
    }

    /// Create a discovery service with a custom health prober
    pub fn with_prober(
        config: DiscoveryConfig,
        services: BTreeMap<String, StaticServiceConfig>,
        store: Arc<dyn StateStore>,
        prober: Arc<dyn HealthProbe>,
    ) -> Result<Self> {
        let backend = DiscoveryBackend::from_config(&config, services.clone())?;

        info!(
            method = %backend.method(),
            cache_ttl_secs = config.cache_ttl_secs,
            prefer_cache = config.prefer_cache,
            "Service discovery initialized"
        );

        Ok(Self {
            config,
            backend,
            fallback: StaticBackend::new(services),
            prober,
            store,
            high_load: AtomicBool::new(false),
        })
    }

    pub fn method(&self) -> DiscoveryMethod {
        self.backend.method()
    }

    /// Services named in the static configuration
    pub fn configured_services(&self) -> Vec<String> {
        self.fallback.service_names()
    }

    pub fn set_high_load(&self, high_load: bool) {
        let previous = self.high_load.swap(high_load, Ordering::Relaxed);
        if previous != high_load {
            info!(high_load, "Discovery high-load mode changed");
        }
    }

    pub fn is_high_load(&self) -> bool {
        self.high_load.load(Ordering::Relaxed)
    }

    /// Drop the cached result for a service
    pub fn invalidate(&self, service: &str) {
        self.store.invalidate_instances(service);
    }

    /// Resolve a service name to its healthy instances
    pub async fn resolve(&self, service: &str) -> Vec<ServiceInstance> {
        if let Some(instances) = self.cached(service) {
            return instances;
        }

        let candidates = match self.backend.discover(service).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(
                    service = %service,
                    method = %self.backend.method(),
                    error = %e,
                    "Discovery backend failed, falling back to static configuration"
                );
                self.fallback.discover(service)
            }
        };

        let healthy = self.filter_healthy(candidates).await;

        if healthy.is_empty() {
            warn!(service = %service, "No healthy instances discovered");
        } else {
            debug!(service = %service, count = healthy.len(), "Caching discovered instances");
            self.store.store_instances(DiscoveryCacheEntry::new(
                service,
                healthy.clone(),
                self.config.cache_ttl(),
            ));
        }

        healthy
    }

    fn cached(&self, service: &str) -> Option<Vec<ServiceInstance>> {
        let cache_allowed = self.backend.method() == DiscoveryMethod::Static
            || self.is_high_load()
            || self.config.prefer_cache;

        let entry = self.store.cached_instances(service)?;

        if !entry.is_fresh(Utc::now()) {
            debug!(service = %service, "Discovery cache entry expired");
            metrics::record_discovery_cache(service, "expired");
            return None;
        }

        if !cache_allowed {
            metrics::record_discovery_cache(service, "bypassed");
            return None;
        }

        debug!(service = %service, count = entry.instances.len(), "Discovery cache hit");
        metrics::record_discovery_cache(service, "hit");
        Some(entry.instances)
    }

    async fn filter_healthy(&self, candidates: Vec<ServiceInstance>) -> Vec<ServiceInstance> {
        let now = Utc::now();
        let window = self.config.health_trust_window();

        let checks = candidates.into_iter().map(|instance| async move {
            if instance.is_recently_healthy(now, window) {
                return Some(instance);
            }

            if self.prober.probe(&instance.url).await {
                Some(instance.checked_healthy(Utc::now()))
            } else {
                debug!(instance = %instance.id, url = %instance.url, "Dropping unhealthy instance");
                None
            }
        });

        join_all(checks).await.into_iter().flatten().collect()
    }
}
