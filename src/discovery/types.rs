use crate::error::{GatewayError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Health of a discovered instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceHealth {
    Healthy,
    Unhealthy,
    Unknown,
}

/// One concrete, reachable deployment of a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub host: String,
    pub port: u16,
    /// Base URL, `scheme://host:port`
    pub url: String,
    pub health_status: InstanceHealth,
    pub last_checked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ServiceInstance {
    pub fn new(service: &str, scheme: &str, host: &str, port: u16) -> Self {
        Self {
            id: format!("{}-{}-{}", service, host, port),
            host: host.to_string(),
            port,
            url: format!("{}://{}:{}", scheme, host, port),
            health_status: InstanceHealth::Unknown,
            last_checked_at: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Mark the instance healthy as of `now`
    pub fn checked_healthy(mut self, now: DateTime<Utc>) -> Self {
        self.health_status = InstanceHealth::Healthy;
        self.last_checked_at = Some(now);
        self
    }

    /// Whether a previous health check can be trusted without probing again
    pub fn is_recently_healthy(&self, now: DateTime<Utc>, window: Duration) -> bool {
        if self.health_status != InstanceHealth::Healthy {
            return false;
        }

        match (self.last_checked_at, ChronoDuration::from_std(window)) {
            (Some(checked_at), Ok(window)) => now - checked_at < window,
            _ => false,
        }
    }
}

/// Cached discovery result for one service
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryCacheEntry {
    pub service_name: String,
    pub instances: Vec<ServiceInstance>,
    pub cached_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl DiscoveryCacheEntry {
    pub fn new(service_name: &str, instances: Vec<ServiceInstance>, ttl: Duration) -> Self {
        Self {
            service_name: service_name.to_string(),
            instances,
            cached_at: Utc::now(),
            ttl,
        }
    }

    /// An entry is only trusted while `now < cached_at + ttl`. An expiry past
    /// the representable range never arrives.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        ChronoDuration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.cached_at.checked_add_signed(ttl))
            .map_or(true, |expires_at| now < expires_at)
    }
}

/// Discovery backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMethod {
    #[default]
    Static,
    Kubernetes,
    Consul,
}

impl std::fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryMethod::Static => write!(f, "static"),
            DiscoveryMethod::Kubernetes => write!(f, "kubernetes"),
            DiscoveryMethod::Consul => write!(f, "consul"),
        }
    }
}

/// Service discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Which backend resolves service names
    #[serde(default)]
    pub method: DiscoveryMethod,
    /// Lifetime of a cached discovery result in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Serve fresh cache entries regardless of discovery method
    #[serde(default)]
    pub prefer_cache: bool,
    /// How long a healthy check result is trusted without re-probing
    #[serde(default = "default_health_trust_window_secs")]
    pub health_trust_window_secs: u64,
    /// Health probe timeout in seconds
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Health endpoint path on each instance
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
    #[serde(default)]
    pub consul: ConsulConfig,
}

/// Orchestrator DNS naming convention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_cluster_domain")]
    pub cluster_domain: String,
    #[serde(default = "default_service_port")]
    pub port: u16,
    #[serde(default = "default_scheme")]
    pub scheme: String,
}

/// External registry (Consul) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsulConfig {
    #[serde(default = "default_consul_url")]
    pub url: String,
    #[serde(default)]
    pub datacenter: Option<String>,
    #[serde(default = "default_consul_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_scheme")]
    pub scheme: String,
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_health_trust_window_secs() -> u64 {
    120
}

fn default_probe_timeout_secs() -> u64 {
    3
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_cluster_domain() -> String {
    "svc.cluster.local".to_string()
}

fn default_service_port() -> u16 {
    80
}

pub(crate) fn default_scheme() -> String {
    "http".to_string()
}

fn default_consul_url() -> String {
    "http://localhost:8500".to_string()
}

fn default_consul_timeout_secs() -> u64 {
    5
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            method: DiscoveryMethod::default(),
            cache_ttl_secs: default_cache_ttl_secs(),
            prefer_cache: false,
            health_trust_window_secs: default_health_trust_window_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            health_path: default_health_path(),
            kubernetes: KubernetesConfig::default(),
            consul: ConsulConfig::default(),
        }
    }
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            cluster_domain: default_cluster_domain(),
            port: default_service_port(),
            scheme: default_scheme(),
        }
    }
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            url: default_consul_url(),
            datacenter: None,
            timeout_secs: default_consul_timeout_secs(),
            scheme: default_scheme(),
        }
    }
}

impl DiscoveryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn health_trust_window(&self) -> Duration {
        Duration::from_secs(self.health_trust_window_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.probe_timeout_secs == 0 {
            return Err(GatewayError::Config(
                "Health probe timeout must be > 0".to_string(),
            ));
        }

        if !self.health_path.starts_with('/') {
            return Err(GatewayError::Config(format!(
                "Health path must start with '/': {}",
                self.health_path
            )));
        }

        if self.method == DiscoveryMethod::Consul
            && !self.consul.url.starts_with("http://")
            && !self.consul.url.starts_with("https://")
        {
            return Err(GatewayError::Config(format!(
                "Consul URL must start with http:// or https://: {}",
                self.consul.url
            )));
        }

        if self.method == DiscoveryMethod::Kubernetes && self.kubernetes.namespace.is_empty() {
            return Err(GatewayError::Config(
                "Kubernetes namespace cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Address of a statically configured instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceAddress {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Static configuration for a service: a single address or an instance list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StaticServiceConfig {
    Pool { instances: Vec<InstanceAddress> },
    Single(InstanceAddress),
}

impl StaticServiceConfig {
    pub fn addresses(&self) -> &[InstanceAddress] {
        match self {
            StaticServiceConfig::Pool { instances } => instances,
            StaticServiceConfig::Single(address) => std::slice::from_ref(address),
        }
    }
}
