use super::types::{
    ConsulConfig, DiscoveryConfig, DiscoveryMethod, KubernetesConfig, ServiceInstance,
    StaticServiceConfig,
};
use crate::error::{GatewayError, Result};
use chrono::Utc;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

/// Discovery backend, chosen once from configuration
#[derive(Debug, Clone)]
pub enum DiscoveryBackend {
    /// Fixed instances from configuration
    Static(StaticBackend),
    /// Orchestrator DNS naming convention
    Kubernetes(KubernetesBackend),
    /// External registry health query
    Consul(ConsulBackend),
}

impl DiscoveryBackend {
    /// Build the backend selected by `config.method`
    pub fn from_config(
        config: &DiscoveryConfig,
        services: BTreeMap<String, StaticServiceConfig>,
    ) -> Result<Self> {
        let backend = match config.method {
            DiscoveryMethod::Static => DiscoveryBackend::Static(StaticBackend::new(services)),
            DiscoveryMethod::Kubernetes => {
                DiscoveryBackend::Kubernetes(KubernetesBackend::new(config.kubernetes.clone()))
            }
            DiscoveryMethod::Consul => {
                DiscoveryBackend::Consul(ConsulBackend::new(config.consul.clone())?)
            }
        };

        Ok(backend)
    }

    pub fn method(&self) -> DiscoveryMethod {
        match self {
            DiscoveryBackend::Static(_) => DiscoveryMethod::Static,
            DiscoveryBackend::Kubernetes(_) => DiscoveryMethod::Kubernetes,
            DiscoveryBackend::Consul(_) => DiscoveryMethod::Consul,
        }
    }

    /// Fetch the raw candidate list for a service
    pub async fn discover(&self, service: &str) -> Result<Vec<ServiceInstance>> {
        match self {
            DiscoveryBackend::Static(backend) => Ok(backend.discover(service)),
            DiscoveryBackend::Kubernetes(backend) => Ok(backend.discover(service)),
            DiscoveryBackend::Consul(backend) => backend.discover(service).await,
        }
    }
}

/// Instances listed in the gateway configuration
#[derive(Debug, Clone, Default)]
pub struct StaticBackend {
    services: BTreeMap<String, StaticServiceConfig>,
}

impl StaticBackend {
    pub fn new(services: BTreeMap<String, StaticServiceConfig>) -> Self {
        Self { services }
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    /// Health of static instances is unknown until probed
    pub fn discover(&self, service: &str) -> Vec<ServiceInstance> {
        let Some(config) = self.services.get(service) else {
            debug!(service = %service, "Service not present in static configuration");
            return Vec::new();
        };

        config
            .addresses()
            .iter()
            .map(|address| {
                let instance =
                    ServiceInstance::new(service, &address.scheme, &address.host, address.port)
                        .with_metadata(address.metadata.clone());
                match &address.id {
                    Some(id) => instance.with_id(id.clone()),
                    None => instance,
                }
            })
            .collect()
    }
}

/// Derives `{service}.{namespace}.{cluster_domain}`; the orchestrator owns health
#[derive(Debug, Clone)]
pub struct KubernetesBackend {
    config: KubernetesConfig,
}

impl KubernetesBackend {
    pub fn new(config: KubernetesConfig) -> Self {
        Self { config }
    }

    pub fn dns_name(&self, service: &str) -> String {
        format!(
            "{}.{}.{}",
            service, self.config.namespace, self.config.cluster_domain
        )
    }

    pub fn discover(&self, service: &str) -> Vec<ServiceInstance> {
        let host = self.dns_name(service);
        let instance = ServiceInstance::new(service, &self.config.scheme, &host, self.config.port)
            .with_id(format!("{}-k8s", service))
            .with_metadata(HashMap::from([
                ("namespace".to_string(), self.config.namespace.clone()),
                ("discovery".to_string(), "kubernetes".to_string()),
            ]))
            .checked_healthy(Utc::now());

        vec![instance]
    }
}

/// Queries `GET {url}/v1/health/service/{name}` and keeps passing entries
#[derive(Debug, Clone)]
pub struct ConsulBackend {
    config: ConsulConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsulHealthEntry {
    node: ConsulNode,
    service: ConsulService,
    #[serde(default)]
    checks: Vec<ConsulCheck>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsulNode {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsulService {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(default)]
    address: String,
    port: u16,
    #[serde(default)]
    meta: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsulCheck {
    status: String,
}

impl ConsulHealthEntry {
    fn is_passing(&self) -> bool {
        self.checks.iter().all(|check| check.status == "passing")
    }
}

impl ConsulBackend {
    pub fn new(config: ConsulConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to create registry client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub async fn discover(&self, service: &str) -> Result<Vec<ServiceInstance>> {
        let url = format!(
            "{}/v1/health/service/{}",
            self.config.url.trim_end_matches('/'),
            service
        );

        let mut request = self.client.get(&url);
        if let Some(dc) = &self.config.datacenter {
            request = request.query(&[("dc", dc)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Discovery(format!("Registry request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(GatewayError::Discovery(format!(
                "Registry returned status {} for service {}",
                response.status(),
                service
            )));
        }

        let entries: Vec<ConsulHealthEntry> = response
            .json()
            .await
            .map_err(|e| GatewayError::Discovery(format!("Invalid registry response: {}", e)))?;

        let now = Utc::now();
        let instances = entries
            .into_iter()
            .filter(ConsulHealthEntry::is_passing)
            .map(|entry| {
                let host = if entry.service.address.is_empty() {
                    entry.node.address
                } else {
                    entry.service.address
                };
                let instance =
                    ServiceInstance::new(service, &self.config.scheme, &host, entry.service.port)
                        .with_metadata(entry.service.meta.unwrap_or_default())
                        .checked_healthy(now);
                if entry.service.id.is_empty() {
                    instance
                } else {
                    instance.with_id(entry.service.id)
                }
            })
            .collect::<Vec<_>>();

        debug!(service = %service, count = instances.len(), "Registry returned passing instances");
        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::types::{InstanceAddress, InstanceHealth};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn address(host: &str, port: u16) -> InstanceAddress {
        InstanceAddress {
            host: host.to_string(),
            port,
            id: None,
            scheme: "http".to_string(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_static_backend() {
        let services = BTreeMap::from([
            (
                "orders".to_string(),
                StaticServiceConfig::Single(address("localhost", 3001)),
            ),
            (
                "products".to_string(),
                StaticServiceConfig::Pool {
                    instances: vec![address("10.0.0.1", 3002), address("10.0.0.2", 3002)],
                },
            ),
        ]);
        let backend = StaticBackend::new(services);

        let orders = backend.discover("orders");
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].url, "http://localhost:3001");
        assert_eq!(orders[0].health_status, InstanceHealth::Unknown);

        assert_eq!(backend.discover("products").len(), 2);
        assert!(backend.discover("payments").is_empty());
    }

    #[test]
    fn test_kubernetes_dns_name() {
        let backend = KubernetesBackend::new(KubernetesConfig {
            namespace: "shop".to_string(),
            ..Default::default()
        });

        let instances = backend.discover("orders");
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].host, "orders.shop.svc.cluster.local");
        assert_eq!(instances[0].url, "http://orders.shop.svc.cluster.local:80");
        assert_eq!(instances[0].health_status, InstanceHealth::Healthy);
        assert!(instances[0].last_checked_at.is_some());
    }

    #[tokio::test]
    async fn test_consul_keeps_only_passing_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/health/service/orders"))
            .and(query_param("dc", "eu1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "Node": {"Address": "10.1.0.1"},
                    "Service": {"ID": "orders-1", "Address": "", "Port": 3001, "Meta": {"version": "2"}},
                    "Checks": [{"Status": "passing"}, {"Status": "passing"}]
                },
                {
                    "Node": {"Address": "10.1.0.2"},
                    "Service": {"ID": "orders-2", "Address": "10.2.0.2", "Port": 3001, "Meta": null},
                    "Checks": [{"Status": "passing"}, {"Status": "critical"}]
                }
            ])))
            .mount(&server)
            .await;

        let backend = ConsulBackend::new(ConsulConfig {
            url: server.uri(),
            datacenter: Some("eu1".to_string()),
            ..Default::default()
        })
        .unwrap();

        let instances = backend.discover("orders").await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].id, "orders-1");
        assert_eq!(instances[0].host, "10.1.0.1");
        assert_eq!(instances[0].metadata.get("version").map(String::as_str), Some("2"));
        assert_eq!(instances[0].health_status, InstanceHealth::Healthy);
    }

    #[tokio::test]
    async fn test_consul_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let backend = ConsulBackend::new(ConsulConfig {
            url: server.uri(),
            ..Default::default()
        })
        .unwrap();

        assert!(backend.discover("orders").await.is_err());
    }
}
