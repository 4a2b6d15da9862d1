use crate::circuit_breaker::CircuitBreakerConfig;
use crate::discovery::{DiscoveryConfig, StaticServiceConfig};
use crate::error::{GatewayError, Result};
use crate::loadbalancer::LoadBalancerConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

/// Prefix for environment variable overrides, e.g. `GATEWAY__SERVER__PORT=9090`
pub const ENV_PREFIX: &str = "GATEWAY";

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Deployment environment, controls diagnostic output
    #[serde(default)]
    pub environment: Environment,
    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Service discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Statically configured services, keyed by service name
    #[serde(default)]
    pub services: BTreeMap<String, StaticServiceConfig>,
    /// Circuit breaker configuration
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Load balancer configuration
    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Timeout for each proxied call in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
    Test,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file, then layer `GATEWAY__*` environment
    /// variables on top. Any key of the file may be overridden.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml_with_env(&content, Self::env_source(None))
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))
    }

    fn env_source(vars: Option<HashMap<String, String>>) -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .source(vars)
    }

    /// Merge environment overrides into the parsed document before
    /// deserializing, so nested sections are overridden key by key.
    fn from_yaml_with_env(yaml: &str, env: config::Environment) -> Result<Self> {
        let mut document: Value = serde_yaml::from_str(yaml)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))?;
        if document.is_null() {
            document = Value::Object(Map::new());
        }

        let overrides: Value = config::Config::builder()
            .add_source(env)
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GatewayError::Config(format!("Invalid environment override: {}", e)))?;

        merge_values(&mut document, overrides);

        serde_json::from_value(document)
            .map_err(|e| GatewayError::Config(format!("Invalid configuration: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(GatewayError::Config("Server port must be > 0".to_string()));
        }

        if self.server.timeout_secs == 0 {
            return Err(GatewayError::Config(
                "Server timeout must be > 0".to_string(),
            ));
        }

        self.circuit_breaker.validate()?;
        self.discovery.validate()?;

        for (name, service) in &self.services {
            if service.addresses().is_empty() {
                return Err(GatewayError::Config(format!(
                    "Static service '{}' has no instances",
                    name
                )));
            }

            for address in service.addresses() {
                if address.host.is_empty() || address.port == 0 {
                    return Err(GatewayError::Config(format!(
                        "Static service '{}' has an instance without host or port",
                        name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Create a default configuration for testing
    pub fn default_config() -> Self {
        Self {
            server: ServerConfig::default(),
            environment: Environment::default(),
            logging: LoggingConfig::default(),
            discovery: DiscoveryConfig::default(),
            services: BTreeMap::new(),
            circuit_breaker: CircuitBreakerConfig::default(),
            load_balancer: LoadBalancerConfig::default(),
        }
    }
}

/// Recursively overlay `overlay` onto `base`; non-object values replace
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                merge_values(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, overlay) => *base = overlay,
    }
}
