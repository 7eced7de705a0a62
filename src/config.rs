use crate::common::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_PIPELINE_TIMEOUT_SECS, DEFAULT_REGISTRY_TIMEOUT_SECS};
use crate::common::error::{ResolveError, Result};
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub partner: PartnerConfig,
    pub registry: RegistryConfig,
    pub listing: ListingConfig,
    pub pool: PoolConfig,
    pub queue: QueueConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_PIPELINE_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PartnerConfig {
    pub base_url: String,
    pub user_email: String,
    pub timeout_secs: u64,
}

impl Default for PartnerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            user_email: String::new(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
    pub row_limit: usize,
    pub price_band: f64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://landregistry.data.gov.uk/landregistry/query".to_string(),
            timeout_secs: DEFAULT_REGISTRY_TIMEOUT_SECS,
            row_limit: 5,
            price_band: 0.05,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub sale_row_selector: String,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.rightmove.co.uk".to_string(),
            timeout_secs: 30,
            sale_row_selector: "[data-testid='sale-history'] li, .sale-history tr".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { workers: 8 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub chunk_size: usize,
    pub stagger_ms: u64,
    pub concurrency: usize,
    pub lease_secs: u64,
    pub result_ttl_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            stagger_ms: 500,
            concurrency: 10,
            lease_secs: 900,
            result_ttl_secs: 86_400,
            poll_interval_ms: 1_000,
        }
    }
}

impl QueueConfig {
    pub fn stagger(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.stagger_ms as i64)
    }

    pub fn lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_secs as i64)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.result_ttl_secs as i64)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl StorageConfig {
    pub fn queue_db(&self) -> PathBuf {
        self.data_dir.join("queue.db")
    }

    pub fn properties_db(&self) -> PathBuf {
        self.data_dir.join("properties.db")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl Config {
    /// Load `$RESOLVER_CONFIG` (or `config.toml`), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("RESOLVER_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
        let mut config = match fs::read_to_string(&path) {
            Ok(content) => Self::from_toml(&content)
                .map_err(|e| ResolveError::Config(format!("Failed to parse config file '{}': {}", path, e)))?,
            Err(e) if e.kind() == ErrorKind::NotFound => Config::default(),
            Err(e) => {
                return Err(ResolveError::Config(format!(
                    "Failed to read config file '{}': {}",
                    path, e
                )))
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("PARTNER_BASE_URL") {
            self.partner.base_url = v;
        }
        if let Some(v) = var("PARTNER_USER_EMAIL") {
            self.partner.user_email = v;
        }
        if let Some(v) = var("REGISTRY_ENDPOINT") {
            self.registry.endpoint = v;
        }
        if let Some(v) = var("LISTING_BASE_URL") {
            self.listing.base_url = v;
        }
        if let Some(v) = var("RESOLVER_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool.workers == 0 {
            return Err(ResolveError::Config("pool.workers must be at least 1".into()));
        }
        if self.queue.chunk_size == 0 {
            return Err(ResolveError::Config("queue.chunk_size must be at least 1".into()));
        }
        if self.queue.concurrency == 0 {
            return Err(ResolveError::Config("queue.concurrency must be at least 1".into()));
        }
        if !(self.registry.price_band > 0.0 && self.registry.price_band < 1.0) {
            return Err(ResolveError::Config(format!(
                "registry.price_band must be within (0, 1), got {}",
                self.registry.price_band
            )));
        }
        Ok(())
    }

    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config = Config::from_toml(
            r#"
            [pool]
            workers = 3

            [registry]
            row_limit = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.pool.workers, 3);
        assert_eq!(config.registry.row_limit, 10);
        assert_eq!(config.registry.timeout_secs, 45);
        assert_eq!(config.queue.chunk_size, 50);
        assert_eq!(config.pipeline.timeout_secs, 120);
        assert_eq!(config.storage.queue_db(), PathBuf::from("data/queue.db"));
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = Config::from_toml("[partner]\nbase_url = \"http://file\"\n").unwrap();
        let env: HashMap<&str, &str> = [
            ("PARTNER_BASE_URL", "http://env"),
            ("RESOLVER_DATA_DIR", "/tmp/resolver"),
        ]
        .into_iter()
        .collect();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.partner.base_url, "http://env");
        assert_eq!(config.storage.properties_db(), PathBuf::from("/tmp/resolver/properties.db"));
    }

    #[test]
    fn rejects_zero_workers_and_bad_band() {
        let mut config = Config::default();
        config.pool.workers = 0;
        assert!(matches!(config.validate(), Err(ResolveError::Config(_))));

        let mut config = Config::default();
        config.registry.price_band = 1.5;
        assert!(config.validate().is_err());
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(Config::from_toml("[pool\nworkers = ").is_err());
    }
}
