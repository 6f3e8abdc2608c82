//! Configuration management for the quota gate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{LimiterError, Result};
use crate::ratelimit::{LimitStore, MemoryStore, PostgresStore};

/// Environment variable prefix for layered configuration.
const ENV_PREFIX: &str = "QUOTA_GATE";

/// Variables that carry a database URL in older deployments, in lookup order.
const LEGACY_DATABASE_VARS: [&str; 2] = ["POSTGRES_URL", "DATABASE_URL"];

/// Main configuration for the quota gate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaGateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Client identity configuration
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// What the HTTP layer answers when the store fails mid-check
    #[serde(default)]
    pub on_store_error: StoreErrorPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            on_store_error: StoreErrorPolicy::default(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// How the HTTP layer treats a store failure during a metered check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorPolicy {
    /// Answer with an internal error
    #[default]
    FailClosed,
    /// Answer as if allowed and unmetered
    FailOpen,
}

/// Which counter store backs the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Durable PostgreSQL table, enabled by `database_url`
    #[default]
    Postgres,
    /// Process-local map; counts reset on restart
    Memory,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Connection URL. Leaving it unset with the postgres backend disables
    /// rate limiting entirely.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Maximum pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Upper bound for any single store operation in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            database_url: None,
            max_connections: default_max_connections(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_timeout_ms() -> u64 {
    5000
}

/// Client identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Trust `X-Forwarded-For` / `X-Real-IP` before the socket peer address.
    /// Only safe behind a proxy that overwrites these headers.
    #[serde(default = "default_trust_forwarded_headers")]
    pub trust_forwarded_headers: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            trust_forwarded_headers: default_trust_forwarded_headers(),
        }
    }
}

fn default_trust_forwarded_headers() -> bool {
    true
}

impl QuotaGateConfig {
    /// Load configuration from an optional file, then `QUOTA_GATE_*`
    /// environment variables, then the legacy database URL variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: QuotaGateConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| LimiterError::Config(e.to_string()))?;

        config.apply_legacy_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Fill an unset database URL from the first legacy variable present.
    pub fn apply_legacy_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.store.database_url().is_some() {
            return;
        }
        self.store.database_url = LEGACY_DATABASE_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .find(|value| !value.trim().is_empty());
    }
}

impl StoreConfig {
    /// Per-operation store timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The configured database URL. Blank values count as unset.
    pub fn database_url(&self) -> Option<&str> {
        self.database_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Whether requests will be counted at all.
    pub fn is_metered(&self) -> bool {
        match self.backend {
            StoreBackend::Memory => true,
            StoreBackend::Postgres => self.database_url().is_some(),
        }
    }

    /// Build the configured store, or `None` when rate limiting is disabled.
    pub fn open_store(&self) -> Result<Option<Arc<dyn LimitStore>>> {
        match (self.backend, self.database_url()) {
            (StoreBackend::Memory, _) => {
                info!("Using in-memory counter store");
                Ok(Some(Arc::new(MemoryStore::new())))
            }
            (StoreBackend::Postgres, Some(url)) => {
                let store = PostgresStore::connect_lazy(url, self.max_connections, self.timeout())?;
                Ok(Some(Arc::new(store)))
            }
            (StoreBackend::Postgres, None) => {
                warn!("No database URL configured, rate limiting is disabled");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QuotaGateConfig::default();
        assert_eq!(config.server.http_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.server.on_store_error, StoreErrorPolicy::FailClosed);
        assert_eq!(config.store.backend, StoreBackend::Postgres);
        assert_eq!(config.store.timeout(), Duration::from_secs(5));
        assert!(config.identity.trust_forwarded_headers);
        assert!(!config.store.is_metered());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  http_addr: 0.0.0.0:9000
  on_store_error: fail_open
store:
  database_url: postgres://localhost/quota
  timeout_ms: 250
identity:
  trust_forwarded_headers: false
"#;
        let config = QuotaGateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.http_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.server.on_store_error, StoreErrorPolicy::FailOpen);
        assert_eq!(config.store.database_url.as_deref(), Some("postgres://localhost/quota"));
        assert_eq!(config.store.timeout(), Duration::from_millis(250));
        assert_eq!(config.store.max_connections, 5);
        assert!(!config.identity.trust_forwarded_headers);
        assert!(config.store.is_metered());
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = QuotaGateConfig::from_yaml("store:\n  backend: redis\n");
        assert!(matches!(result, Err(LimiterError::Config(_))));
    }

    #[test]
    fn test_memory_backend_is_metered_without_url() {
        let config = QuotaGateConfig::from_yaml("store:\n  backend: memory\n").unwrap();
        assert!(config.store.is_metered());
        assert!(config.store.open_store().unwrap().is_some());
    }

    #[test]
    fn test_missing_url_disables_store() {
        let config = QuotaGateConfig::default();
        assert!(config.store.open_store().unwrap().is_none());
    }

    #[test]
    fn test_blank_url_disables_store() {
        let blanks = [
            "store:\n  database_url: \"\"\n",
            "store:\n  database_url: \"   \"\n",
        ];
        for yaml in blanks {
            let config = QuotaGateConfig::from_yaml(yaml).unwrap();
            assert_eq!(config.store.database_url(), None);
            assert!(!config.store.is_metered());
            assert!(config.store.open_store().unwrap().is_none());
        }
    }

    #[test]
    fn test_database_url_is_trimmed() {
        let yaml = "store:\n  database_url: \" postgres://db/quota \"\n";
        let config = QuotaGateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.store.database_url(), Some("postgres://db/quota"));
    }

    #[test]
    fn test_legacy_env_replaces_blank_explicit_url() {
        let mut config = QuotaGateConfig::from_yaml("store:\n  database_url: \"\"\n").unwrap();
        config.apply_legacy_env(|name| match name {
            "POSTGRES_URL" => Some("postgres://db/primary".to_string()),
            _ => None,
        });
        assert_eq!(config.store.database_url(), Some("postgres://db/primary"));
    }

    #[test]
    fn test_legacy_env_fills_missing_url() {
        let mut config = QuotaGateConfig::default();
        config.apply_legacy_env(|name| match name {
            "DATABASE_URL" => Some("postgres://db/fallback".to_string()),
            _ => None,
        });
        assert_eq!(config.store.database_url.as_deref(), Some("postgres://db/fallback"));
    }

    #[test]
    fn test_legacy_env_prefers_postgres_url() {
        let mut config = QuotaGateConfig::default();
        config.apply_legacy_env(|name| match name {
            "POSTGRES_URL" => Some("postgres://db/primary".to_string()),
            "DATABASE_URL" => Some("postgres://db/fallback".to_string()),
            _ => None,
        });
        assert_eq!(config.store.database_url.as_deref(), Some("postgres://db/primary"));
    }

    #[test]
    fn test_legacy_env_ignores_blank_and_keeps_explicit() {
        let mut config = QuotaGateConfig::default();
        config.apply_legacy_env(|_| Some("  ".to_string()));
        assert!(config.store.database_url.is_none());

        config.store.database_url = Some("postgres://explicit".to_string());
        config.apply_legacy_env(|_| Some("postgres://other".to_string()));
        assert_eq!(config.store.database_url.as_deref(), Some("postgres://explicit"));
    }
}
