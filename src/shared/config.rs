//! Application configuration. Store backend, retry and sync tuning, paths.

use crate::domain::DomainError;
use crate::shared::retry::RetryPolicy;
use serde::Deserialize;
use std::time::Duration;

/// Default number of counter-entity updates in flight per reconcile phase (sequential).
pub const DEFAULT_SYNC_CONCURRENCY: usize = 1;

/// Which `EntityStore` adapter main wires in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Sqlite,
    Http,
}

impl StoreBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "json" => Some(StoreBackend::Memory),
            "sqlite" | "libsql" => Some(StoreBackend::Sqlite),
            "http" | "rest" => Some(StoreBackend::Http),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    /// memory | sqlite | http. Read from CAMPUS_SYNC_STORE_BACKEND.
    #[serde(default)]
    pub store_backend: Option<String>,

    /// Base URL of the HTTP entity API. Read from CAMPUS_SYNC_STORE_URL.
    #[serde(default)]
    pub store_url: Option<String>,

    /// Bearer token for the HTTP entity API. Read from CAMPUS_SYNC_STORE_TOKEN.
    #[serde(default)]
    pub store_token: Option<String>,

    pub data_dir: Option<String>,

    /// JSON snapshot backing the memory store. Defaults to `<data_dir>/store.json`.
    #[serde(default)]
    pub snapshot_path: Option<String>,

    /// Where CSV reports are written. Defaults to `<data_dir>/reports`.
    #[serde(default)]
    pub reports_dir: Option<String>,

    // ─────────────────────────────────────────────────────────────────────────
    // Store call resilience
    // ─────────────────────────────────────────────────────────────────────────
    /// Per-call timeout in ms (default 10000).
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    /// Attempts per store call including the first (default 3).
    #[serde(default)]
    pub retry_max_attempts: Option<u32>,

    #[serde(default)]
    pub retry_base_delay_ms: Option<u64>,

    #[serde(default)]
    pub retry_max_delay_ms: Option<u64>,

    /// Counter-entity updates in flight per reconcile phase (default 1).
    #[serde(default)]
    pub sync_concurrency: Option<usize>,
}

impl AppConfig {
    pub fn load() -> Result<Self, DomainError> {
        dotenv::dotenv().ok();
        let mut c = config::Config::builder();
        c = c.add_source(config::Environment::with_prefix("CAMPUS_SYNC"));
        if let Ok(path) = std::env::var("CAMPUS_SYNC_CONFIG") {
            c = c.add_source(config::File::with_name(&path));
        }
        Self::from_builder(c)
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, DomainError> {
        builder
            .build()
            .and_then(|built| built.try_deserialize())
            .map_err(|e| DomainError::Config(e.to_string()))
    }

    /// Unknown values fall back to the memory store.
    pub fn store_backend_or_default(&self) -> StoreBackend {
        self.store_backend
            .as_deref()
            .and_then(StoreBackend::parse)
            .unwrap_or(StoreBackend::Memory)
    }

    pub fn data_dir_or_default(&self) -> String {
        self.data_dir.clone().unwrap_or_else(|| "./data".to_string())
    }

    pub fn snapshot_path_or_default(&self) -> String {
        self.snapshot_path
            .clone()
            .unwrap_or_else(|| format!("{}/store.json", self.data_dir_or_default()))
    }

    pub fn reports_dir_or_default(&self) -> String {
        self.reports_dir
            .clone()
            .unwrap_or_else(|| format!("{}/reports", self.data_dir_or_default()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.unwrap_or(10_000))
    }

    /// Returns sync concurrency. Zero is clamped to 1.
    pub fn sync_concurrency_or_default(&self) -> usize {
        self.sync_concurrency
            .unwrap_or(DEFAULT_SYNC_CONCURRENCY)
            .max(1)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.retry_max_attempts.unwrap_or(defaults.max_attempts),
            base_delay: self
                .retry_base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: self
                .retry_max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            call_timeout: self.request_timeout(),
            ..defaults
        }
    }

    /// Returns true if the HTTP backend has a base URL.
    pub fn is_http_configured(&self) -> bool {
        self.store_url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.store_backend_or_default(), StoreBackend::Memory);
        assert_eq!(cfg.snapshot_path_or_default(), "./data/store.json");
        assert_eq!(cfg.sync_concurrency_or_default(), 1);
        let policy = cfg.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.call_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_overrides() {
        let cfg = AppConfig {
            store_backend: Some("SQLite".into()),
            sync_concurrency: Some(0),
            retry_max_attempts: Some(5),
            request_timeout_ms: Some(250),
            ..AppConfig::default()
        };
        assert_eq!(cfg.store_backend_or_default(), StoreBackend::Sqlite);
        assert_eq!(cfg.sync_concurrency_or_default(), 1);
        let policy = cfg.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.call_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_bad_value_is_a_config_error() {
        let builder = config::Config::builder()
            .set_override("sync_concurrency", "lots")
            .unwrap();
        let err = AppConfig::from_builder(builder).unwrap_err();
        assert!(matches!(err, DomainError::Config(_)));
    }
}
