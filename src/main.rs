//! Wiring & DI. Entry point: pick the entity store, build the use cases, run the console.
//! No business logic here.

use campus_sync::adapters::http::RestStore;
use campus_sync::adapters::persistence::{MemoryStore, SqliteStore};
use campus_sync::adapters::ui::tui::TuiInputPort;
use campus_sync::ports::{EntityStore, InputPort};
use campus_sync::shared::config::{AppConfig, StoreBackend};
use campus_sync::usecases::Orchestrator;
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let env_loaded = dotenv();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &env_loaded {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(_) => info!(cwd = %cwd.display(), "no .env found (check CWD)"),
    }

    campus_sync::adapters::ui::init_ui();

    let cfg = match AppConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, "config not loaded, using defaults");
            AppConfig::default()
        }
    };

    let store = open_store(&cfg).await?;
    let retry = cfg.retry_policy();
    let concurrency = cfg.sync_concurrency_or_default();
    info!(
        max_attempts = retry.max_attempts,
        timeout_ms = retry.call_timeout.as_millis() as u64,
        concurrency,
        "store call policy"
    );

    // --- Services ---
    let orchestrator = Arc::new(Orchestrator::new(store, retry, concurrency));

    let reports_dir = PathBuf::from(cfg.reports_dir_or_default());
    let input_port: Arc<dyn InputPort> =
        Arc::new(TuiInputPort::new(Arc::clone(&orchestrator), reports_dir));

    // --- Run (main menu -> relations / eligibility / audit) ---
    input_port
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    Ok(())
}

/// Builds the configured `EntityStore`. HTTP without a base URL falls back to memory.
async fn open_store(cfg: &AppConfig) -> anyhow::Result<Arc<dyn EntityStore>> {
    let backend = match cfg.store_backend_or_default() {
        StoreBackend::Http if !cfg.is_http_configured() => {
            warn!("CAMPUS_SYNC_STORE_URL not set, using the memory store");
            StoreBackend::Memory
        }
        other => other,
    };

    let store: Arc<dyn EntityStore> = match backend {
        StoreBackend::Memory => {
            let path = cfg.snapshot_path_or_default();
            let store = MemoryStore::with_snapshot(&path);
            store
                .load()
                .await
                .map_err(|e| anyhow::anyhow!("load snapshot {}: {}", path, e))?;
            info!(path = %path, "memory store with JSON snapshot");
            Arc::new(store)
        }
        StoreBackend::Sqlite => {
            let store = SqliteStore::connect(cfg.data_dir_or_default())
                .await
                .map_err(|e| anyhow::anyhow!("SQLite connect failed: {}", e))?;
            Arc::new(store)
        }
        StoreBackend::Http => {
            let url = cfg.store_url.clone().unwrap_or_default();
            let store = RestStore::new(&url, cfg.store_token.clone(), cfg.request_timeout())
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            info!(url = %url, "HTTP entity store");
            Arc::new(store)
        }
    };
    Ok(store)
}
