//! Application state wiring the router to its infrastructure.
//!
//! AppState owns the router (with its concrete adapters and cache backend)
//! and the spend ledger that CLI commands run against.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use ideaforge_core::budget::{day_start, month_start};
use ideaforge_core::cache::{BoxResponseCache, InMemoryResponseCache};
use ideaforge_core::router::Router;
use ideaforge_infra::cache::RedisResponseCache;
use ideaforge_infra::config::{data_dir, default_database_url, load_config};
use ideaforge_infra::llm::create_adapters;
use ideaforge_infra::secret::EnvSecretProvider;
use ideaforge_infra::sqlite::{DatabasePool, SqliteSpendLedger};

/// Shared application state for CLI commands.
pub struct AppState {
    pub router: Arc<Router>,
    pub ledger: SqliteSpendLedger,
    spend_writer: JoinHandle<()>,
}

impl AppState {
    /// Initialize all services with production infrastructure.
    ///
    /// Creates the data directory, loads `config.toml` plus env overrides,
    /// registers every provider whose key is set, opens the spend ledger and
    /// restores today's and this month's spend into the budget guard.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

        let config = load_config(&data_dir)
            .await
            .context("failed to load configuration")?;

        let adapters = create_adapters(&config, &EnvSecretProvider::new()).await?;

        let database_url = config
            .database_url
            .clone()
            .unwrap_or_else(|| default_database_url(&data_dir));
        let pool = DatabasePool::new(&database_url)
            .await
            .with_context(|| format!("failed to open spend ledger at {database_url}"))?;
        let ledger = SqliteSpendLedger::new(pool);

        let now = Utc::now();
        let totals = ledger
            .totals(day_start(now), month_start(now))
            .await
            .context("failed to read spend totals")?;

        let (spend_tx, spend_rx) = mpsc::unbounded_channel();
        let spend_writer = ledger.clone().spawn_writer(spend_rx);

        let cache = build_cache(config.cache_url.as_deref());
        let router = Router::builder()
            .config(config)
            .adapters(adapters)
            .cache(cache)
            .spend_channel(spend_tx)
            .build()?;
        router.restore_spend(totals.daily, totals.monthly);

        tracing::debug!(
            data_dir = %data_dir.display(),
            providers = ?router.providers(),
            cache = router.cache_backend(),
            daily_spend = totals.daily,
            monthly_spend = totals.monthly,
            "router initialized"
        );

        Ok(Self {
            router: Arc::new(router),
            ledger,
            spend_writer,
        })
    }

    /// Drop the router and wait for pending spend records to reach the ledger.
    pub async fn shutdown(self) {
        let Self {
            router,
            spend_writer,
            ..
        } = self;
        drop(router);
        if let Err(e) = spend_writer.await {
            tracing::warn!(error = %e, "spend writer task failed");
        }
    }
}

/// Redis when a cache URL is configured and valid, otherwise in-memory.
fn build_cache(cache_url: Option<&str>) -> BoxResponseCache {
    match cache_url {
        Some(url) => match RedisResponseCache::new(url) {
            Ok(cache) => BoxResponseCache::new(cache),
            Err(e) => {
                tracing::warn!(error = %e, "invalid cache URL, falling back to in-memory cache");
                BoxResponseCache::new(InMemoryResponseCache::new())
            }
        },
        None => BoxResponseCache::new(InMemoryResponseCache::new()),
    }
}
