use std::sync::Arc;
use std::time::Duration;

use blackboard_cache::{ContentCache, HousekeepingReport, HousekeepingScheduler, remove_stale_files};
use blackboard_fetch::{Fetcher, MarkdownFetcher};
use blackboard_shared::{AppConfig, BlackboardError, Result, validate_config};
use blackboard_storage::BlackboardStore;
use tracing::{debug, info, instrument};

/// Owns the store, the cache and the housekeeping task.
pub struct Runtime {
    config: AppConfig,
    store: Arc<BlackboardStore>,
    cache: Arc<ContentCache>,
    housekeeping: Option<HousekeepingScheduler>,
}

impl Runtime {
    /// Open everything with the built-in file/HTTP fetcher.
    pub async fn open(config: AppConfig) -> Result<Self> {
        let fetcher = Arc::new(MarkdownFetcher::from_config(&config.fetch)?);
        Self::open_with_fetcher(config, fetcher).await
    }

    /// Open everything around a caller-supplied fetcher.
    #[instrument(skip_all)]
    pub async fn open_with_fetcher(config: AppConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        validate_config(&config)?;

        let store = Arc::new(BlackboardStore::open(&config.store).await?);
        let cache = Arc::new(ContentCache::open(&config.cache, fetcher)?);

        let housekeeping = config.housekeeping.enabled.then(|| {
            HousekeepingScheduler::start(
                cache.root().to_path_buf(),
                config.housekeeping.interval(),
                config.housekeeping.max_age(),
            )
        });

        info!(
            cache_root = %cache.root().display(),
            housekeeping = housekeeping.is_some(),
            "runtime ready"
        );

        Ok(Self {
            config,
            store,
            cache,
            housekeeping,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Shared handle to the plan/result/context store.
    pub fn store(&self) -> &Arc<BlackboardStore> {
        &self.store
    }

    /// Shared handle to the content cache.
    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    pub fn housekeeping_running(&self) -> bool {
        self.housekeeping.is_some()
    }

    /// Converted text of a source, cached unless `use_cache` is false.
    pub async fn get_context(&self, identifier: &str, use_cache: bool) -> Result<String> {
        self.cache.get_context(identifier, use_cache).await
    }

    /// One housekeeping pass now, on the blocking pool.
    ///
    /// `max_age` defaults to `[housekeeping].max_age_secs`.
    pub async fn remove_stale_files(&self, max_age: Option<Duration>) -> Result<HousekeepingReport> {
        let root = self.cache.root().to_path_buf();
        let max_age = max_age.unwrap_or_else(|| self.config.housekeeping.max_age());
        tokio::task::spawn_blocking(move || remove_stale_files(&root, max_age))
            .await
            .map_err(|e| BlackboardError::Storage(format!("housekeeping task failed: {e}")))?
    }

    /// Stop housekeeping, then release the store.
    pub async fn shutdown(self) {
        if let Some(scheduler) = self.housekeeping {
            scheduler.stop().await;
        }
        match Arc::try_unwrap(self.store) {
            Ok(store) => store.close(),
            Err(_) => debug!("store still shared; connection closes with the last handle"),
        }
        info!("runtime shut down");
    }
}
