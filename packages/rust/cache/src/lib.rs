//! Disk-backed cache of converted source text.
//!
//! One file per canonical source identifier, named by the SHA-256 of that
//! identifier. Freshness is the file's mtime; entries are published with an
//! atomic rename so readers never observe a partial write.

mod housekeeping;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use blackboard_fetch::{Fetcher, SourceId};
use blackboard_shared::{BlackboardError, CacheConfig, Result, expand_home};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub use housekeeping::{HousekeepingReport, HousekeepingScheduler, remove_stale_files};

/// Extension of published entries.
const ENTRY_EXT: &str = "md";

/// Prefix of in-flight publish files.
const TEMP_PREFIX: &str = ".tmp-";

/// Content cache in front of a [`Fetcher`].
pub struct ContentCache {
    root: PathBuf,
    ttl: Duration,
    fetch_timeout: Duration,
    fetcher: Arc<dyn Fetcher>,
}

impl ContentCache {
    /// Open the cache described by `[cache]`, creating the root directory.
    pub fn open(config: &CacheConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        let root = expand_home(&config.root)?;
        Self::new(root, config.ttl(), config.fetch_timeout(), fetcher)
    }

    pub fn new(
        root: PathBuf,
        ttl: Duration,
        fetch_timeout: Duration,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&root).map_err(|e| BlackboardError::io(&root, e))?;
        debug!(root = %root.display(), ttl_secs = ttl.as_secs(), "cache opened");
        Ok(Self {
            root,
            ttl,
            fetch_timeout,
            fetcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lowercase hex SHA-256 of a canonical identifier.
    pub fn cache_key(canonical: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Where the entry for `identifier` lives (whether or not it exists).
    pub fn entry_path(&self, identifier: &str) -> Result<PathBuf> {
        let source = SourceId::parse(identifier)?;
        Ok(self.path_for(&Self::cache_key(source.as_str())))
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.{ENTRY_EXT}"))
    }

    /// Converted text of `identifier`, served from cache when fresh.
    ///
    /// With `use_cache = false` the source is always fetched; the result is
    /// still published so later cached reads see it.
    #[instrument(skip(self), fields(canonical = tracing::field::Empty))]
    pub async fn get_context(&self, identifier: &str, use_cache: bool) -> Result<String> {
        let source = SourceId::parse(identifier)?;
        tracing::Span::current().record("canonical", source.as_str());

        let key = Self::cache_key(source.as_str());
        let path = self.path_for(&key);

        if use_cache {
            if let Some(text) = self.read_fresh(&path).await {
                debug!(key = %key, "cache hit");
                return Ok(text);
            }
        }

        let text = tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(&source))
            .await
            .map_err(|_| {
                BlackboardError::timeout(format!("fetch of {source}"), self.fetch_timeout)
            })??;

        self.publish(key.clone(), path, text.clone()).await?;
        info!(key = %key, len = text.len(), use_cache, "cache entry published");
        Ok(text)
    }

    /// Remove the entry for `identifier`. Returns whether one existed.
    pub async fn invalidate(&self, identifier: &str) -> Result<bool> {
        let path = self.entry_path(identifier)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BlackboardError::io(&path, e)),
        }
    }

    /// Entry text if present and younger than the TTL. Anything else is a miss.
    async fn read_fresh(&self, path: &Path) -> Option<String> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable cache entry");
                return None;
            }
        };

        let age = match meta.modified() {
            Ok(mtime) => housekeeping::entry_age(mtime, SystemTime::now()),
            Err(_) => Some(Duration::ZERO),
        };
        match age {
            Some(age) if age < self.ttl => {}
            Some(age) => {
                debug!(path = %path.display(), age_secs = age.as_secs(), "cache entry expired");
                return None;
            }
            None => {
                warn!(path = %path.display(), "cache entry dated in the future, refetching");
                return None;
            }
        }

        match tokio::fs::read_to_string(path).await {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable cache entry");
                None
            }
        }
    }

    /// Write to a unique temp file, sync, stamp mtime, rename into place.
    async fn publish(&self, key: String, target: PathBuf, text: String) -> Result<()> {
        let temp = self
            .root
            .join(format!("{TEMP_PREFIX}{key}-{}", Uuid::now_v7()));

        tokio::task::spawn_blocking(move || {
            let written = write_synced(&temp, text.as_bytes())
                .and_then(|()| std::fs::rename(&temp, &target));
            if let Err(e) = written {
                let _ = std::fs::remove_file(&temp);
                return Err(BlackboardError::io(&target, e));
            }
            Ok(())
        })
        .await
        .map_err(|e| BlackboardError::Storage(format!("cache publish task failed: {e}")))?
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(bytes)?;
    file.set_modified(SystemTime::now())?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Returns canned text, counting calls; can be switched to fail or hang.
    struct FakeFetcher {
        calls: AtomicU32,
        body: Mutex<String>,
        mode: Mutex<Mode>,
        seen: Mutex<Vec<String>>,
    }

    #[derive(Clone, Copy)]
    enum Mode {
        Ok,
        Fail,
        Hang,
    }

    impl FakeFetcher {
        fn new(body: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                body: Mutex::new(body.to_string()),
                mode: Mutex::new(Mode::Ok),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn set_body(&self, body: &str) {
            *self.body.lock().unwrap() = body.to_string();
        }

        fn set_mode(&self, mode: Mode) {
            *self.mode.lock().unwrap() = mode;
        }
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(&self, source: &SourceId) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(source.as_str().to_string());
            let mode = *self.mode.lock().unwrap();
            match mode {
                Mode::Ok => Ok(self.body.lock().unwrap().clone()),
                Mode::Fail => Err(BlackboardError::fetch(source.as_str(), "boom")),
                Mode::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(String::new())
                }
            }
        }
    }

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("bb_cache_{}", Uuid::now_v7()))
    }

    fn cache_with(fetcher: Arc<FakeFetcher>, ttl: Duration) -> ContentCache {
        ContentCache::new(temp_root(), ttl, Duration::from_millis(200), fetcher).unwrap()
    }

    fn age_entry(path: &Path, age: Duration) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[tokio::test]
    async fn second_read_is_served_from_cache() {
        let fetcher = FakeFetcher::new("# Notes\n");
        let cache = cache_with(fetcher.clone(), Duration::from_secs(3600));

        assert_eq!(cache.get_context("/tmp/a.txt", true).await.unwrap(), "# Notes\n");
        assert_eq!(cache.get_context("/tmp/a.txt", true).await.unwrap(), "# Notes\n");
        assert_eq!(fetcher.calls(), 1);
        assert!(cache.entry_path("/tmp/a.txt").unwrap().exists());
    }

    #[tokio::test]
    async fn bypass_always_fetches_and_refreshes_entry() {
        let fetcher = FakeFetcher::new("v1");
        let cache = cache_with(fetcher.clone(), Duration::from_secs(3600));

        cache.get_context("/tmp/a.txt", true).await.unwrap();
        fetcher.set_body("v2");
        assert_eq!(cache.get_context("/tmp/a.txt", false).await.unwrap(), "v2");
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(cache.get_context("/tmp/a.txt", true).await.unwrap(), "v2");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn expired_entry_is_refetched() {
        let fetcher = FakeFetcher::new("old");
        let cache = cache_with(fetcher.clone(), Duration::from_secs(3600));
        cache.get_context("/tmp/a.txt", true).await.unwrap();

        let path = cache.entry_path("/tmp/a.txt").unwrap();
        age_entry(&path, Duration::from_secs(1800));
        fetcher.set_body("new");
        assert_eq!(cache.get_context("/tmp/a.txt", true).await.unwrap(), "old");
        assert_eq!(fetcher.calls(), 1);

        age_entry(&path, Duration::from_secs(7200));
        assert_eq!(cache.get_context("/tmp/a.txt", true).await.unwrap(), "new");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn future_dated_entry_is_refetched() {
        let fetcher = FakeFetcher::new("copied in");
        let cache = cache_with(fetcher.clone(), Duration::from_secs(3600));
        cache.get_context("/tmp/a.txt", true).await.unwrap();

        let path = cache.entry_path("/tmp/a.txt").unwrap();
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(24 * 3600))
            .unwrap();
        drop(file);

        fetcher.set_body("fresh");
        assert_eq!(cache.get_context("/tmp/a.txt", true).await.unwrap(), "fresh");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_prior_entry() {
        let fetcher = FakeFetcher::new("kept");
        let cache = cache_with(fetcher.clone(), Duration::from_secs(3600));
        cache.get_context("/tmp/a.txt", true).await.unwrap();

        fetcher.set_mode(Mode::Fail);
        let err = cache.get_context("/tmp/a.txt", false).await.unwrap_err();
        assert!(matches!(err, BlackboardError::Fetch { .. }));

        let path = cache.entry_path("/tmp/a.txt").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "kept");
    }

    #[tokio::test]
    async fn fetch_timeout_caches_nothing() {
        let fetcher = FakeFetcher::new("");
        fetcher.set_mode(Mode::Hang);
        let cache = cache_with(fetcher.clone(), Duration::from_secs(3600));

        let err = cache.get_context("/tmp/slow.txt", true).await.unwrap_err();
        assert!(matches!(err, BlackboardError::Timeout { .. }));
        assert!(!cache.entry_path("/tmp/slow.txt").unwrap().exists());
        assert_eq!(std::fs::read_dir(cache.root()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn equivalent_identifiers_share_an_entry() {
        let fetcher = FakeFetcher::new("same");
        let cache = cache_with(fetcher.clone(), Duration::from_secs(3600));

        cache.get_context("/tmp/a.txt", true).await.unwrap();
        cache.get_context("/tmp/./a.txt", true).await.unwrap();
        cache.get_context("file:///tmp/a.txt", true).await.unwrap();
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(
            fetcher.seen.lock().unwrap().as_slice(),
            ["file:///tmp/a.txt".to_string()]
        );
    }

    #[tokio::test]
    async fn invalid_identifier_never_reaches_fetcher() {
        let fetcher = FakeFetcher::new("x");
        let cache = cache_with(fetcher.clone(), Duration::from_secs(3600));
        assert!(matches!(
            cache.get_context("  ", true).await,
            Err(BlackboardError::Validation { .. })
        ));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn invalidate_removes_entry_and_tolerates_absence() {
        let fetcher = FakeFetcher::new("x");
        let cache = cache_with(fetcher.clone(), Duration::from_secs(3600));
        cache.get_context("/tmp/a.txt", true).await.unwrap();

        assert!(cache.invalidate("/tmp/a.txt").await.unwrap());
        assert!(!cache.invalidate("/tmp/a.txt").await.unwrap());
        cache.get_context("/tmp/a.txt", true).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    fn cache_key_is_hex_sha256() {
        let key = ContentCache::cache_key("file:///tmp/a.txt");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(key, ContentCache::cache_key("file:///tmp/b.txt"));
    }
}
