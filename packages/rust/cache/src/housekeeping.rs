//! Periodic removal of old cache entries.

use std::fs::Metadata;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use blackboard_shared::{BlackboardError, MAX_HOUSEKEEPING_INTERVAL_SECS, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// How far ahead of the clock an mtime may be before it is distrusted.
pub(crate) const MAX_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Shortest period the scheduler will tick at.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Outcome of one [`remove_stale_files`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    pub scanned: usize,
    pub removed: usize,
    /// Entries that could not be inspected or deleted, with the reason.
    pub failures: Vec<(PathBuf, String)>,
}

/// Age of an entry whose mtime is `mtime`.
///
/// Up to [`MAX_CLOCK_SKEW`] in the future reads as age zero. Beyond that the
/// timestamp is bogus and `None` is returned; callers treat the entry as expired.
pub(crate) fn entry_age(mtime: SystemTime, now: SystemTime) -> Option<Duration> {
    match now.duration_since(mtime) {
        Ok(age) => Some(age),
        Err(ahead) if ahead.duration() <= MAX_CLOCK_SKEW => Some(Duration::ZERO),
        Err(_) => None,
    }
}

/// Delete every file directly under `root` whose mtime is older than `max_age`.
///
/// Entries that disappear mid-scan are skipped. A failure on one entry is
/// recorded and the scan continues. A missing root is an empty pass.
pub fn remove_stale_files(root: &Path, max_age: Duration) -> Result<HousekeepingReport> {
    sweep_dir(root, max_age, |path| std::fs::remove_file(path))
}

fn sweep_dir(
    root: &Path,
    max_age: Duration,
    mut remove: impl FnMut(&Path) -> io::Result<()>,
) -> Result<HousekeepingReport> {
    let mut report = HousekeepingReport::default();

    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(BlackboardError::io(root, e)),
    };

    let now = SystemTime::now();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "failed to list cache entry");
                report.failures.push((root.to_path_buf(), e.to_string()));
                continue;
            }
        };
        let path = entry.path();

        match sweep_entry(&path, entry.metadata(), now, max_age, &mut remove) {
            Sweep::Ignored => {}
            Sweep::Kept => report.scanned += 1,
            Sweep::Removed => {
                report.scanned += 1;
                report.removed += 1;
            }
            Sweep::StatFailed(reason) => {
                warn!(path = %path.display(), error = %reason, "failed to stat cache entry");
                report.failures.push((path, reason));
            }
            Sweep::RemoveFailed(reason) => {
                warn!(path = %path.display(), error = %reason, "failed to remove stale entry");
                report.scanned += 1;
                report.failures.push((path, reason));
            }
        }
    }

    Ok(report)
}

/// What happened to one directory entry during a pass.
#[derive(Debug, PartialEq, Eq)]
enum Sweep {
    /// Vanished, or not a regular file.
    Ignored,
    Kept,
    Removed,
    StatFailed(String),
    RemoveFailed(String),
}

fn sweep_entry(
    path: &Path,
    meta: io::Result<Metadata>,
    now: SystemTime,
    max_age: Duration,
    remove: impl FnOnce(&Path) -> io::Result<()>,
) -> Sweep {
    let meta = match meta {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Sweep::Ignored,
        Err(e) => return Sweep::StatFailed(e.to_string()),
    };
    if !meta.is_file() {
        return Sweep::Ignored;
    }

    let age = match meta.modified() {
        Ok(mtime) => entry_age(mtime, now),
        Err(_) => Some(Duration::ZERO),
    };
    if age.is_some_and(|age| age <= max_age) {
        return Sweep::Kept;
    }

    match remove(path) {
        Ok(()) => {
            debug!(path = %path.display(), age_secs = ?age.map(|a| a.as_secs()), "removed stale entry");
            Sweep::Removed
        }
        // Another pass got there first.
        Err(e) if e.kind() == ErrorKind::NotFound => Sweep::Kept,
        Err(e) => Sweep::RemoveFailed(e.to_string()),
    }
}

/// Background task running [`remove_stale_files`] on a fixed interval.
pub struct HousekeepingScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl HousekeepingScheduler {
    /// Spawn the task on the current runtime. The first pass runs one
    /// `interval` after start.
    ///
    /// `interval` is clamped to at most
    /// [`MAX_HOUSEKEEPING_INTERVAL_SECS`] and at least one millisecond.
    pub fn start(root: PathBuf, interval: Duration, max_age: Duration) -> Self {
        let interval = interval.clamp(
            MIN_INTERVAL,
            Duration::from_secs(MAX_HOUSEKEEPING_INTERVAL_SECS),
        );
        let (shutdown, mut stop) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                root = %root.display(),
                interval_secs = interval.as_secs(),
                max_age_secs = max_age.as_secs(),
                "housekeeping started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let pass_root = root.clone();
                        let outcome = tokio::task::spawn_blocking(move || {
                            remove_stale_files(&pass_root, max_age)
                        })
                        .await;
                        match outcome {
                            Ok(Ok(report)) => info!(
                                scanned = report.scanned,
                                removed = report.removed,
                                failures = report.failures.len(),
                                "housekeeping pass complete"
                            ),
                            Ok(Err(e)) => warn!(error = %e, "housekeeping pass failed"),
                            Err(e) => warn!(error = %e, "housekeeping task panicked"),
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
            debug!("housekeeping stopped");
        });

        Self { shutdown, handle }
    }

    /// Signal the task and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "housekeeping task ended abnormally");
        }
    }
}
