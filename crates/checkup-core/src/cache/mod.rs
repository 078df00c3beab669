pub mod feed;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::models::{CoreError, CoreErrorKind, LogAction, LogEvent, Snapshot, Update};
use crate::persistence::SnapshotStore;
use crate::sources::UpdateSource;

pub use feed::{EventFeed, Subscription, SubscriptionId};

pub type CacheResult<T> = Result<T, CoreError>;

/// Outcome of a refresh that replaced the snapshot.
///
/// `failures` is non-empty when some sources failed while others succeeded.
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub update_count: usize,
    pub failures: Vec<CoreError>,
}

impl RefreshReport {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    /// The aggregated error of the failed sources, if any.
    pub fn error(&self) -> Option<CoreError> {
        (!self.failures.is_empty()).then(|| aggregate_failures(&self.failures))
    }
}

/// Shared owner of the current [`Snapshot`].
///
/// Every read and write goes through one async lock. Change notifications go
/// out through the [`EventFeed`] after the lock is released.
pub struct UpdateCache {
    snapshot: Mutex<Snapshot>,
    sources: Vec<Arc<dyn UpdateSource>>,
    store: Arc<dyn SnapshotStore>,
    feed: EventFeed,
}

impl UpdateCache {
    pub fn new(sources: Vec<Arc<dyn UpdateSource>>, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            snapshot: Mutex::new(Snapshot::default()),
            sources,
            store,
            feed: EventFeed::new(),
        }
    }

    pub fn cache_path(&self) -> Option<&Path> {
        self.store.location()
    }

    pub fn feed(&self) -> &EventFeed {
        &self.feed
    }

    pub fn subscribe(&self) -> Subscription {
        self.feed.subscribe()
    }

    /// Queries every source concurrently and replaces the snapshot with the
    /// merged result.
    ///
    /// Fails only when every source failed, in which case the snapshot is left
    /// untouched and nobody is woken.
    pub async fn refresh(&self) -> CacheResult<RefreshReport> {
        if self.sources.is_empty() {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                "no update sources are configured",
            ));
        }

        tracing::info!(sources = self.sources.len(), "refreshing pending updates");

        let mut tasks = JoinSet::new();
        for source in &self.sources {
            let source = Arc::clone(source);
            tasks.spawn_blocking(move || {
                let id = source.descriptor().id;
                (id, source.list_pending())
            });
        }

        let mut updates: Vec<Update> = Vec::new();
        let mut failures = Vec::new();
        let mut succeeded = 0usize;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Ok(found))) => {
                    tracing::debug!(source = %id, updates = found.len(), "source finished");
                    succeeded += 1;
                    updates.extend(found);
                }
                Ok((id, Err(error))) => {
                    tracing::warn!(source = %id, kind = ?error.kind, error = %error, "source failed");
                    failures.push(error);
                }
                Err(join_error) => {
                    tracing::error!(error = %join_error, "source task did not complete");
                    failures.push(CoreError::new(
                        CoreErrorKind::Internal,
                        format!("source task did not complete: {join_error}"),
                    ));
                }
            }
        }

        if succeeded == 0 {
            let error = aggregate_failures(&failures);
            tracing::error!(error = %error, "refresh failed, keeping previous snapshot");
            return Err(error);
        }

        let update_count = updates.len();
        {
            let mut current = self.snapshot.lock().await;
            *current = Snapshot::stamped(OffsetDateTime::now_utc(), updates);
            self.persist_locked(&current).await;
        }
        self.feed.broadcast();

        tracing::info!(updates = update_count, failed_sources = failures.len(), "refresh complete");
        Ok(RefreshReport {
            update_count,
            failures,
        })
    }

    /// Whether the snapshot is missing, unreadable or older than `interval`.
    pub async fn needs_refresh(&self, interval: Duration) -> bool {
        let mut current = self.snapshot.lock().await;
        if current.is_empty() {
            if !self.store.is_enabled() {
                return true;
            }
            if let Err(error) = self.load_locked(&mut current).await {
                tracing::debug!(error = %error, "no usable cache file");
                return true;
            }
        }

        let Ok(checked) = current.checked_at() else {
            return true;
        };
        tracing::debug!(checked = %current.checked, "last successful check");
        OffsetDateTime::now_utc() - checked > interval
    }

    /// Returns a copy of the current snapshot, loading it from storage first
    /// if nothing is held in memory.
    pub async fn read(&self) -> CacheResult<Snapshot> {
        let mut current = self.snapshot.lock().await;
        if current.is_empty() {
            if !self.store.is_enabled() {
                return Err(no_data("cache is empty and the cache file is disabled"));
            }
            let loaded = self.load_locked(&mut current).await.map_err(|error| {
                no_data(&format!("cache is empty and the cache file cannot be read: {error}"))
            })?;
            if !loaded {
                return Err(no_data("cache is empty and no cache file was found"));
            }
        }
        Ok(current.clone())
    }

    /// Drops pending entries for `name`, restricted to `resolved_version`
    /// when given. Returns whether anything was removed.
    pub async fn apply_log_event(&self, name: &str, resolved_version: Option<&str>) -> bool {
        let changed = {
            let mut current = self.snapshot.lock().await;
            let changed = current.retract(name, resolved_version);
            if changed {
                self.persist_locked(&current).await;
            }
            changed
        };
        if changed {
            tracing::info!(package = name, version = ?resolved_version, "retracted pending update");
            self.feed.broadcast();
        }
        changed
    }

    /// Applies a batch of log events newer than the last check and returns
    /// how many entries were retracted. Subscribers are woken at most once.
    pub async fn apply_log_events(&self, events: &[LogEvent]) -> CacheResult<usize> {
        let removed = {
            let mut current = self.snapshot.lock().await;
            if current.checked.is_empty() {
                return Err(CoreError::new(
                    CoreErrorKind::InvalidInput,
                    "updates have never been checked",
                ));
            }
            let checked = current.checked_at()?;

            let mut removed = 0usize;
            for event in events.iter().filter(|event| event.at >= checked) {
                let version = match event.action {
                    LogAction::Installed => continue,
                    LogAction::Upgraded => event.resolved_version.as_deref(),
                    LogAction::Removed => None,
                };
                if current.retract(&event.package, version) {
                    tracing::info!(
                        package = %event.package,
                        action = ?event.action,
                        version = ?version,
                        "retracted pending update"
                    );
                    removed += 1;
                }
            }
            if removed > 0 {
                self.persist_locked(&current).await;
            }
            removed
        };

        if removed > 0 {
            self.feed.broadcast();
        }
        Ok(removed)
    }

    /// Writes the current snapshot to storage. A disabled store succeeds.
    pub async fn persist(&self) -> CacheResult<()> {
        let current = self.snapshot.lock().await;
        save_blocking(Arc::clone(&self.store), current.clone()).await
    }

    /// Replaces the in-memory snapshot with the stored one. Returns `false`
    /// when storage is disabled or holds nothing.
    pub async fn load(&self) -> CacheResult<bool> {
        let mut current = self.snapshot.lock().await;
        self.load_locked(&mut current).await
    }

    async fn load_locked(&self, current: &mut Snapshot) -> CacheResult<bool> {
        let store = Arc::clone(&self.store);
        let loaded = tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|error| {
                CoreError::new(
                    CoreErrorKind::Internal,
                    format!("cache load task did not complete: {error}"),
                )
            })??;

        let Some(snapshot) = loaded.filter(|snapshot| !snapshot.is_empty()) else {
            return Ok(false);
        };
        if !snapshot.checked.is_empty() {
            snapshot.checked_at()?;
        }

        tracing::debug!(checked = %snapshot.checked, updates = snapshot.updates.len(), "loaded cache file");
        *current = snapshot;
        Ok(true)
    }

    async fn persist_locked(&self, current: &Snapshot) {
        if !self.store.is_enabled() {
            return;
        }
        if let Err(error) = save_blocking(Arc::clone(&self.store), current.clone()).await {
            tracing::error!(error = %error, "cannot persist snapshot, serving from memory");
        }
    }
}

async fn save_blocking(store: Arc<dyn SnapshotStore>, snapshot: Snapshot) -> CacheResult<()> {
    tokio::task::spawn_blocking(move || store.save(&snapshot))
        .await
        .map_err(|error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("cache save task did not complete: {error}"),
            )
        })?
}

fn no_data(message: &str) -> CoreError {
    CoreError::new(CoreErrorKind::NoData, message)
}

fn aggregate_failures(failures: &[CoreError]) -> CoreError {
    match failures {
        [] => CoreError::new(CoreErrorKind::Internal, "refresh failed without an error"),
        [single] => single.clone(),
        [first, rest @ ..] => {
            let kind = if rest.iter().all(|error| error.kind == first.kind) {
                first.kind
            } else {
                CoreErrorKind::ProcessFailure
            };
            let message = failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            CoreError::new(kind, message)
        }
    }
}
