use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheResult, UpdateCache};
use crate::logwatch::LogEventParser;
use crate::models::{CoreError, CoreErrorKind};

/// Retracts pending updates once the package manager log shows they were
/// applied.
pub struct LogWatcher {
    path: PathBuf,
    parser: Arc<dyn LogEventParser>,
    cache: Arc<UpdateCache>,
}

impl LogWatcher {
    pub fn new(
        path: impl Into<PathBuf>,
        parser: Arc<dyn LogEventParser>,
        cache: Arc<UpdateCache>,
    ) -> Self {
        Self {
            path: path.into(),
            parser,
            cache,
        }
    }

    /// Reads the whole log and applies every transaction newer than the last
    /// check. Returns the number of retracted entries.
    pub async fn scan(&self) -> CacheResult<usize> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|error| self.read_error(error))?;
        let mut lines = BufReader::new(file).lines();

        let mut events = Vec::new();
        while let Some(line) = lines.next_line().await.map_err(|error| self.read_error(error))? {
            if let Some(event) = self.parser.parse_line(&line) {
                events.push(event);
            }
        }

        tracing::debug!(path = %self.path.display(), events = events.len(), "scanned package manager log");
        self.cache.apply_log_events(&events).await
    }

    /// Re-scans the log every `interval` while its modification time keeps
    /// changing, until `cancel` fires.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_modified: Option<SystemTime> = None;

        tracing::info!(path = %self.path.display(), interval = ?interval, "watching package manager log");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let modified = match tokio::fs::metadata(&self.path).await.and_then(|meta| meta.modified()) {
                Ok(modified) => modified,
                Err(error) => {
                    tracing::error!(path = %self.path.display(), error = %error, "cannot stat package manager log");
                    continue;
                }
            };
            if last_modified == Some(modified) {
                tracing::trace!(path = %self.path.display(), "log unchanged");
                continue;
            }
            last_modified = Some(modified);

            match self.scan().await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "applied package manager log"),
                Err(error) => tracing::warn!(error = %error, "cannot apply package manager log"),
            }
        }

        tracing::debug!(path = %self.path.display(), "log watcher stopped");
    }

    fn read_error(&self, error: std::io::Error) -> CoreError {
        CoreError::new(
            CoreErrorKind::StorageFailure,
            format!("cannot read {}: {error}", self.path.display()),
        )
    }
}
