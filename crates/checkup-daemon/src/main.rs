use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use checkup_core::cache::UpdateCache;
use checkup_core::execution::TokioProcessExecutor;
use checkup_core::logwatch::LogWatcher;
use checkup_core::persistence::{JsonFileStore, SnapshotStore};
use checkup_core::registry::{self, Distro};
use checkup_daemon::http::{self, AppState};
use checkup_daemon::logging::init_logging;
use checkup_daemon::notify::{self, Notifier, UreqWebhookClient};
use checkup_daemon::{Cli, DaemonConfig, DaemonError, DaemonResult, RunMode};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const MAX_REFRESH_TICK: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("checkup: {error}");
            return ExitCode::from(2);
        }
    };

    if let Err(error) = init_logging(&config.logging) {
        eprintln!("checkup: {error}");
        return ExitCode::FAILURE;
    }
    if config.webhook_ignored {
        tracing::warn!("webhook notifications only run with --daemon or --systemd");
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "checkup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: DaemonConfig) -> DaemonResult<()> {
    let distro = registry::detect_distro()?;
    tracing::info!(%distro, "detected distribution");

    let sources = registry::build_sources(distro, Arc::new(TokioProcessExecutor), config.aur);
    let store: Arc<dyn SnapshotStore> = match &config.cache_file {
        Some(path) => Arc::new(JsonFileStore::new(path)),
        None => Arc::new(JsonFileStore::disabled()),
    };
    let cache = Arc::new(UpdateCache::new(sources, store));

    if let Err(error) = cache.load().await {
        tracing::warn!(%error, "ignoring unreadable cache file");
    }

    match config.mode {
        RunMode::OneShot => run_once(&config, &cache).await,
        RunMode::Daemon | RunMode::Systemd => serve(config, distro, cache).await,
    }
}

async fn run_once(config: &DaemonConfig, cache: &UpdateCache) -> DaemonResult<()> {
    if config.refresh_on_start() && cache.needs_refresh(config.cache_interval).await {
        refresh(cache).await?;
    }

    if config.cache_file.is_none() {
        let snapshot = match cache.read().await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                tracing::debug!(%error, "nothing to print");
                return Ok(());
            }
        };
        for update in &snapshot.updates {
            let old = update.old_version.as_deref().unwrap_or("");
            let repo = update.repo.as_deref().unwrap_or("");
            println!("{} {old} -> {} [{repo}]", update.name, update.new_version);
        }
    }

    Ok(())
}

async fn serve(config: DaemonConfig, distro: Distro, cache: Arc<UpdateCache>) -> DaemonResult<()> {
    let listener = match config.mode {
        RunMode::Systemd => systemd_listener()?,
        _ => TcpListener::bind(&config.listen_address)
            .await
            .map_err(|source| DaemonError::Bind {
                address: config.listen_address.clone(),
                source,
            })?,
    };

    if config.refresh_on_start() && cache.needs_refresh(config.cache_interval).await {
        // A failed first refresh leaves the old snapshot in place.
        if let Err(error) = refresh(&cache).await {
            tracing::error!(%error, "initial refresh failed");
        }
    }

    let shutdown = CancellationToken::new();
    let mut state = AppState::new(Arc::clone(&cache), shutdown.clone());

    if let Some(watch) = &config.watch {
        let path = watch
            .path
            .clone()
            .unwrap_or_else(|| registry::descriptor(distro).default_log.into());
        let watcher = Arc::new(LogWatcher::new(
            path,
            registry::log_parser(distro),
            Arc::clone(&cache),
        ));
        state = state.with_watcher(Arc::clone(&watcher));

        let interval = watch.interval;
        let cancel = shutdown.child_token();
        state
            .tracker
            .spawn(async move { watcher.run(interval, cancel).await });
    }

    if config.auto_refresh {
        state.tracker.spawn(auto_refresh(
            Arc::clone(&cache),
            config.cache_interval,
            shutdown.child_token(),
        ));
    }

    if let Some(notify_config) = config.notify.clone() {
        let notifier = Notifier::new(
            Arc::clone(&cache),
            Arc::new(UreqWebhookClient::default()),
            notify_config,
            notify::hostname(),
        );
        state.tracker.spawn(notifier.run(shutdown.child_token()));
    }

    let state = Arc::new(state);
    let server = tokio::spawn(http::serve(listener, Arc::clone(&state)));

    wait_for_signal().await?;
    tracing::info!("shutting down");
    shutdown.cancel();

    if let Err(error) = server.await {
        tracing::error!(%error, "server task failed");
    }
    state.tracker.close();
    if tokio::time::timeout(SHUTDOWN_GRACE, state.tracker.wait())
        .await
        .is_err()
    {
        tracing::warn!(
            remaining = state.tracker.len(),
            "background tasks did not finish in time"
        );
    }

    Ok(())
}

async fn refresh(cache: &UpdateCache) -> DaemonResult<()> {
    let report = cache.refresh().await?;
    match report.error() {
        Some(error) => {
            tracing::warn!(updates = report.update_count, %error, "refresh partially failed")
        }
        None => tracing::info!(updates = report.update_count, "refreshed pending updates"),
    }
    Ok(())
}

async fn auto_refresh(cache: Arc<UpdateCache>, interval: Duration, cancel: CancellationToken) {
    let tick = interval.min(MAX_REFRESH_TICK);
    let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if cache.needs_refresh(interval).await
            && let Err(error) = refresh(&cache).await
        {
            tracing::error!(%error, "scheduled refresh failed");
        }
    }
}

/// Takes over the single listening socket passed in by systemd.
fn systemd_listener() -> DaemonResult<TcpListener> {
    use std::os::fd::FromRawFd;

    const FIRST_FD: i32 = 3;

    let pid_matches = std::env::var("LISTEN_PID")
        .ok()
        .and_then(|pid| pid.parse::<u32>().ok())
        .is_some_and(|pid| pid == std::process::id());
    if !pid_matches {
        return Err(DaemonError::config(
            "LISTEN_PID does not match this process, not socket activated",
        ));
    }

    let count = std::env::var("LISTEN_FDS")
        .ok()
        .and_then(|count| count.parse::<u32>().ok())
        .unwrap_or(0);
    if count != 1 {
        return Err(DaemonError::config(format!(
            "expected exactly one socket from systemd, got {count}"
        )));
    }

    // SAFETY: systemd hands over fd 3 and nothing else in this process owns it.
    let listener = unsafe { std::net::TcpListener::from_raw_fd(FIRST_FD) };
    listener.set_nonblocking(true)?;
    Ok(TcpListener::from_std(listener)?)
}

async fn wait_for_signal() -> DaemonResult<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}
