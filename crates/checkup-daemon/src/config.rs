use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use checkup_core::duration::parse_duration;
use checkup_core::registry::AurPreference;
use clap::Parser;
use clap::builder::BoolishValueParser;
use time::format_description::OwnedFormatItem;

use crate::error::{DaemonError, DaemonResult};

const CACHE_FILE_NAME: &str = "checkup.json";
const DEFAULT_NOTIFY_FORMAT: &str = "[year]/[month]/[day] [hour]:[minute]";

/// Checks for pending package updates and serves them over HTTP.
#[derive(Parser, Debug)]
#[command(name = "checkup", version, about, long_about = None)]
pub struct Cli {
    /// Don't log to the console
    #[arg(short, long)]
    pub quiet: bool,

    /// Log at DEBUG level
    #[arg(long)]
    pub debug: bool,

    /// Run the HTTP server as a daemon
    #[arg(long, conflicts_with = "systemd")]
    pub daemon: bool,

    /// Run the HTTP server on a systemd activated socket
    #[arg(long)]
    pub systemd: bool,

    /// Don't use a cache file
    #[arg(long, env = "NO_CACHE", value_parser = BoolishValueParser::new())]
    pub no_cache: bool,

    /// Path to the update cache file
    #[arg(long, env = "CACHE_FILE")]
    pub cache_file: Option<PathBuf>,

    /// Time between automatic refreshes
    #[arg(long, env = "CACHE_INTERVAL", default_value = "12h", value_parser = duration_arg)]
    pub cache_interval: Duration,

    /// Don't refresh automatically
    #[arg(long, env = "NO_REFRESH", value_parser = BoolishValueParser::new())]
    pub no_refresh: bool,

    /// Path to the log file
    #[arg(long, env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Don't log to a file
    #[arg(long, env = "NO_LOG", value_parser = BoolishValueParser::new())]
    pub no_log: bool,

    /// AUR helper to use (yay, paru, pikaur), or "none"
    #[arg(long)]
    pub aur: Option<String>,

    /// Web server listen address
    #[arg(long, env = "LISTEN_ADDRESS", default_value = ":8100")]
    pub listen_address: String,

    /// Package manager log to watch, defaults to the distro's log
    #[arg(long, env = "WATCH_LOG")]
    pub watch_log: Option<PathBuf>,

    /// Time between package manager log checks
    #[arg(long, env = "WATCH_INTERVAL", default_value = "10s", value_parser = duration_arg)]
    pub watch_interval: Duration,

    /// Don't watch the package manager log
    #[arg(long)]
    pub no_watch: bool,

    /// Discord-compatible webhook to notify
    #[arg(long, env = "WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Minimum time between notifications
    #[arg(long, env = "NOTIFY_INTERVAL", default_value = "1h", value_parser = duration_arg)]
    pub notify_interval: Duration,

    /// Format of the "Checked" time in notifications
    #[arg(long, env = "NOTIFY_FORMAT", default_value = DEFAULT_NOTIFY_FORMAT)]
    pub notify_format: String,

    /// Only list updates that were not in the previous notification
    #[arg(long, env = "NOTIFY_DELTA", value_parser = BoolishValueParser::new())]
    pub notify_delta: bool,
}

fn duration_arg(value: &str) -> Result<Duration, String> {
    parse_duration(value).map_err(|error| error.message)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunMode {
    /// Refresh once if needed and exit.
    OneShot,
    Daemon,
    Systemd,
}

impl RunMode {
    pub fn serves_http(self) -> bool {
        !matches!(self, Self::OneShot)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoggingConfig {
    pub console: bool,
    pub debug: bool,
    pub timestamps: bool,
    pub file: Option<PathBuf>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WatchConfig {
    /// `None` selects the distro default.
    pub path: Option<PathBuf>,
    pub interval: Duration,
}

#[derive(Clone, Debug)]
pub struct NotifyConfig {
    pub webhook_url: String,
    pub interval: Duration,
    pub footer_format: OwnedFormatItem,
    pub delta: bool,
}

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub mode: RunMode,
    pub logging: LoggingConfig,
    /// `None` disables the cache file.
    pub cache_file: Option<PathBuf>,
    pub cache_interval: Duration,
    pub auto_refresh: bool,
    pub aur: AurPreference,
    pub listen_address: String,
    pub watch: Option<WatchConfig>,
    pub notify: Option<NotifyConfig>,
    /// A webhook URL was given to a mode that does not notify.
    pub webhook_ignored: bool,
}

impl DaemonConfig {
    /// Whether to refresh at startup when the snapshot is stale. One-shot runs
    /// always check; `--no-refresh` only holds back the daemon.
    pub fn refresh_on_start(&self) -> bool {
        self.auto_refresh || !self.mode.serves_http()
    }
}

impl Cli {
    pub fn into_config(self) -> DaemonResult<DaemonConfig> {
        let mode = if self.systemd {
            RunMode::Systemd
        } else if self.daemon {
            RunMode::Daemon
        } else {
            RunMode::OneShot
        };

        let logging = LoggingConfig {
            console: !self.quiet,
            debug: self.debug,
            timestamps: !mode.serves_http(),
            file: self.log_file.filter(|_| !self.no_log),
        };

        let cache_file = if self.no_cache {
            None
        } else {
            Some(match self.cache_file {
                Some(path) => explicit_cache_path(path)?,
                None => default_cache_path()?,
            })
        };

        if self.cache_interval.is_zero() {
            return Err(DaemonError::config("cache interval must be greater than zero"));
        }

        let aur = match self.aur.as_deref() {
            Some(value) => AurPreference::parse(value)?,
            None => AurPreference::Auto,
        };

        let watch = (mode.serves_http() && !self.no_watch)
            .then(|| {
                if self.watch_interval.is_zero() {
                    return Err(DaemonError::config("watch interval must be greater than zero"));
                }
                Ok(WatchConfig {
                    path: self.watch_log,
                    interval: self.watch_interval,
                })
            })
            .transpose()?;

        let webhook_url = self.webhook_url.filter(|url| !url.trim().is_empty());
        let webhook_ignored = webhook_url.is_some() && !mode.serves_http();
        let notify = match webhook_url {
            Some(url) if mode.serves_http() => Some(notify_config(
                url,
                self.notify_interval,
                &self.notify_format,
                self.notify_delta,
            )?),
            _ => None,
        };

        Ok(DaemonConfig {
            mode,
            logging,
            cache_file,
            cache_interval: self.cache_interval,
            auto_refresh: !self.no_refresh,
            aur,
            listen_address: normalize_listen_address(&self.listen_address),
            watch,
            notify,
            webhook_ignored,
        })
    }
}

fn notify_config(
    webhook_url: String,
    interval: Duration,
    format: &str,
    delta: bool,
) -> DaemonResult<NotifyConfig> {
    if !(webhook_url.starts_with("https://") || webhook_url.starts_with("http://")) {
        return Err(DaemonError::config(format!(
            "webhook URL '{webhook_url}' must use http or https"
        )));
    }
    let footer_format = time::format_description::parse_owned::<2>(format).map_err(|error| {
        DaemonError::config(format!("invalid notify format '{format}': {error}"))
    })?;

    Ok(NotifyConfig {
        webhook_url,
        interval,
        footer_format,
        delta,
    })
}

/// Accepts Go-style `:port` addresses as "all interfaces".
pub fn normalize_listen_address(address: &str) -> String {
    let address = address.trim();
    match address.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => address.to_string(),
    }
}

fn explicit_cache_path(path: PathBuf) -> DaemonResult<PathBuf> {
    if path.exists() && !is_writable(&path) {
        return Err(DaemonError::config(format!(
            "cache file {} is not writable",
            path.display()
        )));
    }
    Ok(path)
}

/// `$TMPDIR/checkup.json`, or the user cache directory when that file
/// belongs to someone else.
pub fn default_cache_path() -> DaemonResult<PathBuf> {
    let temp = std::env::temp_dir().join(CACHE_FILE_NAME);
    if !temp.exists() || is_writable(&temp) {
        return Ok(temp);
    }

    let dir = user_cache_dir()
        .ok_or_else(|| DaemonError::config("no suitable cache file location"))?
        .join("checkup");
    fs::create_dir_all(&dir)?;
    Ok(dir.join("cache.json"))
}

fn user_cache_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .filter(|dir| dir.is_absolute())
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
}

fn is_writable(path: &Path) -> bool {
    OpenOptions::new().append(true).open(path).is_ok()
}
