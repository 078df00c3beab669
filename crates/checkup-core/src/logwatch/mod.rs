pub mod dnf;
pub mod pacman;
pub mod watcher;

use crate::models::LogEvent;

pub use dnf::DnfLogParser;
pub use pacman::PacmanLogParser;
pub use watcher::LogWatcher;

/// Turns one line of a package manager history log into a transaction event.
///
/// Lines that do not describe a package transaction yield `None`.
pub trait LogEventParser: Send + Sync {
    fn parse_line(&self, line: &str) -> Option<LogEvent>;
}
