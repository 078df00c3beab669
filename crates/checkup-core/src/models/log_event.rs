use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum LogAction {
    Installed,
    Upgraded,
    Removed,
}

/// One package transaction recovered from a package manager history log.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogEvent {
    pub at: OffsetDateTime,
    pub action: LogAction,
    pub package: String,
    /// Version the package ended up at. `None` for removals.
    pub resolved_version: Option<String>,
}
