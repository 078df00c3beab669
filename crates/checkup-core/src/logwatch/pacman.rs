use std::sync::OnceLock;

use regex::Regex;
use time::OffsetDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;

use crate::logwatch::LogEventParser;
use crate::models::{LogAction, LogEvent};

pub const DEFAULT_PACMAN_LOG: &str = "/var/log/pacman.log";

const TIMESTAMP_FORMAT: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory][offset_minute]"
);

/// Parser for `/var/log/pacman.log` ALPM transaction lines.
#[derive(Clone, Copy, Debug, Default)]
pub struct PacmanLogParser;

fn alpm_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\[(\S+)\]\s\[ALPM\]\s(\w+)\s(\S+)\s\((.*)\)$")
            .expect("alpm line pattern is valid")
    })
}

impl LogEventParser for PacmanLogParser {
    fn parse_line(&self, line: &str) -> Option<LogEvent> {
        let captures = alpm_line_pattern().captures(line.trim_end())?;
        let at = OffsetDateTime::parse(&captures[1], TIMESTAMP_FORMAT).ok()?;
        let versions = &captures[4];

        let (action, resolved_version) = match &captures[2] {
            "upgraded" => {
                let (_, new) = versions.split_once(" -> ")?;
                (LogAction::Upgraded, Some(new.trim().to_string()))
            }
            "installed" => (LogAction::Installed, Some(versions.trim().to_string())),
            "removed" => (LogAction::Removed, None),
            _ => return None,
        };

        Some(LogEvent {
            at,
            action,
            package: captures[3].to_string(),
            resolved_version,
        })
    }
}
