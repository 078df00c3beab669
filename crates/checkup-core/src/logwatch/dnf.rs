use std::sync::OnceLock;

use regex::Regex;
use time::OffsetDateTime;
use time::format_description::FormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

use crate::logwatch::LogEventParser;
use crate::models::{LogAction, LogEvent};

pub const DEFAULT_DNF_LOG: &str = "/var/log/dnf.rpm.log";

const NUMERIC_OFFSET_FORMAT: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory][offset_minute]"
);

/// Parser for `/var/log/dnf.rpm.log` SUBDEBUG transaction lines.
#[derive(Clone, Copy, Debug, Default)]
pub struct DnfLogParser;

fn subdebug_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\S+)\s+SUBDEBUG\s+(\w+):\s+(\S+)$").expect("subdebug line pattern is valid")
    })
}

impl LogEventParser for DnfLogParser {
    fn parse_line(&self, line: &str) -> Option<LogEvent> {
        let captures = subdebug_line_pattern().captures(line.trim_end())?;
        let at = parse_timestamp(&captures[1])?;
        let action = match &captures[2] {
            "Upgrade" => LogAction::Upgraded,
            "Install" | "Installed" => LogAction::Installed,
            "Erase" => LogAction::Removed,
            _ => return None,
        };
        let (package, version) = split_nevra(&captures[3])?;

        Some(LogEvent {
            at,
            action,
            package: package.to_string(),
            resolved_version: (action != LogAction::Removed).then(|| version.to_string()),
        })
    }
}

fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(raw, NUMERIC_OFFSET_FORMAT))
        .ok()
}

/// Splits `name-version-release.arch` into the package name and
/// `version-release`, the form `dnf check-update` reports.
pub(crate) fn split_nevra(nevra: &str) -> Option<(&str, &str)> {
    let (without_arch, _arch) = nevra.rsplit_once('.')?;
    let (name_version, _release) = without_arch.rsplit_once('-')?;
    let (name, _version) = name_version.rsplit_once('-')?;
    let version_release = &without_arch[name.len() + 1..];
    (!name.is_empty()).then_some((name, version_release))
}
