use std::sync::OnceLock;

use regex::Regex;

use crate::execution::{CommandSpec, ProcessSpawnRequest};
use crate::models::{CoreError, CoreErrorKind, SourceDescriptor, SourceId, Update};
use crate::sources::{SourceResult, UpdateSource};

const PACMAN_DESCRIPTOR: SourceDescriptor = SourceDescriptor {
    id: SourceId::Pacman,
    display_name: "pacman (checkupdates)",
    repo_tag: Some("pacman"),
};

/// Raw `checkupdates` output provider.
pub trait PacmanSource: Send + Sync {
    fn check_updates(&self) -> SourceResult<String>;
}

pub struct PacmanUpdateSource<S: PacmanSource> {
    source: S,
}

impl<S: PacmanSource> PacmanUpdateSource<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: PacmanSource> UpdateSource for PacmanUpdateSource<S> {
    fn descriptor(&self) -> &SourceDescriptor {
        &PACMAN_DESCRIPTOR
    }

    fn list_pending(&self) -> SourceResult<Vec<Update>> {
        let raw = self.source.check_updates()?;
        parse_upgrade_lines(&raw, SourceId::Pacman, PACMAN_DESCRIPTOR.repo_tag)
    }
}

pub fn checkupdates_request() -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(
        SourceId::Pacman,
        CommandSpec::new("checkupdates").env("LC_ALL", "C"),
    )
}

fn upgrade_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(\S+)\s+(\S+)\s+->\s+(\S+)\s*$").expect("upgrade line pattern is valid")
    })
}

/// Parses `name old -> new` lines as printed by `checkupdates` and the AUR
/// helpers' `-Qua` mode.
pub(crate) fn parse_upgrade_lines(
    output: &str,
    source: SourceId,
    repo: Option<&str>,
) -> SourceResult<Vec<Update>> {
    let mut parsed = Vec::new();
    let mut malformed_lines = 0usize;

    for line in output.lines().filter(|line| !line.trim().is_empty()) {
        match upgrade_line_pattern().captures(line) {
            Some(captures) => parsed.push(Update {
                name: captures[1].to_string(),
                old_version: Some(captures[2].to_string()),
                new_version: captures[3].to_string(),
                repo: repo.map(str::to_owned),
            }),
            None => malformed_lines += 1,
        }
    }

    if parsed.is_empty() && malformed_lines > 0 {
        return Err(CoreError::for_source(
            source,
            CoreErrorKind::ParseFailure,
            format!("unable to parse any of {malformed_lines} {source} output lines"),
        ));
    }

    Ok(parsed)
}
