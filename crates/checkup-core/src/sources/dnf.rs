use std::sync::OnceLock;

use regex::Regex;

use crate::execution::{CommandSpec, ProcessSpawnRequest};
use crate::models::{CoreError, CoreErrorKind, SourceDescriptor, SourceId, Update};
use crate::sources::{SourceResult, UpdateSource};

const DNF_DESCRIPTOR: SourceDescriptor = SourceDescriptor {
    id: SourceId::Dnf,
    display_name: "dnf / yum",
    repo_tag: None,
};

const OBSOLETING_SECTION: &str = "Obsoleting Packages";

/// Raw `check-update` output provider.
pub trait DnfSource: Send + Sync {
    fn check_update(&self) -> SourceResult<String>;
}

pub struct DnfUpdateSource<S: DnfSource> {
    source: S,
}

impl<S: DnfSource> DnfUpdateSource<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: DnfSource> UpdateSource for DnfUpdateSource<S> {
    fn descriptor(&self) -> &SourceDescriptor {
        &DNF_DESCRIPTOR
    }

    fn list_pending(&self) -> SourceResult<Vec<Update>> {
        let raw = self.source.check_update()?;
        parse_check_update(&raw)
    }
}

pub fn dnf_check_update_request(program: &str) -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(
        SourceId::Dnf,
        CommandSpec::new(program)
            .args(["-e0", "-d0", "check-update"])
            .env("LC_ALL", "C"),
    )
}

fn check_update_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // name.arch  version  repo
        Regex::new(r"^\s*(\S+)\.\S+\s+(\S+)\s+(\S+)\s*$").expect("check-update pattern is valid")
    })
}

fn parse_check_update(output: &str) -> SourceResult<Vec<Update>> {
    let pending = match output.find(OBSOLETING_SECTION) {
        Some(index) => &output[..index],
        None => output,
    };

    let mut parsed = Vec::new();
    let mut malformed_lines = 0usize;

    for line in pending.lines().filter(|line| !line.trim().is_empty()) {
        match check_update_line_pattern().captures(line) {
            Some(captures) => parsed.push(Update {
                name: captures[1].to_string(),
                old_version: None,
                new_version: captures[2].to_string(),
                repo: Some(captures[3].to_string()),
            }),
            None => malformed_lines += 1,
        }
    }

    if parsed.is_empty() && malformed_lines > 0 {
        return Err(CoreError::for_source(
            SourceId::Dnf,
            CoreErrorKind::ParseFailure,
            format!("unable to parse any of {malformed_lines} check-update output lines"),
        ));
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use crate::models::{CoreErrorKind, Update};
    use crate::sources::{SourceResult, UpdateSource};

    use super::{DnfSource, DnfUpdateSource, dnf_check_update_request, parse_check_update};

    const CHECK_UPDATE_FIXTURE: &str = include_str!("../../tests/fixtures/dnf/check_update.txt");

    #[test]
    fn parses_check_update_fixture_and_stops_at_obsoletes() {
        let parsed = parse_check_update(CHECK_UPDATE_FIXTURE).unwrap();
        assert_eq!(parsed.len(), 4);
        assert_eq!(
            parsed[0],
            Update::new("kernel-core", "5.6.15-300.fc32").repo("updates")
        );
        assert_eq!(parsed[1].name, "pgdg-fedora-repo");
        assert_eq!(parsed[1].repo.as_deref(), Some("pgdg12"));
        assert_eq!(parsed[2].name, "python3.11");
        assert_eq!(parsed[3].new_version, "2:9.1.393-1.fc40");
        assert!(parsed.iter().all(|update| update.name != "grub2-tools"));
    }

    #[test]
    fn no_output_means_no_updates() {
        assert!(parse_check_update("").unwrap().is_empty());
    }

    #[test]
    fn error_banner_is_a_parse_failure() {
        let error = parse_check_update("Error: Failed to download metadata for repo").unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::ParseFailure);
    }

    #[test]
    fn adapter_parses_source_output() {
        let adapter = DnfUpdateSource::new(FixtureSource);
        assert_eq!(adapter.list_pending().unwrap().len(), 4);
    }

    #[test]
    fn check_update_request_is_quiet() {
        let request = dnf_check_update_request("yum");
        assert_eq!(request.command.program.to_str(), Some("yum"));
        assert_eq!(request.command.args, vec!["-e0", "-d0", "check-update"]);
    }

    struct FixtureSource;

    impl DnfSource for FixtureSource {
        fn check_update(&self) -> SourceResult<String> {
            Ok(CHECK_UPDATE_FIXTURE.to_string())
        }
    }
}
