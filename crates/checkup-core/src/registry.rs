use std::fmt::{Display, Formatter};
use std::fs;
use std::sync::Arc;

use crate::execution::ProcessExecutor;
use crate::logwatch::dnf::DEFAULT_DNF_LOG;
use crate::logwatch::pacman::DEFAULT_PACMAN_LOG;
use crate::logwatch::{DnfLogParser, LogEventParser, PacmanLogParser};
use crate::models::{CoreError, CoreErrorKind, SourceId};
use crate::sources::{
    AurHelper, AurUpdateSource, DnfUpdateSource, PacmanUpdateSource, ProcessAurSource,
    ProcessDnfSource, ProcessPacmanSource, UpdateSource, detect_aur_helper,
};

const OS_RELEASE_PATHS: [&str; 2] = ["/etc/os-release", "/usr/lib/os-release"];

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Distro {
    Arch,
    Fedora,
}

impl Display for Distro {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(descriptor(*self).display_name)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DistroDescriptor {
    pub distro: Distro,
    pub display_name: &'static str,
    /// `/etc/os-release` IDs handled by this family.
    pub ids: &'static [&'static str],
    pub sources: &'static [SourceId],
    pub default_log: &'static str,
}

const ALL_DISTROS: [DistroDescriptor; 2] = [
    DistroDescriptor {
        distro: Distro::Arch,
        display_name: "arch",
        ids: &["arch", "archarm", "manjaro", "endeavouros", "garuda", "artix"],
        sources: &[SourceId::Pacman, SourceId::Aur],
        default_log: DEFAULT_PACMAN_LOG,
    },
    DistroDescriptor {
        distro: Distro::Fedora,
        display_name: "fedora",
        ids: &["fedora", "rhel", "centos", "rocky", "almalinux"],
        sources: &[SourceId::Dnf],
        default_log: DEFAULT_DNF_LOG,
    },
];

fn distros() -> &'static [DistroDescriptor] {
    &ALL_DISTROS
}

pub fn descriptor(distro: Distro) -> &'static DistroDescriptor {
    match distro {
        Distro::Arch => &distros()[0],
        Distro::Fedora => &distros()[1],
    }
}

pub fn distro_for_id(id: &str) -> Option<Distro> {
    distros()
        .iter()
        .find(|candidate| candidate.ids.contains(&id))
        .map(|candidate| candidate.distro)
}

/// Picks the distro family from `os-release` content, trying `ID` before the
/// entries of `ID_LIKE`.
pub fn distro_from_os_release(content: &str) -> Result<Distro, CoreError> {
    let mut id = None;
    let mut id_like = None;
    for line in content.lines() {
        if let Some(value) = line.strip_prefix("ID=") {
            id = Some(unquote(value));
        } else if let Some(value) = line.strip_prefix("ID_LIKE=") {
            id_like = Some(unquote(value));
        }
    }

    let Some(id) = id else {
        return Err(CoreError::new(
            CoreErrorKind::InvalidInput,
            "cannot get distro ID from os-release",
        ));
    };

    std::iter::once(id)
        .chain(id_like.into_iter().flat_map(str::split_whitespace))
        .find_map(distro_for_id)
        .ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("unsupported distro '{id}'"),
            )
        })
}

pub fn detect_distro() -> Result<Distro, CoreError> {
    for path in OS_RELEASE_PATHS {
        if let Ok(content) = fs::read_to_string(path) {
            return distro_from_os_release(&content);
        }
    }
    Err(CoreError::new(
        CoreErrorKind::NotInstalled,
        "no os-release file found",
    ))
}

fn unquote(value: &str) -> &str {
    value.trim().trim_matches(|ch| ch == '"' || ch == '\'')
}

/// How the AUR source is chosen on Arch-family hosts.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AurPreference {
    /// Use the first installed helper.
    #[default]
    Auto,
    /// Use only this helper, if installed.
    Helper(AurHelper),
    Disabled,
}

impl AurPreference {
    /// Parses the `--aur` override. `none` turns AUR checks off.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value.trim() {
            "" | "auto" => Ok(Self::Auto),
            "none" | "off" => Ok(Self::Disabled),
            name => AurHelper::from_name(name).map(Self::Helper).ok_or_else(|| {
                CoreError::new(
                    CoreErrorKind::InvalidInput,
                    format!("unsupported AUR helper '{name}'"),
                )
            }),
        }
    }
}

/// Builds the update sources for `distro`.
pub fn build_sources(
    distro: Distro,
    executor: Arc<dyn ProcessExecutor>,
    aur: AurPreference,
) -> Vec<Arc<dyn UpdateSource>> {
    let mut sources: Vec<Arc<dyn UpdateSource>> = Vec::new();

    for id in descriptor(distro).sources {
        match id {
            SourceId::Pacman => sources.push(Arc::new(PacmanUpdateSource::new(
                ProcessPacmanSource::new(Arc::clone(&executor)),
            ))),
            SourceId::Dnf => sources.push(Arc::new(DnfUpdateSource::new(ProcessDnfSource::new(
                Arc::clone(&executor),
            )))),
            SourceId::Aur => {
                let preferred = match aur {
                    AurPreference::Disabled => {
                        tracing::info!("AUR checks disabled");
                        continue;
                    }
                    AurPreference::Auto => None,
                    AurPreference::Helper(helper) => Some(helper),
                };
                match detect_aur_helper(preferred) {
                    Some((helper, path)) => {
                        tracing::info!(helper = helper.binary_name(), path = %path.display(), "using AUR helper");
                        sources.push(Arc::new(AurUpdateSource::new(ProcessAurSource::new(
                            Arc::clone(&executor),
                            helper,
                            Some(path),
                        ))));
                    }
                    None => tracing::warn!("no supported AUR helper found"),
                }
            }
        }
    }

    sources
}

pub fn log_parser(distro: Distro) -> Arc<dyn LogEventParser> {
    match distro {
        Distro::Arch => Arc::new(PacmanLogParser),
        Distro::Fedora => Arc::new(DnfLogParser),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{
        AurPreference, Distro, build_sources, descriptor, distro_for_id, distro_from_os_release,
        distros,
    };
    use crate::execution::TokioProcessExecutor;
    use crate::models::{CoreErrorKind, SourceId};
    use crate::sources::AurHelper;

    #[test]
    fn descriptors_line_up_with_distros() {
        for candidate in distros() {
            assert_eq!(descriptor(candidate.distro), candidate);
        }
    }

    #[test]
    fn detects_from_id() {
        let content = "NAME=\"Arch Linux\"\nID=arch\nBUILD_ID=rolling\n";
        assert_eq!(distro_from_os_release(content).unwrap(), Distro::Arch);

        let content = "NAME=\"Fedora Linux\"\nVERSION_ID=40\nID=fedora\n";
        assert_eq!(distro_from_os_release(content).unwrap(), Distro::Fedora);
    }

    #[test]
    fn falls_back_to_id_like() {
        let content = "ID=\"nobara\"\nID_LIKE=\"rhel centos fedora\"\n";
        assert_eq!(distro_from_os_release(content).unwrap(), Distro::Fedora);

        let content = "ID=cachyos\nID_LIKE=arch\n";
        assert_eq!(distro_from_os_release(content).unwrap(), Distro::Arch);
    }

    #[test]
    fn rejects_unsupported_distros() {
        let error = distro_from_os_release("ID=debian\n").unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::InvalidInput);
        assert!(error.message.contains("debian"));

        assert!(distro_from_os_release("NAME=mystery\n").is_err());
        assert_eq!(distro_for_id("ubuntu"), None);
    }

    #[test]
    fn parses_aur_preference() {
        assert_eq!(AurPreference::parse("").unwrap(), AurPreference::Auto);
        assert_eq!(AurPreference::parse("none").unwrap(), AurPreference::Disabled);
        assert_eq!(
            AurPreference::parse("paru").unwrap(),
            AurPreference::Helper(AurHelper::Paru)
        );
        assert!(AurPreference::parse("trizen").is_err());
    }

    #[test]
    fn builds_sources_per_distro() {
        let executor = Arc::new(TokioProcessExecutor);

        let arch = build_sources(Distro::Arch, executor.clone(), AurPreference::Disabled);
        let ids: Vec<_> = arch.iter().map(|source| source.descriptor().id).collect();
        assert_eq!(ids, [SourceId::Pacman]);

        let fedora = build_sources(Distro::Fedora, executor, AurPreference::Auto);
        let ids: Vec<_> = fedora.iter().map(|source| source.descriptor().id).collect();
        assert_eq!(ids, [SourceId::Dnf]);
    }
}
