use std::path::PathBuf;

use crate::execution::{CommandSpec, ProcessSpawnRequest};
use crate::models::{SourceDescriptor, SourceId, Update};
use crate::sources::pacman::parse_upgrade_lines;
use crate::sources::{SourceResult, UpdateSource};

const AUR_DESCRIPTOR: SourceDescriptor = SourceDescriptor {
    id: SourceId::Aur,
    display_name: "AUR helper",
    repo_tag: Some("aur"),
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AurHelper {
    Yay,
    Paru,
    Pikaur,
}

impl AurHelper {
    /// Detection order when no helper is requested explicitly.
    pub const ALL: [AurHelper; 3] = [AurHelper::Yay, AurHelper::Paru, AurHelper::Pikaur];

    pub fn binary_name(self) -> &'static str {
        match self {
            Self::Yay => "yay",
            Self::Paru => "paru",
            Self::Pikaur => "pikaur",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|helper| helper.binary_name() == name.trim())
    }

    /// Exit codes that mean the AUR-only query ran fine.
    pub fn success_codes(self) -> &'static [i32] {
        match self {
            // paru exits with 1 when there is nothing to upgrade.
            Self::Paru => &[0, 1],
            Self::Yay | Self::Pikaur => &[0],
        }
    }
}

/// Raw `<helper> -Qua` output provider.
pub trait AurSource: Send + Sync {
    fn helper(&self) -> AurHelper;

    fn pending_aur_updates(&self) -> SourceResult<String>;
}

pub struct AurUpdateSource<S: AurSource> {
    source: S,
}

impl<S: AurSource> AurUpdateSource<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: AurSource> UpdateSource for AurUpdateSource<S> {
    fn descriptor(&self) -> &SourceDescriptor {
        &AUR_DESCRIPTOR
    }

    fn list_pending(&self) -> SourceResult<Vec<Update>> {
        let raw = self.source.pending_aur_updates()?;
        let updates = parse_upgrade_lines(&raw, SourceId::Aur, AUR_DESCRIPTOR.repo_tag)?;
        tracing::debug!(
            helper = self.source.helper().binary_name(),
            count = updates.len(),
            "AUR helper listed updates"
        );
        Ok(updates)
    }
}

pub fn aur_pending_request(executable: Option<PathBuf>, helper: AurHelper) -> ProcessSpawnRequest {
    let program = executable.unwrap_or_else(|| PathBuf::from(helper.binary_name()));
    ProcessSpawnRequest::new(
        SourceId::Aur,
        CommandSpec::new(program)
            .args(["-Qua", "--color=never"])
            .env("LC_ALL", "C"),
    )
}
