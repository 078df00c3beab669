use std::fmt::{Display, Formatter};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum SourceId {
    Pacman,
    Aur,
    Dnf,
}

impl SourceId {
    pub const ALL: [SourceId; 3] = [SourceId::Pacman, SourceId::Aur, SourceId::Dnf];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pacman => "pacman",
            Self::Aur => "aur",
            Self::Dnf => "dnf",
        }
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceDescriptor {
    pub id: SourceId,
    pub display_name: &'static str,
    /// Repository tag stamped on every update this source reports, when the
    /// package manager output does not carry one itself.
    pub repo_tag: Option<&'static str>,
}
