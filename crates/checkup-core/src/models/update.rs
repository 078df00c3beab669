use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::models::{CoreError, CoreErrorKind};

/// A single pending package upgrade.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Update {
    #[serde(rename = "pkg")]
    pub name: String,
    /// Installed version. `None` means a new install or an unknown version.
    #[serde(rename = "oldVer", default, skip_serializing_if = "Option::is_none")]
    pub old_version: Option<String>,
    #[serde(rename = "newVer")]
    pub new_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
}

impl Update {
    pub fn new(name: impl Into<String>, new_version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            old_version: None,
            new_version: new_version.into(),
            repo: None,
        }
    }

    pub fn old_version(mut self, old_version: impl Into<String>) -> Self {
        self.old_version = Some(old_version.into());
        self
    }

    pub fn repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }
}

/// The cached state of pending updates: when they were last checked and what
/// was found.
///
/// An empty `checked` together with an empty list means the snapshot was never
/// populated. A non-empty `checked` with an empty list means the system was
/// checked and is up to date.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub checked: String,
    pub updates: Vec<Update>,
}

impl Snapshot {
    pub fn new(checked: impl Into<String>, updates: Vec<Update>) -> Self {
        Self {
            checked: checked.into(),
            updates,
        }
    }

    /// Builds a snapshot stamped with `now`, with updates ordered by package
    /// name.
    pub fn stamped(now: OffsetDateTime, mut updates: Vec<Update>) -> Self {
        updates.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            checked: format_checked(now),
            updates,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.checked.is_empty() && self.updates.is_empty()
    }

    pub fn checked_at(&self) -> Result<OffsetDateTime, CoreError> {
        OffsetDateTime::parse(&self.checked, &Rfc3339).map_err(|error| {
            CoreError::new(
                CoreErrorKind::ParseFailure,
                format!("cannot parse checked timestamp '{}': {error}", self.checked),
            )
        })
    }

    /// Removes every update for `name`, restricted to `resolved_version` when
    /// one is given. Returns whether anything was removed.
    pub fn retract(&mut self, name: &str, resolved_version: Option<&str>) -> bool {
        let before = self.updates.len();
        self.updates.retain(|update| {
            if update.name != name {
                return true;
            }
            match resolved_version {
                Some(version) => update.new_version != version,
                None => false,
            }
        });
        self.updates.len() != before
    }
}

pub fn format_checked(at: OffsetDateTime) -> String {
    // Whole seconds keep the timestamp in the same shape as older cache files.
    let at = at.replace_nanosecond(0).unwrap_or(at);
    at.format(&Rfc3339).unwrap_or_default()
}
