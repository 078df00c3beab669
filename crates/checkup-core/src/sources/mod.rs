pub mod aur;
pub mod aur_process;
pub(crate) mod detect_utils;
pub mod dnf;
pub mod dnf_process;
pub mod pacman;
pub mod pacman_process;
pub(crate) mod process_utils;

use crate::models::{CoreError, SourceDescriptor, Update};

pub use aur::{AurHelper, AurSource, AurUpdateSource, aur_pending_request};
pub use aur_process::{ProcessAurSource, detect_aur_helper};
pub use dnf::{DnfSource, DnfUpdateSource, dnf_check_update_request};
pub use dnf_process::ProcessDnfSource;
pub use pacman::{PacmanSource, PacmanUpdateSource, checkupdates_request};
pub use pacman_process::ProcessPacmanSource;

pub type SourceResult<T> = Result<T, CoreError>;

/// Something that can report pending package updates.
///
/// Implementations block while the package manager runs; callers are expected
/// to drive them from the blocking thread pool.
pub trait UpdateSource: Send + Sync {
    fn descriptor(&self) -> &SourceDescriptor;

    fn list_pending(&self) -> SourceResult<Vec<Update>>;
}
