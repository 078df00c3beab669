pub mod json_file;

use std::path::Path;

use crate::models::{CoreError, Snapshot};

pub use json_file::JsonFileStore;

pub type PersistenceResult<T> = Result<T, CoreError>;

/// Durable storage for the update snapshot.
///
/// A store without a location is disabled: loading yields nothing and saving
/// does nothing, and callers treat that as normal operation.
pub trait SnapshotStore: Send + Sync {
    fn location(&self) -> Option<&Path>;

    fn load(&self) -> PersistenceResult<Option<Snapshot>>;

    fn save(&self, snapshot: &Snapshot) -> PersistenceResult<()>;

    fn is_enabled(&self) -> bool {
        self.location().is_some()
    }
}
