use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::models::{CoreError, CoreErrorKind, Snapshot};
use crate::persistence::{PersistenceResult, SnapshotStore};

pub struct JsonFileStore {
    path: Option<PathBuf>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            path: (!path.as_os_str().is_empty()).then_some(path),
        }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }
}

impl SnapshotStore for JsonFileStore {
    fn location(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn load(&self) -> PersistenceResult<Option<Snapshot>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(storage_error("read", path, error.to_string())),
        };

        // A freshly created, still empty file is not a corrupt cache.
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        serde_json::from_slice(&bytes).map(Some).map_err(|error| {
            CoreError::new(
                CoreErrorKind::ParseFailure,
                format!("cache file {} is malformed: {error}", path.display()),
            )
        })
    }

    fn save(&self, snapshot: &Snapshot) -> PersistenceResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let encoded = serde_json::to_vec(snapshot).map_err(|error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("cannot encode snapshot: {error}"),
            )
        })?;

        let staging = staging_path(path);
        fs::write(&staging, &encoded)
            .map_err(|error| storage_error("write", &staging, error.to_string()))?;
        fs::rename(&staging, path).map_err(|error| {
            let _ = fs::remove_file(&staging);
            storage_error("replace", path, error.to_string())
        })?;

        tracing::debug!(path = %path.display(), updates = snapshot.updates.len(), "cache file written");
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn storage_error(operation: &str, path: &Path, message: String) -> CoreError {
    CoreError::new(
        CoreErrorKind::StorageFailure,
        format!("cannot {operation} cache file {}: {message}", path.display()),
    )
}
