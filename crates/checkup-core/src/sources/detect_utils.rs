use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Finds `binary_name` in `first`, then in each `$PATH` entry. Names with a
/// slash are checked as given.
pub(crate) fn which_executable(binary_name: &str, first: &[&Path]) -> Option<PathBuf> {
    let binary_name = binary_name.trim();
    if binary_name.is_empty() {
        return None;
    }
    if binary_name.contains('/') {
        let path = PathBuf::from(binary_name);
        return is_executable(&path).then_some(path);
    }

    let path_dirs = std::env::var_os("PATH")
        .map(|value| std::env::split_paths(&value).collect::<Vec<_>>())
        .unwrap_or_default();

    first
        .iter()
        .map(|dir| dir.to_path_buf())
        .chain(path_dirs)
        .map(|dir| dir.join(binary_name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use super::which_executable;

    #[test]
    fn prefers_given_directories() {
        let dir = tempfile::tempdir().unwrap();
        let helper = dir.path().join("paru");
        fs::write(&helper, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&helper, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(which_executable("paru", &[dir.path()]), Some(helper.clone()));
        assert_eq!(
            which_executable(helper.to_str().unwrap(), &[]),
            Some(helper)
        );
    }

    #[test]
    fn ignores_files_that_are_not_executable() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("yay"), "not a program").unwrap();

        let found = which_executable("yay", &[dir.path()]);
        assert!(found.is_none_or(|path| !path.starts_with(dir.path())));
    }

    #[test]
    fn blank_name_is_never_found() {
        assert_eq!(which_executable("  ", &[]), None);
    }
}
