//! Locating agent binaries on `PATH`.

use std::path::{Path, PathBuf};

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && (m.permissions().mode() & 0o111 != 0))
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file())
        .unwrap_or(false)
}

fn has_separator(cmd: &str) -> bool {
    cmd.contains(std::path::MAIN_SEPARATOR) || cmd.contains('/')
}

pub fn find_in_dirs(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    if name.trim().is_empty() {
        return None;
    }
    dirs.iter()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    let dirs = std::env::split_paths(&path_var).collect::<Vec<_>>();
    find_in_dirs(name, &dirs)
}

/// Resolve `cmd` to an executable: explicit paths are checked directly, bare names via `PATH`.
pub fn resolve_command(cmd: &str) -> Option<PathBuf> {
    let trimmed = cmd.trim();
    if trimmed.is_empty() {
        return None;
    }
    if has_separator(trimmed) {
        let path = PathBuf::from(trimmed);
        return is_executable(&path).then_some(path);
    }
    find_in_path(trimmed)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\nexit 0\n").expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).expect("chmod");
        path
    }

    #[test]
    fn finds_executable_in_dirs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let expected = write_script(temp.path(), "codex", 0o755);
        let found = find_in_dirs("codex", &[PathBuf::new(), temp.path().to_path_buf()]);
        assert_eq!(found, Some(expected));
    }

    #[test]
    fn ignores_non_executable_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_script(temp.path(), "claude", 0o644);
        assert_eq!(find_in_dirs("claude", &[temp.path().to_path_buf()]), None);
    }

    #[test]
    fn resolves_explicit_paths_without_path_lookup() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = write_script(temp.path(), "droid", 0o755);
        let resolved = resolve_command(script.to_str().expect("utf8 path"));
        assert_eq!(resolved, Some(script));
        assert_eq!(resolve_command(""), None);
    }
}
