use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Check if a path points to an executable regular file.
fn is_executable(path: &Path) -> bool {
    let Ok(meta) = path.metadata() else {
        return false;
    };
    meta.is_file() && meta.permissions().mode() & 0o111 != 0
}

/// Find the program a command name refers to.
///
/// Names containing a `/` are taken as paths and only checked; anything else
/// is searched for in each `:`-separated entry of `path_var`, first match wins.
/// An empty entry means the current directory.
pub fn locate(name: &str, path_var: Option<&str>) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    if name.contains('/') {
        let path = PathBuf::from(name);
        return is_executable(&path).then_some(path);
    }

    for dir in path_var?.split(':') {
        let dir = if dir.is_empty() { "." } else { dir };
        let full_path = Path::new(dir).join(name);
        if is_executable(&full_path) {
            return Some(full_path);
        }
    }
    None
}
