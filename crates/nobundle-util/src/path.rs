//! Path helpers that work on forward-slash strings.
//!
//! Module ids and URLs are compared as strings throughout the dev server, so
//! every path that becomes an id goes through [`slash`] first.

use std::path::{Component, Path, PathBuf};

/// Convert backslashes to forward slashes.
#[must_use]
pub fn slash(p: &str) -> String {
    p.replace('\\', "/")
}

/// Render a path as a forward-slash string.
#[must_use]
pub fn to_slash(path: &Path) -> String {
    slash(&path.to_string_lossy())
}

/// Lexically normalize a path: fold `.` and `..` without touching the filesystem.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slash() {
        assert_eq!(slash(r"C:\project\src\main.ts"), "C:/project/src/main.ts");
        assert_eq!(slash("/already/unix"), "/already/unix");
    }

    #[test]
    fn test_normalize_folds_dots() {
        assert_eq!(
            normalize(Path::new("/project/src/./components/../App.tsx")),
            PathBuf::from("/project/src/App.tsx")
        );
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
    }
}
