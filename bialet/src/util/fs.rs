use crate::error::{BialetError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Read a file to a UTF-8 string.
pub fn read_string<P: AsRef<Path>>(path: P) -> Result<String> {
    fn inner(path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(BialetError::Io)
    }

    inner(path.as_ref())
}

/// Read a file to a string, returning `None` if it does not exist or cannot
/// be read rather than propagating an error. Used at every hook location
/// (`_migration`, `_cron`, `_route`) where "file absent" is a normal branch,
/// not a failure.
pub fn read_optional<P: AsRef<Path>>(path: P) -> Option<String> {
    fn inner(path: &Path) -> Option<String> {
        fs::read_to_string(path).ok()
    }

    inner(path.as_ref())
}

/// Read a file to a byte buffer.
pub fn read_bytes<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    fn inner(path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(BialetError::Io)
    }

    inner(path.as_ref())
}

/// Returns `true` if `path`, once canonicalised, is contained within
/// `root`'s canonical form. Both sides are canonicalised so `..` traversal
/// and symlinks cannot escape the document root.
///
/// `path` need not exist for a conservative check: a non-existent path is
/// checked by walking up its ancestors until one canonicalises (there may be
/// several missing levels, e.g. a route-fallback URI like
/// `root_dir/users/42/profile` where only `root_dir/users` exists), then
/// confirming that ancestor is inside `root`.
pub fn is_contained(root: &Path, path: &Path) -> bool {
    let Ok(root) = root.canonicalize() else {
        return false;
    };

    if let Ok(canon) = path.canonicalize() {
        return canon.starts_with(&root);
    }

    let mut ancestor = path;
    while let Some(parent) = ancestor.parent() {
        if let Ok(canon) = parent.canonicalize() {
            return canon.starts_with(&root);
        }
        ancestor = parent;
    }

    false
}

/// Join `root` and a request-relative path, without touching the
/// filesystem. Callers must still validate containment with
/// [`is_contained`] before using the result.
pub fn join_relative(root: &Path, relative: &str) -> PathBuf {
    root.join(relative.trim_start_matches('/'))
}
