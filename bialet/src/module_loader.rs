//! C2: resolves `require`-style module references from inside a running
//! script to either a local file or a remote (`gh:`/`http(s):`) module,
//! caching remote fetches in `BIALET_REMOTE_MODULES`.
//!
//! Bialet does not use Rhai's native `import` statement — that only
//! resolves Rhai's own module format, not arbitrary source templates — so
//! user scripts instead call a host function, `require(path)`, registered
//! with the engine. `require` returns the raw source text, which the
//! calling script `eval`s itself. This keeps the resolution context
//! explicit (the calling module's own path, passed in) rather than reaching
//! for engine-global or thread-local state.

use crate::config::{BialetConfig, SCRIPT_EXTENSION};
use crate::db::Db;
use crate::http::agent;
use crate::util::fs::{is_contained, read_string};
use std::path::{Path, PathBuf};

/// The outcome of a module load. Success and failure are disjoint: there is
/// no partially-initialized result, addressing a source flaw flagged for
/// redesign.
pub type LoadResult = Result<String, LoadError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    UnsupportedScheme(String),
    Escaped,
    Fetch(String),
    NotFound,
}

/// Resolve and load the source for module reference `name`, as seen from
/// `caller_path` (the path of the module performing the `require`).
pub fn require(config: &BialetConfig, db: &Db, caller_path: &Path, name: &str) -> LoadResult {
    if let Some(colon) = name.find(':') {
        let scheme = &name[..colon];
        return require_remote(db, scheme, name);
    }

    let relative = if let Some(rest) = name.strip_prefix('/') {
        config.root_dir.join(rest)
    } else {
        let caller_dir = caller_path.parent().unwrap_or(&config.root_dir);
        caller_dir.join(name)
    };

    let path = ensure_extension(relative);

    if !is_contained(&config.root_dir, &path) {
        // Defence in depth: a `..` escape is reported as "not found" rather
        // than surfacing the internal path, matching the C2 failure
        // semantics for path-safety violations.
        return Err(LoadError::Escaped);
    }

    read_string(&path).map_err(|_| LoadError::NotFound)
}

fn require_remote(db: &Db, scheme: &str, module: &str) -> LoadResult {
    if let Some(cached) = db.lookup_remote_module(module) {
        return Ok(cached);
    }

    let url = match scheme {
        "http" | "https" => module.to_string(),
        "gh" => github_url(module).ok_or(LoadError::Fetch("malformed gh: reference".into()))?,
        other => return Err(LoadError::UnsupportedScheme(other.to_string())),
    };

    let body = agent::agent()
        .get(&url)
        .call()
        .map_err(|e| LoadError::Fetch(e.to_string()))?
        .into_string()
        .map_err(|e| LoadError::Fetch(e.to_string()))?;

    db.cache_remote_module(module, &body);

    Ok(body)
}

/// Parses `gh:<user>/<repo>[@<branch>]/<path>` into a raw.githubusercontent
/// URL, defaulting to branch `main`.
fn github_url(reference: &str) -> Option<String> {
    let rest = reference.strip_prefix("gh:")?;
    let (user, rest) = rest.split_once('/')?;
    let (repo_and_branch, path) = rest.split_once('/')?;

    let (repo, branch) = match repo_and_branch.split_once('@') {
        Some((repo, branch)) => (repo, branch),
        None => (repo_and_branch, "main"),
    };

    Some(format!(
        "https://raw.githubusercontent.com/{user}/{repo}/refs/heads/{branch}/{path}.{SCRIPT_EXTENSION}"
    ))
}

fn ensure_extension(path: PathBuf) -> PathBuf {
    if path.extension().map(|e| e == SCRIPT_EXTENSION).unwrap_or(false) {
        path
    } else {
        let mut os = path.into_os_string();
        os.push(".");
        os.push(SCRIPT_EXTENSION);
        PathBuf::from(os)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_url_defaults_to_main() {
        assert_eq!(
            github_url("gh:user/repo/lib/util"),
            Some(
                "https://raw.githubusercontent.com/user/repo/refs/heads/main/lib/util.wren"
                    .to_string()
            )
        );
    }

    #[test]
    fn github_url_respects_explicit_branch() {
        assert_eq!(
            github_url("gh:user/repo@dev/lib/util"),
            Some(
                "https://raw.githubusercontent.com/user/repo/refs/heads/dev/lib/util.wren"
                    .to_string()
            )
        );
    }

    #[test]
    fn github_url_rejects_malformed_reference() {
        assert_eq!(github_url("gh:user"), None);
    }
}
