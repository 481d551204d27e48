//! C1: maps a request URI to a script, a static file, or a route-handler
//! file, rejecting unsafe paths before ever touching the filesystem for
//! anything outside `root_dir`.

use crate::config::SCRIPT_EXTENSION;
use crate::util::fs::is_contained;
use std::path::{Path, PathBuf};

/// A resolved disposition for a request URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A `.wren` script to run through the driver.
    Script(PathBuf),
    /// A file to serve verbatim, with a MIME type derived from its
    /// extension.
    Static(PathBuf),
    /// A catch-all `_route.wren` file; the script still sees the original
    /// URI in its `Request`.
    Route {
        handler: PathBuf,
        original_uri: String,
    },
    /// `/favicon.ico` with no file on disk: serve the embedded default.
    Favicon,
    /// Path-safety violation: underscore-prefixed segment, dotfile segment,
    /// or an attempted escape from `root_dir`.
    Forbidden,
    /// No file, no fallback route.
    NotFound,
    /// A directory was matched via its index file but the URI lacked a
    /// trailing slash; the client should be redirected there first so
    /// relative links in the served page resolve correctly.
    RedirectTrailingSlash(String),
}

/// Resolve `raw_uri` (the request-line URI, including any query string)
/// against `root`. Pure and filesystem-read-only: no writes, no I/O beyond
/// `Path::exists`/`canonicalize`.
pub fn resolve(root: &Path, raw_uri: &str) -> Resolution {
    let uri = strip_query(raw_uri);
    let had_trailing_slash = uri == "/" || uri.ends_with('/');
    let normalized = strip_trailing_slash(uri);

    if is_forbidden(normalized) {
        return Resolution::Forbidden;
    }

    let joined = crate::util::fs::join_relative(root, normalized);
    if !is_contained(root, &joined) {
        return Resolution::Forbidden;
    }

    let script_path = with_extension_suffix(&joined, SCRIPT_EXTENSION);
    if script_path.is_file() {
        return Resolution::Script(script_path);
    }

    if joined.is_dir() {
        let index_script = joined.join(format!("index.{SCRIPT_EXTENSION}"));
        let index_html = joined.join("index.html");

        let (found, is_script) = if index_script.is_file() {
            (Some(index_script), true)
        } else if index_html.is_file() {
            (Some(index_html), false)
        } else {
            (None, false)
        };

        if let Some(found) = found {
            if !had_trailing_slash {
                return Resolution::RedirectTrailingSlash(format!("{normalized}/"));
            }
            return if is_script {
                Resolution::Script(found)
            } else {
                Resolution::Static(found)
            };
        }
    }

    // Either `joined` doesn't exist at all, or it's a directory with no
    // usable index file — in both cases there's nothing to serve directly,
    // so fall through to the favicon/route/404 branch.
    if !joined.is_file() {
        if normalized == "/favicon.ico" {
            return Resolution::Favicon;
        }

        if let Some(route) = find_route(root, normalized) {
            return Resolution::Route {
                handler: route,
                original_uri: uri.to_string(),
            };
        }

        return Resolution::NotFound;
    }

    Resolution::Static(joined)
}

fn strip_query(uri: &str) -> &str {
    match uri.find('?') {
        Some(index) => &uri[..index],
        None => uri,
    }
}

fn strip_trailing_slash(uri: &str) -> &str {
    if uri == "/" {
        uri
    } else {
        uri.strip_suffix('/').unwrap_or(uri)
    }
}

fn is_forbidden(uri: &str) -> bool {
    uri.starts_with("/_")
        || uri
            .split('/')
            .any(|segment| segment.starts_with('.') && !segment.is_empty())
}

fn with_extension_suffix(path: &Path, ext: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}

/// Walk upward from the directory containing `uri` toward `root`, looking
/// for a `_route.<ext>` file at each level. The first match wins.
fn find_route(root: &Path, uri: &str) -> Option<PathBuf> {
    let mut dir = Path::new(uri.trim_start_matches('/'))
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    loop {
        let candidate = root.join(&dir).join(format!("_route.{SCRIPT_EXTENSION}"));
        if candidate.is_file() {
            return Some(candidate);
        }

        if dir.as_os_str().is_empty() {
            return None;
        }

        dir = dir.parent().map(Path::to_path_buf).unwrap_or_default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn underscore_prefix_is_forbidden() {
        let dir = tempdir().unwrap();
        assert_eq!(
            resolve(dir.path(), "/_migration.wren"),
            Resolution::Forbidden
        );
    }

    #[test]
    fn dotfile_segment_is_forbidden() {
        let dir = tempdir().unwrap();
        assert_eq!(resolve(dir.path(), "/.git/config"), Resolution::Forbidden);
    }

    #[test]
    fn traversal_is_forbidden() {
        let dir = tempdir().unwrap();
        assert_eq!(resolve(dir.path(), "/../etc/passwd"), Resolution::Forbidden);
    }

    #[test]
    fn missing_index_and_route_is_not_found() {
        let dir = tempdir().unwrap();
        assert_eq!(resolve(dir.path(), "/"), Resolution::NotFound);
    }

    #[test]
    fn script_extension_wins_over_static_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("hello.wren"), "return \"hi\"").unwrap();
        fs::write(dir.path().join("hello"), "static").unwrap();
        assert_eq!(
            resolve(dir.path(), "/hello"),
            Resolution::Script(dir.path().join("hello.wren"))
        );
    }

    #[test]
    fn favicon_without_file_returns_favicon_sentinel() {
        let dir = tempdir().unwrap();
        assert_eq!(resolve(dir.path(), "/favicon.ico"), Resolution::Favicon);
    }

    #[test]
    fn route_fallback_reports_original_uri() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("users")).unwrap();
        fs::write(
            dir.path().join("users").join("_route.wren"),
            "return \"routed\"",
        )
        .unwrap();

        match resolve(dir.path(), "/users/42/profile") {
            Resolution::Route {
                handler,
                original_uri,
            } => {
                assert_eq!(handler, dir.path().join("users").join("_route.wren"));
                assert_eq!(original_uri, "/users/42/profile");
            }
            other => panic!("expected Route, got {other:?}"),
        }
    }

    #[test]
    fn directory_without_trailing_slash_redirects() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs").join("index.html"), "hi").unwrap();

        assert_eq!(
            resolve(dir.path(), "/docs"),
            Resolution::RedirectTrailingSlash("/docs/".to_string())
        );
    }
}
