//! Wires C1 (resolver) through C4 (script driver) and C5 (file-sentinel
//! resolution) into an Axum `Router`, plus static-file serving and the
//! development-mode live-reload route.

use crate::config::BialetConfig;
use crate::db::Db;
use crate::pages;
use crate::resolver::{self, Resolution};
use crate::response::Response as BResponse;
use crate::runtime::{Driver, RequestInput};
use crate::sse;
use crate::supervisor::ReloadState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::routing::{any, get};
use axum::Router;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Request bodies larger than this are rejected with 413 before a script
/// ever sees them (spec's Open Question on upload size, decided in
/// DESIGN.md).
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

pub struct AppState {
    pub config: Arc<BialetConfig>,
    pub db: Arc<Db>,
    pub reload: Arc<ReloadState>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new().fallback(any(handle));

    if !state.config.production {
        router = router.route("/__bialet_reload", get(sse::reload_stream));
    }

    router.with_state(state)
}

async fn handle(State(state): State<Arc<AppState>>, request: Request) -> AxumResponse {
    let method = request.method().to_string();
    let raw_uri = request.uri().to_string();
    let raw_head = format_headers(request.headers());

    let (_parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes.to_vec(),
        Err(_) => return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response(),
    };

    let resolution = resolver::resolve(&state.config.root_dir, &raw_uri);

    match resolution {
        Resolution::Forbidden => html_response(403, pages::forbidden()),
        Resolution::NotFound => html_response(404, pages::not_found()),
        Resolution::RedirectTrailingSlash(target) => redirect(&target),
        Resolution::Favicon => favicon(),
        Resolution::Static(path) => serve_static(&state, &path),
        Resolution::Script(path) => {
            let input = RequestInput {
                method,
                uri: raw_uri.clone(),
                raw_head,
                body,
                matched_route: raw_uri,
                uploaded_file_ids: Vec::new(),
            };
            run_script(&state, path, input).await
        }
        Resolution::Route {
            handler,
            original_uri,
        } => {
            let input = RequestInput {
                method,
                uri: original_uri,
                raw_head,
                body,
                matched_route: raw_uri,
                uploaded_file_ids: Vec::new(),
            };
            run_script(&state, handler, input).await
        }
    }
}

async fn run_script(state: &Arc<AppState>, path: std::path::PathBuf, input: RequestInput) -> AxumResponse {
    let source = match crate::util::fs::read_string(&path) {
        Ok(source) => source,
        Err(e) => {
            log::error!("failed to read script '{}': {e}", path.display());
            return html_response(500, pages::internal_server_error());
        }
    };

    let config = Arc::clone(&state.config);
    let db = Arc::clone(&state.db);

    let driver_call = tokio::task::spawn_blocking(move || {
        let driver = Driver::new(config, db);
        driver.run(&source, &path, Some(input))
    });

    // On Linux the worker process itself is bounded by RLIMIT_CPU; on other
    // platforms nothing stops a runaway script but this in-process deadline,
    // applied per request rather than per process.
    let response = if cfg!(target_os = "linux") {
        driver_call.await
    } else {
        let timeout = Duration::from_secs(state.config.cpu_hard_limit);
        match tokio::time::timeout(timeout, driver_call).await {
            Ok(joined) => joined,
            Err(_) => {
                log::error!("script exceeded the {}s wall-clock limit", state.config.cpu_hard_limit);
                return html_response(500, pages::internal_server_error());
            }
        }
    };

    match response {
        Ok(response) => bialet_response_to_axum(response, !state.config.production),
        Err(e) => {
            log::error!("script task panicked: {e}");
            html_response(500, pages::internal_server_error())
        }
    }
}

fn serve_static(state: &Arc<AppState>, path: &Path) -> AxumResponse {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if state.config.is_ignored(file_name) {
        return html_response(403, pages::forbidden());
    }

    match crate::util::fs::read_bytes(path) {
        Ok(bytes) => {
            let mime = mime_for(path);
            AxumResponse::builder()
                .status(StatusCode::OK)
                .header("Content-Type", mime)
                .body(Body::from(bytes))
                .unwrap_or_else(|_| html_response(500, pages::internal_server_error()))
        }
        Err(e) => {
            log::error!("failed to read static file '{}': {e}", path.display());
            html_response(500, pages::internal_server_error())
        }
    }
}

fn favicon() -> AxumResponse {
    AxumResponse::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "image/x-icon")
        .body(Body::from(pages::DEFAULT_FAVICON.to_vec()))
        .unwrap_or_else(|_| html_response(500, pages::internal_server_error()))
}

fn redirect(target: &str) -> AxumResponse {
    AxumResponse::builder()
        .status(StatusCode::MOVED_PERMANENTLY)
        .header("Location", target)
        .body(Body::empty())
        .unwrap_or_else(|_| html_response(500, pages::internal_server_error()))
}

fn html_response(status: u16, body: String) -> AxumResponse {
    bialet_response_to_axum(BResponse::html(status, body), false)
}

/// Converts the script-facing `Response` into the Axum wire response,
/// applying the script's raw header block (if any) and, in development mode,
/// injecting the live-reload script tag into HTML bodies.
fn bialet_response_to_axum(response: BResponse, inject_reload: bool) -> AxumResponse {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut builder = AxumResponse::builder().status(status);
    let mut saw_content_type = false;

    if let Some(header_block) = &response.header {
        for line in header_block.split("\r\n") {
            if let Some((key, value)) = line.split_once(':') {
                let key = key.trim();
                if key.eq_ignore_ascii_case("content-type") {
                    saw_content_type = true;
                }
                builder = builder.header(key, value.trim());
            }
        }
    }

    if !saw_content_type {
        builder = builder.header("Content-Type", "text/html; charset=UTF-8");
    }

    let body = if inject_reload && looks_like_html(&response.header) {
        inject_reload_tag(response.body)
    } else {
        response.body
    };

    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| AxumResponse::new(Body::from(pages::internal_server_error())))
}

fn looks_like_html(header: &Option<String>) -> bool {
    match header {
        Some(h) => h.to_ascii_lowercase().contains("text/html"),
        None => true,
    }
}

fn inject_reload_tag(body: Vec<u8>) -> Vec<u8> {
    let Ok(mut text) = String::from_utf8(body.clone()) else {
        return body;
    };

    match text.to_ascii_lowercase().rfind("</body>") {
        Some(index) => {
            text.insert_str(index, sse::RELOAD_SCRIPT_TAG);
            text.into_bytes()
        }
        None => {
            text.push_str(sse::RELOAD_SCRIPT_TAG);
            text.into_bytes()
        }
    }
}

fn format_headers(headers: &HeaderMap) -> String {
    let mut out = String::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            out.push_str(name.as_str());
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
    }
    out
}

fn mime_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "html" | "htm" => "text/html; charset=UTF-8",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "txt" => "text/plain; charset=UTF-8",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_defaults_to_octet_stream() {
        assert_eq!(mime_for(Path::new("file.bin")), "application/octet-stream");
        assert_eq!(mime_for(Path::new("file.css")), "text/css");
    }

    #[test]
    fn reload_tag_is_inserted_before_closing_body() {
        let body = inject_reload_tag(b"<html><body>hi</body></html>".to_vec());
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains(sse::RELOAD_SCRIPT_TAG));
        assert!(text.find(sse::RELOAD_SCRIPT_TAG).unwrap() < text.find("</body>").unwrap());
    }

    #[test]
    fn reload_tag_appends_when_no_body_tag() {
        let body = inject_reload_tag(b"plain text".to_vec());
        let text = String::from_utf8(body).unwrap();
        assert!(text.ends_with(sse::RELOAD_SCRIPT_TAG));
    }

    // End-to-end scenarios, each driving the full router with
    // `tower::ServiceExt::oneshot` over a throwaway `root_dir` + database.

    use crate::shell::color_choice::ColorChoice;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    async fn test_state(root: std::path::PathBuf, production: bool) -> Arc<AppState> {
        let db_path = root.join("_db.sqlite3");
        let config = Arc::new(BialetConfig {
            root_dir: root,
            host: "127.0.0.1".into(),
            port: 0,
            log_file: None,
            production,
            color: ColorChoice::Never,
            mem_soft_limit: 50,
            mem_hard_limit: 100,
            cpu_soft_limit: 15,
            cpu_hard_limit: 30,
            db_path,
            ignored_files: vec![],
            wal: false,
        });
        let db = Db::open(&config.db_path, false).unwrap();
        Arc::new(AppState {
            config,
            db,
            reload: ReloadState::new(),
        })
    }

    async fn body_of(response: AxumResponse) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), MAX_BODY_BYTES)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn welcome_page_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path().to_path_buf(), false).await;
        let router = build_router(state);

        let response = router
            .oneshot(HttpRequest::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = String::from_utf8(body_of(response).await).unwrap();
        assert!(body.contains("Welcome to Bialet"));
    }

    #[tokio::test]
    async fn forbidden_prefix_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path().to_path_buf(), false).await;
        let router = build_router(state);

        let response = router
            .oneshot(
                HttpRequest::builder()
                    .uri("/_migration.wren")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = String::from_utf8(body_of(response).await).unwrap();
        assert!(body.contains("Forbidden"));
    }

    #[tokio::test]
    async fn script_dispatch_scenario() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.wren"), "\"hi\"").unwrap();
        let state = test_state(dir.path().to_path_buf(), false).await;
        let router = build_router(state);

        let response = router
            .oneshot(
                HttpRequest::builder()
                    .uri("/hello")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_of(response).await, b"hi");
    }

    #[tokio::test]
    async fn file_sentinel_scenario() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("logo.wren"),
            "\"\\x1Alogo\"",
        )
        .unwrap();
        let state = test_state(dir.path().to_path_buf(), false).await;
        state.db.insert_test_blob("logo", &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);
        let router = build_router(state);

        let response = router
            .oneshot(
                HttpRequest::builder()
                    .uri("/logo")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_of(response).await;
        assert_eq!(body.len(), 8);
        assert_eq!(body[0], 0x89);
    }

    #[tokio::test]
    async fn route_fallback_scenario() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("users")).unwrap();
        std::fs::write(
            dir.path().join("users").join("_route.wren"),
            "Request.uri",
        )
        .unwrap();
        let state = test_state(dir.path().to_path_buf(), false).await;
        let router = build_router(state);

        let response = router
            .oneshot(
                HttpRequest::builder()
                    .uri("/users/42/profile")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_of(response).await, b"/users/42/profile");
    }
}
