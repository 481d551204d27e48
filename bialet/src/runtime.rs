//! C4: the per-request script runtime driver. A fresh `rhai::Engine` +
//! `rhai::Scope` is built for every invocation — there is no VM pooling, so
//! one request's globals can never leak into another's.

use crate::config::BialetConfig;
use crate::db::{Db, QueryBatch, QueryValue};
use crate::module_loader;
use crate::pages;
use crate::response::{resolve_file_sentinel, Response};
use rhai::{Array, Dynamic, Engine, EvalAltResult, Map, Scope};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

/// Request data injected into the VM before running user code. Absent in
/// CLI mode and for migration/cron hooks (a "request-less VM").
#[derive(Debug, Clone)]
pub struct RequestInput {
    pub method: String,
    pub uri: String,
    pub raw_head: String,
    pub body: Vec<u8>,
    pub matched_route: String,
    pub uploaded_file_ids: Vec<String>,
}

impl RequestInput {
    fn to_map(&self) -> Map {
        let mut map = Map::new();
        map.insert("method".into(), self.method.clone().into());
        map.insert("uri".into(), self.uri.clone().into());
        map.insert("headers".into(), self.raw_head.clone().into());
        map.insert(
            "body".into(),
            String::from_utf8_lossy(&self.body).into_owned().into(),
        );
        map.insert("route".into(), self.matched_route.clone().into());
        let files: Array = self
            .uploaded_file_ids
            .iter()
            .map(|id| Dynamic::from(id.clone()))
            .collect();
        map.insert("files".into(), files.into());
        map
    }
}

#[derive(Default)]
struct ResponseState {
    status: i64,
    headers: Option<String>,
    out_buffer: String,
}

/// A shared handle to the per-request response state. Cheap to `Clone`
/// (clones the `Rc`, not the state), which is what lets the same instance
/// live both in the Rhai scope (for scripts to call `.write()`/`.status()`
/// on) and in the driver (to read back the final state after `eval`).
#[derive(Clone, Default)]
struct ResponseHandle(Rc<RefCell<ResponseState>>);

impl ResponseHandle {
    fn write(&mut self, text: &str) {
        self.0.borrow_mut().out_buffer.push_str(text);
    }

    fn get_status(&mut self) -> i64 {
        self.0.borrow().status
    }

    fn set_status(&mut self, value: i64) {
        self.0.borrow_mut().status = value;
    }

    fn get_headers(&mut self) -> String {
        self.0.borrow().headers.clone().unwrap_or_default()
    }

    fn set_headers(&mut self, value: String) {
        self.0.borrow_mut().headers = Some(value);
    }
}

#[derive(Clone)]
struct DbHandle(Arc<Db>);

impl DbHandle {
    fn query(&mut self, sql: String, params: Array) -> Map {
        let values: Vec<QueryValue> = params.iter().map(dynamic_to_query_value).collect();
        let mut batch = QueryBatch::new(sql, values);
        self.0.execute(&mut batch);
        query_batch_to_map(&batch)
    }

    fn write_log(&mut self, message: String) {
        self.0.log(&message);
    }

    fn init(&mut self) {
        // Schema is created at `Db::open`; this is a no-op kept for
        // scripts that call `Db.init` explicitly (the fallback migration
        // one-liner in the absence of a `_migration.wren`).
    }
}

#[derive(Clone, Copy)]
struct DateHandle;

impl DateHandle {
    fn now(&mut self) -> String {
        chrono::Local::now().to_rfc3339()
    }
}

fn dynamic_to_query_value(value: &Dynamic) -> QueryValue {
    if value.is_unit() {
        QueryValue::Null
    } else if let Some(b) = value.clone().try_cast::<bool>() {
        QueryValue::Boolean(b)
    } else if let Some(i) = value.clone().try_cast::<i64>() {
        QueryValue::Number(i as f64)
    } else if let Some(f) = value.clone().try_cast::<f64>() {
        QueryValue::Number(f)
    } else if let Some(blob) = value.clone().try_cast::<rhai::Blob>() {
        QueryValue::Blob(blob)
    } else {
        QueryValue::String(value.to_string())
    }
}

fn query_value_to_dynamic(value: &QueryValue) -> Dynamic {
    match value {
        QueryValue::Null => Dynamic::UNIT,
        QueryValue::Number(n) => (*n).into(),
        QueryValue::String(s) => s.clone().into(),
        QueryValue::Blob(b) => Dynamic::from(b.clone()),
        QueryValue::Boolean(b) => (*b).into(),
    }
}

fn query_batch_to_map(batch: &QueryBatch) -> Map {
    let mut out = Map::new();

    let results: Array = batch
        .results
        .iter()
        .map(|result_set| {
            let rows: Array = result_set
                .iter()
                .map(|row| {
                    let mut row_map = Map::new();
                    for cell in row {
                        row_map.insert(cell.column.clone().into(), query_value_to_dynamic(&cell.value));
                    }
                    Dynamic::from(row_map)
                })
                .collect();
            Dynamic::from(rows)
        })
        .collect();

    out.insert("results".into(), Dynamic::from(results));
    out.insert("lastInsertId".into(), batch.last_insert_id.clone().into());
    out
}

fn register_engine(engine: &mut Engine, config: Arc<BialetConfig>, db: Arc<Db>, module_path: PathBuf) {
    engine
        .register_type_with_name::<ResponseHandle>("Response")
        .register_fn("write", ResponseHandle::write)
        .register_get_set("status", ResponseHandle::get_status, ResponseHandle::set_status)
        .register_get_set("headers", ResponseHandle::get_headers, ResponseHandle::set_headers);

    engine
        .register_type_with_name::<DbHandle>("Db")
        .register_fn("query", DbHandle::query)
        .register_fn("log", DbHandle::write_log)
        .register_fn("init", DbHandle::init);

    engine
        .register_type_with_name::<DateHandle>("Date")
        .register_fn("now", DateHandle::now);

    // Relative imports resolve against the request's entry module path
    // rather than the path of whichever module is *currently* calling
    // `require` (a nested `require` inside a previously-required module
    // would need call-stack-aware context tracking rhai doesn't give us for
    // free); see DESIGN.md.
    engine.register_fn(
        "require",
        move |name: &str| -> Result<String, Box<EvalAltResult>> {
            module_loader::require(&config, &db, &module_path, name)
                .map_err(|e| format!("module not found: {name} ({e:?})").into())
        },
    );
}

/// Owns the process-wide configuration and database handle; builds a fresh
/// engine per `run` call.
pub struct Driver {
    config: Arc<BialetConfig>,
    db: Arc<Db>,
}

impl Driver {
    pub fn new(config: Arc<BialetConfig>, db: Arc<Db>) -> Driver {
        Driver { config, db }
    }

    /// Run `source` (the module at `module_path`) for `request`, or in
    /// request-less mode (CLI / migration / cron hooks) when `request` is
    /// `None`.
    pub fn run(&self, source: &str, module_path: &Path, request: Option<RequestInput>) -> Response {
        let mut engine = Engine::new();
        register_engine(
            &mut engine,
            Arc::clone(&self.config),
            Arc::clone(&self.db),
            module_path.to_path_buf(),
        );

        let mut scope = Scope::new();
        let response_handle = ResponseHandle::default();
        scope.push("Response", response_handle.clone());
        scope.push("Db", DbHandle(Arc::clone(&self.db)));
        scope.push("Date", DateHandle);
        if let Some(request) = &request {
            scope.push_constant("Request", request.to_map());
        }

        let module_label = module_path.display().to_string();

        let ast = match engine.compile_with_scope(&scope, source) {
            Ok(ast) => ast,
            Err(e) => {
                log::error!("Compilation Error [{module_label}]: {e}");
                return Response::html(500, pages::internal_server_error());
            }
        };

        let eval_result = engine.eval_ast_with_scope::<Dynamic>(&mut scope, &ast);

        let returned_string = match eval_result {
            Ok(value) if value.is_string() => Some(value.into_string().unwrap_or_default()),
            Ok(_) => None,
            Err(e) => {
                log::error!("Runtime Error [{module_label}]: {e}");
                return Response::html(500, pages::internal_server_error());
            }
        };

        let (status, headers, out_buffer) = {
            let state = response_handle.0.borrow();
            (state.status, state.headers.clone(), state.out_buffer.clone())
        };

        let body = match returned_string {
            Some(s) => s.into_bytes(),
            None => out_buffer.into_bytes(),
        };

        let status = if status == 0 { 200 } else { status as u16 };
        let headers = if request.is_some() { headers } else { None };

        let (status, body) = match resolve_file_sentinel(&self.db, body) {
            Ok(body) => (status, body),
            Err(error_page) => (500, error_page),
        };

        Response {
            status,
            header: headers,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;
    use std::path::PathBuf;

    fn test_config(root: PathBuf) -> Arc<BialetConfig> {
        Arc::new(BialetConfig {
            root_dir: root,
            host: "127.0.0.1".into(),
            port: 7001,
            log_file: None,
            production: false,
            color: crate::shell::color_choice::ColorChoice::Never,
            mem_soft_limit: 50,
            mem_hard_limit: 100,
            cpu_soft_limit: 15,
            cpu_hard_limit: 30,
            db_path: PathBuf::from(":memory:"),
            ignored_files: vec![],
            wal: false,
        })
    }

    #[test]
    fn literal_string_return_is_the_body() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Driver::new(test_config(dir.path().to_path_buf()), Db::open_in_memory());
        let response = driver.run("\"hi\"", &dir.path().join("hello.wren"), None);
        assert_eq!(response.body, b"hi");
        assert_eq!(response.status, 200);
    }

    #[test]
    fn db_query_round_trips_through_the_script() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Driver::new(test_config(dir.path().to_path_buf()), Db::open_in_memory());
        let response = driver.run(
            "let r = Db.query(\"SELECT (? + ?) AS sum\", [2, 3]); r.results[0][0].sum.to_string()",
            &dir.path().join("sum.wren"),
            None,
        );
        assert!(String::from_utf8_lossy(&response.body).starts_with('5'));
    }

    #[test]
    fn compile_error_yields_500() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Driver::new(test_config(dir.path().to_path_buf()), Db::open_in_memory());
        let response = driver.run("let x = (", &dir.path().join("broken.wren"), None);
        assert_eq!(response.status, 500);
        assert!(String::from_utf8_lossy(&response.body).contains("Internal Server Error"));
    }

    #[test]
    fn response_status_setter_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Driver::new(test_config(dir.path().to_path_buf()), Db::open_in_memory());
        let response = driver.run(
            "Response.status = 404; Response.write(\"nope\");",
            &dir.path().join("nf.wren"),
            None,
        );
        assert_eq!(response.status, 404);
        assert_eq!(response.body, b"nope");
    }
}
