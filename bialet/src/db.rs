//! C3: the parameterised SQL query executor the script runtime calls back
//! into, plus the handful of persisted tables the core depends on
//! (`BIALET_LOGS`, `BIALET_REMOTE_MODULES`, `BIALET_FILES`).

use crate::error::{BialetError, Result};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One bound parameter, or one materialised cell value. The variant itself
/// carries the type tag spec.md calls out explicitly (`null`, `number`,
/// `string`, `blob`, `boolean`), so there's no separate enum to keep in
/// sync.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Null,
    Number(f64),
    String(String),
    Blob(Vec<u8>),
    Boolean(bool),
}

impl QueryValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            QueryValue::Null => "null",
            QueryValue::Number(_) => "number",
            QueryValue::String(_) => "string",
            QueryValue::Blob(_) => "blob",
            QueryValue::Boolean(_) => "boolean",
        }
    }

    fn byte_size(&self) -> usize {
        match self {
            QueryValue::Null => 1,
            QueryValue::Number(n) => n.to_string().len(),
            QueryValue::String(s) => s.len(),
            QueryValue::Blob(b) => b.len(),
            QueryValue::Boolean(_) => 1,
        }
    }

    fn to_sql_value(&self) -> SqlValue {
        match self {
            QueryValue::Null => SqlValue::Null,
            QueryValue::Number(n) => SqlValue::Real(*n),
            QueryValue::String(s) => SqlValue::Text(s.clone()),
            QueryValue::Blob(b) => SqlValue::Blob(b.clone()),
            QueryValue::Boolean(b) => SqlValue::Integer(if *b { 1 } else { 0 }),
        }
    }

    fn from_value_ref(value: ValueRef<'_>) -> QueryValue {
        match value {
            ValueRef::Null => QueryValue::Null,
            ValueRef::Integer(i) => QueryValue::Number(i as f64),
            ValueRef::Real(r) => QueryValue::Number(r),
            ValueRef::Text(t) => QueryValue::String(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => QueryValue::Blob(b.to_vec()),
        }
    }
}

/// One materialised cell: `(column_name, value, byte_size, type)`, the type
/// folded into `value`'s own variant.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub column: String,
    pub value: QueryValue,
    pub size: usize,
}

pub type Row = Vec<Cell>;
pub type ResultSet = Vec<Row>;

/// The object the script runtime hands to the query executor and reads back
/// afterward.
#[derive(Debug, Clone, Default)]
pub struct QueryBatch {
    pub query_string: String,
    pub parameters: Vec<QueryValue>,
    pub results: Vec<ResultSet>,
    pub last_insert_id: String,
}

impl QueryBatch {
    pub fn new(query_string: impl Into<String>, parameters: Vec<QueryValue>) -> QueryBatch {
        QueryBatch {
            query_string: query_string.into(),
            parameters,
            results: Vec::new(),
            last_insert_id: String::new(),
        }
    }
}

/// The process-wide database handle. Because exactly one request runs at a
/// time inside a worker, the lock is only ever held for the duration of a
/// single query-executor call or cron/migration run, never across
/// await points visible to a second request.
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn open(path: &Path, wal: bool) -> Result<Arc<Db>> {
        let conn = Connection::open(path).map_err(|source| BialetError::DbOpen {
            path: path.to_path_buf(),
            source,
        })?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA cache_size = -10000;
             PRAGMA mmap_size = 134217728;",
        )
        .map_err(|source| BialetError::DbOpen {
            path: path.to_path_buf(),
            source,
        })?;

        if wal {
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(|source| BialetError::DbOpen {
                    path: path.to_path_buf(),
                    source,
                })?;
        }

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS BIALET_LOGS(message TEXT);
             CREATE TABLE IF NOT EXISTS BIALET_REMOTE_MODULES(module TEXT, content TEXT);
             CREATE TABLE IF NOT EXISTS BIALET_FILES(id TEXT, file BLOB);",
        )
        .map_err(|source| BialetError::DbOpen {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Arc::new(Db {
            conn: Mutex::new(conn),
        }))
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Arc<Db> {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS BIALET_LOGS(message TEXT);
             CREATE TABLE IF NOT EXISTS BIALET_REMOTE_MODULES(module TEXT, content TEXT);
             CREATE TABLE IF NOT EXISTS BIALET_FILES(id TEXT, file BLOB);",
        )
        .unwrap();
        Arc::new(Db {
            conn: Mutex::new(conn),
        })
    }

    /// C3 entry point. Never propagates an error back to the caller;
    /// prepare/bind/step failures are logged and leave `batch.results`
    /// empty, matching the spec's "the query returns no rows but the
    /// script continues" rule.
    pub fn execute(&self, batch: &mut QueryBatch) {
        if batch.query_string.trim().is_empty() {
            return;
        }

        let conn = self.conn.blocking_lock();

        let mut stmt = match conn.prepare(&batch.query_string) {
            Ok(stmt) => stmt,
            Err(e) => {
                log::error!("Query Error: {e}");
                return;
            }
        };

        let params: Vec<SqlValue> = batch.parameters.iter().map(|p| p.to_sql_value()).collect();

        let column_names: Vec<String> =
            stmt.column_names().iter().map(|s| s.to_string()).collect();

        let mut rows = match stmt.query(rusqlite::params_from_iter(params.iter())) {
            Ok(rows) => rows,
            Err(e) => {
                log::error!("Query Error: {e}");
                return;
            }
        };

        let mut result_set: ResultSet = Vec::new();

        loop {
            let row = match rows.next() {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => {
                    log::error!("SQL Error: {e}");
                    break;
                }
            };

            let mut out_row: Row = Vec::with_capacity(column_names.len());
            for (i, column) in column_names.iter().enumerate() {
                let value_ref = match row.get_ref(i) {
                    Ok(v) => v,
                    Err(e) => {
                        log::error!("SQL Error: {e}");
                        continue;
                    }
                };
                let value = QueryValue::from_value_ref(value_ref);
                let size = value.byte_size();
                out_row.push(Cell {
                    column: column.clone(),
                    value,
                    size,
                });
            }
            result_set.push(out_row);
        }

        if !result_set.is_empty() {
            batch.results.push(result_set);
        }

        batch.last_insert_id = conn.last_insert_rowid().to_string();
    }

    pub fn log(&self, message: &str) {
        let conn = self.conn.blocking_lock();
        if let Err(e) = conn.execute("INSERT INTO BIALET_LOGS(message) VALUES (?1)", [message]) {
            log::error!("failed to write log entry: {e}");
        }
    }

    pub fn lookup_remote_module(&self, module: &str) -> Option<String> {
        let conn = self.conn.blocking_lock();
        conn.query_row(
            "SELECT content FROM BIALET_REMOTE_MODULES WHERE module = ?1 LIMIT 1",
            [module],
            |row| row.get(0),
        )
        .ok()
    }

    pub fn cache_remote_module(&self, module: &str, content: &str) {
        let conn = self.conn.blocking_lock();
        if let Err(e) = conn.execute(
            "INSERT INTO BIALET_REMOTE_MODULES(module, content) VALUES (?1, ?2)",
            rusqlite::params![module, content],
        ) {
            log::error!("failed to cache remote module '{module}': {e}");
        }
    }

    #[cfg(test)]
    pub fn insert_test_blob(&self, id: &str, bytes: &[u8]) {
        let conn = self.conn.blocking_lock();
        conn.execute(
            "INSERT INTO BIALET_FILES(id, file) VALUES (?1, ?2)",
            rusqlite::params![id, bytes],
        )
        .unwrap();
    }

    pub fn file_blob(&self, id: &str) -> Option<Vec<u8>> {
        let conn = self.conn.blocking_lock();
        conn.query_row(
            "SELECT file FROM BIALET_FILES WHERE id = ?1 LIMIT 1",
            [id],
            |row| row.get(0),
        )
        .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameterised_query_returns_one_row_one_cell() {
        let db = Db::open_in_memory();
        let mut batch = QueryBatch::new(
            "SELECT ? + ?",
            vec![QueryValue::Number(2.0), QueryValue::Number(3.0)],
        );
        db.execute(&mut batch);

        assert_eq!(batch.results.len(), 1);
        assert_eq!(batch.results[0].len(), 1);
        assert_eq!(batch.results[0][0].len(), 1);
        assert_eq!(batch.results[0][0][0].value, QueryValue::Number(5.0));
    }

    #[test]
    fn zero_row_select_leaves_results_empty() {
        let db = Db::open_in_memory();
        conn_exec(&db, "CREATE TABLE t (id INTEGER)");
        let mut batch = QueryBatch::new("SELECT * FROM t", vec![]);
        db.execute(&mut batch);
        assert!(batch.results.is_empty());
    }

    fn conn_exec(db: &Db, sql: &str) {
        let conn = db.conn.blocking_lock();
        conn.execute(sql, []).unwrap();
    }

    #[test]
    fn blank_query_is_a_no_op() {
        let db = Db::open_in_memory();
        let mut batch = QueryBatch::new("   ", vec![]);
        db.execute(&mut batch);
        assert!(batch.results.is_empty());
    }

    #[test]
    fn prepare_failure_leaves_results_empty() {
        let db = Db::open_in_memory();
        let mut batch = QueryBatch::new("NOT VALID SQL", vec![]);
        db.execute(&mut batch);
        assert!(batch.results.is_empty());
    }

    #[test]
    fn remote_module_cache_round_trips() {
        let db = Db::open_in_memory();
        assert_eq!(db.lookup_remote_module("gh:a/b/c"), None);
        db.cache_remote_module("gh:a/b/c", "source text");
        assert_eq!(
            db.lookup_remote_module("gh:a/b/c"),
            Some("source text".to_string())
        );
    }

    #[test]
    fn file_blob_round_trip() {
        let db = Db::open_in_memory();
        db.insert_test_blob("logo", &[1, 2, 3, 4]);
        assert_eq!(db.file_blob("logo"), Some(vec![1, 2, 3, 4]));
        assert_eq!(db.file_blob("missing"), None);
    }
}
