///
/// Connection handles.
///
/// A `ConnectionResource` moves through `Disconnected -> Connected ->
/// Closed`; closed is terminal. Every query goes through one pipeline:
///
/// 1. clear the previous error and warnings
/// 2. let the backend intercept it (`USE`, `SET NAMES`)
/// 3. apply leading-keyword side effects (metadata invalidation, catalog
///    tracking, pool exclusion)
/// 4. execute on a scrollable or forward-only statement, depending on what
///    the backend can seek
///
/// Locks are taken in a fixed order: the multi-result queue before the
/// connection state, a result before its connection, a statement before
/// its result and connection.
///

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::backend::{Backend, BackendKind, DecodeOptions, Intercept, LastSqlKind};
use crate::config::TextEncoding;
use crate::driver::{
    ColumnDescriptor, ConnectParams, Cursor, CursorKind, Driver, DriverConnection, DriverPrepared,
    DriverStatement, DriverWarning, PrepareMode,
};
use crate::errors::{DbError, DbResult, DriverError, DriverErrorKind, UsageError};
use crate::metadata::{TableKey, TableMetadata};
use crate::multi::MultiResultQueue;
use crate::result::{ResultParts, ResultResource};
use crate::session::{Cleanup, DbRuntime, Session, SessionRef};
use crate::tokenizer::next_token;

/// Outcome of one query.
#[derive(Debug)]
pub enum QueryOutcome {
    /// The statement produced a result set.
    Rows(ResultResource),
    /// DML or DDL; `affected` is the driver's update count.
    Updated { affected: i64 },
    /// Answered by the backend without reaching the driver.
    Handled,
}

impl QueryOutcome {
    pub fn into_rows(self) -> Option<ResultResource> {
        match self {
            QueryOutcome::Rows(result) => Some(result),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Disconnected,
    Connected,
    Closed,
}

#[derive(Clone)]
pub struct ConnectionResource {
    shared: Arc<ConnectionShared>,
}

pub(crate) struct ConnectionShared {
    runtime: Arc<DbRuntime>,
    session: SessionRef,
    self_ref: Weak<ConnectionShared>,
    queue: Mutex<MultiResultQueue<ResultResource>>,
    state: Mutex<ConnectionState>,
}

struct ConnectionState {
    kind: BackendKind,
    lifecycle: Lifecycle,
    params: ConnectParams,
    driver: Option<Arc<dyn Driver>>,
    conn: Option<Box<dyn DriverConnection>>,
    backend: Option<Arc<dyn Backend>>,
    catalog: String,
    used: bool,
    pool_allowed: bool,
    retained: Option<Box<dyn DriverStatement>>,
    current_result: Option<ResultResource>,
    affected_rows: i64,
    insert_id: i64,
    error: Option<(String, i32)>,
    warnings: Vec<DriverWarning>,
    last_sql: Option<LastSqlKind>,
    encoding: TextEncoding,
}

impl ConnectionResource {
    pub fn new(session: &Session, kind: BackendKind) -> Self {
        let runtime = Arc::clone(session.runtime());
        let encoding = runtime.config().default_encoding();
        let shared = Arc::new_cyclic(|weak| ConnectionShared {
            runtime,
            session: session.downgrade(),
            self_ref: weak.clone(),
            queue: Mutex::new(MultiResultQueue::new()),
            state: Mutex::new(ConnectionState {
                kind,
                lifecycle: Lifecycle::Disconnected,
                params: ConnectParams::default(),
                driver: None,
                conn: None,
                backend: None,
                catalog: String::new(),
                used: false,
                pool_allowed: true,
                retained: None,
                current_result: None,
                affected_rows: 0,
                insert_id: 0,
                error: None,
                warnings: Vec::new(),
                last_sql: None,
                encoding,
            }),
        });
        let hook = Arc::downgrade(&shared);
        let hook: Weak<dyn Cleanup> = hook;
        session.register(hook);
        Self { shared }
    }

    pub fn kind(&self) -> BackendKind {
        self.shared.state.lock().kind
    }

    pub fn connect(&self, driver: Arc<dyn Driver>, params: ConnectParams) -> DbResult<()> {
        let mut state = self.shared.state.lock();
        match state.lifecycle {
            Lifecycle::Connected => {
                return Err(UsageError::AlreadyConnected {
                    resource: state.kind.resource_name(),
                }
                .into());
            }
            Lifecycle::Closed => return Err(UsageError::ConnectionClosed.into()),
            Lifecycle::Disconnected => {}
        }
        state.clear_errors();

        let mut conn = match driver.connect(&params) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(driver = driver.name(), error = %e, "connect failed");
                return Err(state.record(&e));
            }
        };

        let caps = conn.capabilities();
        let backend = state.kind.resolve(caps);
        let catalog = if params.database.is_empty() {
            conn.catalog().unwrap_or_else(|e| {
                debug!(error = %e, "catalog lookup failed");
                String::new()
            })
        } else {
            params.database.clone()
        };

        if let Some(label) = params.encoding.as_deref() {
            match TextEncoding::from_label(label) {
                Some(encoding) => state.encoding = encoding,
                None => warn!(encoding = label, "unknown connection encoding, using default"),
            }
        }

        debug!(backend = %state.kind, driver = driver.name(), catalog = %catalog, "connected");
        state.catalog = catalog;
        state.backend = Some(backend);
        state.conn = Some(conn);
        state.driver = Some(driver);
        state.params = params;
        state.lifecycle = Lifecycle::Connected;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().lifecycle == Lifecycle::Connected
    }

    pub fn query(&self, sql: &str) -> DbResult<QueryOutcome> {
        let mut state = self.shared.state.lock();
        state.ensure_connected()?;
        state.clear_errors();
        state.used = true;
        state.current_result = None;

        let backend = state.backend()?;
        let hint = backend.inspect(sql);
        state.last_sql = hint.last_sql;
        match hint.intercept {
            Some(Intercept::UseCatalog(name)) => {
                self.shared.switch_catalog(&mut state, &name)?;
                return Ok(QueryOutcome::Handled);
            }
            Some(Intercept::Acknowledge) => {
                trace!(sql, "acknowledged without forwarding");
                return Ok(QueryOutcome::Handled);
            }
            None => {}
        }

        self.shared.apply_side_effects(&mut state, sql);
        self.shared.execute(&mut state, backend, sql)
    }

    /// Switches the current catalog. A no-op when it is already current.
    pub fn set_catalog(&self, name: &str) -> DbResult<()> {
        let mut state = self.shared.state.lock();
        state.ensure_connected()?;
        self.shared.switch_catalog(&mut state, name)
    }

    pub fn catalog(&self) -> String {
        self.shared.state.lock().catalog.clone()
    }

    /// `false` once a statement that must not be pooled (`CREATE ...`) ran.
    pub fn pool_allowed(&self) -> bool {
        self.shared.state.lock().pool_allowed
    }

    pub fn has_retained_statement(&self) -> bool {
        self.shared.state.lock().retained.is_some()
    }

    pub fn affected_rows(&self) -> i64 {
        self.shared.state.lock().affected_rows
    }

    pub fn insert_id(&self) -> i64 {
        self.shared.state.lock().insert_id
    }

    /// Column count of the last result set, 0 after DML.
    pub fn field_count(&self) -> usize {
        let current = self.shared.state.lock().current_result.clone();
        current.map_or(0, |r| r.field_count())
    }

    /// Last recorded error; empty when there is none or the handle is not
    /// connected.
    pub fn error_message(&self) -> String {
        let state = self.shared.state.lock();
        if state.lifecycle != Lifecycle::Connected {
            return String::new();
        }
        state.error.as_ref().map(|(m, _)| m.clone()).unwrap_or_default()
    }

    pub fn error_code(&self) -> i32 {
        self.shared.state.lock().error.as_ref().map_or(0, |(_, c)| *c)
    }

    /// Last recorded error regardless of connection state, e.g. why a
    /// connect attempt failed.
    pub fn last_error(&self) -> Option<String> {
        self.shared.state.lock().error.as_ref().map(|(m, _)| m.clone())
    }

    pub fn warnings(&self) -> Vec<DriverWarning> {
        self.shared.state.lock().warnings.clone()
    }

    /// MySQL-style summary of the last statement; `None` after a query that
    /// returned rows.
    pub fn info(&self) -> Option<String> {
        let state = self.shared.state.lock();
        if state.lifecycle != Lifecycle::Connected || state.current_result.is_some() {
            return None;
        }
        let warnings = state.warnings.len();
        Some(match state.last_sql {
            Some(LastSqlKind::Update) => format!(
                "Rows matched: {}  Changed: {}  Warnings: {}",
                state.affected_rows, state.affected_rows, warnings
            ),
            _ => format!(
                "Records: {} Duplicates: 0 Warnings: {}",
                state.affected_rows, warnings
            ),
        })
    }

    pub fn commit(&self) -> DbResult<()> {
        self.with_conn(|conn| conn.commit())
    }

    pub fn rollback(&self) -> DbResult<()> {
        self.with_conn(|conn| conn.rollback())
    }

    pub fn set_auto_commit(&self, on: bool) -> DbResult<()> {
        self.with_conn(|conn| conn.set_auto_commit(on))
    }

    pub fn ping(&self) -> bool {
        let state = self.shared.state.lock();
        state.lifecycle == Lifecycle::Connected && state.conn.as_ref().is_some_and(|c| !c.is_closed())
    }

    pub fn server_info(&self) -> DbResult<String> {
        self.with_conn(|conn| conn.server_version())
    }

    /// Server version as `major * 10000 + minor * 100 + patch`.
    pub fn server_version(&self) -> DbResult<i64> {
        Ok(info_to_version(&self.server_info()?))
    }

    /// Character set name reported to scripts.
    pub fn client_encoding(&self) -> &'static str {
        "latin1"
    }

    pub fn real_escape_string(&self, s: &str) -> String {
        escape_string(s)
    }

    /// Metadata-only result listing the server's catalogs.
    pub fn catalogs(&self) -> DbResult<ResultResource> {
        let mut state = self.shared.state.lock();
        state.ensure_connected()?;
        let cursor = match state.conn_mut()?.catalogs() {
            Ok(cursor) => cursor,
            Err(e) => return Err(state.record(&e)),
        };
        self.shared.open_result(&state, cursor, None)
    }

    /// Describe of `table` in the current catalog, served from the
    /// metadata cache. Failures are logged and reported as `None`.
    pub fn table_metadata(&self, table: &str) -> Option<Arc<TableMetadata>> {
        if table.is_empty() {
            return None;
        }
        let (url, catalog) = {
            let state = self.shared.state.lock();
            (state.params.url.clone(), state.catalog.clone())
        };
        let key = TableKey::new(url, catalog, "", table);
        let found = self
            .shared
            .runtime
            .metadata()
            .get_or_describe(&key, || self.shared.describe(&key.catalog, &key.schema, &key.table));
        match found {
            Ok(meta) => Some(meta),
            Err(e) => {
                debug!(table, error = %e, "table metadata unavailable");
                None
            }
        }
    }

    /// Runs every `;`-separated statement of `sql`, queueing result sets for
    /// `store_result`. Stops at the first failure.
    pub fn multi_query(&self, sql: &str) -> DbResult<()> {
        let mut queue = self.shared.queue.lock();
        queue.execute_all(sql, |stmt| Ok(self.query(stmt)?.into_rows()))
    }

    pub fn more_results(&self) -> bool {
        self.shared.queue.lock().has_more()
    }

    pub fn next_result(&self) -> bool {
        self.shared.queue.lock().advance()
    }

    pub fn store_result(&self) -> Option<ResultResource> {
        self.shared.queue.lock().consume_staged()
    }

    /// Releases retained statements, then the driver connection. Idempotent;
    /// the handle cannot be reconnected afterwards.
    pub fn close(&self) {
        self.shared.close();
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut dyn DriverConnection) -> Result<T, DriverError>,
    ) -> DbResult<T> {
        let mut state = self.shared.state.lock();
        state.ensure_connected()?;
        let outcome = f(state.conn_mut()?);
        outcome.map_err(|e| state.record(&e))
    }

    pub(crate) fn prepare_driver(&self, sql: &str) -> DbResult<Box<dyn DriverPrepared>> {
        let mut state = self.shared.state.lock();
        state.ensure_connected()?;
        state.used = true;
        let backend = state.backend()?;
        let mode = backend.prepare_mode();
        let kind = if mode == PrepareMode::Call || backend.is_seekable() {
            CursorKind::Scrollable
        } else {
            CursorKind::ForwardOnly
        };
        state.conn_mut()?.prepare(sql, kind, mode).map_err(DbError::from)
    }

    pub(crate) fn set_affected_rows(&self, affected: i64) {
        self.shared.state.lock().affected_rows = affected;
    }

    pub(crate) fn wrap_cursor(&self, cursor: Box<dyn Cursor>) -> DbResult<ResultResource> {
        let state = self.shared.state.lock();
        self.shared.open_result(&state, cursor, None)
    }

    pub(crate) fn session(&self) -> SessionRef {
        self.shared.session.clone()
    }
}

impl std::fmt::Debug for ConnectionResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ConnectionResource")
            .field("kind", &state.kind)
            .field("lifecycle", &state.lifecycle)
            .field("catalog", &state.catalog)
            .finish()
    }
}

impl ConnectionShared {
    fn switch_catalog(&self, state: &mut ConnectionState, name: &str) -> DbResult<()> {
        if state.catalog == name {
            return Ok(());
        }

        if !state.used && self.runtime.config().connection.catalog_reconnect {
            let driver = state.driver.clone().ok_or(DbError::NotConnected)?;
            let mut params = state.params.clone();
            params.database = name.to_string();
            trace!(catalog = name, "reconnecting for unused connection");
            let conn = match driver.connect(&params) {
                Ok(conn) => conn,
                Err(e) => return Err(state.record(&e)),
            };
            if let Some(mut old) = state.conn.replace(conn) {
                if let Err(e) = old.close() {
                    debug!(error = %e, "closing replaced connection failed");
                }
            }
            state.params = params;
        } else if let Err(e) = state.conn_mut()?.set_catalog(name) {
            return Err(state.record(&e));
        }

        state.catalog = name.to_string();
        Ok(())
    }

    fn apply_side_effects(&self, state: &mut ConnectionState, sql: &str) {
        let Some(tok) = next_token(sql, None) else {
            return;
        };
        match tok.first_char() {
            'a' | 'A' => self.runtime.metadata().invalidate_all(),
            'd' | 'D' if tok.matches("DROP") => {
                self.runtime.metadata().invalidate_all();
                let Some(what) = next_token(sql, Some(&tok)) else {
                    return;
                };
                if !what.matches("DATABASE") {
                    return;
                }
                if let Some(name) = next_token(sql, Some(&what)) {
                    if name.unquoted() == state.catalog {
                        debug!(catalog = %state.catalog, "current catalog dropped");
                        state.catalog.clear();
                    }
                }
            }
            'c' | 'C' if tok.matches("CREATE") => state.pool_allowed = false,
            _ => {}
        }
    }

    fn execute(
        &self,
        state: &mut ConnectionState,
        backend: Arc<dyn Backend>,
        sql: &str,
    ) -> DbResult<QueryOutcome> {
        let kind = if backend.is_seekable() {
            CursorKind::Scrollable
        } else {
            CursorKind::ForwardOnly
        };
        let mut stmt = match state.conn_mut()?.create_statement(kind) {
            Ok(stmt) => stmt,
            Err(e) => return Err(state.record(&e)),
        };

        let produced_rows = match stmt.execute(sql) {
            Ok(produced_rows) => produced_rows,
            Err(e) if e.kind == DriverErrorKind::DataTruncation => {
                trace!(error = %e, "data truncated");
                false
            }
            Err(e) => {
                let err = state.record(&e);
                debug!(sql, error = %e, "query failed");
                if backend.keep_statement_open() {
                    state.retain(stmt);
                } else {
                    close_quietly(stmt);
                }
                return Err(err);
            }
        };

        state.warnings = stmt.warnings();
        if produced_rows {
            if let Some(cursor) = stmt.take_result_set() {
                let result = self.open_result(state, cursor, Some(stmt))?;
                state.affected_rows = 0;
                state.current_result = Some(result.clone());
                return Ok(QueryOutcome::Rows(result));
            }
        }

        let affected = stmt.update_count();
        state.affected_rows = affected;
        if let Some(id) = stmt.generated_key() {
            state.insert_id = id;
        }
        if backend.keep_statement_open() {
            state.retain(stmt);
        } else {
            close_quietly(stmt);
        }
        Ok(QueryOutcome::Updated { affected })
    }

    fn open_result(
        &self,
        state: &ConnectionState,
        cursor: Box<dyn Cursor>,
        statement: Option<Box<dyn DriverStatement>>,
    ) -> DbResult<ResultResource> {
        let backend = state.backend()?;
        let parts = ResultParts {
            cursor,
            statement,
            owner: self.self_ref.clone(),
            backend,
            decode: DecodeOptions {
                unicode_semantics: self.runtime.config().connection.unicode_semantics,
                encoding: state.encoding,
            },
            metadata: Arc::clone(self.runtime.metadata()),
            url: state.params.url.clone(),
            catalog: state.catalog.clone(),
            last_sql: state.last_sql,
        };
        Ok(ResultResource::open(parts, &self.session))
    }

    pub(crate) fn describe(
        &self,
        catalog: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnDescriptor>, DriverError> {
        let mut state = self.state.lock();
        let lifecycle = state.lifecycle;
        match state.conn.as_mut() {
            Some(conn) if lifecycle == Lifecycle::Connected => {
                conn.describe_table(catalog, schema, table)
            }
            _ => Err(DriverError::closed("connection")),
        }
    }

    /// Closes a statement a result no longer needs.
    pub(crate) fn release_statement(&self, stmt: Box<dyn DriverStatement>) {
        trace!("result statement released");
        close_quietly(stmt);
    }

    fn close(&self) {
        self.queue.lock().reset();
        let mut state = self.state.lock();
        if state.lifecycle == Lifecycle::Closed {
            return;
        }
        if let Some(stmt) = state.retained.take() {
            close_quietly(stmt);
        }
        if let Some(mut conn) = state.conn.take() {
            if let Err(e) = conn.close() {
                debug!(error = %e, "connection close failed");
            }
        }
        state.current_result = None;
        state.backend = None;
        state.lifecycle = Lifecycle::Closed;
        trace!(backend = %state.kind, "connection closed");
    }
}

impl Cleanup for ConnectionShared {
    fn cleanup(&self) {
        self.close();
    }
}

impl ConnectionState {
    fn ensure_connected(&self) -> DbResult<()> {
        match self.lifecycle {
            Lifecycle::Connected => Ok(()),
            Lifecycle::Disconnected => Err(DbError::NotConnected),
            Lifecycle::Closed => Err(DbError::Closed),
        }
    }

    fn backend(&self) -> DbResult<Arc<dyn Backend>> {
        self.backend.clone().ok_or(DbError::NotConnected)
    }

    fn conn_mut(&mut self) -> DbResult<&mut dyn DriverConnection> {
        match self.conn.as_mut() {
            Some(conn) => Ok(&mut **conn),
            None => Err(DbError::NotConnected),
        }
    }

    /// Keeps `stmt` for introspection, closing the one it replaces.
    fn retain(&mut self, stmt: Box<dyn DriverStatement>) {
        if let Some(previous) = self.retained.replace(stmt) {
            close_quietly(previous);
        }
    }

    fn clear_errors(&mut self) {
        self.error = None;
        self.warnings.clear();
    }

    fn record(&mut self, e: &DriverError) -> DbError {
        self.error = Some((e.recorded_message(), e.code));
        DbError::from(e.clone())
    }
}

pub(crate) fn close_quietly(mut stmt: Box<dyn DriverStatement>) {
    if let Err(e) = stmt.close() {
        debug!(error = %e, "statement close failed");
    }
}

/// Parses `"5.0.45-community"` style version strings into `50045`. Anything
/// with fewer than three numeric parts is 0.
pub fn info_to_version(info: &str) -> i64 {
    let mut parts: Vec<&str> = info
        .split(|c: char| c == '.' || c == '-' || c.is_ascii_lowercase())
        .collect();
    while parts.last().is_some_and(|p| p.is_empty()) {
        parts.pop();
    }
    if parts.len() < 3 {
        return 0;
    }
    let num = |s: &str| s.trim().parse::<i64>().unwrap_or(0);
    num(parts[0]) * 10000 + num(parts[1]) * 100 + num(parts[2])
}

/// MySQL string escaping: NUL, newline, carriage return, backslash, both
/// quotes and Ctrl-Z are backslash-escaped.
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\u{1a}' => out.push_str("\\Z"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use crate::driver::{ColumnInfo, DriverCapabilities, NativeValue, SqlType};
    use crate::testing::ScriptedDriver;

    fn session_with(config: DbConfig) -> Session {
        Session::new(DbRuntime::new(config))
    }

    fn session() -> Session {
        session_with(DbConfig::default())
    }

    fn connect(session: &Session, driver: &ScriptedDriver, kind: BackendKind) -> ConnectionResource {
        let conn = ConnectionResource::new(session, kind);
        conn.connect(Arc::new(driver.clone()), ConnectParams::url("scripted://db"))
            .unwrap();
        conn
    }

    fn one_row(sql: &str) -> ScriptedDriver {
        ScriptedDriver::new().with_catalog("shop").rows(
            sql,
            vec![ColumnInfo::new("n", SqlType::Integer)],
            vec![vec![NativeValue::Int(1)]],
        )
    }

    #[test]
    fn test_connect_twice_is_usage_error() {
        let session = session();
        let driver = ScriptedDriver::new();
        let conn = connect(&session, &driver, BackendKind::Mysql);
        let err = conn
            .connect(Arc::new(driver.clone()), ConnectParams::default())
            .unwrap_err();
        assert!(err.is_usage());
        assert!(err.to_string().contains("Mysqli"));
        assert!(conn.is_connected());
        assert_eq!(driver.connect_count(), 1);
    }

    #[test]
    fn test_catalog_resolved_when_not_given() {
        let session = session();
        let driver = ScriptedDriver::new().with_catalog("shop");
        let conn = connect(&session, &driver, BackendKind::Generic);
        assert_eq!(conn.catalog(), "shop");

        let named = ConnectionResource::new(&session, BackendKind::Generic);
        named
            .connect(Arc::new(driver.clone()), ConnectParams::url("x").database("crm"))
            .unwrap();
        assert_eq!(named.catalog(), "crm");
    }

    #[test]
    fn test_failed_connect_stays_disconnected() {
        let session = session();
        let driver = ScriptedDriver::new().fail_connect(DriverError::with_code("access denied", 1045));
        let conn = ConnectionResource::new(&session, BackendKind::Mysql);
        let err = conn
            .connect(Arc::new(driver), ConnectParams::default())
            .unwrap_err();
        assert_eq!(err.code(), 1045);
        assert!(!conn.is_connected());
        assert_eq!(conn.error_message(), "");
        assert_eq!(conn.last_error().as_deref(), Some("access denied"));
        assert!(matches!(conn.query("SELECT 1"), Err(DbError::NotConnected)));
        conn.close();
        conn.close();
    }

    #[test]
    fn test_drop_database_clears_catalog() {
        let session = session();
        let driver = ScriptedDriver::new().with_catalog("shop");
        let conn = connect(&session, &driver, BackendKind::Generic);

        conn.query("DROP DATABASE crm").unwrap();
        assert_eq!(conn.catalog(), "shop");
        conn.query("drop database `shop`").unwrap();
        assert_eq!(conn.catalog(), "");
    }

    #[test]
    fn test_create_disables_pooling() {
        let session = session();
        let driver = ScriptedDriver::new();
        let conn = connect(&session, &driver, BackendKind::Generic);
        assert!(conn.pool_allowed());
        conn.query("create temporary table t (a int)").unwrap();
        assert!(!conn.pool_allowed());
        conn.query("SELECT 1").unwrap();
        assert!(!conn.pool_allowed());
    }

    #[test]
    fn test_ddl_invalidates_metadata() {
        let session = session();
        let driver = ScriptedDriver::new().describe("users", vec![ColumnDescriptor::default()]);
        let conn = connect(&session, &driver, BackendKind::Generic);

        assert!(conn.table_metadata("users").is_some());
        assert!(conn.table_metadata("users").is_some());
        assert_eq!(session.runtime().metadata().entry_count(), 1);
        assert_eq!(driver.describe_calls().len(), 1);

        conn.query("ALTER TABLE users ADD c INT").unwrap();
        conn.table_metadata("users");
        assert_eq!(driver.describe_calls().len(), 2);

        conn.query("DROP TABLE other").unwrap();
        conn.table_metadata("users");
        assert_eq!(driver.describe_calls().len(), 3);

        conn.query("SELECT 1").unwrap();
        conn.table_metadata("users");
        assert_eq!(driver.describe_calls().len(), 3);
        assert!(conn.table_metadata("").is_none());
    }

    #[test]
    fn test_mysql_use_switches_catalog() {
        let session = session();
        let driver = ScriptedDriver::new().with_catalog("shop");
        let conn = connect(&session, &driver, BackendKind::Mysql);
        assert!(matches!(conn.query("USE `crm`").unwrap(), QueryOutcome::Handled));
        assert_eq!(conn.catalog(), "crm");
        assert!(driver.log().iter().all(|sql| !sql.starts_with("USE")));
        assert!(driver.events().contains(&"set_catalog crm".to_string()));
    }

    #[test]
    fn test_set_names_is_not_forwarded() {
        let session = session();
        let driver = ScriptedDriver::new();
        let conn = connect(&session, &driver, BackendKind::Mysql);
        assert!(matches!(conn.query("SET NAMES utf8").unwrap(), QueryOutcome::Handled));
        assert!(driver.log().is_empty());
    }

    #[test]
    fn test_set_catalog_reconnects_unused_connection() {
        let mut config = DbConfig::default();
        config.connection.catalog_reconnect = true;
        let session = session_with(config);
        let driver = ScriptedDriver::new().with_catalog("shop");
        let conn = connect(&session, &driver, BackendKind::Generic);

        conn.set_catalog("crm").unwrap();
        assert_eq!(driver.connect_count(), 2);
        assert_eq!(conn.catalog(), "crm");

        conn.query("SELECT 1").unwrap();
        conn.set_catalog("hr").unwrap();
        assert_eq!(driver.connect_count(), 2);
        assert!(driver.events().contains(&"set_catalog hr".to_string()));

        conn.set_catalog("hr").unwrap();
        assert_eq!(
            driver.events().iter().filter(|e| *e == "set_catalog hr").count(),
            1
        );
    }

    #[test]
    fn test_query_outcomes() {
        let session = session();
        let driver = one_row("SELECT n FROM t").update("DELETE FROM t", 4);
        let conn = connect(&session, &driver, BackendKind::Mysql);

        match conn.query("DELETE FROM t").unwrap() {
            QueryOutcome::Updated { affected } => assert_eq!(affected, 4),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(conn.affected_rows(), 4);
        assert_eq!(conn.field_count(), 0);
        assert_eq!(conn.info().as_deref(), Some("Records: 4 Duplicates: 0 Warnings: 0"));

        let result = conn.query("SELECT n FROM t").unwrap().into_rows().unwrap();
        assert_eq!(conn.affected_rows(), 0);
        assert_eq!(conn.field_count(), 1);
        assert_eq!(conn.info(), None);
        assert!(result.fetch_num().unwrap().is_some());
    }

    #[test]
    fn test_update_info() {
        let session = session();
        let driver = ScriptedDriver::new().update("UPDATE t SET a = 1", 2);
        let conn = connect(&session, &driver, BackendKind::Mysql);
        conn.query("UPDATE t SET a = 1").unwrap();
        assert_eq!(
            conn.info().as_deref(),
            Some("Rows matched: 2  Changed: 2  Warnings: 0")
        );
    }

    #[test]
    fn test_failure_is_recorded_and_cleared() {
        let session = session();
        let driver = ScriptedDriver::new().fail("SELECT bad", DriverError::with_code("syntax error", 1064));
        let conn = connect(&session, &driver, BackendKind::Generic);

        let err = conn.query("SELECT bad").unwrap_err();
        assert!(!err.is_usage());
        assert_eq!(conn.error_message(), "syntax error");
        assert_eq!(conn.error_code(), 1064);
        assert!(conn.is_connected());
        assert!(!conn.has_retained_statement());

        conn.query("SELECT 1").unwrap();
        assert_eq!(conn.error_message(), "");
        assert_eq!(conn.error_code(), 0);
    }

    #[test]
    fn test_postgres_retains_statements() {
        let session = session();
        let driver = ScriptedDriver::new()
            .update("INSERT INTO t VALUES (1)", 1)
            .fail("SELECT bad", DriverError::new("boom"));
        let conn = connect(&session, &driver, BackendKind::Postgres);

        conn.query("INSERT INTO t VALUES (1)").unwrap();
        assert!(conn.has_retained_statement());
        assert_eq!(driver.closed_statements(), 0);
        assert!(conn.query("SELECT bad").is_err());
        assert!(conn.has_retained_statement());
        assert_eq!(driver.closed_statements(), 1);

        conn.close();
        assert_eq!(driver.closed_statements(), 2);
        assert!(!conn.has_retained_statement());
        assert!(driver.events().contains(&"close connection".to_string()));
    }

    #[test]
    fn test_postgres_keeps_only_the_last_statement() {
        let session = session();
        let driver = ScriptedDriver::new().update("INSERT INTO t VALUES (1)", 1);
        let conn = connect(&session, &driver, BackendKind::Postgres);

        for _ in 0..50 {
            conn.query("INSERT INTO t VALUES (1)").unwrap();
        }
        assert!(conn.has_retained_statement());
        assert_eq!(driver.closed_statements(), 49);

        conn.close();
        assert_eq!(driver.closed_statements(), 50);
    }

    #[test]
    fn test_truncation_counts_as_success() {
        let session = session();
        let driver = ScriptedDriver::new().truncated("INSERT INTO t VALUES ('long')", 1);
        let conn = connect(&session, &driver, BackendKind::Generic);
        match conn.query("INSERT INTO t VALUES ('long')").unwrap() {
            QueryOutcome::Updated { affected } => assert_eq!(affected, 1),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(conn.error_message(), "");
    }

    #[test]
    fn test_insert_id() {
        let session = session();
        let driver = ScriptedDriver::new()
            .update("INSERT INTO t VALUES (1)", 1)
            .with_insert_id(17);
        let conn = connect(&session, &driver, BackendKind::Mysql);
        conn.query("INSERT INTO t VALUES (1)").unwrap();
        assert_eq!(conn.insert_id(), 17);
    }

    #[test]
    fn test_forward_only_driver_gets_forward_only_statements() {
        let session = session();
        let driver = ScriptedDriver::new().with_capabilities(DriverCapabilities {
            scrollable_cursors: false,
            ..DriverCapabilities::default()
        });
        let conn = connect(&session, &driver, BackendKind::Generic);
        conn.query("SELECT 1").unwrap();
        assert!(driver.events().contains(&"create_statement ForwardOnly".to_string()));
    }

    #[test]
    fn test_close_is_terminal_and_idempotent() {
        let session = session();
        let driver = ScriptedDriver::new();
        let conn = connect(&session, &driver, BackendKind::Generic);
        conn.close();
        conn.close();
        assert!(!conn.is_connected());
        assert!(matches!(conn.query("SELECT 1"), Err(DbError::Closed)));
        let err = conn
            .connect(Arc::new(driver.clone()), ConnectParams::default())
            .unwrap_err();
        assert!(matches!(err, DbError::Usage(UsageError::ConnectionClosed)));
        assert_eq!(
            driver.events().iter().filter(|e| *e == "close connection").count(),
            1
        );
    }

    #[test]
    fn test_multi_query() {
        let session = session();
        let driver = one_row("SELECT 1")
            .rows(
                "SELECT 2",
                vec![ColumnInfo::new("n", SqlType::Integer)],
                vec![vec![NativeValue::Int(2)]],
            )
            .update("DELETE FROM t", 3);
        let conn = connect(&session, &driver, BackendKind::Mysql);

        conn.multi_query("SELECT 1; DELETE FROM t; SELECT 2").unwrap();
        assert!(conn.more_results());
        let first = conn.store_result().unwrap();
        assert!(conn.store_result().is_none());
        assert!(conn.next_result());
        let second = conn.store_result().unwrap();
        assert!(!conn.more_results());
        assert!(!conn.next_result());

        let row = first.fetch_num().unwrap().unwrap();
        assert_eq!(row.index(0).unwrap().to_int(), 1);
        let row = second.fetch_num().unwrap().unwrap();
        assert_eq!(row.index(0).unwrap().to_int(), 2);
    }

    #[test]
    fn test_server_version_and_escaping() {
        let session = session();
        let driver = ScriptedDriver::new().with_server_version("5.0.45-community");
        let conn = connect(&session, &driver, BackendKind::Mysql);
        assert_eq!(conn.server_info().unwrap(), "5.0.45-community");
        assert_eq!(conn.server_version().unwrap(), 50045);
        assert_eq!(conn.client_encoding(), "latin1");
        assert_eq!(conn.real_escape_string("it's\n\"x\"\\\0\u{1a}"), "it\\'s\\n\\\"x\\\"\\\\\\0\\Z");
    }

    #[test]
    fn test_info_to_version() {
        assert_eq!(info_to_version("8.0.36"), 80036);
        assert_eq!(info_to_version("3.45.1"), 34501);
        assert_eq!(info_to_version("10.11"), 0);
        assert_eq!(info_to_version(""), 0);
    }

    #[test]
    fn test_catalogs_result() {
        let session = session();
        let driver = ScriptedDriver::new().with_catalogs(&["crm", "shop"]);
        let conn = connect(&session, &driver, BackendKind::Generic);
        let result = conn.catalogs().unwrap();
        let names: Vec<String> = std::iter::from_fn(|| result.fetch_num().unwrap())
            .map(|row| row.index(0).unwrap().to_text())
            .collect();
        assert_eq!(names, vec!["crm", "shop"]);
    }

    #[test]
    fn test_transactions_delegate() {
        let session = session();
        let driver = ScriptedDriver::new();
        let conn = connect(&session, &driver, BackendKind::Generic);
        conn.set_auto_commit(false).unwrap();
        conn.commit().unwrap();
        conn.rollback().unwrap();
        assert!(conn.ping());
        let events = driver.events();
        assert!(events.contains(&"auto_commit false".to_string()));
        assert!(events.contains(&"commit".to_string()));
        assert!(events.contains(&"rollback".to_string()));
    }
}
