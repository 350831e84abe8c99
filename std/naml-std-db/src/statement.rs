///
/// Prepared statement handles.
///
/// Lifecycle: `prepare` -> `bind_params` -> `execute` -> `bind_results` ->
/// `fetch`. Parameters are typed by a kind string over `i` (integer),
/// `d` (double), `b` (blob, sent as a string) and `s` (string), one
/// character per placeholder. Binding only records values; they are applied
/// positionally on `execute`.
///
/// Results of an execution live in a `ResultResource`. `fetch` advances it
/// and writes the coerced values into the variables registered with
/// `bind_results`.
///

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::connection::ConnectionResource;
use crate::driver::{BindValue, DriverPrepared};
use crate::errors::{DbError, DbResult, DriverError, UsageError};
use crate::result::ResultResource;
use crate::scan::count_placeholders;
use crate::session::Cleanup;
use crate::value::DbValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Integer,
    Double,
    Blob,
    Text,
}

impl ParamKind {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'i' => Some(ParamKind::Integer),
            'd' => Some(ParamKind::Double),
            'b' => Some(ParamKind::Blob),
            's' => Some(ParamKind::Text),
            _ => None,
        }
    }

    pub fn parse(types: &str) -> Result<Vec<Self>, UsageError> {
        types
            .chars()
            .map(|c| Self::from_char(c).ok_or_else(|| UsageError::InvalidParamType(types.to_string())))
            .collect()
    }

    fn bind_value(self, value: &DbValue) -> BindValue {
        if value.is_null() {
            return BindValue::Null;
        }
        match self {
            ParamKind::Integer => BindValue::Int(value.to_int()),
            ParamKind::Double => BindValue::Double(value.to_double()),
            ParamKind::Blob | ParamKind::Text => BindValue::Text(value.to_text()),
        }
    }
}

/// Output slot registered with `bind_results`. Clones share the slot.
#[derive(Debug, Clone)]
pub struct BoundVar(Arc<Mutex<DbValue>>);

impl BoundVar {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(DbValue::Null)))
    }

    pub fn get(&self) -> DbValue {
        self.0.lock().clone()
    }

    pub fn set(&self, value: DbValue) {
        *self.0.lock() = value;
    }
}

impl Default for BoundVar {
    fn default() -> Self {
        Self::new()
    }
}

/// Kind of statement, from its first keyword.
pub fn statement_type(sql: &str) -> &'static str {
    let first = sql.split_whitespace().next().unwrap_or("");
    const KNOWN: [&str; 9] = [
        "SELECT", "UPDATE", "DELETE", "INSERT", "CREATE", "DROP", "ALTER", "BEGIN", "DECLARE",
    ];
    KNOWN
        .iter()
        .find(|k| first.eq_ignore_ascii_case(k))
        .copied()
        .unwrap_or("UNKNOWN")
}

#[derive(Clone)]
pub struct StatementResource {
    shared: Arc<StatementShared>,
}

pub(crate) struct StatementShared {
    state: Mutex<StatementState>,
}

struct StatementState {
    conn: ConnectionResource,
    sql: Option<String>,
    prepared: Option<Box<dyn DriverPrepared>>,
    params: Vec<(ParamKind, DbValue)>,
    bound: Vec<BoundVar>,
    result: Option<ResultResource>,
    affected_rows: i64,
    error: Option<(String, i32)>,
}

impl StatementResource {
    pub fn new(conn: &ConnectionResource) -> Self {
        let shared = Arc::new(StatementShared {
            state: Mutex::new(StatementState {
                conn: conn.clone(),
                sql: None,
                prepared: None,
                params: Vec::new(),
                bound: Vec::new(),
                result: None,
                affected_rows: 0,
                error: None,
            }),
        });
        let hook = Arc::downgrade(&shared);
        let hook: Weak<dyn Cleanup> = hook;
        conn.session().register(hook);
        Self { shared }
    }

    pub fn prepare(&self, sql: &str) -> DbResult<()> {
        if sql.trim().is_empty() {
            return Err(UsageError::EmptyQuery.into());
        }
        let mut state = self.shared.state.lock();
        state.error = None;
        state.release();
        state.params.clear();
        state.bound.clear();

        let prepared = state.conn.prepare_driver(sql);
        match prepared {
            Ok(prepared) => {
                state.prepared = Some(prepared);
                state.sql = Some(sql.to_string());
                Ok(())
            }
            Err(e) => {
                state.sql = None;
                Err(state.record(e))
            }
        }
    }

    pub fn sql(&self) -> Option<String> {
        self.shared.state.lock().sql.clone()
    }

    /// Records parameter values for the next `execute`.
    pub fn bind_params(&self, types: &str, params: Vec<DbValue>) -> DbResult<()> {
        if types.is_empty() || types.chars().count() != params.len() {
            return Err(UsageError::ParamCountMismatch {
                types: types.chars().count(),
                params: params.len(),
            }
            .into());
        }
        let kinds = ParamKind::parse(types)?;
        self.shared.state.lock().params = kinds.into_iter().zip(params).collect();
        Ok(())
    }

    pub fn execute(&self) -> DbResult<()> {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        state.error = None;
        if let Some(previous) = state.result.take() {
            previous.close();
        }

        let prepared = state.prepared.as_mut().ok_or(UsageError::NotPrepared)?;
        let ran = bind_all(&mut **prepared, &state.params).and_then(|_| prepared.execute());
        let produced_rows = match ran {
            Ok(produced_rows) => produced_rows,
            Err(e) => {
                debug!(error = %e, "statement execution failed");
                return Err(state.record(DbError::from(e)));
            }
        };

        if produced_rows {
            if let Some(cursor) = prepared.take_result_set() {
                let result = state.conn.wrap_cursor(cursor)?;
                state.result = Some(result);
                state.affected_rows = 0;
                return Ok(());
            }
        }

        let affected = prepared.update_count();
        state.affected_rows = affected;
        state.conn.set_affected_rows(affected);
        Ok(())
    }

    /// Number of `?` placeholders in the prepared SQL, -1 before `prepare`.
    pub fn param_count(&self) -> i64 {
        match &self.shared.state.lock().sql {
            Some(sql) => count_placeholders(sql) as i64,
            None => -1,
        }
    }

    pub fn statement_type(&self) -> &'static str {
        match &self.shared.state.lock().sql {
            Some(sql) => statement_type(sql),
            None => "UNKNOWN",
        }
    }

    /// Registers output variables; needs an executed statement with exactly
    /// that many columns.
    pub fn bind_results(&self, vars: Vec<BoundVar>) -> DbResult<()> {
        let mut state = self.shared.state.lock();
        let columns = match &state.result {
            Some(result) => result.field_count(),
            None => return Err(UsageError::NotExecuted.into()),
        };
        if vars.is_empty() || vars.len() != columns {
            return Err(UsageError::BoundVariableCount {
                bound: vars.len(),
                columns,
            }
            .into());
        }
        state.bound = vars;
        Ok(())
    }

    /// Advances to the next row and fills the bound variables. `false` when
    /// the rows are exhausted.
    pub fn fetch(&self) -> DbResult<bool> {
        let state = self.shared.state.lock();
        let result = state.result.as_ref().ok_or(UsageError::NotExecuted)?;
        let Some(values) = result.fetch_values()? else {
            return Ok(false);
        };
        for (var, value) in state.bound.iter().zip(values) {
            var.set(value);
        }
        Ok(true)
    }

    pub fn data_seek(&self, row: i64) -> DbResult<()> {
        let state = self.shared.state.lock();
        let result = state.result.as_ref().ok_or(UsageError::NotExecuted)?;
        result.seek(row)
    }

    pub fn num_rows(&self) -> i64 {
        match &self.shared.state.lock().result {
            Some(result) => result.row_count(),
            None => 0,
        }
    }

    /// Result handle with the field offset rewound, for field
    /// introspection of the executed statement.
    pub fn result_metadata(&self) -> Option<ResultResource> {
        let state = self.shared.state.lock();
        let result = state.result.clone()?;
        result.field_seek(0);
        Some(result)
    }

    pub fn field_count(&self) -> usize {
        match &self.shared.state.lock().result {
            Some(result) => result.field_count(),
            None => 0,
        }
    }

    pub fn affected_rows(&self) -> i64 {
        self.shared.state.lock().affected_rows
    }

    pub fn free_result(&self) {
        if let Some(result) = self.shared.state.lock().result.take() {
            result.close();
        }
    }

    pub fn error_message(&self) -> String {
        let state = self.shared.state.lock();
        state.error.as_ref().map(|(m, _)| m.clone()).unwrap_or_default()
    }

    pub fn error_code(&self) -> i32 {
        self.shared.state.lock().error.as_ref().map_or(0, |(_, c)| *c)
    }

    pub fn close(&self) {
        self.shared.close();
    }
}

impl std::fmt::Debug for StatementResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("StatementResource")
            .field("sql", &state.sql)
            .field("prepared", &state.prepared.is_some())
            .finish()
    }
}

impl StatementShared {
    fn close(&self) {
        let mut state = self.state.lock();
        state.release();
        state.bound.clear();
    }
}

impl Cleanup for StatementShared {
    fn cleanup(&self) {
        self.close();
    }
}

impl StatementState {
    /// Drops the current result and the driver statement.
    fn release(&mut self) {
        if let Some(result) = self.result.take() {
            result.close();
        }
        if let Some(mut prepared) = self.prepared.take() {
            if let Err(e) = prepared.close() {
                debug!(error = %e, "prepared statement close failed");
            }
        }
    }

    fn record(&mut self, e: DbError) -> DbError {
        self.error = Some((e.to_string(), e.code()));
        e
    }
}

fn bind_all(prepared: &mut dyn DriverPrepared, params: &[(ParamKind, DbValue)]) -> Result<(), DriverError> {
    prepared.clear_bindings()?;
    for (i, (kind, value)) in params.iter().enumerate() {
        prepared.bind(i + 1, kind.bind_value(value))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::config::DbConfig;
    use crate::driver::{ColumnInfo, ConnectParams, NativeValue, SqlType};
    use crate::session::{DbRuntime, Session};
    use crate::testing::ScriptedDriver;

    const BY_ID: &str = "SELECT id, name FROM users WHERE id > ?";

    fn setup(driver: &ScriptedDriver) -> (Session, ConnectionResource) {
        let session = Session::new(DbRuntime::new(DbConfig::default()));
        let conn = ConnectionResource::new(&session, BackendKind::Mysql);
        conn.connect(Arc::new(driver.clone()), ConnectParams::url("scripted://stmt"))
            .unwrap();
        (session, conn)
    }

    fn users() -> ScriptedDriver {
        ScriptedDriver::new()
            .rows(
                BY_ID,
                vec![
                    ColumnInfo::new("id", SqlType::Integer),
                    ColumnInfo::new("name", SqlType::VarChar),
                ],
                vec![
                    vec![NativeValue::Int(1), NativeValue::text("ann")],
                    vec![NativeValue::Int(2), NativeValue::text("bob")],
                ],
            )
            .update("DELETE FROM users WHERE id = ?", 1)
    }

    #[test]
    fn test_statement_type() {
        assert_eq!(statement_type("select 1"), "SELECT");
        assert_eq!(statement_type("  Insert into t"), "INSERT");
        assert_eq!(statement_type("DECLARE x"), "DECLARE");
        assert_eq!(statement_type("SHOW TABLES"), "UNKNOWN");
        assert_eq!(statement_type(""), "UNKNOWN");
    }

    #[test]
    fn test_param_kinds() {
        assert_eq!(
            ParamKind::parse("idsb").unwrap(),
            vec![ParamKind::Integer, ParamKind::Double, ParamKind::Text, ParamKind::Blob]
        );
        assert!(matches!(ParamKind::parse("ix"), Err(UsageError::InvalidParamType(_))));
        assert_eq!(ParamKind::Integer.bind_value(&DbValue::str("12abc")), BindValue::Int(12));
        assert_eq!(ParamKind::Double.bind_value(&DbValue::str("2.5")), BindValue::Double(2.5));
        assert_eq!(ParamKind::Text.bind_value(&DbValue::Int(3)), BindValue::Text("3".to_string()));
        assert_eq!(ParamKind::Blob.bind_value(&DbValue::Null), BindValue::Null);
    }

    #[test]
    fn test_prepare_execute_fetch() {
        let driver = users();
        let (_session, conn) = setup(&driver);
        let stmt = StatementResource::new(&conn);

        stmt.prepare(BY_ID).unwrap();
        assert_eq!(stmt.param_count(), 1);
        assert_eq!(stmt.statement_type(), "SELECT");
        stmt.bind_params("i", vec![DbValue::str("0")]).unwrap();
        stmt.execute().unwrap();
        assert_eq!(driver.last_bindings(), vec![(1, BindValue::Int(0))]);

        let id = BoundVar::new();
        let name = BoundVar::new();
        stmt.bind_results(vec![id.clone(), name.clone()]).unwrap();
        assert_eq!(stmt.num_rows(), 2);
        assert_eq!(stmt.field_count(), 2);

        assert!(stmt.fetch().unwrap());
        assert_eq!(id.get(), DbValue::str("1"));
        assert_eq!(name.get(), DbValue::str("ann"));
        assert!(stmt.fetch().unwrap());
        assert_eq!(name.get(), DbValue::str("bob"));
        assert!(!stmt.fetch().unwrap());

        stmt.data_seek(1).unwrap();
        assert!(stmt.fetch().unwrap());
        assert_eq!(id.get(), DbValue::str("2"));
    }

    #[test]
    fn test_bind_params_count_mismatch() {
        let driver = users();
        let (_session, conn) = setup(&driver);
        let stmt = StatementResource::new(&conn);
        stmt.prepare(BY_ID).unwrap();

        let err = stmt.bind_params("ii", vec![DbValue::Int(1)]).unwrap_err();
        assert!(matches!(
            err,
            DbError::Usage(UsageError::ParamCountMismatch { types: 2, params: 1 })
        ));
        assert!(stmt.bind_params("", vec![]).unwrap_err().is_usage());
        assert!(matches!(
            stmt.bind_params("q", vec![DbValue::Int(1)]),
            Err(DbError::Usage(UsageError::InvalidParamType(_)))
        ));
    }

    #[test]
    fn test_bind_results_before_execute() {
        let driver = users();
        let (_session, conn) = setup(&driver);
        let stmt = StatementResource::new(&conn);
        stmt.prepare(BY_ID).unwrap();
        let err = stmt.bind_results(vec![BoundVar::new()]).unwrap_err();
        assert!(matches!(err, DbError::Usage(UsageError::NotExecuted)));
        assert!(matches!(stmt.fetch(), Err(DbError::Usage(UsageError::NotExecuted))));
    }

    #[test]
    fn test_bind_results_count_must_match() {
        let driver = users();
        let (_session, conn) = setup(&driver);
        let stmt = StatementResource::new(&conn);
        stmt.prepare(BY_ID).unwrap();
        stmt.bind_params("i", vec![DbValue::Int(0)]).unwrap();
        stmt.execute().unwrap();
        let err = stmt.bind_results(vec![BoundVar::new()]).unwrap_err();
        assert!(matches!(
            err,
            DbError::Usage(UsageError::BoundVariableCount { bound: 1, columns: 2 })
        ));
    }

    #[test]
    fn test_dml_updates_connection_affected_rows() {
        let driver = users();
        let (_session, conn) = setup(&driver);
        let stmt = StatementResource::new(&conn);
        stmt.prepare("DELETE FROM users WHERE id = ?").unwrap();
        assert_eq!(stmt.statement_type(), "DELETE");
        stmt.bind_params("i", vec![DbValue::Int(2)]).unwrap();
        stmt.execute().unwrap();
        assert_eq!(stmt.affected_rows(), 1);
        assert_eq!(conn.affected_rows(), 1);
        assert_eq!(stmt.num_rows(), 0);
        assert!(stmt.result_metadata().is_none());
    }

    #[test]
    fn test_execute_without_prepare() {
        let driver = users();
        let (_session, conn) = setup(&driver);
        let stmt = StatementResource::new(&conn);
        assert_eq!(stmt.param_count(), -1);
        assert_eq!(stmt.statement_type(), "UNKNOWN");
        assert!(matches!(stmt.execute(), Err(DbError::Usage(UsageError::NotPrepared))));
        assert!(matches!(stmt.prepare("   "), Err(DbError::Usage(UsageError::EmptyQuery))));
    }

    #[test]
    fn test_execution_failure_is_recorded_on_statement() {
        let driver = ScriptedDriver::new().fail("INSERT INTO t VALUES (?)", DriverError::with_code("duplicate", 1062));
        let (_session, conn) = setup(&driver);
        let stmt = StatementResource::new(&conn);
        stmt.prepare("INSERT INTO t VALUES (?)").unwrap();
        stmt.bind_params("s", vec![DbValue::str("x")]).unwrap();
        assert_eq!(stmt.execute().unwrap_err().code(), 1062);
        assert_eq!(stmt.error_message(), "duplicate");
        assert_eq!(stmt.error_code(), 1062);
        assert_eq!(conn.error_message(), "");
    }

    #[test]
    fn test_result_metadata_and_free() {
        let driver = users();
        let (_session, conn) = setup(&driver);
        let stmt = StatementResource::new(&conn);
        stmt.prepare(BY_ID).unwrap();
        stmt.bind_params("i", vec![DbValue::Int(0)]).unwrap();
        stmt.execute().unwrap();

        let meta = stmt.result_metadata().unwrap();
        assert_eq!(meta.fetch_field().unwrap().unwrap().name, "id");

        stmt.free_result();
        assert!(meta.is_closed());
        assert_eq!(stmt.field_count(), 0);
        assert_eq!(stmt.num_rows(), 0);
    }

    #[test]
    fn test_close_releases_prepared_statement() {
        let driver = users();
        let (session, conn) = setup(&driver);
        let stmt = StatementResource::new(&conn);
        stmt.prepare(BY_ID).unwrap();
        stmt.close();
        stmt.close();
        assert!(matches!(stmt.execute(), Err(DbError::Usage(UsageError::NotPrepared))));
        assert_eq!(driver.closed_statements(), 1);
        session.close();
        assert_eq!(driver.closed_statements(), 1);
    }
}
