///
/// Scripted in-memory driver.
///
/// `ScriptedDriver` answers SQL by exact text from a script built up front:
/// result sets, update counts, failures, table describes. Everything it is
/// asked to do is logged so tests can assert on what reached the driver.
/// SQL that is not in the script succeeds with an update count of 0.
///
/// ```rust,ignore
/// let driver = ScriptedDriver::new()
///     .with_catalog("shop")
///     .update("DELETE FROM t", 3);
/// conn.connect(Arc::new(driver.clone()), ConnectParams::default())?;
/// assert_eq!(driver.log(), vec!["DELETE FROM t"]);
/// ```
///

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cursor::MaterializedCursor;
use crate::driver::{
    BindValue, ColumnDescriptor, ColumnInfo, ConnectParams, Cursor, CursorKind, Driver,
    DriverCapabilities, DriverConnection, DriverPrepared, DriverStatement, NativeValue,
    PrepareMode, SqlType,
};
use crate::errors::DriverError;

#[derive(Clone)]
enum Response {
    Rows {
        columns: Vec<ColumnInfo>,
        rows: Vec<Vec<NativeValue>>,
    },
    Update(i64),
    Truncated(i64),
    Fail(DriverError),
}

struct Script {
    caps: DriverCapabilities,
    catalog: String,
    catalogs: Vec<String>,
    version: String,
    connect_error: Option<DriverError>,
    insert_id: Option<i64>,
    responses: HashMap<String, Response>,
    describes: HashMap<String, Vec<ColumnDescriptor>>,
    log: Vec<String>,
    events: Vec<String>,
    describe_calls: Vec<String>,
    closed_statements: usize,
    connects: usize,
    last_bindings: Vec<(usize, BindValue)>,
}

#[derive(Clone)]
pub struct ScriptedDriver {
    script: Arc<Mutex<Script>>,
}

impl Default for ScriptedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                caps: DriverCapabilities::default(),
                catalog: String::new(),
                catalogs: Vec::new(),
                version: "8.0.36".to_string(),
                connect_error: None,
                insert_id: None,
                responses: HashMap::new(),
                describes: HashMap::new(),
                log: Vec::new(),
                events: Vec::new(),
                describe_calls: Vec::new(),
                closed_statements: 0,
                connects: 0,
                last_bindings: Vec::new(),
            })),
        }
    }

    pub fn with_capabilities(self, caps: DriverCapabilities) -> Self {
        self.script.lock().caps = caps;
        self
    }

    /// Catalog reported when the caller connects without a database.
    pub fn with_catalog(self, catalog: &str) -> Self {
        self.script.lock().catalog = catalog.to_string();
        self
    }

    pub fn with_catalogs(self, catalogs: &[&str]) -> Self {
        self.script.lock().catalogs = catalogs.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_server_version(self, version: &str) -> Self {
        self.script.lock().version = version.to_string();
        self
    }

    /// Generated key reported after every update.
    pub fn with_insert_id(self, id: i64) -> Self {
        self.script.lock().insert_id = Some(id);
        self
    }

    pub fn fail_connect(self, err: DriverError) -> Self {
        self.script.lock().connect_error = Some(err);
        self
    }

    pub fn rows(self, sql: &str, columns: Vec<ColumnInfo>, rows: Vec<Vec<NativeValue>>) -> Self {
        self.respond(sql, Response::Rows { columns, rows })
    }

    pub fn update(self, sql: &str, count: i64) -> Self {
        self.respond(sql, Response::Update(count))
    }

    /// Fails with a data-truncation error after updating `count` rows.
    pub fn truncated(self, sql: &str, count: i64) -> Self {
        self.respond(sql, Response::Truncated(count))
    }

    pub fn fail(self, sql: &str, err: DriverError) -> Self {
        self.respond(sql, Response::Fail(err))
    }

    pub fn describe(self, table: &str, columns: Vec<ColumnDescriptor>) -> Self {
        self.script.lock().describes.insert(table.to_string(), columns);
        self
    }

    fn respond(self, sql: &str, response: Response) -> Self {
        self.script.lock().responses.insert(sql.to_string(), response);
        self
    }

    /// SQL that reached the driver, in order.
    pub fn log(&self) -> Vec<String> {
        self.script.lock().log.clone()
    }

    /// Every driver call other than execution, e.g. `"set_catalog crm"`.
    pub fn events(&self) -> Vec<String> {
        self.script.lock().events.clone()
    }

    pub fn describe_calls(&self) -> Vec<String> {
        self.script.lock().describe_calls.clone()
    }

    pub fn closed_statements(&self) -> usize {
        self.script.lock().closed_statements
    }

    pub fn connect_count(&self) -> usize {
        self.script.lock().connects
    }

    pub fn last_bindings(&self) -> Vec<(usize, BindValue)> {
        self.script.lock().last_bindings.clone()
    }
}

impl Driver for ScriptedDriver {
    fn name(&self) -> &str {
        "scripted"
    }

    fn connect(&self, params: &ConnectParams) -> Result<Box<dyn DriverConnection>, DriverError> {
        let mut script = self.script.lock();
        if let Some(err) = script.connect_error.clone() {
            return Err(err);
        }
        script.connects += 1;
        script.events.push(format!("connect {}", params.database));
        let catalog = if params.database.is_empty() {
            script.catalog.clone()
        } else {
            params.database.clone()
        };
        Ok(Box::new(ScriptedConnection {
            script: Arc::clone(&self.script),
            catalog,
            closed: false,
        }))
    }
}

struct ScriptedConnection {
    script: Arc<Mutex<Script>>,
    catalog: String,
    closed: bool,
}

impl ScriptedConnection {
    fn event(&self, event: String) {
        self.script.lock().events.push(event);
    }
}

impl DriverConnection for ScriptedConnection {
    fn capabilities(&self) -> DriverCapabilities {
        self.script.lock().caps
    }

    fn catalog(&mut self) -> Result<String, DriverError> {
        Ok(self.catalog.clone())
    }

    fn set_catalog(&mut self, name: &str) -> Result<(), DriverError> {
        self.event(format!("set_catalog {}", name));
        self.catalog = name.to_string();
        Ok(())
    }

    fn create_statement(&mut self, kind: CursorKind) -> Result<Box<dyn DriverStatement>, DriverError> {
        self.event(format!("create_statement {:?}", kind));
        Ok(Box::new(ScriptedStatement {
            script: Arc::clone(&self.script),
            outcome: Outcome::default(),
        }))
    }

    fn prepare(
        &mut self,
        sql: &str,
        kind: CursorKind,
        mode: PrepareMode,
    ) -> Result<Box<dyn DriverPrepared>, DriverError> {
        self.event(format!("prepare {:?} {:?} {}", kind, mode, sql));
        Ok(Box::new(ScriptedPrepared {
            script: Arc::clone(&self.script),
            sql: sql.to_string(),
            bindings: Vec::new(),
            outcome: Outcome::default(),
        }))
    }

    fn set_auto_commit(&mut self, on: bool) -> Result<(), DriverError> {
        self.event(format!("auto_commit {}", on));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        self.event("commit".to_string());
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        self.event("rollback".to_string());
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.event("close connection".to_string());
        self.closed = true;
        Ok(())
    }

    fn describe_table(
        &mut self,
        _catalog: &str,
        _schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnDescriptor>, DriverError> {
        let mut script = self.script.lock();
        script.describe_calls.push(table.to_string());
        script
            .describes
            .get(table)
            .cloned()
            .ok_or_else(|| DriverError::new(format!("no such table: {}", table)))
    }

    fn catalogs(&mut self) -> Result<Box<dyn Cursor>, DriverError> {
        let script = self.script.lock();
        let rows = script
            .catalogs
            .iter()
            .map(|c| vec![NativeValue::text(c)])
            .collect();
        Ok(Box::new(MaterializedCursor::new(
            vec![ColumnInfo::new("TABLE_CAT", SqlType::VarChar)],
            rows,
        )))
    }

    fn server_version(&mut self) -> Result<String, DriverError> {
        Ok(self.script.lock().version.clone())
    }
}

#[derive(Default)]
struct Outcome {
    cursor: Option<MaterializedCursor>,
    update_count: i64,
    generated_key: Option<i64>,
}

/// Looks `sql` up in the script and records it in the log.
fn run(script: &Mutex<Script>, sql: &str, outcome: &mut Outcome) -> Result<bool, DriverError> {
    let mut script = script.lock();
    script.log.push(sql.to_string());
    *outcome = Outcome::default();
    match script.responses.get(sql).cloned() {
        Some(Response::Rows { columns, rows }) => {
            let cursor = MaterializedCursor::new(columns, rows);
            outcome.cursor = Some(if script.caps.scrollable_cursors {
                cursor
            } else {
                cursor.forward_only()
            });
            outcome.update_count = -1;
            Ok(true)
        }
        Some(Response::Update(count)) => {
            outcome.update_count = count;
            outcome.generated_key = script.insert_id;
            Ok(false)
        }
        Some(Response::Truncated(count)) => {
            outcome.update_count = count;
            Err(DriverError::truncation("data truncated"))
        }
        Some(Response::Fail(err)) => Err(err),
        None => Ok(false),
    }
}

struct ScriptedStatement {
    script: Arc<Mutex<Script>>,
    outcome: Outcome,
}

impl DriverStatement for ScriptedStatement {
    fn execute(&mut self, sql: &str) -> Result<bool, DriverError> {
        run(&self.script, sql, &mut self.outcome)
    }

    fn take_result_set(&mut self) -> Option<Box<dyn Cursor>> {
        self.outcome
            .cursor
            .take()
            .map(|c| Box::new(c) as Box<dyn Cursor>)
    }

    fn update_count(&self) -> i64 {
        self.outcome.update_count
    }

    fn generated_key(&self) -> Option<i64> {
        self.outcome.generated_key
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.script.lock().closed_statements += 1;
        Ok(())
    }
}

struct ScriptedPrepared {
    script: Arc<Mutex<Script>>,
    sql: String,
    bindings: Vec<(usize, BindValue)>,
    outcome: Outcome,
}

impl DriverPrepared for ScriptedPrepared {
    fn bind(&mut self, index: usize, value: BindValue) -> Result<(), DriverError> {
        self.bindings.retain(|(i, _)| *i != index);
        self.bindings.push((index, value));
        Ok(())
    }

    fn clear_bindings(&mut self) -> Result<(), DriverError> {
        self.bindings.clear();
        Ok(())
    }

    fn execute(&mut self) -> Result<bool, DriverError> {
        self.script.lock().last_bindings = self.bindings.clone();
        run(&self.script, &self.sql, &mut self.outcome)
    }

    fn take_result_set(&mut self) -> Option<Box<dyn Cursor>> {
        self.outcome
            .cursor
            .take()
            .map(|c| Box::new(c) as Box<dyn Cursor>)
    }

    fn update_count(&self) -> i64 {
        self.outcome.update_count
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.script.lock().closed_statements += 1;
        Ok(())
    }
}
