///
/// SQLite driver implementation for naml-std-db.
///
/// One `SqliteConnection` owns a rusqlite connection shared with the
/// statements it creates:
/// - `SharedDb` is `Arc<Mutex<Option<Connection>>>`; closing the connection
///   takes the handle out, after which every statement reports `Closed`.
/// - `set_catalog` swaps the handle for another database file under the
///   driver root. Statements created earlier follow the swap.
/// - Every execution prepares the SQL, binds, and either collects the
///   update count or materializes the rows.
///
/// Column types come from the declared type of the column when SQLite knows
/// it (plain column references). Expression columns are typed from the
/// storage class of their first non-NULL value.
///
/// Error handling:
/// - rusqlite failures become `DriverError`s carrying the extended result
///   code, or -1 when the failure did not come from SQLite itself
/// - date and time columns whose text does not parse are stored as
///   conversion failures and left to the core's coercion rules
///

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use naml_std_db::cursor::{Cell, MaterializedCursor};
use naml_std_db::driver::{
    BindValue, ColumnDescriptor, ColumnInfo, ConnectParams, Cursor, CursorKind, Driver,
    DriverCapabilities, DriverConnection, DriverPrepared, DriverStatement, NativeValue,
    Nullability, PrepareMode, SqlType,
};
use naml_std_db::errors::DriverError;
use naml_std_db::tokenizer::next_token;
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags, Statement, params};
use tracing::{debug, trace};

/// `SQLITE_ERROR`
const SQLITE_ERROR: i32 = 1;
/// `SQLITE_CANTOPEN`
const SQLITE_CANTOPEN: i32 = 14;

const CATALOG_EXTENSION: &str = "sqlite3";

type SharedDb = Arc<Mutex<Option<Connection>>>;

fn sqlite_error_code(e: &rusqlite::Error) -> i32 {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => err.extended_code,
        _ => -1,
    }
}

fn driver_error(e: rusqlite::Error) -> DriverError {
    DriverError::with_code(e.to_string(), sqlite_error_code(&e))
}

/// Runs `f` against the live connection handle.
fn with_db<T>(
    db: &Mutex<Option<Connection>>,
    f: impl FnOnce(&Connection) -> Result<T, DriverError>,
) -> Result<T, DriverError> {
    let guard = db.lock();
    match guard.as_ref() {
        Some(conn) => f(conn),
        None => Err(DriverError::closed("connection")),
    }
}

/// SQLite driver. With a root directory every `<name>.sqlite3` file in it
/// is a catalog; without one, connections get a private in-memory database.
#[derive(Debug, Clone, Default)]
pub struct SqliteDriver {
    root: Option<PathBuf>,
}

impl SqliteDriver {
    pub fn in_memory() -> Self {
        Self { root: None }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Database file backing catalog `name`.
    pub fn catalog_path(&self, name: &str) -> Result<PathBuf, DriverError> {
        let Some(root) = self.root.as_ref() else {
            return Err(DriverError::with_code(
                format!("Unknown database '{}'", name),
                SQLITE_CANTOPEN,
            ));
        };
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(DriverError::with_code(
                format!("Invalid database name '{}'", name),
                SQLITE_CANTOPEN,
            ));
        }
        Ok(root.join(format!("{}.{}", name, CATALOG_EXTENSION)))
    }

    /// Opens the file for catalog `name`; only `connect` may create it.
    fn open_catalog(&self, name: &str, create: bool) -> Result<Connection, DriverError> {
        let path = self.catalog_path(name)?;
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if create {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        let conn = Connection::open_with_flags(&path, flags).map_err(driver_error)?;
        debug!(catalog = name, path = %path.display(), "opened sqlite catalog");
        Ok(conn)
    }

    /// Catalog names under the root, sorted.
    fn list_catalogs(&self) -> Result<Vec<String>, DriverError> {
        let Some(root) = self.root.as_ref() else {
            return Ok(Vec::new());
        };
        let entries = fs::read_dir(root).map_err(|e| {
            DriverError::with_code(format!("{}: {}", root.display(), e), SQLITE_CANTOPEN)
        })?;
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == CATALOG_EXTENSION))
            .filter_map(|path| {
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }
}

impl Driver for SqliteDriver {
    fn name(&self) -> &str {
        "sqlite"
    }

    /// Resolution order: `database` names a catalog under the root, a
    /// `sqlite:<path>` url opens that file, anything else is in-memory.
    fn connect(&self, params: &ConnectParams) -> Result<Box<dyn DriverConnection>, DriverError> {
        let url_path = params
            .url
            .strip_prefix("sqlite:")
            .filter(|path| !path.is_empty() && *path != ":memory:");

        let (conn, catalog) = if !params.database.is_empty() {
            (
                self.open_catalog(&params.database, true)?,
                params.database.clone(),
            )
        } else if let Some(path) = url_path {
            let conn = Connection::open(path).map_err(driver_error)?;
            let catalog = Path::new(path)
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or_default()
                .to_string();
            (conn, catalog)
        } else {
            (Connection::open_in_memory().map_err(driver_error)?, String::new())
        };

        Ok(Box::new(SqliteConnection {
            driver: self.clone(),
            db: Arc::new(Mutex::new(Some(conn))),
            catalog,
            auto_commit: true,
        }))
    }
}

pub struct SqliteConnection {
    driver: SqliteDriver,
    db: SharedDb,
    catalog: String,
    auto_commit: bool,
}

impl SqliteConnection {
    /// Ends an open transaction with `verb`, then opens a new one when
    /// auto-commit is off.
    fn finish_transaction(&mut self, verb: &str) -> Result<(), DriverError> {
        let auto_commit = self.auto_commit;
        with_db(&self.db, |conn| {
            if !conn.is_autocommit() {
                conn.execute_batch(verb).map_err(driver_error)?;
            }
            if !auto_commit {
                conn.execute_batch("BEGIN").map_err(driver_error)?;
            }
            Ok(())
        })
    }
}

impl DriverConnection for SqliteConnection {
    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            scrollable_cursors: true,
            column_charsets: false,
            generated_keys: true,
        }
    }

    fn catalog(&mut self) -> Result<String, DriverError> {
        Ok(self.catalog.clone())
    }

    fn set_catalog(&mut self, name: &str) -> Result<(), DriverError> {
        let conn = self.driver.open_catalog(name, false)?;
        if !self.auto_commit {
            conn.execute_batch("BEGIN").map_err(driver_error)?;
        }
        let mut guard = self.db.lock();
        if guard.is_none() {
            return Err(DriverError::closed("connection"));
        }
        *guard = Some(conn);
        self.catalog = name.to_string();
        Ok(())
    }

    fn create_statement(&mut self, kind: CursorKind) -> Result<Box<dyn DriverStatement>, DriverError> {
        with_db(&self.db, |_| Ok(()))?;
        Ok(Box::new(SqliteStatement {
            db: Arc::clone(&self.db),
            kind,
            outcome: Outcome::default(),
        }))
    }

    fn prepare(
        &mut self,
        sql: &str,
        kind: CursorKind,
        mode: PrepareMode,
    ) -> Result<Box<dyn DriverPrepared>, DriverError> {
        let param_count = with_db(&self.db, |conn| {
            let stmt = conn.prepare(sql).map_err(driver_error)?;
            Ok(stmt.parameter_count())
        })?;
        trace!(sql, ?mode, param_count, "prepared");
        Ok(Box::new(SqlitePrepared {
            db: Arc::clone(&self.db),
            sql: sql.to_string(),
            kind,
            bindings: BTreeMap::new(),
            outcome: Outcome::default(),
        }))
    }

    fn set_auto_commit(&mut self, on: bool) -> Result<(), DriverError> {
        with_db(&self.db, |conn| {
            if on && !conn.is_autocommit() {
                conn.execute_batch("COMMIT").map_err(driver_error)?;
            } else if !on && conn.is_autocommit() {
                conn.execute_batch("BEGIN").map_err(driver_error)?;
            }
            Ok(())
        })?;
        self.auto_commit = on;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        self.finish_transaction("COMMIT")
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        self.finish_transaction("ROLLBACK")
    }

    fn is_closed(&self) -> bool {
        self.db.lock().is_none()
    }

    fn close(&mut self) -> Result<(), DriverError> {
        let Some(conn) = self.db.lock().take() else {
            return Ok(());
        };
        conn.close().map_err(|(_, e)| driver_error(e))
    }

    fn describe_table(
        &mut self,
        _catalog: &str,
        _schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnDescriptor>, DriverError> {
        with_db(&self.db, |conn| describe(conn, table))
    }

    fn catalogs(&mut self) -> Result<Box<dyn Cursor>, DriverError> {
        let rows = self
            .driver
            .list_catalogs()?
            .into_iter()
            .map(|name| vec![NativeValue::Text(name.into_bytes())])
            .collect();
        Ok(Box::new(MaterializedCursor::new(
            vec![ColumnInfo::new("TABLE_CAT", SqlType::VarChar).type_name("TEXT")],
            rows,
        )))
    }

    fn server_version(&mut self) -> Result<String, DriverError> {
        Ok(rusqlite::version().to_string())
    }
}

#[derive(Default)]
struct Outcome {
    cursor: Option<MaterializedCursor>,
    update_count: i64,
    generated_key: Option<i64>,
}

pub struct SqliteStatement {
    db: SharedDb,
    kind: CursorKind,
    outcome: Outcome,
}

impl DriverStatement for SqliteStatement {
    fn execute(&mut self, sql: &str) -> Result<bool, DriverError> {
        self.outcome = Outcome::default();
        let outcome = with_db(&self.db, |conn| run(conn, sql, self.kind, &BTreeMap::new()))?;
        self.outcome = outcome;
        Ok(self.outcome.cursor.is_some())
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
        self.outcome = Outcome::default();
        Ok(())
    }
}

pub struct SqlitePrepared {
    db: SharedDb,
    sql: String,
    kind: CursorKind,
    bindings: BTreeMap<usize, SqlValue>,
    outcome: Outcome,
}

impl DriverPrepared for SqlitePrepared {
    fn bind(&mut self, index: usize, value: BindValue) -> Result<(), DriverError> {
        if index == 0 {
            return Err(DriverError::with_code("parameter index out of range", SQLITE_ERROR));
        }
        let value = match value {
            BindValue::Null => SqlValue::Null,
            BindValue::Int(i) => SqlValue::Integer(i),
            BindValue::Double(d) => SqlValue::Real(d),
            BindValue::Text(s) => SqlValue::Text(s),
        };
        self.bindings.insert(index, value);
        Ok(())
    }

    fn clear_bindings(&mut self) -> Result<(), DriverError> {
        self.bindings.clear();
        Ok(())
    }

    fn execute(&mut self) -> Result<bool, DriverError> {
        self.outcome = Outcome::default();
        let outcome = with_db(&self.db, |conn| {
            run(conn, &self.sql, self.kind, &self.bindings)
        })?;
        self.outcome = outcome;
        Ok(self.outcome.cursor.is_some())
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
        self.bindings.clear();
        self.outcome = Outcome::default();
        Ok(())
    }
}

/// Prepares, binds and runs one statement.
fn run(
    conn: &Connection,
    sql: &str,
    kind: CursorKind,
    bindings: &BTreeMap<usize, SqlValue>,
) -> Result<Outcome, DriverError> {
    let mut stmt = conn.prepare(sql).map_err(driver_error)?;
    for (index, value) in bindings {
        stmt.raw_bind_parameter(*index, value).map_err(driver_error)?;
    }

    if stmt.column_count() == 0 {
        let before = conn.last_insert_rowid();
        let changed = stmt.raw_execute().map_err(driver_error)?;
        let after = conn.last_insert_rowid();
        return Ok(Outcome {
            cursor: None,
            update_count: changed as i64,
            generated_key: (after != before).then_some(after),
        });
    }

    let cursor = materialize(&mut stmt, sql)?;
    Ok(Outcome {
        cursor: Some(match kind {
            CursorKind::Scrollable => cursor,
            CursorKind::ForwardOnly => cursor.forward_only(),
        }),
        update_count: -1,
        generated_key: None,
    })
}

fn materialize(stmt: &mut Statement<'_>, sql: &str) -> Result<MaterializedCursor, DriverError> {
    let declared: Vec<(String, Option<String>)> = stmt
        .columns()
        .iter()
        .map(|c| (c.name().to_string(), c.decl_type().map(str::to_string)))
        .collect();

    let mut records: Vec<Vec<SqlValue>> = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next().map_err(driver_error)? {
        let mut record = Vec::with_capacity(declared.len());
        for i in 0..declared.len() {
            record.push(row.get::<_, SqlValue>(i).map_err(driver_error)?);
        }
        records.push(record);
    }

    let table = source_table(sql);
    let columns: Vec<ColumnInfo> = declared
        .iter()
        .enumerate()
        .map(|(i, (name, decl))| match decl {
            Some(decl) => declared_column(name, decl, table),
            None => {
                let first = records
                    .iter()
                    .map(|record| &record[i])
                    .find(|v| !matches!(v, SqlValue::Null));
                inferred_column(name, first)
            }
        })
        .collect();

    let cells: Vec<Vec<Cell>> = records
        .into_iter()
        .map(|record| {
            record
                .into_iter()
                .zip(&columns)
                .map(|(value, col)| native_value(value, col.sql_type))
                .collect()
        })
        .collect();
    trace!(rows = cells.len(), columns = columns.len(), "materialized result");
    Ok(MaterializedCursor::from_cells(columns, cells))
}

/// Table named right after the first `FROM`, when the query reads exactly
/// one table.
fn source_table(sql: &str) -> Option<&str> {
    let mut tok = next_token(sql, None);
    while let Some(t) = tok {
        if t.matches("FROM") {
            break;
        }
        tok = next_token(sql, Some(&t));
    }
    let from = tok?;
    let table = next_token(sql, Some(&from))?;

    let mut rest = next_token(sql, Some(&table));
    while let Some(t) = rest {
        if t.matches("JOIN") || t.first_char() == ',' {
            return None;
        }
        rest = next_token(sql, Some(&t));
    }

    let name = table.as_str().trim_end_matches(';');
    if name.is_empty() || name.contains(['(', ',']) {
        return None;
    }
    Some(unquote_ident(name))
}

fn unquote_ident(name: &str) -> &str {
    let quoted = name.len() >= 2
        && matches!(
            (name.as_bytes()[0], name.as_bytes()[name.len() - 1]),
            (b'"', b'"') | (b'`', b'`') | (b'[', b']')
        );
    if quoted { &name[1..name.len() - 1] } else { name }
}

/// Maps a declared column type onto `SqlType`, falling back to SQLite's
/// affinity rules for names it does not know.
fn declared_type(decl: &str) -> SqlType {
    let upper = decl.to_ascii_uppercase();
    match type_base(&upper) {
        "BOOL" | "BOOLEAN" => SqlType::Boolean,
        "BIT" => SqlType::Bit,
        "TINYINT" => SqlType::TinyInt,
        "SMALLINT" => SqlType::SmallInt,
        "BIGINT" => SqlType::BigInt,
        "DATE" => SqlType::Date,
        "TIME" => SqlType::Time,
        "DATETIME" | "TIMESTAMP" => SqlType::Timestamp,
        "DECIMAL" => SqlType::Decimal,
        "NUMERIC" => SqlType::Numeric,
        "FLOAT" => SqlType::Float,
        "REAL" => SqlType::Real,
        "CHAR" | "NCHAR" | "CHARACTER" => SqlType::Char,
        "TEXT" => SqlType::LongVarChar,
        "CLOB" => SqlType::Clob,
        "BINARY" => SqlType::Binary,
        "VARBINARY" => SqlType::VarBinary,
        _ if upper.contains("INT") => SqlType::Integer,
        _ if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") => {
            SqlType::VarChar
        }
        _ if upper.contains("BLOB") => SqlType::Blob,
        _ if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") => {
            SqlType::Double
        }
        _ => SqlType::Numeric,
    }
}

/// `"DECIMAL(10,2) UNSIGNED"` -> `"DECIMAL"`.
fn type_base(decl: &str) -> &str {
    let end = decl
        .find(|c: char| c == '(' || c.is_whitespace())
        .unwrap_or(decl.len());
    decl[..end].trim()
}

/// Length and scale arguments of a declared type: `(20)`, `(10,2)`.
fn type_args(decl: &str) -> (u32, i32) {
    let Some(open) = decl.find('(') else {
        return (0, 0);
    };
    let Some(close) = decl[open..].find(')') else {
        return (0, 0);
    };
    let mut args = decl[open + 1..open + close].split(',').map(str::trim);
    let length = args.next().and_then(|a| a.parse().ok()).unwrap_or(0);
    let scale = args.next().and_then(|a| a.parse().ok()).unwrap_or(0);
    (length, scale)
}

fn declared_column(name: &str, decl: &str, table: Option<&str>) -> ColumnInfo {
    let upper = decl.to_ascii_uppercase();
    let mut info = ColumnInfo::new(name, declared_type(decl)).type_name(type_base(&upper));
    if let Some(table) = table {
        info = info.table(table);
    }
    let (length, scale) = type_args(decl);
    info.precision = length;
    info.scale = scale;
    info.signed = info.sql_type.is_numeric() && !upper.contains("UNSIGNED");
    info
}

fn inferred_column(name: &str, first: Option<&SqlValue>) -> ColumnInfo {
    let (sql_type, type_name) = match first {
        Some(SqlValue::Integer(_)) => (SqlType::BigInt, "INTEGER"),
        Some(SqlValue::Real(_)) => (SqlType::Double, "REAL"),
        Some(SqlValue::Text(_)) => (SqlType::VarChar, "TEXT"),
        Some(SqlValue::Blob(_)) => (SqlType::Blob, "BLOB"),
        Some(SqlValue::Null) | None => (SqlType::Null, "NULL"),
    };
    ColumnInfo::new(name, sql_type)
        .type_name(type_name)
        .nullable(Nullability::Unknown)
}

fn native_value(value: SqlValue, sql_type: SqlType) -> Cell {
    Ok(match value {
        SqlValue::Null => NativeValue::Null,
        SqlValue::Integer(i) if matches!(sql_type, SqlType::Boolean | SqlType::Bit) => {
            NativeValue::Bool(i != 0)
        }
        SqlValue::Integer(i) => NativeValue::Int(i),
        SqlValue::Real(d) => NativeValue::Double(d),
        SqlValue::Text(s) => match sql_type {
            SqlType::Date => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(NativeValue::Date)
                .map_err(|e| DriverError::conversion(format!("bad date '{}': {}", s, e)))?,
            SqlType::Time => NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f")
                .map(NativeValue::Time)
                .map_err(|e| DriverError::conversion(format!("bad time '{}': {}", s, e)))?,
            SqlType::Timestamp => parse_timestamp(s.trim())
                .map(NativeValue::Timestamp)
                .ok_or_else(|| DriverError::conversion(format!("bad timestamp '{}'", s)))?,
            _ => NativeValue::Text(s.into_bytes()),
        },
        SqlValue::Blob(b) => NativeValue::Bytes(b),
    })
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Column descriptions from `pragma_table_info` and the table's indexes.
fn describe(conn: &Connection, table: &str) -> Result<Vec<ColumnDescriptor>, DriverError> {
    let mut columns: Vec<ColumnDescriptor> = Vec::new();
    let mut pk_columns = 0;
    {
        let mut stmt = conn
            .prepare(r#"SELECT name, type, "notnull", pk FROM pragma_table_info(?1)"#)
            .map_err(driver_error)?;
        let mut rows = stmt.query(params![table]).map_err(driver_error)?;
        while let Some(row) = rows.next().map_err(driver_error)? {
            let name: String = row.get(0).map_err(driver_error)?;
            let type_name: String = row.get(1).map_err(driver_error)?;
            let not_null: bool = row.get(2).map_err(driver_error)?;
            let pk: i64 = row.get(3).map_err(driver_error)?;
            if pk > 0 {
                pk_columns += 1;
            }
            let upper = type_name.to_ascii_uppercase();
            columns.push(ColumnDescriptor {
                name,
                nullable: !not_null,
                primary_key: pk > 0,
                unsigned: upper.contains("UNSIGNED"),
                zero_fill: upper.contains("ZEROFILL"),
                type_name,
                ..ColumnDescriptor::default()
            });
        }
    }
    if columns.is_empty() {
        return Err(DriverError::with_code(
            format!("no such table: {}", table),
            SQLITE_ERROR,
        ));
    }

    // INTEGER PRIMARY KEY aliases the rowid.
    if pk_columns == 1 {
        if let Some(col) = columns
            .iter_mut()
            .find(|c| c.primary_key && c.type_name.eq_ignore_ascii_case("INTEGER"))
        {
            col.auto_increment = true;
            col.nullable = false;
        }
    }

    let indexes: Vec<(String, bool, String)> = {
        let mut stmt = conn
            .prepare(r#"SELECT name, "unique", origin FROM pragma_index_list(?1)"#)
            .map_err(driver_error)?;
        let rows = stmt
            .query_map(params![table], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .map_err(driver_error)?;
        rows.collect::<Result<_, _>>().map_err(driver_error)?
    };

    for (index, unique, origin) in indexes {
        if origin == "pk" {
            continue;
        }
        let parts: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")
                .map_err(driver_error)?;
            let rows = stmt
                .query_map(params![index], |row| row.get(0))
                .map_err(driver_error)?;
            rows.collect::<Result<_, _>>().map_err(driver_error)?
        };
        let single = parts.len() == 1;
        for part in &parts {
            if let Some(col) = columns.iter_mut().find(|c| &c.name == part) {
                if unique && single {
                    col.unique_key = true;
                } else {
                    col.multiple_key = true;
                }
            }
        }
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Box<dyn DriverConnection> {
        SqliteDriver::in_memory()
            .connect(&ConnectParams::default())
            .unwrap()
    }

    fn exec(conn: &mut dyn DriverConnection, sql: &str) -> Box<dyn DriverStatement> {
        let mut stmt = conn.create_statement(CursorKind::Scrollable).unwrap();
        stmt.execute(sql).unwrap();
        stmt
    }

    #[test]
    fn test_declared_type_mapping() {
        assert_eq!(declared_type("INTEGER"), SqlType::Integer);
        assert_eq!(declared_type("int unsigned"), SqlType::Integer);
        assert_eq!(declared_type("VARCHAR(20)"), SqlType::VarChar);
        assert_eq!(declared_type("TEXT"), SqlType::LongVarChar);
        assert_eq!(declared_type("DATETIME"), SqlType::Timestamp);
        assert_eq!(declared_type("DECIMAL(10,2)"), SqlType::Decimal);
        assert_eq!(declared_type("BLOB"), SqlType::Blob);
        assert_eq!(declared_type("DOUBLE PRECISION"), SqlType::Double);
        assert_eq!(declared_type("WHATEVER"), SqlType::Numeric);
        assert_eq!(type_args("DECIMAL(10, 2)"), (10, 2));
        assert_eq!(type_args("VARCHAR(20)"), (20, 0));
        assert_eq!(type_args("TEXT"), (0, 0));
    }

    #[test]
    fn test_source_table() {
        assert_eq!(source_table("SELECT * FROM users"), Some("users"));
        assert_eq!(source_table("select a from \"order\" where x = 1;"), Some("order"));
        assert_eq!(source_table("SELECT * FROM t;"), Some("t"));
        assert_eq!(source_table("SELECT * FROM a JOIN b ON a.id = b.id"), None);
        assert_eq!(source_table("SELECT * FROM a , b"), None);
        assert_eq!(source_table("SELECT 1"), None);
    }

    #[test]
    fn test_update_count_and_generated_key() {
        let mut conn = memory();
        exec(&mut *conn, "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)");
        let stmt = exec(&mut *conn, "INSERT INTO t (name) VALUES ('a'), ('b')");
        assert_eq!(stmt.update_count(), 2);
        assert_eq!(stmt.generated_key(), Some(2));

        let stmt = exec(&mut *conn, "UPDATE t SET name = 'c' WHERE id = 1");
        assert_eq!(stmt.update_count(), 1);
        assert_eq!(stmt.generated_key(), None);
    }

    #[test]
    fn test_select_materializes_typed_columns() {
        let mut conn = memory();
        exec(
            &mut *conn,
            "CREATE TABLE t (id INTEGER, price DECIMAL(10,2), at DATETIME, data BLOB)",
        );
        exec(
            &mut *conn,
            "INSERT INTO t VALUES (1, 9.5, '2024-01-02 03:04:05', x'0102')",
        );

        let mut stmt = conn.create_statement(CursorKind::Scrollable).unwrap();
        assert!(stmt.execute("SELECT id, price, at, data, id + 1 AS next FROM t").unwrap());
        assert_eq!(stmt.update_count(), -1);
        let mut cursor = stmt.take_result_set().unwrap();

        let cols = cursor.columns();
        assert_eq!(cols[0].sql_type, SqlType::Integer);
        assert_eq!(cols[0].table, "t");
        assert_eq!(cols[1].precision, 10);
        assert_eq!(cols[1].scale, 2);
        assert_eq!(cols[2].sql_type, SqlType::Timestamp);
        assert_eq!(cols[4].sql_type, SqlType::BigInt);
        assert_eq!(cols[4].table, "");

        assert!(cursor.next().unwrap());
        assert!(matches!(cursor.value(0).unwrap(), NativeValue::Int(1)));
        assert!(matches!(cursor.value(2).unwrap(), NativeValue::Timestamp(_)));
        assert!(matches!(cursor.value(3).unwrap(), NativeValue::Bytes(ref b) if b == &[1, 2]));
        assert!(matches!(cursor.value(4).unwrap(), NativeValue::Int(2)));
        assert!(cursor.last().unwrap());
    }

    #[test]
    fn test_unparseable_timestamp_is_a_conversion_failure() {
        let mut conn = memory();
        exec(&mut *conn, "CREATE TABLE t (at TIMESTAMP)");
        exec(&mut *conn, "INSERT INTO t VALUES ('0000-00-00 00:00:00')");
        let mut stmt = conn.create_statement(CursorKind::Scrollable).unwrap();
        stmt.execute("SELECT at FROM t").unwrap();
        let mut cursor = stmt.take_result_set().unwrap();
        assert!(cursor.next().unwrap());
        let err = cursor.value(0).unwrap_err();
        assert_eq!(err.kind, naml_std_db::errors::DriverErrorKind::Conversion);
    }

    #[test]
    fn test_forward_only_statement() {
        let mut conn = memory();
        let mut stmt = conn.create_statement(CursorKind::ForwardOnly).unwrap();
        stmt.execute("SELECT 1").unwrap();
        let mut cursor = stmt.take_result_set().unwrap();
        assert!(cursor.last().is_err());
        assert!(cursor.next().unwrap());
    }

    #[test]
    fn test_error_carries_sqlite_code() {
        let mut conn = memory();
        let mut stmt = conn.create_statement(CursorKind::Scrollable).unwrap();
        let err = stmt.execute("SELECT * FROM missing").unwrap_err();
        assert_eq!(err.code, SQLITE_ERROR);
        assert!(err.message.contains("no such table"));
    }

    #[test]
    fn test_prepared_bindings() {
        let mut conn = memory();
        exec(&mut *conn, "CREATE TABLE t (id INTEGER, name TEXT)");
        let mut prepared = conn
            .prepare(
                "INSERT INTO t VALUES (?, ?)",
                CursorKind::Scrollable,
                PrepareMode::Statement,
            )
            .unwrap();
        prepared.bind(1, BindValue::Int(7)).unwrap();
        prepared.bind(2, BindValue::Text("x".to_string())).unwrap();
        assert!(!prepared.execute().unwrap());
        assert_eq!(prepared.update_count(), 1);
        assert!(prepared.bind(0, BindValue::Null).is_err());

        let err = conn
            .prepare("SELEC nope", CursorKind::Scrollable, PrepareMode::Statement)
            .err()
            .unwrap();
        assert!(err.message.contains("syntax error"));
    }

    #[test]
    fn test_describe_table_flags() {
        let mut conn = memory();
        exec(
            &mut *conn,
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name VARCHAR(20) NOT NULL, \
             email TEXT UNIQUE, age INT UNSIGNED)",
        );
        exec(&mut *conn, "CREATE INDEX users_name ON users (name)");

        let cols = conn.describe_table("", "", "users").unwrap();
        let names: Vec<&str> = cols.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "email", "age"]);
        assert!(cols[0].primary_key && cols[0].auto_increment && !cols[0].nullable);
        assert!(!cols[1].nullable && cols[1].multiple_key);
        assert!(cols[2].unique_key && !cols[2].multiple_key);
        assert!(cols[3].unsigned);

        assert!(conn.describe_table("", "", "missing").is_err());
    }

    #[test]
    fn test_transactions() {
        let mut conn = memory();
        exec(&mut *conn, "CREATE TABLE t (id INTEGER)");
        conn.set_auto_commit(false).unwrap();
        exec(&mut *conn, "INSERT INTO t VALUES (1)");
        conn.rollback().unwrap();
        exec(&mut *conn, "INSERT INTO t VALUES (2)");
        conn.commit().unwrap();
        conn.set_auto_commit(true).unwrap();

        let mut stmt = conn.create_statement(CursorKind::Scrollable).unwrap();
        stmt.execute("SELECT id FROM t").unwrap();
        let mut cursor = stmt.take_result_set().unwrap();
        assert!(cursor.next().unwrap());
        assert!(matches!(cursor.value(0).unwrap(), NativeValue::Int(2)));
        assert!(!cursor.next().unwrap());
    }

    #[test]
    fn test_catalogs_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let driver = SqliteDriver::with_root(dir.path());
        let mut shop = driver
            .connect(&ConnectParams::default().database("shop"))
            .unwrap();
        driver
            .connect(&ConnectParams::default().database("crm"))
            .unwrap();
        assert!(dir.path().join("shop.sqlite3").exists());

        let mut cursor = shop.catalogs().unwrap();
        let mut names = Vec::new();
        while cursor.next().unwrap() {
            if let NativeValue::Text(b) = cursor.value(0).unwrap() {
                names.push(String::from_utf8(b).unwrap());
            }
        }
        assert_eq!(names, vec!["crm", "shop"]);

        shop.set_catalog("crm").unwrap();
        assert_eq!(shop.catalog().unwrap(), "crm");
        let err = shop.set_catalog("nowhere").unwrap_err();
        assert_eq!(err.code & 0xff, SQLITE_CANTOPEN);
        assert_eq!(shop.catalog().unwrap(), "crm");
        assert!(shop.set_catalog("../escape").is_err());
    }

    #[test]
    fn test_close_invalidates_statements() {
        let mut conn = memory();
        let mut stmt = conn.create_statement(CursorKind::Scrollable).unwrap();
        conn.close().unwrap();
        assert!(conn.is_closed());
        let err = stmt.execute("SELECT 1").unwrap_err();
        assert_eq!(err.kind, naml_std_db::errors::DriverErrorKind::Closed);
        conn.close().unwrap();
    }

    #[test]
    fn test_server_version_is_sqlite_library_version() {
        let mut conn = memory();
        let version = conn.server_version().unwrap();
        assert!(version.starts_with('3'));
    }
}
