///
/// Result handles.
///
/// A `ResultResource` wraps one driver cursor: it fetches rows in the three
/// fetch modes, answers field introspection, and supports random access on
/// scrollable cursors. Handles are cheap clones of one shared state;
/// closing any clone closes them all.
///
/// Field flags the cursor metadata cannot provide come from a describe of
/// the column's table through the process-wide `TableMetadataCache`. The
/// lookup is remembered per table for the lifetime of the handle, so a
/// result with ten columns of one table describes it at most once.
///

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::backend::{Backend, DecodeOptions, LastSqlKind};
use crate::coerce::Coercion;
use crate::connection::{close_quietly, ConnectionShared};
use crate::driver::{ColumnDescriptor, ColumnInfo, Cursor, DriverStatement, Nullability, SqlType};
use crate::errors::{DbError, DbResult, DriverError, UsageError};
use crate::metadata::{TableKey, TableMetadata, TableMetadataCache};
use crate::session::{Cleanup, SessionRef};
use crate::value::{DbValue, FetchMode, Row, RowKey};

/// Column reference for random access: an offset or a (possibly
/// `table.column`) name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRef {
    Offset(usize),
    Name(String),
}

impl From<usize> for FieldRef {
    fn from(offset: usize) -> Self {
        FieldRef::Offset(offset)
    }
}

impl From<&str> for FieldRef {
    fn from(name: &str) -> Self {
        FieldRef::Name(name.to_string())
    }
}

/// Full description of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub orgname: String,
    pub table: String,
    pub schema: String,
    pub catalog: String,
    pub field_type: &'static str,
    pub type_name: String,
    pub length: u32,
    pub scale: i32,
    pub not_null: bool,
    pub primary_key: bool,
    pub multiple_key: bool,
    pub unique_key: bool,
    pub numeric: bool,
    pub blob: bool,
    pub unsigned: bool,
    pub zero_fill: bool,
    pub binary: bool,
    pub enumeration: bool,
    pub set: bool,
    pub auto_increment: bool,
    pub timestamp: bool,
}

impl FieldInfo {
    /// Space-separated flag words, in the order scripts expect them.
    /// `unique_key` is never listed.
    pub fn flags(&self) -> String {
        let mut flags = Vec::new();
        if self.not_null {
            flags.push("not_null");
        }
        if self.primary_key {
            flags.push("primary_key");
        } else if self.multiple_key {
            flags.push("multiple_key");
        }
        let words = [
            (self.blob, "blob"),
            (self.unsigned, "unsigned"),
            (self.zero_fill, "zerofill"),
            (self.binary, "binary"),
            (self.enumeration, "enum"),
            (self.set, "set"),
            (self.auto_increment, "auto_increment"),
            (self.timestamp, "timestamp"),
        ];
        flags.extend(words.iter().filter(|(on, _)| *on).map(|(_, word)| *word));
        flags.join(" ")
    }
}

/// Everything a connection or statement hands over when it opens a result.
pub(crate) struct ResultParts {
    pub cursor: Box<dyn Cursor>,
    pub statement: Option<Box<dyn DriverStatement>>,
    pub owner: Weak<ConnectionShared>,
    pub backend: Arc<dyn Backend>,
    pub decode: DecodeOptions,
    pub metadata: Arc<TableMetadataCache>,
    pub url: String,
    pub catalog: String,
    pub last_sql: Option<LastSqlKind>,
}

#[derive(Clone)]
pub struct ResultResource {
    shared: Arc<ResultShared>,
}

pub(crate) struct ResultShared {
    state: Mutex<ResultState>,
}

struct ResultState {
    cursor: Option<Box<dyn Cursor>>,
    statement: Option<Box<dyn DriverStatement>>,
    owner: Weak<ConnectionShared>,
    columns: Vec<ColumnInfo>,
    field_offset: i64,
    backend: Arc<dyn Backend>,
    decode: DecodeOptions,
    metadata: Arc<TableMetadataCache>,
    url: String,
    catalog: String,
    from_describe: bool,
    tables: HashMap<TableKey, Option<Arc<TableMetadata>>>,
}

impl ResultResource {
    pub(crate) fn open(parts: ResultParts, session: &SessionRef) -> Self {
        let columns = parts.cursor.columns().to_vec();
        let state = ResultState {
            cursor: Some(parts.cursor),
            statement: parts.statement,
            owner: parts.owner,
            columns,
            field_offset: 0,
            backend: parts.backend,
            decode: parts.decode,
            metadata: parts.metadata,
            url: parts.url,
            catalog: parts.catalog,
            from_describe: parts.last_sql == Some(LastSqlKind::Describe),
            tables: HashMap::new(),
        };
        let shared = Arc::new(ResultShared {
            state: Mutex::new(state),
        });
        let hook = Arc::downgrade(&shared);
        let hook: Weak<dyn Cleanup> = hook;
        session.register(hook);
        Self { shared }
    }

    /// Next row, or `None` once the cursor is exhausted.
    pub fn fetch_row(&self, mode: FetchMode) -> DbResult<Option<Row>> {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        let cursor = state.cursor.as_mut().ok_or(DbError::Closed)?;
        if !cursor.next()? {
            return Ok(None);
        }

        let coercion = Coercion::new(state.backend.as_ref(), state.decode);
        let mut row = Row::new();
        for (i, col) in state.columns.iter().enumerate() {
            let value = coercion.column(&**cursor, i);
            match mode {
                FetchMode::Numeric => row.insert(RowKey::Index(i), value),
                FetchMode::Associative => row.insert(RowKey::Name(col.label.clone()), value),
                FetchMode::Both => {
                    row.insert(RowKey::Index(i), value.clone());
                    row.insert(RowKey::Name(col.label.clone()), value);
                }
            }
        }
        Ok(Some(row))
    }

    pub fn fetch_assoc(&self) -> DbResult<Option<Row>> {
        self.fetch_row(FetchMode::Associative)
    }

    pub fn fetch_num(&self) -> DbResult<Option<Row>> {
        self.fetch_row(FetchMode::Numeric)
    }

    /// Next row as an ordered list of column values.
    pub fn fetch_values(&self) -> DbResult<Option<Vec<DbValue>>> {
        Ok(self
            .fetch_row(FetchMode::Numeric)?
            .map(|row| row.values().cloned().collect()))
    }

    /// Next row as a property map keyed by column label.
    pub fn fetch_object(&self) -> DbResult<Option<IndexMap<String, DbValue>>> {
        let Some(row) = self.fetch_row(FetchMode::Associative)? else {
            return Ok(None);
        };
        Ok(Some(
            row.iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect(),
        ))
    }

    pub fn field_count(&self) -> usize {
        let state = self.shared.state.lock();
        if state.cursor.is_none() {
            return 0;
        }
        state.columns.len()
    }

    /// Column count, absent when the result has no columns.
    pub fn num_fields(&self) -> Option<usize> {
        match self.field_count() {
            0 => None,
            n => Some(n),
        }
    }

    pub fn columns(&self) -> Vec<ColumnInfo> {
        self.shared.state.lock().columns.clone()
    }

    pub fn field_name(&self, offset: i64) -> DbResult<String> {
        self.with_column(offset, |col| col.label.clone())
    }

    /// Table of the column; `None` when the driver reports none.
    pub fn field_table(&self, offset: i64) -> DbResult<Option<String>> {
        self.with_column(offset, |col| Some(col.table.clone()).filter(|t| !t.is_empty()))
    }

    pub fn field_schema(&self, offset: i64) -> DbResult<String> {
        self.with_column(offset, |col| col.schema.clone())
    }

    pub fn field_catalog(&self, offset: i64) -> DbResult<String> {
        self.with_column(offset, |col| col.catalog.clone())
    }

    pub fn field_length(&self, offset: i64) -> DbResult<u32> {
        self.with_column(offset, |col| col.precision)
    }

    pub fn field_scale(&self, offset: i64) -> DbResult<i32> {
        self.with_column(offset, |col| col.scale)
    }

    fn with_column<T>(&self, offset: i64, f: impl FnOnce(&ColumnInfo) -> T) -> DbResult<T> {
        let state = self.shared.state.lock();
        let index = state.check_offset(offset)?;
        Ok(f(&state.columns[index]))
    }

    pub fn field_type(&self, offset: i64) -> DbResult<&'static str> {
        let state = self.shared.state.lock();
        let index = state.check_offset(offset)?;
        Ok(state.backend.field_type(&state.columns[index]))
    }

    pub fn field_not_null(&self, offset: i64) -> DbResult<bool> {
        Ok(self.fetch_field_direct(offset)?.not_null)
    }

    pub fn field_flags(&self, offset: i64) -> DbResult<String> {
        Ok(self.fetch_field_direct(offset)?.flags())
    }

    pub fn fetch_field_direct(&self, offset: i64) -> DbResult<FieldInfo> {
        let mut state = self.shared.state.lock();
        let index = state.check_offset(offset)?;
        Ok(state.field_info(index))
    }

    /// Field at the current field offset, advancing the offset. `None` once
    /// every field has been returned.
    pub fn fetch_field(&self) -> DbResult<Option<FieldInfo>> {
        let mut state = self.shared.state.lock();
        if state.cursor.is_none() {
            return Err(DbError::Closed);
        }
        let offset = state.field_offset;
        if offset < 0 || offset as usize >= state.columns.len() {
            return Ok(None);
        }
        state.field_offset += 1;
        Ok(Some(state.field_info(offset as usize)))
    }

    /// Moves the field offset. The offset is stored even when it is out of
    /// range; the return value says whether it was valid.
    pub fn field_seek(&self, offset: i64) -> bool {
        let mut state = self.shared.state.lock();
        state.field_offset = offset;
        offset >= 0 && (offset as usize) < state.columns.len()
    }

    pub fn field_tell(&self) -> i64 {
        self.shared.state.lock().field_offset
    }

    /// Number of rows, or -1 when the cursor cannot tell (closed or
    /// forward-only). The cursor position is preserved.
    pub fn row_count(&self) -> i64 {
        let mut state = self.shared.state.lock();
        match state.cursor.as_mut() {
            Some(cursor) => row_count(&mut **cursor),
            None => -1,
        }
    }

    /// Positions the cursor so the next fetch returns 0-based row `row`.
    pub fn seek(&self, row: i64) -> DbResult<()> {
        let mut state = self.shared.state.lock();
        let cursor = state.cursor.as_mut().ok_or(DbError::Closed)?;
        let rows = row_count(&mut **cursor);
        if row < 0 || row >= rows {
            return Err(DbError::RowOutOfRange { row, rows });
        }
        if row == 0 {
            cursor.before_first()?;
        } else {
            cursor.absolute(row as usize)?;
        }
        Ok(())
    }

    /// Value of one field in 0-based row `row`. The cursor is left on that
    /// row; when the row does not exist the previous position is restored.
    pub fn result_field(&self, row: i64, field: impl Into<FieldRef>) -> DbResult<DbValue> {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        let index = match field.into() {
            FieldRef::Offset(offset) => state.check_offset(offset as i64)?,
            FieldRef::Name(name) => state
                .column_number(&name)
                .ok_or(UsageError::UnknownField(name))?,
        };
        let cursor = state.cursor.as_mut().ok_or(DbError::Closed)?;

        let saved = cursor.row()?;
        let found = row >= 0 && cursor.absolute(row as usize + 1)? && !cursor.is_after_last()?;
        if !found {
            restore(&mut **cursor, saved)?;
            let rows = row_count(&mut **cursor);
            return Err(DbError::RowOutOfRange { row, rows });
        }
        let coercion = Coercion::new(state.backend.as_ref(), state.decode);
        Ok(coercion.column(&**cursor, index))
    }

    /// Offset of the column called `name` (`label` or `table.label`).
    pub fn column_number(&self, name: &str) -> Option<usize> {
        self.shared.state.lock().column_number(name)
    }

    /// Byte lengths of the current row's values; `None` off a row.
    pub fn lengths(&self) -> DbResult<Option<Vec<usize>>> {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        let cursor = state.cursor.as_ref().ok_or(DbError::Closed)?;
        if cursor.row()? == 0 {
            return Ok(None);
        }
        let coercion = Coercion::new(state.backend.as_ref(), state.decode);
        Ok(Some(
            (0..state.columns.len())
                .map(|i| coercion.column(&**cursor, i).byte_len())
                .collect(),
        ))
    }

    /// Results always report zero affected rows.
    pub fn affected_rows(&self) -> i64 {
        0
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().cursor.is_none()
    }

    pub fn close(&self) {
        self.shared.close();
    }
}

impl std::fmt::Debug for ResultResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ResultResource")
            .field("columns", &state.columns.len())
            .field("closed", &state.cursor.is_none())
            .finish()
    }
}

impl ResultShared {
    fn close(&self) {
        let mut state = self.state.lock();
        if let Some(mut cursor) = state.cursor.take() {
            if let Err(e) = cursor.close() {
                debug!(error = %e, "cursor close failed");
            }
        }
        if let Some(stmt) = state.statement.take() {
            match state.owner.upgrade() {
                Some(conn) => conn.release_statement(stmt),
                None => close_quietly(stmt),
            }
        }
        state.tables.clear();
    }
}

impl Cleanup for ResultShared {
    fn cleanup(&self) {
        self.close();
    }
}

impl ResultState {
    fn check_offset(&self, offset: i64) -> DbResult<usize> {
        if self.cursor.is_none() {
            return Err(DbError::Closed);
        }
        if offset < 0 || offset as usize >= self.columns.len() {
            return Err(UsageError::InvalidFieldOffset {
                offset,
                count: self.columns.len(),
            }
            .into());
        }
        Ok(offset as usize)
    }

    fn column_number(&self, name: &str) -> Option<usize> {
        match name.split_once('.') {
            None => self.columns.iter().position(|c| c.label == name),
            Some((table, label)) => self
                .columns
                .iter()
                .position(|c| c.table == table && c.label == label),
        }
    }

    fn table_metadata(&mut self, col: &ColumnInfo) -> Option<Arc<TableMetadata>> {
        if col.table.is_empty() {
            return None;
        }
        let catalog = if col.catalog.is_empty() {
            &self.catalog
        } else {
            &col.catalog
        };
        let key = TableKey::new(self.url.as_str(), catalog.as_str(), col.schema.as_str(), col.table.as_str());
        if let Some(known) = self.tables.get(&key) {
            return known.clone();
        }

        let found = match self.owner.upgrade() {
            Some(conn) => self
                .metadata
                .get_or_describe(&key, || conn.describe(&key.catalog, &key.schema, &key.table)),
            None => Err(DriverError::closed("connection")),
        };
        let found = match found {
            Ok(meta) => Some(meta),
            Err(e) => {
                debug!(table = %key.table, error = %e, "table describe failed");
                None
            }
        };
        self.tables.insert(key, found.clone());
        found
    }

    fn field_info(&mut self, index: usize) -> FieldInfo {
        let col = self.columns[index].clone();
        let meta = self.table_metadata(&col);
        let desc: Option<&ColumnDescriptor> = meta.as_ref().and_then(|m| m.column(&col.name));

        let type_name = desc
            .map(|d| d.type_name.to_ascii_lowercase())
            .unwrap_or_else(|| col.type_name.to_ascii_lowercase());
        let timestamp = col.sql_type == SqlType::Timestamp && col.type_name == "TIMESTAMP";
        let bit_type = matches!(col.sql_type, SqlType::Bit | SqlType::Boolean);

        let table = if col.table.is_empty() && self.from_describe {
            "COLUMNS".to_string()
        } else {
            col.table.clone()
        };

        trace!(column = %col.label, described = desc.is_some(), "field info");
        FieldInfo {
            name: col.label.clone(),
            orgname: col.name.clone(),
            table,
            schema: col.schema.clone(),
            catalog: col.catalog.clone(),
            field_type: self.backend.field_type(&col),
            type_name: col.type_name.clone(),
            length: col.precision,
            scale: col.scale,
            not_null: match desc {
                Some(d) => !d.nullable,
                None => col.nullable == Nullability::NoNulls,
            },
            primary_key: desc.is_some_and(|d| d.primary_key),
            multiple_key: desc.is_some_and(|d| d.multiple_key),
            unique_key: desc.is_some_and(|d| d.unique_key),
            numeric: col.sql_type.is_numeric(),
            blob: type_name.contains("blob") || col.sql_type == SqlType::LongVarChar,
            unsigned: !bit_type
                && (desc.is_some_and(|d| d.unsigned) || type_name.contains("unsigned"))
                || (col.sql_type == SqlType::Bit && col.type_name == "BIT")
                || timestamp,
            zero_fill: desc.is_some_and(|d| d.zero_fill) || type_name.contains("zerofill") || timestamp,
            binary: col.sql_type.is_binary()
                || col.sql_type == SqlType::Time
                || timestamp
                || type_name.contains("date"),
            enumeration: type_name.starts_with("enum"),
            set: type_name.starts_with("set"),
            auto_increment: desc.is_some_and(|d| d.auto_increment) || col.auto_increment,
            timestamp,
        }
    }
}

fn row_count(cursor: &mut dyn Cursor) -> i64 {
    match count_rows(cursor) {
        Ok(n) => n,
        Err(e) => {
            trace!(error = %e, "row count unavailable");
            -1
        }
    }
}

fn count_rows(cursor: &mut dyn Cursor) -> Result<i64, DriverError> {
    let current = cursor.row()?;
    let after_last = cursor.is_after_last()?;
    cursor.last()?;
    let rows = cursor.row()?;
    if after_last {
        cursor.absolute(rows + 1)?;
    } else {
        restore(cursor, current)?;
    }
    Ok(rows as i64)
}

fn restore(cursor: &mut dyn Cursor, row: usize) -> Result<(), DriverError> {
    if row == 0 {
        cursor.before_first()
    } else {
        cursor.absolute(row).map(|_| ())
    }
}
