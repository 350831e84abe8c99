///
/// Generic SQL connectivity driver interface.
///
/// The compatibility core never talks to a wire protocol. Everything it
/// needs from a backend goes through these traits, which mirror the
/// classic call-level interface: connections create statements, statements
/// execute and hand out cursors, cursors expose column metadata and native
/// values for the current row.
///
/// Drivers differ in capability. A driver that cannot scroll returns
/// `DriverErrorKind::Unsupported` from the positioning calls, and declares
/// what it can do up front through `DriverCapabilities` so backend
/// strategies are resolved once at connect time.
///

use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::errors::DriverError;

/// Declared SQL type of a result column, as reported by cursor metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Null,
    Bit,
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Float,
    Double,
    Decimal,
    Numeric,
    Char,
    VarChar,
    LongVarChar,
    Binary,
    VarBinary,
    LongVarBinary,
    Blob,
    Clob,
    Date,
    Time,
    Timestamp,
    Other,
}

impl SqlType {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt
        )
    }

    pub fn is_floating(self) -> bool {
        matches!(self, SqlType::Real | SqlType::Float | SqlType::Double)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer()
            || self.is_floating()
            || matches!(self, SqlType::Decimal | SqlType::Numeric)
    }

    pub fn is_character(self) -> bool {
        matches!(self, SqlType::Char | SqlType::VarChar | SqlType::LongVarChar)
    }

    pub fn is_binary(self) -> bool {
        matches!(
            self,
            SqlType::Binary | SqlType::VarBinary | SqlType::LongVarBinary
        )
    }

    pub fn is_blob(self) -> bool {
        matches!(
            self,
            SqlType::LongVarBinary | SqlType::LongVarChar | SqlType::Blob | SqlType::Clob
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nullability {
    NoNulls,
    Nullable,
    Unknown,
}

/// Cursor metadata for one result column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    /// Label as seen by the query (alias if one was given).
    pub label: String,
    /// Underlying column name.
    pub name: String,
    pub sql_type: SqlType,
    /// Backend type name (`"VARCHAR"`, `"bool"`, `"TIMESTAMP"`, ...).
    pub type_name: String,
    pub table: String,
    pub schema: String,
    pub catalog: String,
    pub precision: u32,
    pub scale: i32,
    pub nullable: Nullability,
    pub signed: bool,
    pub currency: bool,
    pub auto_increment: bool,
    /// Per-column character set; only filled by drivers that declare
    /// `DriverCapabilities::column_charsets`.
    pub charset: Option<String>,
}

impl ColumnInfo {
    pub fn new(label: impl Into<String>, sql_type: SqlType) -> Self {
        let label = label.into();
        Self {
            name: label.clone(),
            label,
            sql_type,
            type_name: String::new(),
            table: String::new(),
            schema: String::new(),
            catalog: String::new(),
            precision: 0,
            scale: 0,
            nullable: Nullability::Unknown,
            signed: sql_type.is_numeric(),
            currency: false,
            auto_increment: false,
            charset: None,
        }
    }

    pub fn type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn nullable(mut self, nullable: Nullability) -> Self {
        self.nullable = nullable;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobKind {
    Binary,
    Character,
}

/// Large-object locator handed out by a driver. Streaming is the job of the
/// runtime's LOB helper objects; the core only passes locators through.
pub trait LargeObject: Send + Sync + fmt::Debug {
    fn kind(&self) -> LobKind;

    fn length(&self) -> Result<u64, DriverError>;
}

/// Native value of one column in the current row.
#[derive(Debug, Clone)]
pub enum NativeValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    /// Undecoded character data, in the connection's wire encoding.
    Text(Vec<u8>),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Lob(Arc<dyn LargeObject>),
}

impl NativeValue {
    pub fn text(s: &str) -> Self {
        NativeValue::Text(s.as_bytes().to_vec())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, NativeValue::Null)
    }
}

/// Value bound to a prepared-statement placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Null,
    Int(i64),
    Double(f64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    ForwardOnly,
    /// Scroll-insensitive, read-only.
    Scrollable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareMode {
    Statement,
    /// Callable statement (stored procedures, cursor-as-parameter binding).
    Call,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverCapabilities {
    pub scrollable_cursors: bool,
    pub column_charsets: bool,
    pub generated_keys: bool,
}

impl Default for DriverCapabilities {
    fn default() -> Self {
        Self {
            scrollable_cursors: true,
            column_charsets: false,
            generated_keys: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverWarning {
    pub message: String,
    pub code: i32,
    pub sql_state: Option<String>,
}

/// Column description from an auxiliary table introspection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnDescriptor {
    pub name: String,
    pub type_name: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub multiple_key: bool,
    pub unique_key: bool,
    pub zero_fill: bool,
    pub unsigned: bool,
    pub auto_increment: bool,
}

/// Connection parameters. `database` may be empty, in which case the
/// catalog is resolved from the live connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub socket: Option<String>,
    pub flags: u32,
    pub driver: String,
    pub url: String,
    /// Declared text encoding of the connection; falls back to config.
    pub encoding: Option<String>,
}

impl ConnectParams {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }
}

pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    fn connect(&self, params: &ConnectParams) -> Result<Box<dyn DriverConnection>, DriverError>;
}

pub trait DriverConnection: Send {
    fn capabilities(&self) -> DriverCapabilities;

    fn catalog(&mut self) -> Result<String, DriverError>;

    fn set_catalog(&mut self, name: &str) -> Result<(), DriverError>;

    fn create_statement(&mut self, kind: CursorKind) -> Result<Box<dyn DriverStatement>, DriverError>;

    fn prepare(
        &mut self,
        sql: &str,
        kind: CursorKind,
        mode: PrepareMode,
    ) -> Result<Box<dyn DriverPrepared>, DriverError>;

    fn set_auto_commit(&mut self, on: bool) -> Result<(), DriverError>;

    fn commit(&mut self) -> Result<(), DriverError>;

    fn rollback(&mut self) -> Result<(), DriverError>;

    fn is_closed(&self) -> bool;

    fn close(&mut self) -> Result<(), DriverError>;

    /// Column descriptions for one table, in declaration order.
    fn describe_table(
        &mut self,
        catalog: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnDescriptor>, DriverError>;

    /// Metadata cursor listing the available catalogs.
    fn catalogs(&mut self) -> Result<Box<dyn Cursor>, DriverError>;

    fn server_version(&mut self) -> Result<String, DriverError>;
}

pub trait DriverStatement: Send {
    /// Runs `sql`. `true` when a result set was produced.
    fn execute(&mut self, sql: &str) -> Result<bool, DriverError>;

    fn take_result_set(&mut self) -> Option<Box<dyn Cursor>>;

    fn update_count(&self) -> i64;

    fn generated_key(&self) -> Option<i64> {
        None
    }

    fn warnings(&self) -> Vec<DriverWarning> {
        Vec::new()
    }

    fn close(&mut self) -> Result<(), DriverError>;
}

pub trait DriverPrepared: Send {
    /// Binds a 1-based placeholder.
    fn bind(&mut self, index: usize, value: BindValue) -> Result<(), DriverError>;

    fn clear_bindings(&mut self) -> Result<(), DriverError>;

    fn execute(&mut self) -> Result<bool, DriverError>;

    fn take_result_set(&mut self) -> Option<Box<dyn Cursor>>;

    fn update_count(&self) -> i64;

    fn close(&mut self) -> Result<(), DriverError>;
}

/// Result-set cursor. Positions are 1-based; `row()` is 0 when the cursor
/// is before the first row or after the last one.
pub trait Cursor: Send {
    fn columns(&self) -> &[ColumnInfo];

    fn next(&mut self) -> Result<bool, DriverError>;

    fn row(&self) -> Result<usize, DriverError>;

    fn before_first(&mut self) -> Result<(), DriverError>;

    /// Moves onto row `row`. `false` when that row does not exist, in which
    /// case the cursor is left after the last row.
    fn absolute(&mut self, row: usize) -> Result<bool, DriverError>;

    fn last(&mut self) -> Result<bool, DriverError>;

    fn is_after_last(&self) -> Result<bool, DriverError>;

    /// Native value of a 0-based column in the current row, read as the
    /// column's declared type.
    fn value(&self, column: usize) -> Result<NativeValue, DriverError>;

    fn close(&mut self) -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_type_categories() {
        assert!(SqlType::BigInt.is_integer());
        assert!(!SqlType::Bit.is_integer());
        assert!(SqlType::Float.is_floating());
        assert!(SqlType::Decimal.is_numeric());
        assert!(SqlType::LongVarChar.is_blob());
        assert!(SqlType::Char.is_character());
        assert!(SqlType::VarBinary.is_binary());
    }

    #[test]
    fn test_column_info_builder() {
        let col = ColumnInfo::new("id", SqlType::Integer)
            .type_name("INT")
            .table("users")
            .nullable(Nullability::NoNulls);
        assert_eq!(col.name, "id");
        assert_eq!(col.label, "id");
        assert_eq!(col.table, "users");
        assert!(col.signed);
        assert!(ColumnInfo::new("s", SqlType::VarChar).charset.is_none());
    }
}
