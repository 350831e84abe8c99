///
/// Per-backend behavior strategies.
///
/// Every legacy API family (mysql/mysqli, pgsql, oci8, the portable one)
/// runs on the same connection/result/statement machinery. What differs is
/// a handful of hooks, resolved once at connect time from the API family
/// and the driver's declared capabilities:
///
/// - `is_seekable`: request scrollable cursors
/// - `keep_statement_open`: retain the statement after DML and failures
/// - `inspect`: backend-specific query interception (`USE`, `SET NAMES`)
/// - `decode_column_string`: character column decoding
/// - `field_type`: script-visible column type names
/// - `lob_flavor`: how large objects are surfaced
/// - `prepare_mode`: plain prepared statement or callable statement
///

use std::fmt;
use std::sync::Arc;

use crate::config::TextEncoding;
use crate::driver::{ColumnInfo, DriverCapabilities, PrepareMode, SqlType};
use crate::tokenizer::next_token;
use crate::value::LobFlavor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Generic,
    Mysql,
    Postgres,
    Oracle,
}

impl BackendKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "generic" | "pdo" => Some(BackendKind::Generic),
            "mysql" | "mysqli" => Some(BackendKind::Mysql),
            "postgres" | "pgsql" | "postgresql" => Some(BackendKind::Postgres),
            "oracle" | "oci8" => Some(BackendKind::Oracle),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Generic => "generic",
            BackendKind::Mysql => "mysql",
            BackendKind::Postgres => "postgres",
            BackendKind::Oracle => "oracle",
        }
    }

    /// Resource name used in diagnostics.
    pub fn resource_name(self) -> &'static str {
        match self {
            BackendKind::Generic => "PDO",
            BackendKind::Mysql => "Mysqli",
            BackendKind::Postgres => "Postgres",
            BackendKind::Oracle => "Oracle",
        }
    }

    pub fn resolve(self, caps: DriverCapabilities) -> Arc<dyn Backend> {
        match self {
            BackendKind::Generic => Arc::new(GenericBackend { caps }),
            BackendKind::Mysql => Arc::new(MysqlBackend { caps }),
            BackendKind::Postgres => Arc::new(PostgresBackend { caps }),
            BackendKind::Oracle => Arc::new(OracleBackend { caps }),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of the last statement, tracked for `info()` and DESCRIBE field tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastSqlKind {
    Update,
    Describe,
}

/// A query answered by the backend hook without reaching the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intercept {
    /// `USE <name>`: switch catalog through the connection.
    UseCatalog(String),
    /// Acknowledged and dropped (`SET NAMES ...`).
    Acknowledge,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryHint {
    pub intercept: Option<Intercept>,
    pub last_sql: Option<LastSqlKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Decode with the connection encoding; otherwise every byte is one
    /// character.
    pub unicode_semantics: bool,
    pub encoding: TextEncoding,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            unicode_semantics: true,
            encoding: TextEncoding::Utf8,
        }
    }
}

pub trait Backend: Send + Sync + fmt::Debug {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> DriverCapabilities;

    fn is_seekable(&self) -> bool {
        self.capabilities().scrollable_cursors
    }

    fn keep_statement_open(&self) -> bool {
        false
    }

    fn prepare_mode(&self) -> PrepareMode {
        PrepareMode::Statement
    }

    fn inspect(&self, _sql: &str) -> QueryHint {
        QueryHint::default()
    }

    fn decode_column_string(&self, _column: &ColumnInfo, bytes: &[u8], opts: DecodeOptions) -> String {
        if opts.unicode_semantics {
            opts.encoding.decode(bytes)
        } else {
            TextEncoding::Latin1.decode(bytes)
        }
    }

    fn field_type(&self, column: &ColumnInfo) -> &'static str {
        generic_field_type(column.sql_type)
    }

    fn lob_flavor(&self) -> LobFlavor {
        LobFlavor::Plain
    }
}

pub fn generic_field_type(sql_type: SqlType) -> &'static str {
    match sql_type {
        SqlType::BigInt
        | SqlType::Bit
        | SqlType::Integer
        | SqlType::SmallInt
        | SqlType::TinyInt => "int",
        SqlType::LongVarBinary | SqlType::LongVarChar => "blob",
        SqlType::Char | SqlType::VarChar | SqlType::Binary | SqlType::VarBinary => "string",
        SqlType::Time => "time",
        SqlType::Date => "date",
        SqlType::Timestamp => "datetime",
        SqlType::Decimal | SqlType::Double | SqlType::Real => "real",
        _ => "unknown",
    }
}

#[derive(Debug)]
pub struct GenericBackend {
    caps: DriverCapabilities,
}

impl Backend for GenericBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Generic
    }

    fn capabilities(&self) -> DriverCapabilities {
        self.caps
    }
}

#[derive(Debug)]
pub struct MysqlBackend {
    caps: DriverCapabilities,
}

impl Backend for MysqlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mysql
    }

    fn capabilities(&self) -> DriverCapabilities {
        self.caps
    }

    fn inspect(&self, sql: &str) -> QueryHint {
        let mut hint = QueryHint::default();
        let Some(tok) = next_token(sql, None) else {
            return hint;
        };

        match tok.first_char() {
            'u' | 'U' => {
                if tok.matches("USE") {
                    if let Some(name) = next_token(sql, Some(&tok)) {
                        hint.intercept = Some(Intercept::UseCatalog(name.unquoted().to_string()));
                    }
                } else if tok.matches("UPDATE") {
                    hint.last_sql = Some(LastSqlKind::Update);
                }
            }
            'd' | 'D' => {
                if tok.matches("DESCRIBE") {
                    hint.last_sql = Some(LastSqlKind::Describe);
                }
            }
            's' | 'S' => {
                if tok.matches("SET") && sql.to_lowercase().contains(" names ") {
                    hint.intercept = Some(Intercept::Acknowledge);
                }
            }
            _ => {}
        }
        hint
    }

    /// Columns with a driver-reported character set are decoded with that
    /// set, in both text modes. Without one the driver's own decoding
    /// (the connection encoding) applies.
    fn decode_column_string(&self, column: &ColumnInfo, bytes: &[u8], opts: DecodeOptions) -> String {
        let declared = if self.caps.column_charsets {
            column.charset.as_deref().and_then(TextEncoding::from_label)
        } else {
            None
        };
        match declared {
            Some(encoding) => encoding.decode(bytes),
            None => opts.encoding.decode(bytes),
        }
    }

    fn field_type(&self, column: &ColumnInfo) -> &'static str {
        match column.sql_type {
            SqlType::Timestamp if column.type_name.eq_ignore_ascii_case("TIMESTAMP") => "timestamp",
            SqlType::Timestamp => "datetime",
            SqlType::Date if column.type_name.eq_ignore_ascii_case("YEAR") => "year",
            SqlType::Date => "date",
            other => generic_field_type(other),
        }
    }
}

#[derive(Debug)]
pub struct PostgresBackend {
    caps: DriverCapabilities,
}

impl Backend for PostgresBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn capabilities(&self) -> DriverCapabilities {
        self.caps
    }

    fn keep_statement_open(&self) -> bool {
        true
    }
}

#[derive(Debug)]
pub struct OracleBackend {
    caps: DriverCapabilities,
}

impl Backend for OracleBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Oracle
    }

    fn capabilities(&self) -> DriverCapabilities {
        self.caps
    }

    fn prepare_mode(&self) -> PrepareMode {
        PrepareMode::Call
    }

    fn lob_flavor(&self) -> LobFlavor {
        LobFlavor::OciDescriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mysql() -> Arc<dyn Backend> {
        BackendKind::Mysql.resolve(DriverCapabilities::default())
    }

    #[test]
    fn test_backend_names_round_trip() {
        for kind in [
            BackendKind::Generic,
            BackendKind::Mysql,
            BackendKind::Postgres,
            BackendKind::Oracle,
        ] {
            assert_eq!(BackendKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(BackendKind::from_name("OCI8"), Some(BackendKind::Oracle));
        assert_eq!(BackendKind::from_name("sybase"), None);
    }

    #[test]
    fn test_mysql_use_is_intercepted() {
        let hint = mysql().inspect("use `shop`");
        assert_eq!(hint.intercept, Some(Intercept::UseCatalog("shop".to_string())));
        assert!(mysql().inspect("USE").intercept.is_none());
    }

    #[test]
    fn test_mysql_set_names_is_acknowledged() {
        let hint = mysql().inspect("SET NAMES 'utf8'");
        assert_eq!(hint.intercept, Some(Intercept::Acknowledge));
        assert!(mysql().inspect("SET autocommit=0").intercept.is_none());
    }

    #[test]
    fn test_mysql_tracks_last_sql() {
        assert_eq!(mysql().inspect("update t set a=1").last_sql, Some(LastSqlKind::Update));
        assert_eq!(mysql().inspect("DESCRIBE t").last_sql, Some(LastSqlKind::Describe));
        assert_eq!(mysql().inspect("SELECT 1").last_sql, None);
    }

    #[test]
    fn test_generic_backend_does_not_intercept() {
        let generic = BackendKind::Generic.resolve(DriverCapabilities::default());
        assert_eq!(generic.inspect("USE shop"), QueryHint::default());
        assert!(!generic.keep_statement_open());
    }

    #[test]
    fn test_field_types() {
        let ts = ColumnInfo::new("t", SqlType::Timestamp).type_name("TIMESTAMP");
        let dt = ColumnInfo::new("t", SqlType::Timestamp).type_name("DATETIME");
        let year = ColumnInfo::new("y", SqlType::Date).type_name("YEAR");
        let generic = BackendKind::Generic.resolve(DriverCapabilities::default());

        assert_eq!(generic.field_type(&ts), "datetime");
        assert_eq!(mysql().field_type(&ts), "timestamp");
        assert_eq!(mysql().field_type(&dt), "datetime");
        assert_eq!(mysql().field_type(&year), "year");
        assert_eq!(generic_field_type(SqlType::Bit), "int");
        assert_eq!(generic_field_type(SqlType::LongVarChar), "blob");
        assert_eq!(generic_field_type(SqlType::Decimal), "real");
        assert_eq!(generic_field_type(SqlType::Float), "unknown");
        assert_eq!(generic_field_type(SqlType::Boolean), "unknown");
    }

    #[test]
    fn test_seekability_follows_capabilities() {
        let caps = DriverCapabilities {
            scrollable_cursors: false,
            ..DriverCapabilities::default()
        };
        assert!(!BackendKind::Postgres.resolve(caps).is_seekable());
        assert!(BackendKind::Postgres.resolve(caps).keep_statement_open());
        assert_eq!(BackendKind::Oracle.resolve(caps).prepare_mode(), PrepareMode::Call);
    }

    #[test]
    fn test_mysql_column_charset_decoding() {
        let caps = DriverCapabilities {
            column_charsets: true,
            ..DriverCapabilities::default()
        };
        let backend = BackendKind::Mysql.resolve(caps);
        let mut col = ColumnInfo::new("s", SqlType::VarChar);
        col.charset = Some("latin1".to_string());
        let opts = DecodeOptions::default();
        assert_eq!(backend.decode_column_string(&col, &[0xe9], opts), "é");

        col.charset = None;
        assert_eq!(backend.decode_column_string(&col, "é".as_bytes(), opts), "é");
    }

    #[test]
    fn test_legacy_mode_decodes_single_byte() {
        let generic = BackendKind::Generic.resolve(DriverCapabilities::default());
        let col = ColumnInfo::new("s", SqlType::VarChar);
        let legacy = DecodeOptions {
            unicode_semantics: false,
            encoding: TextEncoding::Utf8,
        };
        assert_eq!(generic.decode_column_string(&col, "é".as_bytes(), legacy), "Ã©");
    }
}
