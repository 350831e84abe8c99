///
/// Error types for the database compatibility core.
///
/// Two layers:
/// - `DriverError` is what a connectivity driver reports. It never crosses
///   the public surface of a resource unconverted.
/// - `DbError` is what every public operation returns on failure. Backend
///   refusals, closed resources, and programmer misuse (`UsageError`) are
///   distinct variants so callers can tell "the backend said no" from
///   "this was called wrong".
///

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    General,
    /// The driver does not support the requested capability (e.g. scrolling
    /// a forward-only cursor).
    Unsupported,
    /// The statement ran but a value was truncated; the update count is valid.
    DataTruncation,
    /// A stored value could not be read as the requested native type.
    Conversion,
    Closed,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub message: String,
    pub code: i32,
    pub sql_state: Option<String>,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::General,
            message: message.into(),
            code: 0,
            sql_state: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: i32) -> Self {
        Self {
            code,
            ..Self::new(message)
        }
    }

    pub fn unsupported(what: &str) -> Self {
        Self {
            kind: DriverErrorKind::Unsupported,
            ..Self::new(format!("{} is not supported by this driver", what))
        }
    }

    pub fn conversion(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Conversion,
            ..Self::new(message)
        }
    }

    pub fn truncation(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::DataTruncation,
            ..Self::new(message)
        }
    }

    pub fn closed(what: &str) -> Self {
        Self {
            kind: DriverErrorKind::Closed,
            ..Self::new(format!("{} is closed", what))
        }
    }

    /// Message as recorded on a connection: falls back to a description of
    /// the error when the driver supplied an empty message.
    pub fn recorded_message(&self) -> String {
        if self.message.is_empty() {
            format!("{:?} driver error (code {})", self.kind, self.code)
        } else {
            self.message.clone()
        }
    }
}

/// Programmer misuse. Never produced by a backend refusal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("{resource} attempt to open multiple connections")]
    AlreadyConnected { resource: &'static str },

    #[error("connection has been closed and cannot be reopened")]
    ConnectionClosed,

    #[error("invalid field offset {offset} (result has {count} fields)")]
    InvalidFieldOffset { offset: i64, count: usize },

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("number of types ({types}) does not match number of parameters ({params})")]
    ParamCountMismatch { types: usize, params: usize },

    #[error("invalid type string '{0}'")]
    InvalidParamType(String),

    #[error("statement has not been prepared")]
    NotPrepared,

    #[error("statement has not been executed")]
    NotExecuted,

    #[error("number of bound variables ({bound}) does not equal number of columns ({columns})")]
    BoundVariableCount { bound: usize, columns: usize },

    #[error("query was empty")]
    EmptyQuery,
}

#[derive(Debug, Clone, Error)]
pub enum DbError {
    #[error("{message}")]
    Backend { message: String, code: i32 },

    #[error("connection is not available")]
    NotConnected,

    #[error("resource is closed")]
    Closed,

    #[error("row {row} is out of range (result has {rows} rows)")]
    RowOutOfRange { row: i64, rows: i64 },

    #[error(transparent)]
    Usage(#[from] UsageError),
}

impl DbError {
    pub fn is_usage(&self) -> bool {
        matches!(self, DbError::Usage(_))
    }

    pub fn code(&self) -> i32 {
        match self {
            DbError::Backend { code, .. } => *code,
            _ => 0,
        }
    }
}

impl From<DriverError> for DbError {
    fn from(e: DriverError) -> Self {
        match e.kind {
            DriverErrorKind::Closed => DbError::Closed,
            _ => DbError::Backend {
                message: e.recorded_message(),
                code: e.code,
            },
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for '{key}': {reason}")]
    InvalidValue { key: &'static str, reason: String },
}
