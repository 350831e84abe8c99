//!
//! naml-std-db - Database compatibility core
//!
//! Implements the resource semantics behind naml's legacy procedural
//! database APIs (mysql/mysqli, pgsql, oci8 and the portable pdo layer) on
//! top of one generic driver interface.
//!
//! ## Resources
//!
//! - `ConnectionResource`: connect, query, catalog switching, transactions,
//!   multi-statement queries
//! - `ResultResource`: row fetching in numeric/associative/both modes,
//!   field introspection, seeking
//! - `StatementResource`: prepare, typed parameter binding, result binding
//!
//! Every resource registers with a `Session`; closing the session releases
//! whatever is still open.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use naml_std_db::{BackendKind, ConnectParams, ConnectionResource, DbConfig, DbRuntime, Session};
//!
//! let runtime = DbRuntime::new(DbConfig::default());
//! let session = Session::new(runtime);
//! let conn = ConnectionResource::new(&session, BackendKind::Mysql);
//! conn.connect(driver, ConnectParams::url("sqlite::memory:"))?;
//! if let Some(result) = conn.query("SELECT id, name FROM users")?.into_rows() {
//!     while let Some(row) = result.fetch_assoc()? {
//!         println!("{:?}", row.name("name"));
//!     }
//! }
//! ```
//!
//! ## Drivers
//!
//! Drivers implement the traits in `driver`. `cursor::MaterializedCursor`
//! covers drivers whose native result sets cannot outlive a statement, and
//! `testing::ScriptedDriver` is an in-memory driver for tests, built with
//! the `testing` feature.
//!

pub mod backend;
pub mod coerce;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod driver;
pub mod errors;
pub mod metadata;
pub mod multi;
pub mod result;
pub mod scan;
pub mod session;
pub mod statement;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tokenizer;
pub mod value;

pub use backend::{Backend, BackendKind};
pub use config::{DbConfig, TextEncoding};
pub use connection::{ConnectionResource, QueryOutcome, escape_string, info_to_version};
pub use cursor::MaterializedCursor;
pub use driver::{ConnectParams, Driver, DriverCapabilities};
pub use errors::{ConfigError, DbError, DbResult, DriverError, UsageError};
pub use metadata::{TableKey, TableMetadata, TableMetadataCache};
pub use multi::MultiResultQueue;
pub use result::{FieldInfo, FieldRef, ResultResource};
pub use session::{DbRuntime, Session};
pub use statement::{BoundVar, ParamKind, StatementResource};
pub use value::{DbValue, FetchMode, Row, RowKey};
