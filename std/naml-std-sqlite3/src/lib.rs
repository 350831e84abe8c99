///
/// naml SQLite3 Database Support
///
/// A driver for the naml-std-db compatibility core built on rusqlite with
/// bundled SQLite, so there is no system dependency.
///
/// Architecture:
/// - `SqliteDriver` opens one rusqlite connection per core connection. A
///   catalog is a database file `<root>/<name>.sqlite3`; without a root
///   directory only the in-memory catalog exists.
/// - Statements and prepared statements share the connection behind a
///   `parking_lot::Mutex`, so they can outlive the borrow rusqlite ties
///   them to.
/// - Query results are eagerly materialized into `MaterializedCursor`s to
///   avoid lifetime issues with rusqlite's borrowed rows.
/// - Errors carry SQLite's extended result code.
///

pub mod sqlite;

pub use sqlite::*;
