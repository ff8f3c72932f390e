//! Database driver implementations.
//!
//! Each driver module implements:
//! - `Dialect`: SQL syntax strategy for the database engine
//! - `Repository`: Catalog, object and value I/O over the content table family
//!
//! - [`sqlite`]: SQLite driver

pub mod sqlite;

pub use sqlite::{SqliteDialect, SqliteRepository};
