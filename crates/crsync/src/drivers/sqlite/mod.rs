//! SQLite database driver.
//!
//! This module provides SQLite-specific implementations for:
//! - [`SqliteDialect`]: SQL syntax strategy
//! - [`SqliteRepository`]: Content repository handle
//!
//! # Connection String
//!
//! Uses SQLx connection format:
//! ```text
//! sqlite:/path/to/content.db
//! ```

mod dialect;
mod repository;

pub use dialect::SqliteDialect;
pub use repository::SqliteRepository;
