//! # crsync
//!
//! Content repository synchronization library.
//!
//! Keeps a target content repository converging toward a filtered view of a
//! source repository with:
//!
//! - **Schema reconciliation** of object types and attribute types, with
//!   structural changes gated behind `allow_alter_table`
//! - **Incremental sync** bounded by the repository watermark
//! - **Attribute-level diffs** so unaffected values are never rewritten
//! - **Rule filtering** of participating objects
//! - **LOB streaming** for long text and binary values
//!
//! ## Example
//!
//! ```rust,no_run
//! use crsync::{Config, SyncExecutor};
//!
//! #[tokio::main]
//! async fn main() -> crsync::Result<()> {
//!     let config = Config::load("crsync.yaml")?;
//!     let executor = SyncExecutor::from_config(&config).await?;
//!     let report = executor.run().await?;
//!     println!("{}", report.message());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod rule;
pub mod schema;
pub mod state;
pub mod transfer;

// Re-exports for convenient access
pub use crate::core::{
    AttributeKind, AttributeType, ContentId, ContentObject, ObjectType, Repository, Value,
};
pub use config::{Config, RepositoryConfig, SyncOptions};
pub use drivers::SqliteRepository;
pub use error::{Result, SyncError};
pub use orchestrator::{HealthReport, SyncExecutor, SyncReport};
pub use plan::ChangeSetPlanner;
pub use rule::{ExpressionParser, FnPredicate, Predicate, RuleFilter, RuleParser};
pub use schema::{SchemaCatalog, SchemaDiff, SchemaMigrator};
pub use state::{RunStatus, SyncMode, SyncPhase};
pub use transfer::AttributeCopier;
