//! Schema reconciliation: catalog, diff and migration.

pub mod catalog;
pub mod diff;
pub mod migrator;

pub use catalog::{CatalogChange, ConflictMode, SchemaCatalog};
pub use diff::{ChangeSet, DiffSummary, Modified, SchemaDiff};
pub use migrator::{MigrationOptions, MigrationPlan, MigrationStep, MigrationSummary, SchemaMigrator};
