//! Schema migration from a source catalog to a target repository.
//!
//! Migration happens in two steps. [`SchemaMigrator::plan`] turns a
//! [`SchemaDiff`] into steps and rejects the whole plan if any step is not
//! permitted, so nothing is written when the run cannot complete its schema
//! phase. [`SchemaMigrator::apply`] then executes the steps in order. Steps
//! applied before a failing one stay applied; planning is deterministic, so
//! a rerun picks up where the failed one stopped.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::catalog::{ConflictMode, SchemaCatalog};
use super::diff::SchemaDiff;
use crate::core::schema::{AttributeType, ObjectType};
use crate::core::traits::Repository;
use crate::error::{Result, SyncError};

/// Flags gating schema migration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Permit structural changes and attribute drops.
    pub allow_alter_table: bool,
    /// Never create, change or remove quick-column optimizations.
    pub ignore_optimized: bool,
}

/// One schema change to perform on the target.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum MigrationStep {
    CreateObjectType(ObjectType),
    UpdateObjectType(ObjectType),
    CreateAttribute(AttributeType),
    /// Structural change (kind, multivalue, optimization).
    AlterAttribute {
        from: AttributeType,
        to: AttributeType,
        changes: Vec<&'static str>,
    },
    /// Non-structural change (links, versioning, filesystem flags).
    UpdateAttribute(AttributeType),
    DropAttribute(AttributeType),
}

impl MigrationStep {
    /// Short description for logs and reports.
    pub fn describe(&self) -> String {
        match self {
            MigrationStep::CreateObjectType(t) => format!("create object type {} '{}'", t.id, t.name),
            MigrationStep::UpdateObjectType(t) => format!("update object type {} '{}'", t.id, t.name),
            MigrationStep::CreateAttribute(a) => {
                format!("create attribute {}.{} ({})", a.object_type, a.name, a.kind)
            }
            MigrationStep::AlterAttribute { to, changes, .. } => format!(
                "alter attribute {}.{} ({})",
                to.object_type,
                to.name,
                changes.join(", ")
            ),
            MigrationStep::UpdateAttribute(a) => {
                format!("update attribute {}.{}", a.object_type, a.name)
            }
            MigrationStep::DropAttribute(a) => {
                format!("drop attribute {}.{}", a.object_type, a.name)
            }
        }
    }
}

/// Ordered, fully validated list of schema changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationPlan {
    pub steps: Vec<MigrationStep>,
}

/// Counts of schema changes by category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationSummary {
    pub object_types_created: usize,
    pub object_types_updated: usize,
    pub attribute_types_created: usize,
    pub attribute_types_modified: usize,
    pub attribute_types_dropped: usize,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Count the steps per category.
    pub fn summary(&self) -> MigrationSummary {
        let mut summary = MigrationSummary::default();
        for step in &self.steps {
            match step {
                MigrationStep::CreateObjectType(_) => summary.object_types_created += 1,
                MigrationStep::UpdateObjectType(_) => summary.object_types_updated += 1,
                MigrationStep::CreateAttribute(_) => summary.attribute_types_created += 1,
                MigrationStep::AlterAttribute { .. } | MigrationStep::UpdateAttribute(_) => {
                    summary.attribute_types_modified += 1
                }
                MigrationStep::DropAttribute(_) => summary.attribute_types_dropped += 1,
            }
        }
        summary
    }
}

/// Plans and applies schema changes.
pub struct SchemaMigrator {
    options: MigrationOptions,
}

impl SchemaMigrator {
    pub fn new(options: MigrationOptions) -> Self {
        Self { options }
    }

    /// Compute and validate the steps that bring `target` in line with `source`.
    pub fn plan(&self, source: &SchemaCatalog, target: &SchemaCatalog) -> Result<MigrationPlan> {
        let diff = SchemaDiff::between(source, target);
        let mut steps = Vec::new();

        for object_type in &diff.object_types.added {
            steps.push(MigrationStep::CreateObjectType(object_type.clone()));
        }
        for modified in &diff.object_types.modified {
            steps.push(MigrationStep::UpdateObjectType(modified.source.clone()));
        }
        for orphan in &diff.object_types.removed {
            debug!(
                "Object type {} '{}' exists only in target, leaving it",
                orphan.id, orphan.name
            );
        }

        for added in &diff.attributes.added {
            let desired = if self.options.ignore_optimized {
                added.without_optimization()
            } else {
                added.clone()
            };
            desired.validate()?;
            if desired.optimized && !self.options.allow_alter_table {
                return Err(SyncError::schema_change(
                    desired.object_type,
                    &desired.name,
                    "new optimized attribute requires a quick column",
                ));
            }
            self.warn_conflicts(target, &desired);
            steps.push(MigrationStep::CreateAttribute(desired));
        }

        for modified in &diff.attributes.modified {
            let current = &modified.target;
            let desired = self.desired_definition(&modified.source, current);
            desired.validate()?;

            if desired == *current {
                debug!(
                    "Quick column difference of {}.{} ignored",
                    current.object_type, current.name
                );
                continue;
            }

            let changes = current.structural_changes(&desired);
            if changes.is_empty() {
                steps.push(MigrationStep::UpdateAttribute(desired));
                continue;
            }
            if !self.options.allow_alter_table {
                return Err(SyncError::schema_change(
                    desired.object_type,
                    &desired.name,
                    format!("changing {}", changes.join(", ")),
                ));
            }
            self.warn_conflicts(target, &desired);
            steps.push(MigrationStep::AlterAttribute {
                from: current.clone(),
                to: desired,
                changes,
            });
        }

        for removed in &diff.attributes.removed {
            if self.options.allow_alter_table {
                steps.push(MigrationStep::DropAttribute(removed.clone()));
            } else {
                debug!(
                    "Attribute {}.{} no longer in source, leaving it",
                    removed.object_type, removed.name
                );
            }
        }

        Ok(MigrationPlan { steps })
    }

    /// Execute a plan against the target, keeping `catalog` in sync.
    pub async fn apply(
        &self,
        plan: &MigrationPlan,
        catalog: &mut SchemaCatalog,
        repo: &dyn Repository,
    ) -> Result<MigrationSummary> {
        let mut applied = MigrationPlan::default();

        for step in &plan.steps {
            info!("{}: {}", repo.name(), step.describe());
            match step {
                MigrationStep::CreateObjectType(t) | MigrationStep::UpdateObjectType(t) => {
                    catalog.save_object_type(repo, t).await?;
                }
                MigrationStep::CreateAttribute(a)
                | MigrationStep::UpdateAttribute(a)
                | MigrationStep::AlterAttribute { to: a, .. } => {
                    catalog
                        .save_attribute_type(repo, a, self.options.allow_alter_table)
                        .await?;
                }
                MigrationStep::DropAttribute(a) => {
                    catalog
                        .delete_attribute_type(repo, a.object_type, &a.name)
                        .await?;
                }
            }
            applied.steps.push(step.clone());
        }

        Ok(applied.summary())
    }

    /// Target definition for an attribute that differs between the stores.
    fn desired_definition(&self, source: &AttributeType, target: &AttributeType) -> AttributeType {
        if !self.options.ignore_optimized {
            return source.clone();
        }

        // The target's optimization is authoritative.
        let mut desired = AttributeType {
            optimized: target.optimized,
            quick_name: target.quick_name.clone(),
            ..source.clone()
        };
        if desired.optimized && (desired.multivalue || desired.filesystem) {
            desired = desired.without_optimization();
        }
        desired
    }

    fn warn_conflicts(&self, target: &SchemaCatalog, attr: &AttributeType) {
        for conflict in target.conflicting_attributes(attr, ConflictMode::ByName) {
            warn!(
                "Attribute '{}' of type {} differs structurally from type {}",
                attr.name, attr.object_type, conflict.object_type
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::AttributeKind;
    use crate::drivers::SqliteRepository;
    use tempfile::TempDir;

    fn folder(attrs: Vec<AttributeType>) -> SchemaCatalog {
        let mut folder = ObjectType::new(10002, "folder");
        for attr in attrs {
            folder = folder.with_attribute(attr);
        }
        SchemaCatalog::from_types(vec![folder])
    }

    fn migrator(allow_alter_table: bool, ignore_optimized: bool) -> SchemaMigrator {
        SchemaMigrator::new(MigrationOptions {
            allow_alter_table,
            ignore_optimized,
        })
    }

    #[test]
    fn test_new_optimized_attribute_gated() {
        let source = folder(vec![AttributeType::new(0, "test", AttributeKind::Text).optimized()]);
        let target = folder(vec![]);

        let err = migrator(false, false).plan(&source, &target).unwrap_err();
        assert!(matches!(err, SyncError::SchemaChangeNotAllowed { .. }));

        let plan = migrator(true, false).plan(&source, &target).unwrap();
        assert_eq!(plan.summary().attribute_types_created, 1);

        // Created plain when optimization is ignored.
        let plan = migrator(false, true).plan(&source, &target).unwrap();
        match &plan.steps[..] {
            [MigrationStep::CreateAttribute(attr)] => assert!(!attr.optimized),
            other => panic!("unexpected plan: {:?}", other),
        }
    }

    #[test]
    fn test_ignore_optimized_keeps_target_structure() {
        let source = folder(vec![AttributeType::new(0, "opt", AttributeKind::Text).optimized()]);
        let target = folder(vec![AttributeType::new(0, "opt", AttributeKind::Text)]);

        let plan = migrator(false, true).plan(&source, &target).unwrap();
        assert!(plan.is_empty());

        let source = folder(vec![AttributeType::new(0, "opt", AttributeKind::Text)
            .optimized()
            .with_quick_name("quick_other")]);
        let target = folder(vec![AttributeType::new(0, "opt", AttributeKind::Text).optimized()]);
        assert!(migrator(false, true).plan(&source, &target).unwrap().is_empty());
        assert!(migrator(false, false).plan(&source, &target).is_err());
    }

    #[test]
    fn test_removed_attribute_dropped_only_when_allowed() {
        let source = folder(vec![]);
        let target = folder(vec![AttributeType::new(0, "legacy", AttributeKind::Text)]);

        assert!(migrator(false, false).plan(&source, &target).unwrap().is_empty());
        let plan = migrator(true, false).plan(&source, &target).unwrap();
        assert_eq!(plan.summary().attribute_types_dropped, 1);
    }

    #[test]
    fn test_non_structural_change_always_planned() {
        let source = folder(vec![AttributeType::new(0, "link", AttributeKind::ForeignObjectLink)
            .linked_to(10007)]);
        let target = folder(vec![AttributeType::new(0, "link", AttributeKind::ForeignObjectLink)]);

        let plan = migrator(false, false).plan(&source, &target).unwrap();
        assert!(matches!(plan.steps[..], [MigrationStep::UpdateAttribute(_)]));
    }

    #[test]
    fn test_gating_rejects_whole_plan() {
        let source = folder(vec![
            AttributeType::new(0, "fresh", AttributeKind::Text),
            AttributeType::new(0, "content", AttributeKind::Text).multivalue(),
        ]);
        let target = folder(vec![AttributeType::new(0, "content", AttributeKind::Text)]);

        let err = migrator(false, false).plan(&source, &target).unwrap_err();
        assert!(matches!(
            err,
            SyncError::SchemaChangeNotAllowed { ref attribute, .. } if attribute == "content"
        ));
    }

    #[tokio::test]
    async fn test_apply_creates_types_and_attributes() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite:{}", dir.path().join("target.db").display());
        let repo = SqliteRepository::connect_url(&url).await.unwrap();
        repo.init_schema().await.unwrap();

        let source = folder(vec![
            AttributeType::new(0, "name", AttributeKind::Text).optimized(),
            AttributeType::new(0, "content", AttributeKind::Text).multivalue(),
        ]);
        let mut target = SchemaCatalog::load(&repo).await.unwrap();
        let migrator = migrator(true, false);

        let plan = migrator.plan(&source, &target).unwrap();
        let summary = migrator.apply(&plan, &mut target, &repo).await.unwrap();
        assert_eq!(summary.object_types_created, 1);
        assert_eq!(summary.attribute_types_created, 2);

        let reloaded = SchemaCatalog::load(&repo).await.unwrap();
        assert_eq!(reloaded, source);
        assert_eq!(repo.quick_columns().await.unwrap(), vec!["quick_name"]);
        assert!(migrator.plan(&source, &reloaded).unwrap().is_empty());
    }
}
