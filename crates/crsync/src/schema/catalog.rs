//! Schema catalog: object types and attribute types of one repository.
//!
//! The catalog is the only place that writes type definitions. Saving an
//! attribute type also performs the storage work that follows from the
//! definition (quick columns, sort order conversion, value cleanup).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::diff::{self, ChangeSet};
use crate::core::schema::{AttributeType, ObjectType};
use crate::core::traits::Repository;
use crate::error::{Result, SyncError};

/// How `conflicting_attributes` decides that two definitions collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictMode {
    /// Same name with a different structure (kind, multivalue, optimization).
    ByName,
    /// Same name with a different data kind.
    ByType,
}

/// Outcome of saving a catalog definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogChange {
    Created,
    Modified,
    Unchanged,
}

/// In-memory catalog of object types, keyed by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaCatalog {
    types: BTreeMap<i32, ObjectType>,
}

impl SchemaCatalog {
    /// Load all definitions from a repository.
    pub async fn load(repo: &dyn Repository) -> Result<Self> {
        let types = repo.load_object_types().await?;
        debug!("{}: loaded {} object types", repo.name(), types.len());
        Ok(Self::from_types(types))
    }

    /// Build a catalog from definitions.
    pub fn from_types(types: impl IntoIterator<Item = ObjectType>) -> Self {
        Self {
            types: types.into_iter().map(|t| (t.id, t)).collect(),
        }
    }

    /// Object types ordered by id.
    pub fn object_types(&self) -> impl Iterator<Item = &ObjectType> {
        self.types.values()
    }

    /// Look up an object type.
    pub fn object_type(&self, id: i32) -> Option<&ObjectType> {
        self.types.get(&id)
    }

    /// Look up an attribute type.
    pub fn attribute(&self, object_type: i32, name: &str) -> Option<&AttributeType> {
        self.types.get(&object_type).and_then(|t| t.attribute(name))
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Definitions elsewhere in the catalog that collide with `candidate`.
    ///
    /// The candidate's own prior definition (same object type and name) is
    /// never reported.
    pub fn conflicting_attributes(
        &self,
        candidate: &AttributeType,
        mode: ConflictMode,
    ) -> Vec<&AttributeType> {
        self.types
            .values()
            .flat_map(|t| t.attributes.iter())
            .filter(|a| a.object_type != candidate.object_type && a.name == candidate.name)
            .filter(|a| match mode {
                ConflictMode::ByName => !a.structural_changes(candidate).is_empty(),
                ConflictMode::ByType => a.kind != candidate.kind,
            })
            .collect()
    }

    /// Object type headers added, removed or modified in `source` relative to this catalog.
    pub fn type_diff(&self, source: &SchemaCatalog) -> ChangeSet<ObjectType> {
        diff::type_diff(source, self)
    }

    /// Attribute types added, removed or modified in `source` relative to this catalog.
    pub fn attribute_diff(&self, source: &SchemaCatalog) -> ChangeSet<AttributeType> {
        diff::attribute_diff(source, self)
    }

    /// Check whether saving `attr` is allowed, without writing anything.
    pub fn check_attribute_type(
        &self,
        attr: &AttributeType,
        allow_structure_change: bool,
    ) -> Result<()> {
        attr.validate()?;

        match self.attribute(attr.object_type, &attr.name) {
            None => {
                if attr.optimized && !allow_structure_change {
                    return Err(SyncError::schema_change(
                        attr.object_type,
                        &attr.name,
                        "new optimized attribute requires a quick column",
                    ));
                }
            }
            Some(existing) => {
                let changes = existing.structural_changes(attr);
                if !changes.is_empty() && !allow_structure_change {
                    return Err(SyncError::schema_change(
                        attr.object_type,
                        &attr.name,
                        format!("changing {}", changes.join(", ")),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Insert or update an object type header.
    pub async fn save_object_type(
        &mut self,
        repo: &dyn Repository,
        object_type: &ObjectType,
    ) -> Result<CatalogChange> {
        let header = object_type.header();
        let change = match self.types.get_mut(&header.id) {
            None => {
                repo.insert_object_type(&header).await?;
                self.types.insert(header.id, header);
                CatalogChange::Created
            }
            Some(existing) if existing.same_header(&header) => CatalogChange::Unchanged,
            Some(existing) => {
                repo.update_object_type(&header).await?;
                existing.name = header.name;
                existing.exclude_versioning = header.exclude_versioning;
                CatalogChange::Modified
            }
        };
        if change != CatalogChange::Unchanged {
            info!(
                "{}: object type {} {:?}",
                repo.name(),
                object_type.id,
                change
            );
        }
        Ok(change)
    }

    /// Insert or update one attribute type and its storage.
    ///
    /// Changing kind, multivalue or optimization (or adding an optimized
    /// attribute) needs `allow_structure_change`.
    pub async fn save_attribute_type(
        &mut self,
        repo: &dyn Repository,
        attr: &AttributeType,
        allow_structure_change: bool,
    ) -> Result<CatalogChange> {
        if !self.types.contains_key(&attr.object_type) {
            attr.validate()?;
            return Err(SyncError::UnknownObjectType(attr.object_type));
        }
        self.check_attribute_type(attr, allow_structure_change)?;

        for conflict in self.conflicting_attributes(attr, ConflictMode::ByType) {
            warn!(
                "{}: attribute '{}' of type {} is {} but {} on type {}",
                repo.name(),
                attr.name,
                attr.object_type,
                attr.kind,
                conflict.kind,
                conflict.object_type
            );
        }

        let previous = self.attribute(attr.object_type, &attr.name).cloned();
        match previous {
            None => {
                repo.insert_attribute_type(attr).await?;
                self.put_attribute(attr.clone());
                if attr.optimized {
                    self.ensure_quick_column(repo, attr).await?;
                }
                info!(
                    "{}: created attribute type {}.{} ({})",
                    repo.name(),
                    attr.object_type,
                    attr.name,
                    attr.kind
                );
                Ok(CatalogChange::Created)
            }
            Some(existing) if existing == *attr => Ok(CatalogChange::Unchanged),
            Some(existing) => {
                repo.update_attribute_type(attr).await?;
                self.put_attribute(attr.clone());

                if existing.kind != attr.kind {
                    let removed = repo
                        .delete_attribute_values(attr.object_type, &attr.name)
                        .await?;
                    debug!(
                        "{}: cleared {} values of {}.{} after kind change",
                        repo.name(),
                        removed,
                        attr.object_type,
                        attr.name
                    );
                }
                if existing.multivalue != attr.multivalue {
                    repo.convert_sortorder(attr.object_type, &attr.name, attr.multivalue)
                        .await?;
                }

                let old_column = existing.quick_column();
                let new_column = attr.quick_column();
                if old_column != new_column || existing.kind != attr.kind {
                    if let Some(column) = old_column {
                        self.release_quick_column(repo, &column).await?;
                    }
                    if new_column.is_some() {
                        self.ensure_quick_column(repo, attr).await?;
                    }
                }

                info!(
                    "{}: modified attribute type {}.{}",
                    repo.name(),
                    attr.object_type,
                    attr.name
                );
                Ok(CatalogChange::Modified)
            }
        }
    }

    /// Delete an attribute type with its values and unused quick column.
    pub async fn delete_attribute_type(
        &mut self,
        repo: &dyn Repository,
        object_type: i32,
        name: &str,
    ) -> Result<()> {
        let Some(existing) = self.attribute(object_type, name).cloned() else {
            return Err(SyncError::UnknownAttribute {
                object_type,
                attribute: name.to_string(),
            });
        };

        repo.delete_attribute_values(object_type, name).await?;
        repo.delete_attribute_type(object_type, name).await?;
        if let Some(owner) = self.types.get_mut(&object_type) {
            owner.attributes.retain(|a| a.name != name);
        }
        if let Some(column) = existing.quick_column() {
            self.release_quick_column(repo, &column).await?;
        }

        info!(
            "{}: dropped attribute type {}.{}",
            repo.name(),
            object_type,
            name
        );
        Ok(())
    }

    fn put_attribute(&mut self, attr: AttributeType) {
        if let Some(owner) = self.types.get_mut(&attr.object_type) {
            match owner.attributes.iter_mut().find(|a| a.name == attr.name) {
                Some(slot) => *slot = attr,
                None => owner.attributes.push(attr),
            }
        }
    }

    /// Create the quick column if missing and back-fill it.
    async fn ensure_quick_column(&self, repo: &dyn Repository, attr: &AttributeType) -> Result<()> {
        let Some(column) = attr.quick_column() else {
            return Ok(());
        };
        if !repo.quick_columns().await?.contains(&column) {
            repo.add_quick_column(&column, attr.kind).await?;
        }
        let filled = repo.fill_quick_column(attr).await?;
        debug!("{}: back-filled {} rows of {}", repo.name(), filled, column);
        Ok(())
    }

    /// Drop a quick column unless another attribute still maps to it.
    async fn release_quick_column(&self, repo: &dyn Repository, column: &str) -> Result<()> {
        let in_use = self
            .types
            .values()
            .flat_map(|t| t.attributes.iter())
            .any(|a| a.quick_column().as_deref() == Some(column));
        if in_use {
            debug!("{}: quick column {} still in use", repo.name(), column);
            return Ok(());
        }
        if repo.quick_columns().await?.iter().any(|c| c == column) {
            repo.drop_quick_column(column).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::object::{ContentId, ContentObject};
    use crate::core::schema::AttributeKind;
    use crate::drivers::SqliteRepository;
    use tempfile::TempDir;

    async fn repository(dir: &TempDir) -> SqliteRepository {
        let url = format!("sqlite:{}", dir.path().join("catalog.db").display());
        let repo = SqliteRepository::connect_url(&url).await.unwrap();
        repo.init_schema().await.unwrap();
        repo
    }

    async fn with_folder(repo: &SqliteRepository) -> SchemaCatalog {
        let mut catalog = SchemaCatalog::load(repo).await.unwrap();
        catalog
            .save_object_type(repo, &ObjectType::new(10002, "folder"))
            .await
            .unwrap();
        catalog
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir).await;
        let mut catalog = with_folder(&repo).await;

        let name = AttributeType::new(10002, "name", AttributeKind::Text);
        assert_eq!(
            catalog.save_attribute_type(&repo, &name, false).await.unwrap(),
            CatalogChange::Created
        );
        assert_eq!(
            catalog.save_attribute_type(&repo, &name, false).await.unwrap(),
            CatalogChange::Unchanged
        );

        let reloaded = SchemaCatalog::load(&repo).await.unwrap();
        assert_eq!(reloaded, catalog);
    }

    #[tokio::test]
    async fn test_reserved_and_inconsistent_rejected() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir).await;
        let mut catalog = with_folder(&repo).await;

        let reserved = AttributeType::new(10002, "obj_id", AttributeKind::Integer);
        assert!(matches!(
            catalog.save_attribute_type(&repo, &reserved, true).await,
            Err(SyncError::InvalidAttributeName(_))
        ));

        let bad = AttributeType::new(10002, "tags", AttributeKind::Text)
            .multivalue()
            .optimized();
        assert!(matches!(
            catalog.save_attribute_type(&repo, &bad, true).await,
            Err(SyncError::InconsistentAttributeDefinition { .. })
        ));

        let unknown = AttributeType::new(4711, "name", AttributeKind::Text);
        assert!(matches!(
            catalog.save_attribute_type(&repo, &unknown, true).await,
            Err(SyncError::UnknownObjectType(4711))
        ));
        assert!(SchemaCatalog::load(&repo).await.unwrap().attribute(10002, "tags").is_none());
    }

    #[tokio::test]
    async fn test_structure_change_needs_permission() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir).await;
        let mut catalog = with_folder(&repo).await;

        let plain = AttributeType::new(10002, "content", AttributeKind::Text);
        catalog.save_attribute_type(&repo, &plain, false).await.unwrap();

        let multi = plain.clone().multivalue();
        let err = catalog
            .save_attribute_type(&repo, &multi, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SchemaChangeNotAllowed { .. }));
        assert_eq!(
            SchemaCatalog::load(&repo).await.unwrap().attribute(10002, "content"),
            Some(&plain)
        );

        let optimized = AttributeType::new(10002, "test", AttributeKind::Text).optimized();
        assert!(catalog
            .save_attribute_type(&repo, &optimized, false)
            .await
            .is_err());

        // Non-structural changes are always allowed.
        let mut unversioned = plain.clone();
        unversioned.exclude_versioning = true;
        assert_eq!(
            catalog.save_attribute_type(&repo, &unversioned, false).await.unwrap(),
            CatalogChange::Modified
        );
    }

    #[tokio::test]
    async fn test_optimize_and_unoptimize() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir).await;
        let mut catalog = with_folder(&repo).await;

        let plain = AttributeType::new(10002, "name", AttributeKind::Text);
        catalog.save_attribute_type(&repo, &plain, false).await.unwrap();
        let id = ContentId::new(10002, 1);
        repo.insert_object(&ContentObject::new(id)).await.unwrap();
        repo.replace_attribute(id, &plain, &["Ordner".into()])
            .await
            .unwrap();

        let optimized = plain.clone().optimized();
        catalog
            .save_attribute_type(&repo, &optimized, true)
            .await
            .unwrap();
        assert_eq!(repo.quick_columns().await.unwrap(), vec!["quick_name"]);
        let (quick,): (Option<String>,) = sqlx::query_as("SELECT quick_name FROM contentmap")
            .fetch_one(repo.pool())
            .await
            .unwrap();
        assert_eq!(quick.as_deref(), Some("Ordner"));

        catalog.save_attribute_type(&repo, &plain, true).await.unwrap();
        assert!(repo.quick_columns().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shared_quick_column_kept_while_used() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir).await;
        let mut catalog = with_folder(&repo).await;
        catalog
            .save_object_type(&repo, &ObjectType::new(10007, "page"))
            .await
            .unwrap();

        let folder_name = AttributeType::new(10002, "name", AttributeKind::Text).optimized();
        let page_name = AttributeType::new(10007, "name", AttributeKind::Text).optimized();
        catalog.save_attribute_type(&repo, &folder_name, true).await.unwrap();
        catalog.save_attribute_type(&repo, &page_name, true).await.unwrap();

        catalog.delete_attribute_type(&repo, 10002, "name").await.unwrap();
        assert_eq!(repo.quick_columns().await.unwrap(), vec!["quick_name"]);
        catalog.delete_attribute_type(&repo, 10007, "name").await.unwrap();
        assert!(repo.quick_columns().await.unwrap().is_empty());
    }

    #[test]
    fn test_conflicting_attributes() {
        let catalog = SchemaCatalog::from_types(vec![
            ObjectType::new(1, "a").with_attribute(AttributeType::new(0, "name", AttributeKind::Text)),
            ObjectType::new(2, "b")
                .with_attribute(AttributeType::new(0, "name", AttributeKind::Integer)),
            ObjectType::new(3, "c")
                .with_attribute(AttributeType::new(0, "name", AttributeKind::Text).multivalue()),
        ]);
        let candidate = AttributeType::new(1, "name", AttributeKind::Text);

        let by_type: Vec<i32> = catalog
            .conflicting_attributes(&candidate, ConflictMode::ByType)
            .iter()
            .map(|a| a.object_type)
            .collect();
        assert_eq!(by_type, vec![2]);

        let by_name: Vec<i32> = catalog
            .conflicting_attributes(&candidate, ConflictMode::ByName)
            .iter()
            .map(|a| a.object_type)
            .collect();
        assert_eq!(by_name, vec![2, 3]);
    }
}
