//! Schema diff between two catalogs.
//!
//! Object types are matched by id, attribute types by (object type, name).
//! Object types that exist only in the target never produce attribute
//! changes: they are outside the source's view and are left alone.

use serde::Serialize;

use super::catalog::SchemaCatalog;
use crate::core::schema::{AttributeType, ObjectType};

/// A definition present on both sides with differing content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Modified<T> {
    /// Definition in the source catalog.
    pub source: T,
    /// Definition in the target catalog.
    pub target: T,
}

/// Added, removed and modified definitions, relative to the target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeSet<T> {
    /// Present in the source only.
    pub added: Vec<T>,
    /// Present in the target only.
    pub removed: Vec<T>,
    /// Present in both with different content.
    pub modified: Vec<Modified<T>>,
}

impl<T> Default for ChangeSet<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
            modified: Vec::new(),
        }
    }
}

impl<T> ChangeSet<T> {
    /// True if nothing differs.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Total number of differences.
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }
}

/// Summary statistics for a schema diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub object_types_added: usize,
    pub object_types_removed: usize,
    pub object_types_modified: usize,
    pub attributes_added: usize,
    pub attributes_removed: usize,
    pub attributes_modified: usize,
}

/// Complete structural difference between a source and a target catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaDiff {
    /// Object type headers (attributes stripped).
    pub object_types: ChangeSet<ObjectType>,
    /// Attribute types of object types defined in the source.
    pub attributes: ChangeSet<AttributeType>,
}

impl SchemaDiff {
    /// Compare two catalogs.
    pub fn between(source: &SchemaCatalog, target: &SchemaCatalog) -> Self {
        Self {
            object_types: type_diff(source, target),
            attributes: attribute_diff(source, target),
        }
    }

    /// True if the catalogs describe the same schema.
    pub fn is_empty(&self) -> bool {
        self.object_types.is_empty() && self.attributes.is_empty()
    }

    /// Count the differences per category.
    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            object_types_added: self.object_types.added.len(),
            object_types_removed: self.object_types.removed.len(),
            object_types_modified: self.object_types.modified.len(),
            attributes_added: self.attributes.added.len(),
            attributes_removed: self.attributes.removed.len(),
            attributes_modified: self.attributes.modified.len(),
        }
    }
}

/// Diff object type headers by id.
pub fn type_diff(source: &SchemaCatalog, target: &SchemaCatalog) -> ChangeSet<ObjectType> {
    let mut diff = ChangeSet::default();

    for src in source.object_types() {
        match target.object_type(src.id) {
            None => diff.added.push(src.header()),
            Some(tgt) if !src.same_header(tgt) => diff.modified.push(Modified {
                source: src.header(),
                target: tgt.header(),
            }),
            Some(_) => {}
        }
    }
    for tgt in target.object_types() {
        if source.object_type(tgt.id).is_none() {
            diff.removed.push(tgt.header());
        }
    }

    diff
}

/// Diff attribute types by (object type, name).
pub fn attribute_diff(source: &SchemaCatalog, target: &SchemaCatalog) -> ChangeSet<AttributeType> {
    let mut diff = ChangeSet::default();

    for src_type in source.object_types() {
        let tgt_type = target.object_type(src_type.id);

        for src in &src_type.attributes {
            match tgt_type.and_then(|t| t.attribute(&src.name)) {
                None => diff.added.push(src.clone()),
                Some(tgt) if tgt != src => diff.modified.push(Modified {
                    source: src.clone(),
                    target: tgt.clone(),
                }),
                Some(_) => {}
            }
        }

        if let Some(tgt_type) = tgt_type {
            for tgt in &tgt_type.attributes {
                if src_type.attribute(&tgt.name).is_none() {
                    diff.removed.push(tgt.clone());
                }
            }
        }
    }

    diff
}
