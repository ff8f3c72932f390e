//! Attribute copier: applies classified changes to the target repository.
//!
//! Buffered attributes are written from the value lists the planner loaded.
//! Streamed attributes (LOBs, when streaming is on) are copied row by row
//! from source to target through a [`LobSink`], so a large value is never
//! held in memory as a whole list.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::core::object::{ContentId, ContentObject};
use crate::core::schema::AttributeType;
use crate::core::traits::{LobSink, Repository};
use crate::core::value::Value;
use crate::error::{Result, SyncError};
use crate::plan::{AttributeAction, AttributeUpdate, ObjectAction, ObjectChange};
use crate::schema::SchemaCatalog;

/// Counters for one applied batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub attributes_written: usize,
    pub values_written: u64,
    pub lobs_streamed: usize,
}

/// Sink that folds streamed values into a SHA-256 digest.
#[derive(Default)]
pub struct DigestSink {
    hasher: Sha256,
    count: u64,
}

impl DigestSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of values seen.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Digest over the value count and every value in order.
    pub fn finish(mut self) -> [u8; 32] {
        self.hasher.update(self.count.to_le_bytes());
        self.hasher.finalize().into()
    }
}

#[async_trait(?Send)]
impl LobSink for DigestSink {
    async fn accept(&mut self, _sortorder: i32, value: Value) -> Result<()> {
        value.digest_into(&mut self.hasher);
        self.count += 1;
        Ok(())
    }
}

/// Sink that appends each streamed value to one target attribute.
///
/// Sort orders are renumbered for the target definition: `1..n` for a
/// multivalue attribute, `0` for a single-valued one (only the first value
/// is kept).
pub struct CopySink<'a> {
    target: &'a dyn Repository,
    id: ContentId,
    attr: &'a AttributeType,
    written: u64,
}

impl<'a> CopySink<'a> {
    pub fn new(target: &'a dyn Repository, id: ContentId, attr: &'a AttributeType) -> Self {
        Self {
            target,
            id,
            attr,
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

#[async_trait(?Send)]
impl LobSink for CopySink<'_> {
    async fn accept(&mut self, _sortorder: i32, value: Value) -> Result<()> {
        let sortorder = if self.attr.multivalue {
            self.written as i32 + 1
        } else if self.written == 0 {
            0
        } else {
            return Ok(());
        };
        self.target
            .insert_attribute_value(self.id, self.attr, sortorder, &value)
            .await?;
        self.written += 1;
        Ok(())
    }
}

/// Writes classified object changes into the target.
pub struct AttributeCopier<'a> {
    source: &'a dyn Repository,
    target: &'a dyn Repository,
    source_catalog: &'a SchemaCatalog,
    target_catalog: &'a SchemaCatalog,
    test: bool,
}

impl<'a> AttributeCopier<'a> {
    pub fn new(
        source: &'a dyn Repository,
        target: &'a dyn Repository,
        source_catalog: &'a SchemaCatalog,
        target_catalog: &'a SchemaCatalog,
    ) -> Self {
        Self {
            source,
            target,
            source_catalog,
            target_catalog,
            test: false,
        }
    }

    /// Count changes without writing anything.
    pub fn test_mode(mut self, test: bool) -> Self {
        self.test = test;
        self
    }

    /// Apply one batch of changes.
    pub async fn apply(&self, changes: &[ObjectChange]) -> Result<CopyStats> {
        let mut stats = CopyStats::default();
        for change in changes {
            match change.action {
                ObjectAction::Unchanged => {
                    stats.unchanged += 1;
                    continue;
                }
                ObjectAction::Insert => stats.inserted += 1,
                ObjectAction::Update => stats.updated += 1,
            }
            stats.attributes_written += change.attributes.len();
            if self.test {
                continue;
            }
            self.write_object(change, &mut stats).await?;
        }
        Ok(stats)
    }

    async fn write_object(&self, change: &ObjectChange, stats: &mut CopyStats) -> Result<()> {
        let object = &change.object;
        match change.action {
            ObjectAction::Insert => self.target.insert_object(object).await?,
            ObjectAction::Update if change.header_changed => {
                self.target.update_object(object).await?
            }
            _ => {}
        }

        for update in &change.attributes {
            let attr = self.target_attribute(object, &update.name)?;
            match &update.action {
                AttributeAction::Replace(values) => {
                    stats.values_written +=
                        self.target.replace_attribute(object.id, attr, values).await?;
                }
                AttributeAction::Remove => {
                    self.target.replace_attribute(object.id, attr, &[]).await?;
                }
                AttributeAction::Stream => {
                    stats.values_written += self.stream(object, update, attr).await?;
                    stats.lobs_streamed += 1;
                }
            }
        }
        debug!(
            "{}: wrote {} ({} attributes)",
            self.target.name(),
            object.id,
            change.attributes.len()
        );
        Ok(())
    }

    async fn stream(
        &self,
        object: &ContentObject,
        update: &AttributeUpdate,
        target_attr: &AttributeType,
    ) -> Result<u64> {
        let source_attr = self
            .source_catalog
            .attribute(object.id.obj_type, &update.name)
            .ok_or_else(|| SyncError::UnknownAttribute {
                object_type: object.id.obj_type,
                attribute: update.name.clone(),
            })?;

        self.target
            .replace_attribute(object.id, target_attr, &[])
            .await?;
        let mut sink = CopySink::new(self.target, object.id, target_attr);
        self.source
            .stream_attribute(object.id, source_attr, &mut sink)
            .await?;
        Ok(sink.written())
    }

    fn target_attribute(&self, object: &ContentObject, name: &str) -> Result<&'a AttributeType> {
        self.target_catalog
            .attribute(object.id.obj_type, name)
            .ok_or_else(|| SyncError::UnknownAttribute {
                object_type: object.id.obj_type,
                attribute: name.to_string(),
            })
    }

    /// Delete objects from the target.
    pub async fn delete(&self, ids: &[ContentId]) -> Result<usize> {
        if !self.test {
            for id in ids {
                self.target.delete_object(*id).await?;
            }
        }
        Ok(ids.len())
    }
}
