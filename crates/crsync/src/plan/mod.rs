//! Change-set planning: which source objects take part in a run and what
//! has to be written for each of them.
//!
//! Candidates are selected from the source (all objects in a full run, only
//! objects updated after the target watermark in an incremental run) and
//! filtered by the rule. Each batch of candidates is then classified against
//! the target as insert, update or unchanged, down to the attribute level.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, warn};

use crate::core::object::{ContentId, ContentObject};
use crate::core::schema::AttributeType;
use crate::core::traits::Repository;
use crate::core::value::{AttributeMap, Value};
use crate::error::Result;
use crate::rule::RuleFilter;
use crate::schema::SchemaCatalog;
use crate::state::SyncMode;
use crate::transfer::DigestSink;

/// What to do with one attribute of one object.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeAction {
    /// Write this value list, replacing whatever the target holds.
    Replace(Vec<Value>),
    /// Remove all target values.
    Remove,
    /// Copy the values row by row from the source.
    Stream,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeUpdate {
    pub name: String,
    pub action: AttributeAction,
}

/// Object-level classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectAction {
    Insert,
    Update,
    Unchanged,
}

/// Classified change for one candidate object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectChange {
    /// Source header.
    pub object: ContentObject,
    pub action: ObjectAction,
    /// Instance row differs from the target (always true for inserts).
    pub header_changed: bool,
    /// Attributes to write, in definition order.
    pub attributes: Vec<AttributeUpdate>,
}

/// Computes candidates, per-object changes and deletions for one run.
pub struct ChangeSetPlanner<'a> {
    source: &'a dyn Repository,
    target: &'a dyn Repository,
    source_catalog: &'a SchemaCatalog,
    target_catalog: &'a SchemaCatalog,
    rule: &'a RuleFilter,
    streaming: bool,
}

impl<'a> ChangeSetPlanner<'a> {
    pub fn new(
        source: &'a dyn Repository,
        target: &'a dyn Repository,
        source_catalog: &'a SchemaCatalog,
        target_catalog: &'a SchemaCatalog,
        rule: &'a RuleFilter,
    ) -> Self {
        Self {
            source,
            target,
            source_catalog,
            target_catalog,
            rule,
            streaming: false,
        }
    }

    /// Treat LOB attributes as streamed: compared by digest and copied row by row.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Rule-matching source headers for this run, ordered by content id.
    pub async fn select_candidates(&self, mode: SyncMode, watermark: i64) -> Result<Vec<ContentObject>> {
        let updated_after = match mode {
            SyncMode::Full => None,
            SyncMode::Incremental => Some(watermark),
        };
        let headers = self.source.list_objects(updated_after).await?;
        let listed = headers.len();

        let mut unknown = BTreeSet::new();
        let known: Vec<ContentObject> = headers
            .into_iter()
            .filter(|o| {
                let ok = self.source_catalog.object_type(o.id.obj_type).is_some();
                if !ok {
                    unknown.insert(o.id.obj_type);
                }
                ok
            })
            .collect();
        for obj_type in unknown {
            warn!(
                "{}: skipping objects of undefined object type {}",
                self.source.name(),
                obj_type
            );
        }

        let candidates = self.filter_by_rule(known).await?;
        debug!(
            "{}: {} of {} listed objects selected",
            self.source.name(),
            candidates.len(),
            listed
        );
        Ok(candidates)
    }

    /// Keep the objects the rule accepts, returned as headers.
    async fn filter_by_rule(&self, objects: Vec<ContentObject>) -> Result<Vec<ContentObject>> {
        if self.rule.is_match_all() {
            return Ok(objects);
        }

        let required = self.rule.required_attributes();
        let attrs: Vec<&AttributeType> = self
            .source_catalog
            .object_types()
            .flat_map(|t| t.attributes.iter())
            .filter(|a| required.contains(&a.name))
            .collect();
        let mut values = if attrs.is_empty() || objects.is_empty() {
            HashMap::new()
        } else {
            let ids: Vec<ContentId> = objects.iter().map(|o| o.id).collect();
            self.source.load_attributes(&ids, &attrs).await?
        };

        let mut selected = Vec::with_capacity(objects.len());
        for mut object in objects {
            if let Some(loaded) = values.remove(&object.id) {
                object.attributes = loaded;
            }
            if self.rule.matches(&object)? {
                selected.push(object.header());
            }
        }
        Ok(selected)
    }

    fn streams(&self, attr: &AttributeType) -> bool {
        self.streaming && attr.kind.is_lob()
    }

    /// Classify a batch of candidates against the target.
    pub async fn classify(&self, batch: &[ContentObject]) -> Result<Vec<ObjectChange>> {
        let ids: Vec<ContentId> = batch.iter().map(|o| o.id).collect();
        let existing: HashMap<ContentId, ContentObject> = self
            .target
            .load_objects(&ids)
            .await?
            .into_iter()
            .map(|o| (o.id, o))
            .collect();

        let types: BTreeSet<i32> = batch.iter().map(|o| o.id.obj_type).collect();
        let mut source_attrs = Vec::new();
        let mut target_attrs = Vec::new();
        for obj_type in types {
            let Some(object_type) = self.source_catalog.object_type(obj_type) else {
                continue;
            };
            for attr in object_type.attributes.iter().filter(|a| !self.streams(a)) {
                source_attrs.push(attr);
                if let Some(target_attr) = self.target_catalog.attribute(obj_type, &attr.name) {
                    target_attrs.push(target_attr);
                }
            }
        }

        let source_values = if source_attrs.is_empty() {
            HashMap::new()
        } else {
            self.source.load_attributes(&ids, &source_attrs).await?
        };
        let existing_ids: Vec<ContentId> =
            ids.iter().filter(|id| existing.contains_key(id)).copied().collect();
        let target_values = if target_attrs.is_empty() || existing_ids.is_empty() {
            HashMap::new()
        } else {
            self.target.load_attributes(&existing_ids, &target_attrs).await?
        };

        let mut changes = Vec::with_capacity(batch.len());
        for object in batch {
            let Some(object_type) = self.source_catalog.object_type(object.id.obj_type) else {
                continue;
            };
            let current = existing.get(&object.id);
            let source_map = source_values.get(&object.id);
            let target_map = target_values.get(&object.id);

            let mut attributes = Vec::new();
            for attr in &object_type.attributes {
                let action = if self.streams(attr) {
                    let differs = match current {
                        None => true,
                        Some(_) => self.lob_differs(object.id, attr).await?,
                    };
                    differs.then_some(AttributeAction::Stream)
                } else {
                    compare_values(values_of(source_map, &attr.name), values_of(target_map, &attr.name))
                };
                if let Some(action) = action {
                    attributes.push(AttributeUpdate {
                        name: attr.name.clone(),
                        action,
                    });
                }
            }

            let (action, header_changed) = match current {
                None => (ObjectAction::Insert, true),
                Some(target) => {
                    let header_changed = !target.same_header(object);
                    if header_changed || !attributes.is_empty() {
                        (ObjectAction::Update, header_changed)
                    } else {
                        (ObjectAction::Unchanged, false)
                    }
                }
            };
            changes.push(ObjectChange {
                object: object.header(),
                action,
                header_changed,
                attributes,
            });
        }
        Ok(changes)
    }

    /// Compare one LOB attribute by digest on both sides.
    async fn lob_differs(&self, id: ContentId, attr: &AttributeType) -> Result<bool> {
        let Some(target_attr) = self.target_catalog.attribute(id.obj_type, &attr.name) else {
            return Ok(true);
        };

        let mut source_digest = DigestSink::new();
        self.source.stream_attribute(id, attr, &mut source_digest).await?;
        let mut target_digest = DigestSink::new();
        self.target
            .stream_attribute(id, target_attr, &mut target_digest)
            .await?;
        Ok(source_digest.finish() != target_digest.finish())
    }

    /// Target objects to delete: those missing from the source and those
    /// whose source version the rule rejects. Ordered by content id.
    pub async fn select_deletions(&self) -> Result<Vec<ContentId>> {
        let target_ids: Vec<ContentId> = self
            .target
            .list_objects(None)
            .await?
            .into_iter()
            .map(|o| o.id)
            .collect();
        let present: HashSet<ContentId> = target_ids.iter().copied().collect();

        let shared: Vec<ContentObject> = self
            .source
            .list_objects(None)
            .await?
            .into_iter()
            .filter(|o| present.contains(&o.id))
            .collect();
        let keep: HashSet<ContentId> = self
            .filter_by_rule(shared)
            .await?
            .into_iter()
            .map(|o| o.id)
            .collect();

        Ok(target_ids
            .into_iter()
            .filter(|id| !keep.contains(id))
            .collect())
    }
}

fn values_of<'m>(map: Option<&'m AttributeMap>, name: &str) -> &'m [Value] {
    map.and_then(|m| m.get(name))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Decide the action for a buffered attribute. Ordered comparison; doubles
/// compare by bit pattern (see `Value`'s equality).
fn compare_values(source: &[Value], target: &[Value]) -> Option<AttributeAction> {
    if source == target {
        None
    } else if source.is_empty() {
        Some(AttributeAction::Remove)
    } else {
        Some(AttributeAction::Replace(source.to_vec()))
    }
}
