//! Content object identity and instance data.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::value::{AttributeMap, Value};
use crate::error::SyncError;

/// Compound content id, rendered as `"objType.objId"` at external boundaries.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ContentId {
    pub obj_type: i32,
    pub obj_id: i32,
}

impl ContentId {
    pub fn new(obj_type: i32, obj_id: i32) -> Self {
        Self { obj_type, obj_id }
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.obj_type, self.obj_id)
    }
}

impl FromStr for ContentId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SyncError::InvalidContentId(s.to_string());
        let (obj_type, obj_id) = s.split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            obj_type: obj_type.trim().parse().map_err(|_| invalid())?,
            obj_id: obj_id.trim().parse().map_err(|_| invalid())?,
        })
    }
}

/// One content object: instance row plus (optionally loaded) attribute values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentObject {
    pub id: ContentId,

    /// Node (channel) the object belongs to.
    #[serde(default)]
    pub node_id: i32,

    /// Parent object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mother: Option<ContentId>,

    /// Last modification time (seconds).
    #[serde(default)]
    pub update_timestamp: i64,

    /// Attribute values; empty when only the header was loaded.
    #[serde(default)]
    pub attributes: AttributeMap,
}

impl ContentObject {
    /// Create an object header.
    pub fn new(id: ContentId) -> Self {
        Self {
            id,
            node_id: 0,
            mother: None,
            update_timestamp: 0,
            attributes: AttributeMap::new(),
        }
    }

    pub fn with_node(mut self, node_id: i32) -> Self {
        self.node_id = node_id;
        self
    }

    pub fn with_mother(mut self, mother: ContentId) -> Self {
        self.mother = Some(mother);
        self
    }

    pub fn with_timestamp(mut self, update_timestamp: i64) -> Self {
        self.update_timestamp = update_timestamp;
        self
    }

    /// Set a single value.
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), vec![value.into()]);
        self
    }

    /// Set an ordered list of values.
    pub fn with_values(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.attributes.insert(name.into(), values);
        self
    }

    /// Values of an attribute, empty when absent.
    pub fn values(&self, name: &str) -> &[Value] {
        self.attributes.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Compare instance-row fields, ignoring attributes.
    pub fn same_header(&self, other: &ContentObject) -> bool {
        self.id == other.id
            && self.node_id == other.node_id
            && self.mother == other.mother
            && self.update_timestamp == other.update_timestamp
    }

    /// Copy of the instance row without attributes.
    pub fn header(&self) -> ContentObject {
        ContentObject {
            attributes: AttributeMap::new(),
            ..self.clone()
        }
    }
}
