//! Object type and attribute type definitions.
//!
//! These types describe the fixed table family every content repository
//! shares: one catalog row per object type, one per attribute type, and the
//! storage rules (value column, quick column) that follow from them.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Attribute names that collide with columns of the instance table.
pub const RESERVED_ATTRIBUTE_NAMES: &[&str] = &[
    "obj_type",
    "contentid",
    "mother_obj_id",
    "motherid",
    "mother_obj_type",
    "updatetimestamp",
    "obj_id",
    "versionTimestamp",
];

/// Prefix of every quick column on the instance table.
pub const QUICK_COLUMN_PREFIX: &str = "quick_";

/// Data kind of an attribute.
///
/// The numeric codes are the values persisted in the attribute-type catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttributeKind {
    Text,
    ForeignObjectLink,
    Integer,
    TextLong,
    Blob,
    Long,
    Double,
    Date,
}

impl AttributeKind {
    /// Catalog code for this kind.
    pub fn code(self) -> i32 {
        match self {
            AttributeKind::Text => 1,
            AttributeKind::ForeignObjectLink => 2,
            AttributeKind::Integer => 3,
            AttributeKind::TextLong => 5,
            AttributeKind::Blob => 6,
            AttributeKind::Long => 8,
            AttributeKind::Double => 9,
            AttributeKind::Date => 10,
        }
    }

    /// Parse a catalog code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(AttributeKind::Text),
            2 => Some(AttributeKind::ForeignObjectLink),
            3 => Some(AttributeKind::Integer),
            5 => Some(AttributeKind::TextLong),
            6 => Some(AttributeKind::Blob),
            8 => Some(AttributeKind::Long),
            9 => Some(AttributeKind::Double),
            10 => Some(AttributeKind::Date),
            _ => None,
        }
    }

    /// Whether values of this kind are large objects.
    pub fn is_lob(self) -> bool {
        matches!(self, AttributeKind::TextLong | AttributeKind::Blob)
    }

    /// Column of the attribute-value table holding values of this kind.
    pub fn value_column(self) -> &'static str {
        match self {
            AttributeKind::Text | AttributeKind::ForeignObjectLink => "value_text",
            AttributeKind::Integer => "value_int",
            AttributeKind::Long => "value_long",
            AttributeKind::Double => "value_double",
            AttributeKind::Date => "value_date",
            AttributeKind::TextLong => "value_clob",
            AttributeKind::Blob => "value_blob",
        }
    }
}

impl std::fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AttributeKind::Text => "TEXT",
            AttributeKind::ForeignObjectLink => "FOREIGN_OBJECT_LINK",
            AttributeKind::Integer => "INTEGER",
            AttributeKind::TextLong => "TEXT_LONG",
            AttributeKind::Blob => "BLOB",
            AttributeKind::Long => "LONG",
            AttributeKind::Double => "DOUBLE",
            AttributeKind::Date => "DATE",
        };
        f.write_str(name)
    }
}

/// Definition of one named field on an object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeType {
    /// Owning object type id.
    pub object_type: i32,

    /// Attribute name, unique per object type. May contain dots.
    pub name: String,

    /// Data kind.
    pub kind: AttributeKind,

    /// Whether the attribute holds an ordered list of values.
    #[serde(default)]
    pub multivalue: bool,

    /// Whether the value is mirrored into a quick column.
    #[serde(default)]
    pub optimized: bool,

    /// Explicit quick column name (defaults to `quick_<name>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quick_name: Option<String>,

    /// Object type a link points at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_object_type: Option<i32>,

    /// Attribute on the linked type that points back (foreign links).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_link_attribute: Option<String>,

    /// Additional rule restricting the foreign link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_link_rule: Option<String>,

    /// Values are kept on the filesystem by the CMS.
    #[serde(default)]
    pub filesystem: bool,

    #[serde(default)]
    pub exclude_versioning: bool,
}

impl AttributeType {
    /// Create a plain single-valued attribute.
    pub fn new(object_type: i32, name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            object_type,
            name: name.into(),
            kind,
            multivalue: false,
            optimized: false,
            quick_name: None,
            linked_object_type: None,
            foreign_link_attribute: None,
            foreign_link_rule: None,
            filesystem: false,
            exclude_versioning: false,
        }
    }

    /// Mark the attribute as multivalue.
    pub fn multivalue(mut self) -> Self {
        self.multivalue = true;
        self
    }

    /// Mark the attribute as optimized with the default quick column.
    pub fn optimized(mut self) -> Self {
        self.optimized = true;
        self
    }

    /// Set an explicit quick column name.
    pub fn with_quick_name(mut self, quick_name: impl Into<String>) -> Self {
        self.quick_name = Some(quick_name.into());
        self
    }

    /// Set the linked object type.
    pub fn linked_to(mut self, object_type: i32) -> Self {
        self.linked_object_type = Some(object_type);
        self
    }

    /// Default quick column for an attribute name.
    pub fn default_quick_column(name: &str) -> String {
        let sanitized: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{}{}", QUICK_COLUMN_PREFIX, sanitized)
    }

    /// Physical quick column if the attribute is optimized.
    pub fn quick_column(&self) -> Option<String> {
        if !self.optimized {
            return None;
        }
        Some(
            self.quick_name
                .clone()
                .unwrap_or_else(|| Self::default_quick_column(&self.name)),
        )
    }

    /// Copy of this definition with optimization removed.
    pub fn without_optimization(&self) -> Self {
        Self {
            optimized: false,
            quick_name: None,
            ..self.clone()
        }
    }

    /// Validate name and flag combinations.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty()
            || RESERVED_ATTRIBUTE_NAMES
                .iter()
                .any(|r| r.eq_ignore_ascii_case(&self.name))
        {
            return Err(SyncError::InvalidAttributeName(self.name.clone()));
        }
        if self.optimized && self.multivalue {
            return Err(SyncError::inconsistent(
                &self.name,
                "optimized attributes cannot be multivalue",
            ));
        }
        if self.optimized && self.filesystem {
            return Err(SyncError::inconsistent(
                &self.name,
                "optimized attributes cannot be stored on the filesystem",
            ));
        }
        if let Some(quick) = &self.quick_name {
            let valid = quick.starts_with(QUICK_COLUMN_PREFIX)
                && quick.len() > QUICK_COLUMN_PREFIX.len()
                && quick.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(SyncError::inconsistent(
                    &self.name,
                    format!("invalid quick column name '{}'", quick),
                ));
            }
        }
        Ok(())
    }

    /// Structural differences from `other`: kind, multivalue, optimization,
    /// quick column identity. These need an altered table to change.
    pub fn structural_changes(&self, other: &AttributeType) -> Vec<&'static str> {
        let mut changes = Vec::new();
        if self.kind != other.kind {
            changes.push("data kind");
        }
        if self.multivalue != other.multivalue {
            changes.push("multivalue");
        }
        if self.optimized != other.optimized {
            changes.push("optimized");
        } else if self.quick_column() != other.quick_column() {
            changes.push("quick column");
        }
        changes
    }
}

/// Schema definition for a category of content objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectType {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub exclude_versioning: bool,
    #[serde(default)]
    pub attributes: Vec<AttributeType>,
}

impl ObjectType {
    /// Create an object type without attributes.
    pub fn new(id: i32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            exclude_versioning: false,
            attributes: Vec::new(),
        }
    }

    /// Add an attribute definition (builder style).
    pub fn with_attribute(mut self, mut attr: AttributeType) -> Self {
        attr.object_type = self.id;
        self.attributes.push(attr);
        self
    }

    /// Look up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeType> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Header equality (name, versioning flag), ignoring attributes.
    pub fn same_header(&self, other: &ObjectType) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.exclude_versioning == other.exclude_versioning
    }

    /// Copy of the header without attributes.
    pub fn header(&self) -> ObjectType {
        ObjectType {
            attributes: Vec::new(),
            ..self.clone()
        }
    }
}
