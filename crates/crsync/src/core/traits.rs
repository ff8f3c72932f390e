//! Core traits for repository access.
//!
//! - [`Repository`]: relational handle over one content repository
//! - [`Dialect`]: SQL syntax strategy for the underlying engine
//! - [`LobSink`]: receiver for streamed attribute values
//!
//! The sync engine only talks to these traits; drivers under `drivers/`
//! implement them for concrete databases.

use std::collections::HashMap;

use async_trait::async_trait;

use super::object::{ContentId, ContentObject};
use super::schema::{AttributeKind, AttributeType, ObjectType};
use super::value::{AttributeMap, Value};
use crate::error::{Result, SyncError};

/// SQL syntax strategy for different database engines.
pub trait Dialect: Send + Sync {
    /// Dialect identifier (e.g., "sqlite").
    fn name(&self) -> &str;

    /// Quote an identifier (table name, column name, etc.).
    fn quote_ident(&self, name: &str) -> String;

    /// Physical column type for a quick column of the given kind.
    fn column_type(&self, kind: AttributeKind) -> &'static str;

    /// Get a parameter placeholder for the given 1-based index.
    fn param_placeholder(&self, index: usize) -> String;

    /// Maximum number of bind parameters per statement.
    fn max_params(&self) -> usize {
        500
    }
}

/// Receives attribute values one row at a time while a LOB is streamed.
#[async_trait(?Send)]
pub trait LobSink: Send {
    /// Accept one value with its sort order.
    async fn accept(&mut self, sortorder: i32, value: Value) -> Result<()>;
}

/// Relational handle over one content repository.
///
/// Catalog writes and quick-column DDL are used by the schema migrator;
/// object reads by the planner; object and value writes by the attribute
/// copier. `store_object`, `delete_object` and `set_last_update` form the
/// CMS write path.
#[async_trait(?Send)]
pub trait Repository: Send + Sync {
    /// Human-readable repository name for logs and reports.
    fn name(&self) -> &str;

    /// SQL dialect of this repository.
    fn dialect(&self) -> &dyn Dialect;

    /// Create the table family if it does not exist yet (idempotent).
    async fn init_schema(&self) -> Result<()>;

    // ===== Transaction scope =====

    /// Route subsequent statements through a new transaction.
    async fn begin(&self) -> Result<()>;

    /// Commit the open transaction, if any.
    async fn commit(&self) -> Result<()>;

    /// Roll back the open transaction, if any.
    async fn rollback(&self) -> Result<()>;

    // ===== Schema catalog =====

    /// Load all object types with their attribute types.
    async fn load_object_types(&self) -> Result<Vec<ObjectType>>;

    /// Insert an object type header.
    async fn insert_object_type(&self, object_type: &ObjectType) -> Result<()>;

    /// Update an object type header.
    async fn update_object_type(&self, object_type: &ObjectType) -> Result<()>;

    /// Insert an attribute type definition.
    async fn insert_attribute_type(&self, attr: &AttributeType) -> Result<()>;

    /// Update an attribute type definition.
    async fn update_attribute_type(&self, attr: &AttributeType) -> Result<()>;

    /// Delete an attribute type definition.
    async fn delete_attribute_type(&self, object_type: i32, name: &str) -> Result<()>;

    // ===== Quick columns and value maintenance =====

    /// Quick columns currently present on the instance table.
    async fn quick_columns(&self) -> Result<Vec<String>>;

    /// Add a quick column to the instance table.
    async fn add_quick_column(&self, column: &str, kind: AttributeKind) -> Result<()>;

    /// Drop a quick column from the instance table.
    async fn drop_quick_column(&self, column: &str) -> Result<()>;

    /// Back-fill an attribute's quick column from its stored values.
    async fn fill_quick_column(&self, attr: &AttributeType) -> Result<u64>;

    /// Rewrite sort orders after the multivalue flag changed.
    async fn convert_sortorder(&self, object_type: i32, name: &str, multivalue: bool)
        -> Result<u64>;

    /// Delete the values of an attribute for every object of a type.
    async fn delete_attribute_values(&self, object_type: i32, name: &str) -> Result<u64>;

    // ===== Status =====

    /// Repository-wide last-update watermark (0 when never set).
    async fn last_update(&self) -> Result<i64>;

    /// Set the watermark. Belongs to the write path, not the sync engine.
    async fn set_last_update(&self, timestamp: i64) -> Result<()>;

    // ===== Objects =====

    /// Number of content objects.
    async fn count_objects(&self) -> Result<i64>;

    /// Object headers ordered by content id, optionally only those updated
    /// after a timestamp.
    async fn list_objects(&self, updated_after: Option<i64>) -> Result<Vec<ContentObject>>;

    /// Headers of the given objects (missing ids are skipped).
    async fn load_objects(&self, ids: &[ContentId]) -> Result<Vec<ContentObject>>;

    /// Values of the given attributes for the given objects. Rows whose
    /// value column is NULL are treated as absent.
    async fn load_attributes(
        &self,
        ids: &[ContentId],
        attributes: &[&AttributeType],
    ) -> Result<HashMap<ContentId, AttributeMap>>;

    /// Stream one attribute's values of one object into a sink, in sort
    /// order. Returns the number of values delivered.
    async fn stream_attribute(
        &self,
        id: ContentId,
        attr: &AttributeType,
        sink: &mut (dyn LobSink + Send),
    ) -> Result<u64>;

    /// Insert an instance row.
    async fn insert_object(&self, object: &ContentObject) -> Result<()>;

    /// Update an instance row.
    async fn update_object(&self, object: &ContentObject) -> Result<()>;

    /// Delete an object with all its values.
    async fn delete_object(&self, id: ContentId) -> Result<()>;

    /// Replace all values of one attribute of one object (and its quick
    /// column). An empty slice removes the attribute.
    async fn replace_attribute(
        &self,
        id: ContentId,
        attr: &AttributeType,
        values: &[Value],
    ) -> Result<u64>;

    /// Append one value row (used by streamed copies).
    async fn insert_attribute_value(
        &self,
        id: ContentId,
        attr: &AttributeType,
        sortorder: i32,
        value: &Value,
    ) -> Result<()>;

    /// Create or update an object with its attribute values.
    async fn store_object(&self, object: &ContentObject) -> Result<()> {
        let types = self.load_object_types().await?;
        let object_type = types
            .iter()
            .find(|t| t.id == object.id.obj_type)
            .ok_or(SyncError::UnknownObjectType(object.id.obj_type))?;

        if self.load_objects(&[object.id]).await?.is_empty() {
            self.insert_object(object).await?;
        } else {
            self.update_object(object).await?;
        }

        for (name, values) in &object.attributes {
            let attr = object_type
                .attribute(name)
                .ok_or_else(|| SyncError::UnknownAttribute {
                    object_type: object_type.id,
                    attribute: name.clone(),
                })?;
            self.replace_attribute(object.id, attr, values).await?;
        }
        Ok(())
    }
}
