//! SQLite content repository.
//!
//! Implements the `Repository` trait over the fixed content table family.
//! Uses SQLx for connection pooling and async query execution. While a
//! transaction is open every statement is routed through it.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Row, Sqlite, Transaction};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, info};

use super::dialect::SqliteDialect;
use crate::config::RepositoryConfig;
use crate::core::object::{ContentId, ContentObject};
use crate::core::schema::{AttributeKind, AttributeType, ObjectType, QUICK_COLUMN_PREFIX};
use crate::core::traits::{Dialect, LobSink, Repository};
use crate::core::value::{AttributeMap, Value};
use crate::error::{Result, SyncError};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Busy timeout for locked database files.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Watermark key in the status table.
const LAST_UPDATE_KEY: &str = "lastupdate";

/// Content ids per IN-list when loading objects and values.
const LOAD_CHUNK_SIZE: usize = 400;

/// Layout DDL, one statement each.
const LAYOUT_DDL: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS contentobject (
        type INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        exclude_versioning INTEGER NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS contentattributetype (
        objecttype INTEGER NOT NULL,
        name TEXT NOT NULL,
        attributetype INTEGER NOT NULL,
        optimized INTEGER NOT NULL DEFAULT 0,
        quickname TEXT,
        multivalue INTEGER NOT NULL DEFAULT 0,
        linkedobjecttype INTEGER,
        foreignlinkattribute TEXT,
        foreignlinkattributerule TEXT,
        exclude_versioning INTEGER NOT NULL DEFAULT 0,
        filesystem INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (objecttype, name)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS contentmap (
        contentid TEXT NOT NULL UNIQUE,
        obj_id INTEGER NOT NULL,
        obj_type INTEGER NOT NULL,
        mother_obj_id INTEGER NOT NULL DEFAULT 0,
        mother_obj_type INTEGER NOT NULL DEFAULT 0,
        motherid TEXT,
        node_id INTEGER NOT NULL DEFAULT 0,
        updatetimestamp INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (obj_type, obj_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS contentattribute (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        contentid TEXT NOT NULL,
        name TEXT NOT NULL,
        sortorder INTEGER NOT NULL DEFAULT 0,
        value_text TEXT,
        value_int INTEGER,
        value_long INTEGER,
        value_double REAL,
        value_date TEXT,
        value_clob TEXT,
        value_blob BLOB
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_contentattribute_lookup
        ON contentattribute (contentid, name, sortorder)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_contentmap_updatetimestamp
        ON contentmap (updatetimestamp)"#,
    r#"CREATE TABLE IF NOT EXISTS contentstatus (
        name TEXT PRIMARY KEY,
        intvalue INTEGER,
        stringvalue TEXT
    )"#,
];

const VALUE_COLUMNS: &str =
    "value_text, value_int, value_long, value_double, value_date, value_clob, value_blob";

/// Connection used by a single statement: the open transaction or a pooled one.
enum Conn<'a> {
    Tx(MappedMutexGuard<'a, Transaction<'static, Sqlite>>),
    Pooled(PoolConnection<Sqlite>),
}

impl Deref for Conn<'_> {
    type Target = SqliteConnection;

    fn deref(&self) -> &SqliteConnection {
        match self {
            Conn::Tx(tx) => tx,
            Conn::Pooled(conn) => conn,
        }
    }
}

impl DerefMut for Conn<'_> {
    fn deref_mut(&mut self) -> &mut SqliteConnection {
        match self {
            Conn::Tx(tx) => tx,
            Conn::Pooled(conn) => conn,
        }
    }
}

/// SQLite content repository.
pub struct SqliteRepository {
    name: String,
    pool: SqlitePool,
    dialect: SqliteDialect,
    tx: Mutex<Option<Transaction<'static, Sqlite>>>,
}

impl SqliteRepository {
    /// Connect using repository configuration.
    pub async fn connect(config: &RepositoryConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await?;

        // Test connection
        sqlx::query("SELECT 1").fetch_one(&pool).await?;

        info!("Connected to repository: {}", config.display_name());

        Ok(Self {
            name: config.display_name().to_string(),
            pool,
            dialect: SqliteDialect::new(),
            tx: Mutex::new(None),
        })
    }

    /// Connect to a URL with default settings.
    pub async fn connect_url(url: &str) -> Result<Self> {
        Self::connect(&RepositoryConfig::new(url)).await
    }

    /// Underlying pool (for inspection and tooling).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close all pooled connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn conn(&self) -> Result<Conn<'_>> {
        let guard = self.tx.lock().await;
        match MutexGuard::try_map(guard, |tx| tx.as_mut()) {
            Ok(tx) => Ok(Conn::Tx(tx)),
            Err(_) => Ok(Conn::Pooled(self.pool.acquire().await?)),
        }
    }

    fn placeholders(&self, count: usize) -> String {
        (1..=count)
            .map(|i| self.dialect.param_placeholder(i))
            .collect::<Vec<_>>()
            .join(", ")
    }

    async fn update_quick_value(
        &self,
        conn: &mut SqliteConnection,
        id: ContentId,
        column: &str,
        value: Option<&Value>,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE contentmap SET {} = ? WHERE contentid = ?",
            self.dialect.quote_ident(column)
        );
        let query = sqlx::query(&sql);
        let query = match value {
            Some(v) => bind_value(query, v),
            None => query.bind(Option::<String>::None),
        };
        query.bind(id.to_string()).execute(&mut *conn).await?;
        Ok(())
    }

    /// Write one value into the column of the attribute's kind.
    async fn insert_value_row(
        &self,
        conn: &mut SqliteConnection,
        id: ContentId,
        attr: &AttributeType,
        sortorder: i32,
        value: &Value,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO contentattribute (contentid, name, sortorder, {}) VALUES (?, ?, ?, ?)",
            attr.kind.value_column()
        );
        let query = sqlx::query(&sql)
            .bind(id.to_string())
            .bind(&attr.name)
            .bind(sortorder);
        bind_value(query, value).execute(&mut *conn).await?;
        Ok(())
    }
}

/// Convert values to the attribute's kind, rejecting those that do not fit.
fn coerce_values(attr: &AttributeType, values: &[Value]) -> Result<Vec<Value>> {
    values
        .iter()
        .map(|value| {
            value
                .coerce_to(attr.kind)
                .ok_or_else(|| SyncError::ValueKindMismatch {
                    attribute: attr.name.clone(),
                    kind: attr.kind,
                    found: value.kind(),
                })
        })
        .collect()
}

/// Bind a value in the representation of its own storage column.
fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Text(s) | Value::LongText(s) | Value::Link(s) => query.bind(s.as_str()),
        Value::Int(v) => query.bind(*v),
        Value::Long(v) => query.bind(*v),
        Value::Double(v) => query.bind(*v),
        Value::Date(d) => query.bind(*d),
        Value::Blob(b) => query.bind(b.as_slice()),
    }
}

/// Decode the value column for `kind`; `None` when that column is NULL.
fn decode_value(row: &SqliteRow, kind: AttributeKind) -> Result<Option<Value>> {
    let column = kind.value_column();
    let value = match kind {
        AttributeKind::Text => row.try_get::<Option<String>, _>(column)?.map(Value::Text),
        AttributeKind::ForeignObjectLink => {
            row.try_get::<Option<String>, _>(column)?.map(Value::Link)
        }
        AttributeKind::TextLong => row.try_get::<Option<String>, _>(column)?.map(Value::LongText),
        AttributeKind::Integer => row.try_get::<Option<i32>, _>(column)?.map(Value::Int),
        AttributeKind::Long => row.try_get::<Option<i64>, _>(column)?.map(Value::Long),
        AttributeKind::Double => row.try_get::<Option<f64>, _>(column)?.map(Value::Double),
        AttributeKind::Date => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(column)?
            .map(Value::Date),
        AttributeKind::Blob => row.try_get::<Option<Vec<u8>>, _>(column)?.map(Value::Blob),
    };
    Ok(value)
}

fn object_from_row(row: &SqliteRow) -> Result<ContentObject> {
    let id = ContentId::new(row.try_get("obj_type")?, row.try_get("obj_id")?);
    let mother_type: i32 = row.try_get("mother_obj_type")?;
    let mother_id: i32 = row.try_get("mother_obj_id")?;

    let mut object = ContentObject::new(id)
        .with_node(row.try_get("node_id")?)
        .with_timestamp(row.try_get("updatetimestamp")?);
    if mother_type != 0 {
        object.mother = Some(ContentId::new(mother_type, mother_id));
    }
    Ok(object)
}

fn attribute_from_row(row: &SqliteRow) -> Result<AttributeType> {
    let name: String = row.try_get("name")?;
    let code: i32 = row.try_get("attributetype")?;
    let kind = AttributeKind::from_code(code).ok_or_else(|| {
        SyncError::inconsistent(&name, format!("unknown attribute kind code {}", code))
    })?;

    Ok(AttributeType {
        object_type: row.try_get("objecttype")?,
        name,
        kind,
        multivalue: row.try_get("multivalue")?,
        optimized: row.try_get("optimized")?,
        quick_name: row.try_get("quickname")?,
        linked_object_type: row.try_get("linkedobjecttype")?,
        foreign_link_attribute: row.try_get("foreignlinkattribute")?,
        foreign_link_rule: row.try_get("foreignlinkattributerule")?,
        filesystem: row.try_get("filesystem")?,
        exclude_versioning: row.try_get("exclude_versioning")?,
    })
}

#[async_trait(?Send)]
impl Repository for SqliteRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn init_schema(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        for ddl in LAYOUT_DDL {
            sqlx::query(ddl).execute(&mut *conn).await?;
        }
        debug!("{}: content layout ready", self.name);
        Ok(())
    }

    async fn begin(&self) -> Result<()> {
        let mut guard = self.tx.lock().await;
        if guard.is_some() {
            return Err(SyncError::State(format!(
                "{}: transaction already open",
                self.name
            )));
        }
        *guard = Some(self.pool.begin().await?);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let tx = self.tx.lock().await.take();
        if let Some(tx) = tx {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let tx = self.tx.lock().await.take();
        if let Some(tx) = tx {
            tx.rollback().await?;
        }
        Ok(())
    }

    async fn load_object_types(&self) -> Result<Vec<ObjectType>> {
        let mut conn = self.conn().await?;

        let type_rows = sqlx::query(
            "SELECT type, name, exclude_versioning FROM contentobject ORDER BY type",
        )
        .fetch_all(&mut *conn)
        .await?;

        let mut types = Vec::with_capacity(type_rows.len());
        for row in &type_rows {
            types.push(ObjectType {
                id: row.try_get("type")?,
                name: row.try_get("name")?,
                exclude_versioning: row.try_get("exclude_versioning")?,
                attributes: Vec::new(),
            });
        }

        let attr_rows = sqlx::query(
            "SELECT objecttype, name, attributetype, optimized, quickname, multivalue, \
             linkedobjecttype, foreignlinkattribute, foreignlinkattributerule, \
             exclude_versioning, filesystem \
             FROM contentattributetype ORDER BY objecttype, rowid",
        )
        .fetch_all(&mut *conn)
        .await?;

        for row in &attr_rows {
            let attr = attribute_from_row(row)?;
            match types.iter_mut().find(|t| t.id == attr.object_type) {
                Some(owner) => owner.attributes.push(attr),
                None => debug!(
                    "{}: skipping attribute '{}' of undefined object type {}",
                    self.name, attr.name, attr.object_type
                ),
            }
        }

        Ok(types)
    }

    async fn insert_object_type(&self, object_type: &ObjectType) -> Result<()> {
        let mut conn = self.conn().await?;
        sqlx::query("INSERT INTO contentobject (type, name, exclude_versioning) VALUES (?, ?, ?)")
            .bind(object_type.id)
            .bind(&object_type.name)
            .bind(object_type.exclude_versioning)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn update_object_type(&self, object_type: &ObjectType) -> Result<()> {
        let mut conn = self.conn().await?;
        sqlx::query("UPDATE contentobject SET name = ?, exclude_versioning = ? WHERE type = ?")
            .bind(&object_type.name)
            .bind(object_type.exclude_versioning)
            .bind(object_type.id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn insert_attribute_type(&self, attr: &AttributeType) -> Result<()> {
        let mut conn = self.conn().await?;
        sqlx::query(
            "INSERT INTO contentattributetype (objecttype, name, attributetype, optimized, \
             quickname, multivalue, linkedobjecttype, foreignlinkattribute, \
             foreignlinkattributerule, exclude_versioning, filesystem) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(attr.object_type)
        .bind(&attr.name)
        .bind(attr.kind.code())
        .bind(attr.optimized)
        .bind(&attr.quick_name)
        .bind(attr.multivalue)
        .bind(attr.linked_object_type)
        .bind(&attr.foreign_link_attribute)
        .bind(&attr.foreign_link_rule)
        .bind(attr.exclude_versioning)
        .bind(attr.filesystem)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn update_attribute_type(&self, attr: &AttributeType) -> Result<()> {
        let mut conn = self.conn().await?;
        sqlx::query(
            "UPDATE contentattributetype SET attributetype = ?, optimized = ?, quickname = ?, \
             multivalue = ?, linkedobjecttype = ?, foreignlinkattribute = ?, \
             foreignlinkattributerule = ?, exclude_versioning = ?, filesystem = ? \
             WHERE objecttype = ? AND name = ?",
        )
        .bind(attr.kind.code())
        .bind(attr.optimized)
        .bind(&attr.quick_name)
        .bind(attr.multivalue)
        .bind(attr.linked_object_type)
        .bind(&attr.foreign_link_attribute)
        .bind(&attr.foreign_link_rule)
        .bind(attr.exclude_versioning)
        .bind(attr.filesystem)
        .bind(attr.object_type)
        .bind(&attr.name)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn delete_attribute_type(&self, object_type: i32, name: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        sqlx::query("DELETE FROM contentattributetype WHERE objecttype = ? AND name = ?")
            .bind(object_type)
            .bind(name)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn quick_columns(&self) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM pragma_table_info('contentmap')")
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(name,)| name)
            .filter(|name| name.starts_with(QUICK_COLUMN_PREFIX))
            .collect())
    }

    async fn add_quick_column(&self, column: &str, kind: AttributeKind) -> Result<()> {
        let sql = format!(
            "ALTER TABLE contentmap ADD COLUMN {} {}",
            self.dialect.quote_ident(column),
            self.dialect.column_type(kind)
        );
        let mut conn = self.conn().await?;
        sqlx::query(&sql).execute(&mut *conn).await?;
        info!("{}: added quick column {}", self.name, column);
        Ok(())
    }

    async fn drop_quick_column(&self, column: &str) -> Result<()> {
        let sql = format!(
            "ALTER TABLE contentmap DROP COLUMN {}",
            self.dialect.quote_ident(column)
        );
        let mut conn = self.conn().await?;
        sqlx::query(&sql).execute(&mut *conn).await?;
        info!("{}: dropped quick column {}", self.name, column);
        Ok(())
    }

    async fn fill_quick_column(&self, attr: &AttributeType) -> Result<u64> {
        let Some(column) = attr.quick_column() else {
            return Ok(0);
        };
        let sql = format!(
            "UPDATE contentmap SET {} = (\
                SELECT a.{} FROM contentattribute a \
                WHERE a.contentid = contentmap.contentid AND a.name = ? \
                ORDER BY a.sortorder LIMIT 1) \
             WHERE obj_type = ?",
            self.dialect.quote_ident(&column),
            attr.kind.value_column()
        );
        let mut conn = self.conn().await?;
        let result = sqlx::query(&sql)
            .bind(&attr.name)
            .bind(attr.object_type)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    async fn convert_sortorder(
        &self,
        object_type: i32,
        name: &str,
        multivalue: bool,
    ) -> Result<u64> {
        let mut conn = self.conn().await?;
        let mut affected = 0;

        if multivalue {
            // Single values sit at sortorder 0, lists start at 1.
            affected += sqlx::query(
                "UPDATE contentattribute SET sortorder = 1 \
                 WHERE name = ? AND sortorder = 0 \
                 AND contentid IN (SELECT contentid FROM contentmap WHERE obj_type = ?)",
            )
            .bind(name)
            .bind(object_type)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        } else {
            // Keep only the first value of each list.
            affected += sqlx::query(
                "DELETE FROM contentattribute \
                 WHERE name = ? \
                 AND contentid IN (SELECT contentid FROM contentmap WHERE obj_type = ?) \
                 AND sortorder > (SELECT MIN(b.sortorder) FROM contentattribute b \
                     WHERE b.contentid = contentattribute.contentid \
                     AND b.name = contentattribute.name)",
            )
            .bind(name)
            .bind(object_type)
            .execute(&mut *conn)
            .await?
            .rows_affected();
            affected += sqlx::query(
                "UPDATE contentattribute SET sortorder = 0 \
                 WHERE name = ? AND sortorder <> 0 \
                 AND contentid IN (SELECT contentid FROM contentmap WHERE obj_type = ?)",
            )
            .bind(name)
            .bind(object_type)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        }

        Ok(affected)
    }

    async fn delete_attribute_values(&self, object_type: i32, name: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        let result = sqlx::query(
            "DELETE FROM contentattribute WHERE name = ? \
             AND contentid IN (SELECT contentid FROM contentmap WHERE obj_type = ?)",
        )
        .bind(name)
        .bind(object_type)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    async fn last_update(&self) -> Result<i64> {
        let mut conn = self.conn().await?;
        let value: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT intvalue FROM contentstatus WHERE name = ?")
                .bind(LAST_UPDATE_KEY)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(value.and_then(|(v,)| v).unwrap_or(0))
    }

    async fn set_last_update(&self, timestamp: i64) -> Result<()> {
        let mut conn = self.conn().await?;
        sqlx::query(
            "INSERT INTO contentstatus (name, intvalue) VALUES (?, ?) \
             ON CONFLICT(name) DO UPDATE SET intvalue = excluded.intvalue",
        )
        .bind(LAST_UPDATE_KEY)
        .bind(timestamp)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn count_objects(&self) -> Result<i64> {
        let mut conn = self.conn().await?;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM contentmap")
            .fetch_one(&mut *conn)
            .await?;
        Ok(count)
    }

    async fn list_objects(&self, updated_after: Option<i64>) -> Result<Vec<ContentObject>> {
        let mut conn = self.conn().await?;
        let base = "SELECT obj_type, obj_id, mother_obj_type, mother_obj_id, node_id, \
                    updatetimestamp FROM contentmap";

        let rows = match updated_after {
            Some(ts) => {
                let sql = format!("{} WHERE updatetimestamp > ? ORDER BY obj_type, obj_id", base);
                sqlx::query(&sql).bind(ts).fetch_all(&mut *conn).await?
            }
            None => {
                let sql = format!("{} ORDER BY obj_type, obj_id", base);
                sqlx::query(&sql).fetch_all(&mut *conn).await?
            }
        };

        rows.iter().map(object_from_row).collect()
    }

    async fn load_objects(&self, ids: &[ContentId]) -> Result<Vec<ContentObject>> {
        let mut conn = self.conn().await?;
        let mut objects = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(LOAD_CHUNK_SIZE) {
            let sql = format!(
                "SELECT obj_type, obj_id, mother_obj_type, mother_obj_id, node_id, \
                 updatetimestamp FROM contentmap WHERE contentid IN ({}) \
                 ORDER BY obj_type, obj_id",
                self.placeholders(chunk.len())
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id.to_string());
            }
            for row in query.fetch_all(&mut *conn).await? {
                objects.push(object_from_row(&row)?);
            }
        }

        Ok(objects)
    }

    async fn load_attributes(
        &self,
        ids: &[ContentId],
        attributes: &[&AttributeType],
    ) -> Result<HashMap<ContentId, AttributeMap>> {
        let mut result: HashMap<ContentId, AttributeMap> = HashMap::new();
        if ids.is_empty() || attributes.is_empty() {
            return Ok(result);
        }

        let kinds: HashMap<(i32, &str), AttributeKind> = attributes
            .iter()
            .map(|a| ((a.object_type, a.name.as_str()), a.kind))
            .collect();
        let mut names: Vec<&str> = attributes.iter().map(|a| a.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();

        let chunk_size = self
            .dialect
            .max_params()
            .saturating_sub(names.len())
            .clamp(1, LOAD_CHUNK_SIZE);

        let mut conn = self.conn().await?;
        for chunk in ids.chunks(chunk_size) {
            let sql = format!(
                "SELECT contentid, name, sortorder, {} FROM contentattribute \
                 WHERE contentid IN ({}) AND name IN ({}) \
                 ORDER BY contentid, name, sortorder",
                VALUE_COLUMNS,
                self.placeholders(chunk.len()),
                self.placeholders(names.len())
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id.to_string());
            }
            for name in &names {
                query = query.bind(*name);
            }

            for row in query.fetch_all(&mut *conn).await? {
                let id: ContentId = row.try_get::<String, _>("contentid")?.parse()?;
                let name: String = row.try_get("name")?;
                let Some(kind) = kinds.get(&(id.obj_type, name.as_str())) else {
                    continue;
                };
                if let Some(value) = decode_value(&row, *kind)? {
                    result
                        .entry(id)
                        .or_default()
                        .entry(name)
                        .or_default()
                        .push(value);
                }
            }
        }

        Ok(result)
    }

    async fn stream_attribute(
        &self,
        id: ContentId,
        attr: &AttributeType,
        sink: &mut (dyn LobSink + Send),
    ) -> Result<u64> {
        let sql = format!(
            "SELECT sortorder, {} FROM contentattribute \
             WHERE contentid = ? AND name = ? ORDER BY sortorder",
            VALUE_COLUMNS
        );
        let content_id = id.to_string();
        let mut conn = self.conn().await?;
        let mut rows = sqlx::query(&sql)
            .bind(&content_id)
            .bind(&attr.name)
            .fetch(&mut *conn);

        let mut delivered = 0;
        while let Some(row) = rows.try_next().await? {
            if let Some(value) = decode_value(&row, attr.kind)? {
                sink.accept(row.try_get("sortorder")?, value).await?;
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    async fn insert_object(&self, object: &ContentObject) -> Result<()> {
        let mother = object.mother.unwrap_or_default();
        let mut conn = self.conn().await?;
        sqlx::query(
            "INSERT INTO contentmap (contentid, obj_id, obj_type, mother_obj_id, \
             mother_obj_type, motherid, node_id, updatetimestamp) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(object.id.to_string())
        .bind(object.id.obj_id)
        .bind(object.id.obj_type)
        .bind(mother.obj_id)
        .bind(mother.obj_type)
        .bind(object.mother.map(|m| m.to_string()))
        .bind(object.node_id)
        .bind(object.update_timestamp)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn update_object(&self, object: &ContentObject) -> Result<()> {
        let mother = object.mother.unwrap_or_default();
        let mut conn = self.conn().await?;
        sqlx::query(
            "UPDATE contentmap SET mother_obj_id = ?, mother_obj_type = ?, motherid = ?, \
             node_id = ?, updatetimestamp = ? WHERE contentid = ?",
        )
        .bind(mother.obj_id)
        .bind(mother.obj_type)
        .bind(object.mother.map(|m| m.to_string()))
        .bind(object.node_id)
        .bind(object.update_timestamp)
        .bind(object.id.to_string())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn delete_object(&self, id: ContentId) -> Result<()> {
        let content_id = id.to_string();
        let mut conn = self.conn().await?;
        sqlx::query("DELETE FROM contentattribute WHERE contentid = ?")
            .bind(&content_id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM contentmap WHERE contentid = ?")
            .bind(&content_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn replace_attribute(
        &self,
        id: ContentId,
        attr: &AttributeType,
        values: &[Value],
    ) -> Result<u64> {
        let values = coerce_values(attr, values)?;
        let mut conn = self.conn().await?;
        sqlx::query("DELETE FROM contentattribute WHERE contentid = ? AND name = ?")
            .bind(id.to_string())
            .bind(&attr.name)
            .execute(&mut *conn)
            .await?;

        let mut written = 0;
        for (index, value) in values.iter().enumerate() {
            let sortorder = if attr.multivalue { index as i32 + 1 } else { 0 };
            self.insert_value_row(&mut conn, id, attr, sortorder, value)
                .await?;
            written += 1;
            if !attr.multivalue {
                break;
            }
        }

        if let Some(column) = attr.quick_column() {
            self.update_quick_value(&mut conn, id, &column, values.first())
                .await?;
        }

        Ok(written)
    }

    async fn insert_attribute_value(
        &self,
        id: ContentId,
        attr: &AttributeType,
        sortorder: i32,
        value: &Value,
    ) -> Result<()> {
        let value = coerce_values(attr, std::slice::from_ref(value))?.remove(0);
        let mut conn = self.conn().await?;
        self.insert_value_row(&mut conn, id, attr, sortorder, &value)
            .await?;
        if let Some(column) = attr.quick_column() {
            if !attr.multivalue {
                self.update_quick_value(&mut conn, id, &column, Some(&value))
                    .await?;
            }
        }
        Ok(())
    }
}
