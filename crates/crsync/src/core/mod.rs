//! Core domain types and repository traits.
//!
//! - [`schema`]: object types, attribute types, attribute kinds
//! - [`value`]: stored attribute values
//! - [`object`]: content ids and content objects
//! - [`traits`]: `Repository`, `Dialect` and `LobSink`

pub mod object;
pub mod schema;
pub mod traits;
pub mod value;

pub use object::{ContentId, ContentObject};
pub use schema::{AttributeKind, AttributeType, ObjectType, QUICK_COLUMN_PREFIX, RESERVED_ATTRIBUTE_NAMES};
pub use traits::{Dialect, LobSink, Repository};
pub use value::{AttributeMap, Value};
