//! SQLite SQL dialect (Strategy pattern).

use crate::core::schema::AttributeKind;
use crate::core::traits::Dialect;

/// SQLite dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Create a new SQLite dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn column_type(&self, kind: AttributeKind) -> &'static str {
        match kind {
            AttributeKind::Text
            | AttributeKind::ForeignObjectLink
            | AttributeKind::TextLong
            | AttributeKind::Date => "TEXT",
            AttributeKind::Integer | AttributeKind::Long => "INTEGER",
            AttributeKind::Double => "REAL",
            AttributeKind::Blob => "BLOB",
        }
    }

    fn param_placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn max_params(&self) -> usize {
        // SQLITE_MAX_VARIABLE_NUMBER on older builds is 999.
        900
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        let dialect = SqliteDialect::new();
        assert_eq!(dialect.quote_ident("quick_name"), "\"quick_name\"");
        assert_eq!(dialect.quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_column_types() {
        let dialect = SqliteDialect::new();
        assert_eq!(dialect.column_type(AttributeKind::Text), "TEXT");
        assert_eq!(dialect.column_type(AttributeKind::Date), "TEXT");
        assert_eq!(dialect.column_type(AttributeKind::Long), "INTEGER");
        assert_eq!(dialect.column_type(AttributeKind::Double), "REAL");
        assert_eq!(dialect.column_type(AttributeKind::Blob), "BLOB");
        assert_eq!(dialect.param_placeholder(3), "?");
    }
}
