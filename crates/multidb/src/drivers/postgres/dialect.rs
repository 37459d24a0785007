//! PostgreSQL SQL dialect (Strategy pattern).
//!
//! Provides PostgreSQL-specific syntax for type names, literals, paging and
//! the catalog probe.

use crate::core::provider::ProviderIdentity;
use crate::core::schema::{ColumnMetadata, ColumnType};
use crate::core::traits::SyntaxProvider;
use crate::core::value::hex_encode;

/// PostgreSQL dialect implementation.
#[derive(Debug, Clone)]
pub struct PostgresDialect {
    provider: ProviderIdentity,
}

impl PostgresDialect {
    /// Create a new PostgreSQL dialect instance.
    pub fn new(provider: ProviderIdentity) -> Self {
        Self { provider }
    }
}

impl Default for PostgresDialect {
    fn default() -> Self {
        Self::new(ProviderIdentity::postgresql())
    }
}

impl SyntaxProvider for PostgresDialect {
    fn provider(&self) -> &ProviderIdentity {
        &self.provider
    }

    fn column_type(&self, column: &ColumnMetadata) -> String {
        match column.column_type {
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Int16 => "SMALLINT".to_string(),
            ColumnType::Int32 => "INTEGER".to_string(),
            ColumnType::Int64 => "BIGINT".to_string(),
            ColumnType::Float32 => "REAL".to_string(),
            ColumnType::Float64 => "DOUBLE PRECISION".to_string(),
            ColumnType::Decimal { precision, scale } => {
                format!("NUMERIC({}, {})", precision, scale)
            }
            ColumnType::String {
                max_length: Some(n),
            } => format!("VARCHAR({})", n),
            ColumnType::String { max_length: None } | ColumnType::Text => "TEXT".to_string(),
            ColumnType::FixedString { length } => format!("CHAR({})", length),
            ColumnType::Binary { .. } => "BYTEA".to_string(),
            ColumnType::Guid => "UUID".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Time => "TIME".to_string(),
            ColumnType::DateTime => "TIMESTAMP".to_string(),
            ColumnType::DateTimeOffset => "TIMESTAMPTZ".to_string(),
        }
    }

    fn table_exists_sql(&self, schema: Option<&str>, table: &str) -> String {
        let schema_predicate = match schema {
            Some(s) => self.string_literal(s),
            None => "current_schema()".to_string(),
        };
        format!(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = {} AND table_name = {}",
            schema_predicate,
            self.string_literal(table)
        )
    }

    fn create_table_prefix(&self) -> &'static str {
        "CREATE TABLE IF NOT EXISTS"
    }

    fn binary_literal(&self, b: &[u8]) -> String {
        format!("'\\x{}'::bytea", hex_encode(b))
    }

    fn bool_literal(&self, v: bool) -> String {
        (if v { "TRUE" } else { "FALSE" }).to_string()
    }

    fn paginate(
        &self,
        sql: &str,
        limit: Option<u64>,
        offset: Option<u64>,
        _has_order: bool,
    ) -> String {
        let mut out = sql.to_string();
        if let Some(limit) = limit {
            out.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = offset {
            out.push_str(&format!(" OFFSET {}", offset));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::EntityMetadata;
    use crate::core::traits::QueryTranslator;
    use crate::core::value::SqlValue;
    use crate::translate::{SelectQuery, SqlTranslator};
    use std::sync::Arc;

    #[test]
    fn test_quote_ident() {
        let dialect = PostgresDialect::default();
        assert_eq!(dialect.quote_ident("table"), "\"table\"");
        assert_eq!(dialect.quote_ident("my\"table"), "\"my\"\"table\"");
    }

    #[test]
    fn test_create_table_sql() {
        let dialect = PostgresDialect::default();
        let entity = EntityMetadata::new("events")
            .with_schema("public")
            .column(
                ColumnMetadata::new("id", ColumnType::Int64)
                    .primary_key()
                    .identity(),
            )
            .column(ColumnMetadata::new("payload", ColumnType::Text))
            .column(ColumnMetadata::new("at", ColumnType::DateTimeOffset).not_null());

        let sql = dialect.create_table_sql(&entity);
        assert_eq!(
            sql[0],
            "CREATE TABLE IF NOT EXISTS \"public\".\"events\" (\n    \
             \"id\" BIGINT GENERATED BY DEFAULT AS IDENTITY NOT NULL,\n    \
             \"payload\" TEXT,\n    \
             \"at\" TIMESTAMPTZ NOT NULL,\n    \
             PRIMARY KEY (\"id\")\n)"
        );
    }

    #[test]
    fn test_literals() {
        let dialect = PostgresDialect::default();
        assert_eq!(dialect.literal(&SqlValue::Bool(false)).unwrap(), "FALSE");
        assert_eq!(
            dialect.literal(&SqlValue::Bytes(vec![1, 2])).unwrap(),
            "'\\x0102'::bytea"
        );
    }

    #[test]
    fn test_translate_paging() {
        let translator = SqlTranslator::new(Arc::new(PostgresDialect::default()));
        let query = SelectQuery::from_table("events")
            .schema("public")
            .columns(["id"])
            .filter("id > 10")
            .order_by_desc("id")
            .limit(50)
            .offset(100);
        assert_eq!(
            translator.translate(&query).unwrap(),
            "SELECT \"id\" FROM \"public\".\"events\" WHERE id > 10 ORDER BY \"id\" DESC LIMIT 50 OFFSET 100"
        );
    }
}
