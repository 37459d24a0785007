//! Firebird SQL dialect (Firebird 3+, SQL dialect 3).
//!
//! Firebird has no schemas, so schema qualifiers are dropped. Multi-row
//! inserts are rendered as `INSERT ... SELECT ... FROM RDB$DATABASE UNION ALL ...`.

use crate::core::provider::ProviderIdentity;
use crate::core::schema::{ColumnMetadata, ColumnType};
use crate::core::traits::SyntaxProvider;
use crate::core::value::Row;
use crate::error::Result;

/// Firebird dialect implementation.
#[derive(Debug, Clone)]
pub struct FirebirdDialect {
    provider: ProviderIdentity,
}

impl FirebirdDialect {
    pub fn new(provider: ProviderIdentity) -> Self {
        Self { provider }
    }
}

impl Default for FirebirdDialect {
    fn default() -> Self {
        Self::new(ProviderIdentity::firebird())
    }
}

impl SyntaxProvider for FirebirdDialect {
    fn provider(&self) -> &ProviderIdentity {
        &self.provider
    }

    fn qualify(&self, _schema: Option<&str>, name: &str) -> String {
        self.quote_ident(name)
    }

    fn quote_qualified(&self, dotted: &str) -> String {
        let name = dotted.rsplit('.').next().unwrap_or(dotted);
        self.quote_ident(name)
    }

    fn column_type(&self, column: &ColumnMetadata) -> String {
        match column.column_type {
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Int16 => "SMALLINT".to_string(),
            ColumnType::Int32 => "INTEGER".to_string(),
            ColumnType::Int64 => "BIGINT".to_string(),
            ColumnType::Float32 => "FLOAT".to_string(),
            ColumnType::Float64 => "DOUBLE PRECISION".to_string(),
            ColumnType::Decimal { precision, scale } => {
                format!("DECIMAL({}, {})", precision.min(18), scale)
            }
            ColumnType::String {
                max_length: Some(n),
            } if n <= 8191 => format!("VARCHAR({})", n),
            ColumnType::String { .. } | ColumnType::Text => "BLOB SUB_TYPE TEXT".to_string(),
            ColumnType::FixedString { length } => format!("CHAR({})", length),
            ColumnType::Binary {
                max_length: Some(n),
            } if n <= 32_765 => format!("VARCHAR({}) CHARACTER SET OCTETS", n),
            ColumnType::Binary { .. } => "BLOB SUB_TYPE BINARY".to_string(),
            ColumnType::Guid => "CHAR(36)".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Time => "TIME".to_string(),
            ColumnType::DateTime => "TIMESTAMP".to_string(),
            ColumnType::DateTimeOffset => "TIMESTAMP WITH TIME ZONE".to_string(),
        }
    }

    fn table_exists_sql(&self, _schema: Option<&str>, table: &str) -> String {
        format!(
            "SELECT COUNT(*) FROM RDB$RELATIONS WHERE TRIM(RDB$RELATION_NAME) = {}",
            self.string_literal(table)
        )
    }

    fn bool_literal(&self, v: bool) -> String {
        (if v { "TRUE" } else { "FALSE" }).to_string()
    }

    fn max_rows_per_insert(&self) -> usize {
        // Each UNION ALL branch is a query context; Firebird allows 255 per statement
        250
    }

    fn insert_rows_sql(&self, table: &str, columns: &[String], rows: &[Row]) -> Result<String> {
        let cols: Vec<String> = columns.iter().map(|c| self.quote_ident(c)).collect();
        let mut selects = Vec::with_capacity(rows.len());
        for row in rows {
            let rendered: Result<Vec<String>> = row.iter().map(|v| self.literal(v)).collect();
            selects.push(format!(
                "SELECT {} FROM RDB$DATABASE",
                rendered?.join(", ")
            ));
        }
        Ok(format!(
            "INSERT INTO {} ({}) {}",
            self.quote_qualified(table),
            cols.join(", "),
            selects.join(" UNION ALL ")
        ))
    }

    fn paginate(
        &self,
        sql: &str,
        limit: Option<u64>,
        offset: Option<u64>,
        _has_order: bool,
    ) -> String {
        let mut clause = String::new();
        if let Some(limit) = limit {
            clause.push_str(&format!("FIRST {} ", limit));
        }
        if let Some(offset) = offset {
            clause.push_str(&format!("SKIP {} ", offset));
        }
        if clause.is_empty() {
            return sql.to_string();
        }
        sql.replacen("SELECT ", &format!("SELECT {}", clause), 1)
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
    fn test_schema_is_dropped() {
        let dialect = FirebirdDialect::default();
        assert_eq!(dialect.qualify(Some("dbo"), "MOVIES"), "\"MOVIES\"");
        assert_eq!(dialect.quote_qualified("dbo.MOVIES"), "\"MOVIES\"");
    }

    #[test]
    fn test_insert_union_all() {
        let dialect = FirebirdDialect::default();
        let sql = dialect
            .insert_rows_sql(
                "MOVIES",
                &["NAME".to_string()],
                &[vec![SqlValue::from("Alien")], vec![SqlValue::Null]],
            )
            .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"MOVIES\" (\"NAME\") SELECT 'Alien' FROM RDB$DATABASE \
             UNION ALL SELECT NULL FROM RDB$DATABASE"
        );
    }

    #[test]
    fn test_create_table() {
        let dialect = FirebirdDialect::default();
        let entity = EntityMetadata::new("MOVIES")
            .column(
                ColumnMetadata::new("ID", ColumnType::Int32)
                    .primary_key()
                    .identity(),
            )
            .column(ColumnMetadata::new("SEEN", ColumnType::Boolean));
        let sql = dialect.create_table_sql(&entity);
        assert!(sql[0].starts_with("CREATE TABLE \"MOVIES\" ("));
        assert!(sql[0].contains("\"ID\" INTEGER GENERATED BY DEFAULT AS IDENTITY NOT NULL"));
        assert!(sql[0].contains("\"SEEN\" BOOLEAN"));
    }

    #[test]
    fn test_translate_paging() {
        let translator = SqlTranslator::new(Arc::new(FirebirdDialect::default()));
        let query = SelectQuery::from_table("MOVIES")
            .columns(["NAME"])
            .limit(10)
            .offset(20);
        assert_eq!(
            translator.translate(&query).unwrap(),
            "SELECT FIRST 10 SKIP 20 \"NAME\" FROM \"MOVIES\""
        );
    }
}
