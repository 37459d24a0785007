//! MSSQL SQL dialect (Strategy pattern).
//!
//! Provides MSSQL-specific syntax for identifier quoting, type names,
//! literals, paging and idempotent table creation.

use crate::core::provider::ProviderIdentity;
use crate::core::schema::{ColumnMetadata, ColumnType, EntityMetadata};
use crate::core::traits::{create_table_statement, SyntaxProvider};
use crate::core::value::hex_encode;

/// Microsoft SQL Server dialect implementation.
#[derive(Debug, Clone)]
pub struct MssqlDialect {
    provider: ProviderIdentity,
}

impl MssqlDialect {
    /// Create a new MSSQL dialect instance.
    pub fn new(provider: ProviderIdentity) -> Self {
        Self { provider }
    }
}

impl Default for MssqlDialect {
    fn default() -> Self {
        Self::new(ProviderIdentity::mssql())
    }
}

impl SyntaxProvider for MssqlDialect {
    fn provider(&self) -> &ProviderIdentity {
        &self.provider
    }

    fn quote_ident(&self, name: &str) -> String {
        // MSSQL uses square brackets for identifier quoting
        // Handle names that contain closing brackets by doubling them
        format!("[{}]", name.replace(']', "]]"))
    }

    fn column_type(&self, column: &ColumnMetadata) -> String {
        match column.column_type {
            ColumnType::Boolean => "BIT".to_string(),
            ColumnType::Int16 => "SMALLINT".to_string(),
            ColumnType::Int32 => "INT".to_string(),
            ColumnType::Int64 => "BIGINT".to_string(),
            ColumnType::Float32 => "REAL".to_string(),
            ColumnType::Float64 => "FLOAT".to_string(),
            ColumnType::Decimal { precision, scale } => {
                format!("DECIMAL({}, {})", precision, scale)
            }
            ColumnType::String {
                max_length: Some(n),
            } if n <= 4000 => format!("NVARCHAR({})", n),
            ColumnType::String { .. } | ColumnType::Text => "NVARCHAR(MAX)".to_string(),
            ColumnType::FixedString { length } => format!("NCHAR({})", length),
            ColumnType::Binary {
                max_length: Some(n),
            } if n <= 8000 => format!("VARBINARY({})", n),
            ColumnType::Binary { .. } => "VARBINARY(MAX)".to_string(),
            ColumnType::Guid => "UNIQUEIDENTIFIER".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Time => "TIME".to_string(),
            ColumnType::DateTime => "DATETIME2".to_string(),
            ColumnType::DateTimeOffset => "DATETIMEOFFSET".to_string(),
        }
    }

    fn identity_clause(&self) -> Option<&'static str> {
        Some("IDENTITY(1,1)")
    }

    fn column_definition(&self, column: &ColumnMetadata, _entity: &EntityMetadata) -> String {
        let mut def = format!(
            "{} {}",
            self.quote_ident(&column.name),
            self.column_type(column)
        );
        if column.identity {
            if let Some(clause) = self.identity_clause() {
                def.push(' ');
                def.push_str(clause);
            }
        }
        // Session defaults decide nullability unless it is spelled out
        def.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
        def
    }

    fn table_exists_sql(&self, schema: Option<&str>, table: &str) -> String {
        let schema_predicate = match schema {
            Some(s) => self.string_literal(s),
            None => "SCHEMA_NAME()".to_string(),
        };
        format!(
            "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = {} AND TABLE_NAME = {}",
            schema_predicate,
            self.string_literal(table)
        )
    }

    fn create_table_sql(&self, entity: &EntityMetadata) -> Vec<String> {
        let qualified = self.qualify(entity.schema.as_deref(), &entity.name);
        vec![format!(
            "IF OBJECT_ID({}, N'U') IS NULL\n{}",
            self.string_literal(&qualified),
            create_table_statement(self, entity)
        )]
    }

    fn string_literal(&self, s: &str) -> String {
        format!("N'{}'", s.replace('\'', "''"))
    }

    fn binary_literal(&self, b: &[u8]) -> String {
        format!("0x{}", hex_encode(b))
    }

    fn savepoint_sql(&self, name: &str) -> String {
        format!("SAVE TRANSACTION {}", name)
    }

    fn rollback_to_savepoint_sql(&self, name: &str) -> String {
        format!("ROLLBACK TRANSACTION {}", name)
    }

    // Savepoints end with the enclosing transaction
    fn release_savepoint_sql(&self, _name: &str) -> Option<String> {
        None
    }

    fn paginate(
        &self,
        sql: &str,
        limit: Option<u64>,
        offset: Option<u64>,
        has_order: bool,
    ) -> String {
        match (limit, offset) {
            (None, None) | (None, Some(0)) => sql.to_string(),
            // TOP covers the common no-offset case without requiring ORDER BY
            (Some(limit), None) | (Some(limit), Some(0)) => {
                sql.replacen("SELECT ", &format!("SELECT TOP {} ", limit), 1)
            }
            (limit, Some(offset)) => {
                let mut out = sql.to_string();
                if !has_order {
                    out.push_str(" ORDER BY (SELECT NULL)");
                }
                out.push_str(&format!(" OFFSET {} ROWS", offset));
                if let Some(limit) = limit {
                    out.push_str(&format!(" FETCH NEXT {} ROWS ONLY", limit));
                }
                out
            }
        }
    }
}
