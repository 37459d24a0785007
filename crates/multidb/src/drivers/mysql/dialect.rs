//! MySQL/MariaDB SQL dialect (Strategy pattern).
//!
//! Compatible with MySQL 5.7+, 8.0+, and MariaDB 10.2+. Both provider
//! variants share this implementation.

use crate::core::provider::ProviderIdentity;
use crate::core::schema::{ColumnMetadata, ColumnType};
use crate::core::traits::SyntaxProvider;
use crate::core::value::hex_encode;

/// Largest row count MySQL accepts in `LIMIT`; used when only an offset is given.
const MYSQL_MAX_ROWS: u64 = 18_446_744_073_709_551_615;

/// MySQL/MariaDB dialect implementation.
#[derive(Debug, Clone)]
pub struct MysqlDialect {
    provider: ProviderIdentity,
}

impl MysqlDialect {
    /// Create a new MySQL dialect instance.
    pub fn new(provider: ProviderIdentity) -> Self {
        Self { provider }
    }
}

impl Default for MysqlDialect {
    fn default() -> Self {
        Self::new(ProviderIdentity::mysql())
    }
}

impl SyntaxProvider for MysqlDialect {
    fn provider(&self) -> &ProviderIdentity {
        &self.provider
    }

    fn quote_ident(&self, name: &str) -> String {
        // MySQL uses backticks for identifier quoting
        // Handle names that contain backticks by doubling them
        format!("`{}`", name.replace('`', "``"))
    }

    fn column_type(&self, column: &ColumnMetadata) -> String {
        match column.column_type {
            ColumnType::Boolean => "TINYINT(1)".to_string(),
            ColumnType::Int16 => "SMALLINT".to_string(),
            ColumnType::Int32 => "INT".to_string(),
            ColumnType::Int64 => "BIGINT".to_string(),
            ColumnType::Float32 => "FLOAT".to_string(),
            ColumnType::Float64 => "DOUBLE".to_string(),
            ColumnType::Decimal { precision, scale } => {
                format!("DECIMAL({}, {})", precision, scale)
            }
            ColumnType::String {
                max_length: Some(n),
            } if n <= 16_383 => format!("VARCHAR({})", n),
            ColumnType::String { .. } | ColumnType::Text => "LONGTEXT".to_string(),
            ColumnType::FixedString { length } => format!("CHAR({})", length),
            ColumnType::Binary {
                max_length: Some(n),
            } if n <= 65_535 => format!("VARBINARY({})", n),
            ColumnType::Binary { .. } => "LONGBLOB".to_string(),
            ColumnType::Guid => "CHAR(36)".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Time => "TIME(6)".to_string(),
            // MySQL has no offset-aware type; offsets are normalized to UTC on write
            ColumnType::DateTime | ColumnType::DateTimeOffset => "DATETIME(6)".to_string(),
        }
    }

    fn identity_clause(&self) -> Option<&'static str> {
        Some("AUTO_INCREMENT")
    }

    fn table_exists_sql(&self, schema: Option<&str>, table: &str) -> String {
        let schema_predicate = match schema {
            Some(s) => self.string_literal(s),
            None => "DATABASE()".to_string(),
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

    fn string_literal(&self, s: &str) -> String {
        // Backslash is an escape character unless NO_BACKSLASH_ESCAPES is set
        format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
    }

    fn binary_literal(&self, b: &[u8]) -> String {
        format!("X'{}'", hex_encode(b))
    }

    fn datetime_offset_literal(&self, v: &chrono::DateTime<chrono::FixedOffset>) -> String {
        self.datetime_literal(&v.naive_utc())
    }

    fn paginate(
        &self,
        sql: &str,
        limit: Option<u64>,
        offset: Option<u64>,
        _has_order: bool,
    ) -> String {
        match (limit, offset) {
            (None, None) => sql.to_string(),
            (Some(limit), None) => format!("{} LIMIT {}", sql, limit),
            (limit, Some(offset)) => format!(
                "{} LIMIT {}, {}",
                sql,
                offset,
                limit.unwrap_or(MYSQL_MAX_ROWS)
            ),
        }
    }
}
