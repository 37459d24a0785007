//! Oracle SQL dialect (12c+).
//!
//! Shared by the `Oracle` and `OracleManaged` providers. Oracle has no
//! multi-row `VALUES`, so batches render as `INSERT ALL ... SELECT 1 FROM DUAL`,
//! and no `IF NOT EXISTS`, so table creation relies on the existence probe.

use crate::core::provider::ProviderIdentity;
use crate::core::schema::{ColumnMetadata, ColumnType};
use crate::core::traits::SyntaxProvider;
use crate::core::value::{hex_encode, Row};
use crate::error::Result;

/// Oracle dialect implementation.
#[derive(Debug, Clone)]
pub struct OracleDialect {
    provider: ProviderIdentity,
}

impl OracleDialect {
    pub fn new(provider: ProviderIdentity) -> Self {
        Self { provider }
    }
}

impl Default for OracleDialect {
    fn default() -> Self {
        Self::new(ProviderIdentity::oracle())
    }
}

impl SyntaxProvider for OracleDialect {
    fn provider(&self) -> &ProviderIdentity {
        &self.provider
    }

    fn column_type(&self, column: &ColumnMetadata) -> String {
        match column.column_type {
            ColumnType::Boolean => "NUMBER(1)".to_string(),
            ColumnType::Int16 => "NUMBER(5)".to_string(),
            ColumnType::Int32 => "NUMBER(10)".to_string(),
            ColumnType::Int64 => "NUMBER(19)".to_string(),
            ColumnType::Float32 => "BINARY_FLOAT".to_string(),
            ColumnType::Float64 => "BINARY_DOUBLE".to_string(),
            ColumnType::Decimal { precision, scale } => {
                format!("NUMBER({}, {})", precision, scale)
            }
            ColumnType::String {
                max_length: Some(n),
            } if n <= 4000 => format!("VARCHAR2({} CHAR)", n),
            ColumnType::String { .. } | ColumnType::Text => "CLOB".to_string(),
            ColumnType::FixedString { length } => format!("CHAR({} CHAR)", length),
            ColumnType::Binary {
                max_length: Some(n),
            } if n <= 2000 => format!("RAW({})", n),
            ColumnType::Binary { .. } => "BLOB".to_string(),
            ColumnType::Guid => "CHAR(36)".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Time => "INTERVAL DAY(0) TO SECOND(6)".to_string(),
            ColumnType::DateTime => "TIMESTAMP".to_string(),
            ColumnType::DateTimeOffset => "TIMESTAMP WITH TIME ZONE".to_string(),
        }
    }

    fn table_exists_sql(&self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(owner) => format!(
                "SELECT COUNT(*) FROM ALL_TABLES WHERE OWNER = {} AND TABLE_NAME = {}",
                self.string_literal(owner),
                self.string_literal(table)
            ),
            None => format!(
                "SELECT COUNT(*) FROM USER_TABLES WHERE TABLE_NAME = {}",
                self.string_literal(table)
            ),
        }
    }

    fn binary_literal(&self, b: &[u8]) -> String {
        format!("HEXTORAW('{}')", hex_encode(b))
    }

    fn date_literal(&self, v: &chrono::NaiveDate) -> String {
        format!("DATE '{}'", v.format("%Y-%m-%d"))
    }

    fn time_literal(&self, v: &chrono::NaiveTime) -> String {
        format!("INTERVAL '0 {}' DAY TO SECOND", v.format("%H:%M:%S%.f"))
    }

    fn datetime_literal(&self, v: &chrono::NaiveDateTime) -> String {
        format!("TIMESTAMP '{}'", v.format("%Y-%m-%d %H:%M:%S%.f"))
    }

    fn datetime_offset_literal(&self, v: &chrono::DateTime<chrono::FixedOffset>) -> String {
        format!("TIMESTAMP '{}'", v.format("%Y-%m-%d %H:%M:%S%.f %:z"))
    }

    fn insert_rows_sql(&self, table: &str, columns: &[String], rows: &[Row]) -> Result<String> {
        let target = format!(
            "{} ({})",
            self.quote_qualified(table),
            columns
                .iter()
                .map(|c| self.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut sql = String::from("INSERT ALL");
        for row in rows {
            let rendered: Result<Vec<String>> = row.iter().map(|v| self.literal(v)).collect();
            sql.push_str(&format!(
                " INTO {} VALUES ({})",
                target,
                rendered?.join(", ")
            ));
        }
        sql.push_str(" SELECT 1 FROM DUAL");
        Ok(sql)
    }

    fn release_savepoint_sql(&self, _name: &str) -> Option<String> {
        None
    }

    fn paginate(
        &self,
        sql: &str,
        limit: Option<u64>,
        offset: Option<u64>,
        _has_order: bool,
    ) -> String {
        let mut out = sql.to_string();
        if let Some(offset) = offset {
            out.push_str(&format!(" OFFSET {} ROWS", offset));
        }
        if let Some(limit) = limit {
            let keyword = if offset.is_some() { "NEXT" } else { "FIRST" };
            out.push_str(&format!(" FETCH {} {} ROWS ONLY", keyword, limit));
        }
        out
    }
}
