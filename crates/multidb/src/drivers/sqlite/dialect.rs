//! SQLite SQL dialect.
//!
//! SQLite uses type affinity, so semantic types collapse onto INTEGER, REAL,
//! NUMERIC, TEXT and BLOB. Engine-generated keys need the literal form
//! `INTEGER PRIMARY KEY AUTOINCREMENT`, which replaces the table-level key.

use crate::core::provider::ProviderIdentity;
use crate::core::schema::{ColumnMetadata, ColumnType, EntityMetadata};
use crate::core::traits::SyntaxProvider;

/// SQLite dialect implementation.
#[derive(Debug, Clone)]
pub struct SqliteDialect {
    provider: ProviderIdentity,
}

impl SqliteDialect {
    pub fn new(provider: ProviderIdentity) -> Self {
        Self { provider }
    }

    /// The single integer identity key column, if the entity has one.
    fn rowid_alias<'e>(&self, entity: &'e EntityMetadata) -> Option<&'e ColumnMetadata> {
        match entity.primary_key().as_slice() {
            [only] if only.identity && only.column_type.is_integer() => Some(*only),
            _ => None,
        }
    }
}

impl Default for SqliteDialect {
    fn default() -> Self {
        Self::new(ProviderIdentity::sqlite())
    }
}

impl SyntaxProvider for SqliteDialect {
    fn provider(&self) -> &ProviderIdentity {
        &self.provider
    }

    fn column_type(&self, column: &ColumnMetadata) -> String {
        match column.column_type {
            ColumnType::Boolean | ColumnType::Int16 | ColumnType::Int32 | ColumnType::Int64 => {
                "INTEGER"
            }
            ColumnType::Float32 | ColumnType::Float64 => "REAL",
            ColumnType::Decimal { .. } => "NUMERIC",
            ColumnType::Binary { .. } => "BLOB",
            ColumnType::String { .. }
            | ColumnType::FixedString { .. }
            | ColumnType::Text
            | ColumnType::Guid
            | ColumnType::Date
            | ColumnType::Time
            | ColumnType::DateTime
            | ColumnType::DateTimeOffset => "TEXT",
        }
        .to_string()
    }

    fn identity_clause(&self) -> Option<&'static str> {
        None
    }

    fn column_definition(&self, column: &ColumnMetadata, entity: &EntityMetadata) -> String {
        let is_rowid_alias = self
            .rowid_alias(entity)
            .is_some_and(|c| c.name == column.name);
        if is_rowid_alias {
            return format!(
                "{} INTEGER PRIMARY KEY AUTOINCREMENT",
                self.quote_ident(&column.name)
            );
        }

        let mut def = format!(
            "{} {}",
            self.quote_ident(&column.name),
            self.column_type(column)
        );
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        def
    }

    fn primary_key_constraint(&self, entity: &EntityMetadata) -> Option<String> {
        if self.rowid_alias(entity).is_some() {
            return None;
        }
        let pk = entity.primary_key();
        if pk.is_empty() {
            return None;
        }
        let cols: Vec<String> = pk.iter().map(|c| self.quote_ident(&c.name)).collect();
        Some(format!("PRIMARY KEY ({})", cols.join(", ")))
    }

    fn table_exists_sql(&self, schema: Option<&str>, table: &str) -> String {
        let master = match schema {
            Some(s) => format!("{}.sqlite_master", self.quote_ident(s)),
            None => "sqlite_master".to_string(),
        };
        format!(
            "SELECT COUNT(*) FROM {} WHERE type = 'table' AND name = {}",
            master,
            self.string_literal(table)
        )
    }

    fn create_table_prefix(&self) -> &'static str {
        "CREATE TABLE IF NOT EXISTS"
    }

    fn max_rows_per_insert(&self) -> usize {
        // Older builds cap multi-row VALUES at SQLITE_MAX_COMPOUND_SELECT (500)
        500
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
            // SQLite requires a LIMIT before OFFSET; -1 means unbounded
            (None, Some(offset)) => format!("{} LIMIT -1 OFFSET {}", sql, offset),
            (Some(limit), Some(offset)) => format!("{} LIMIT {} OFFSET {}", sql, limit, offset),
        }
    }
}
