//! Entity metadata used for table generation.
//!
//! This is a plain description of a table, not an object model: it can be
//! built in code or deserialized from YAML.

use serde::{Deserialize, Serialize};

/// Semantic column type, rendered per dialect by the syntax helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnType {
    Boolean,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Decimal {
        precision: u8,
        scale: u8,
    },
    /// Variable-length string; `None` means the dialect's unbounded type.
    String {
        #[serde(default)]
        max_length: Option<u32>,
    },
    FixedString {
        length: u32,
    },
    Text,
    Binary {
        #[serde(default)]
        max_length: Option<u32>,
    },
    Guid,
    Date,
    Time,
    DateTime,
    DateTimeOffset,
}

impl ColumnType {
    /// Whether this is an integer type (eligible for identity generation).
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ColumnType::Int16 | ColumnType::Int32 | ColumnType::Int64
        )
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    /// Column name.
    pub name: String,

    /// Semantic type.
    #[serde(rename = "type")]
    pub column_type: ColumnType,

    /// Whether the column allows NULL.
    #[serde(default = "default_nullable")]
    pub nullable: bool,

    /// Whether the column is part of the primary key.
    #[serde(default)]
    pub primary_key: bool,

    /// Whether the column is engine-generated (identity/autoincrement).
    #[serde(default)]
    pub identity: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnMetadata {
    /// Create a nullable, non-key column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            primary_key: false,
            identity: false,
        }
    }

    /// Mark the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark the column as (part of) the primary key. Key columns are NOT NULL.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Mark the column as an identity column.
    pub fn identity(mut self) -> Self {
        self.identity = true;
        self.nullable = false;
        self
    }
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
    /// Schema name, if the table is schema-qualified.
    #[serde(default)]
    pub schema: Option<String>,

    /// Table name.
    pub name: String,

    /// Column definitions in declaration order.
    #[serde(default)]
    pub columns: Vec<ColumnMetadata>,
}

impl EntityMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn column(mut self, column: ColumnMetadata) -> Self {
        self.columns.push(column);
        self
    }

    /// Load entity metadata from a YAML file.
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Get the qualified table name (`schema.name` or `name`).
    pub fn full_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.name),
            None => self.name.clone(),
        }
    }

    /// Primary key columns in declaration order.
    pub fn primary_key(&self) -> Vec<&ColumnMetadata> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    /// Find a column by name (case-insensitive).
    pub fn find_column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}
