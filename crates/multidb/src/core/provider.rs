//! Provider identities.
//!
//! A [`ProviderIdentity`] names one database engine/driver variant. It is the
//! key every dialect-specific capability is resolved under, and it never
//! carries a connection string: two connections to different SQL Server hosts
//! share the `MsSql` identity and therefore share capability instances.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{DataError, Result};

/// Database engine family.
///
/// Several provider variants may belong to one family (e.g. two Oracle
/// drivers), which lets the dispatch table point them at the same
/// constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    MsSql,
    Oracle,
    MySql,
    Sqlite,
    PostgreSql,
    Firebird,
}

impl Engine {
    /// Display name of the engine family.
    pub fn name(self) -> &'static str {
        match self {
            Engine::MsSql => "SQL Server",
            Engine::Oracle => "Oracle",
            Engine::MySql => "MySQL",
            Engine::Sqlite => "SQLite",
            Engine::PostgreSql => "PostgreSQL",
            Engine::Firebird => "Firebird",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque, comparable identity of a database provider variant.
///
/// Equality and hashing use the variant name only (ASCII case-insensitive).
/// Cloning is cheap.
#[derive(Clone)]
pub struct ProviderIdentity {
    name: Arc<str>,
    engine: Engine,
}

impl ProviderIdentity {
    /// Create a provider identity for a custom driver variant.
    pub fn new(name: impl Into<Arc<str>>, engine: Engine) -> Self {
        Self {
            name: name.into(),
            engine,
        }
    }

    pub fn mssql() -> Self {
        Self::new("MsSql", Engine::MsSql)
    }

    pub fn oracle() -> Self {
        Self::new("Oracle", Engine::Oracle)
    }

    /// Managed Oracle driver; shares every Oracle capability constructor.
    pub fn oracle_managed() -> Self {
        Self::new("OracleManaged", Engine::Oracle)
    }

    pub fn mysql() -> Self {
        Self::new("MySql", Engine::MySql)
    }

    pub fn mariadb() -> Self {
        Self::new("MariaDb", Engine::MySql)
    }

    pub fn sqlite() -> Self {
        Self::new("Sqlite", Engine::Sqlite)
    }

    pub fn postgresql() -> Self {
        Self::new("PostgreSql", Engine::PostgreSql)
    }

    pub fn firebird() -> Self {
        Self::new("Firebird", Engine::Firebird)
    }

    /// All built-in provider identities.
    pub fn builtins() -> Vec<Self> {
        vec![
            Self::mssql(),
            Self::oracle(),
            Self::oracle_managed(),
            Self::mysql(),
            Self::mariadb(),
            Self::sqlite(),
            Self::postgresql(),
            Self::firebird(),
        ]
    }

    /// Resolve a configured provider type string to a built-in identity.
    ///
    /// Normalizes the common aliases:
    /// - "mssql", "sqlserver", "sql_server" → `MsSql`
    /// - "postgres", "postgresql", "pg" → `PostgreSql`
    /// - "oracle" → `Oracle`, "oracle.managed", "oracle_managed" → `OracleManaged`
    /// - "mysql" → `MySql`, "mariadb" → `MariaDb`
    /// - "sqlite", "sqlite3" → `Sqlite`
    /// - "firebird", "fb" → `Firebird`
    pub fn from_type_name(type_name: &str) -> Result<Self> {
        match type_name.trim().to_lowercase().as_str() {
            "mssql" | "sqlserver" | "sql_server" => Ok(Self::mssql()),
            "postgres" | "postgresql" | "pg" => Ok(Self::postgresql()),
            "oracle" => Ok(Self::oracle()),
            "oracle.managed" | "oracle_managed" | "oraclemanaged" => Ok(Self::oracle_managed()),
            "mysql" => Ok(Self::mysql()),
            "mariadb" => Ok(Self::mariadb()),
            "sqlite" | "sqlite3" => Ok(Self::sqlite()),
            "firebird" | "fb" => Ok(Self::firebird()),
            other => Err(DataError::UnknownProvider(other.to_string())),
        }
    }

    /// Variant name (e.g. "MsSql").
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Engine family of this variant.
    pub fn engine(&self) -> Engine {
        self.engine
    }
}

impl PartialEq for ProviderIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl Eq for ProviderIdentity {}

impl Hash for ProviderIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.name.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl fmt::Debug for ProviderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.engine)
    }
}

impl fmt::Display for ProviderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
