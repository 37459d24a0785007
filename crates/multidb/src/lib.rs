//! # multidb
//!
//! Multi-dialect data access library.
//!
//! Application code issues queries, bulk inserts and table creation against
//! one of several SQL engines (SQL Server, Oracle, MySQL/MariaDB, SQLite,
//! PostgreSQL, Firebird) through a single API:
//!
//! - **Provider service registry**: per-provider capabilities (syntax,
//!   query translation, table generation, bulk copy), built lazily from an
//!   explicit dispatch table and memoized
//! - **Tenancy resolution**: logical handles map to one connection target
//!   or to a keyed set of shards
//! - **Bulk copy**: mapped, batched inserts with per-batch transactions and
//!   cancellation
//! - **Table generation**: existence probe plus dialect DDL
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use multidb::{Config, Database, DriverConnector, ProviderServiceRegistry, TenancyResolver};
//!
//! #[tokio::main]
//! async fn main() -> multidb::Result<()> {
//!     let config = Config::load("multidb.yaml")?;
//!     let resolver = TenancyResolver::from_config(&config)?;
//!     let registry = Arc::new(ProviderServiceRegistry::with_builtins());
//!     let db = Database::open("main", &resolver, registry, &DriverConnector::new()).await?;
//!     db.execute("DELETE FROM audit_log").await?;
//!     Ok(())
//! }
//! ```

pub mod bulk;
pub mod config;
pub mod core;
pub mod database;
pub mod drivers;
pub mod error;
pub mod generator;
pub mod tenancy;
pub mod translate;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use crate::bulk::{BulkCopySession, ColumnMapping};
pub use crate::config::{mask_connection_string, Config, InstanceConfig, ShardConfig};
pub use crate::core::{
    BulkCopier, ColumnMetadata, ColumnType, Connection, Engine, EntityMetadata,
    ProviderIdentity, ProviderServiceRegistry, QueryTranslator, Resolution, Row, RowSource,
    SkipReason, SqlValue, SyntaxProvider, TableCreation, TableGenerator, Transaction,
};
pub use crate::database::{ConnectionFactory, Database};
pub use crate::drivers::{builtin_dispatch, DriverConnector};
pub use crate::error::{DataError, Result};
pub use crate::generator::DdlTableGenerator;
pub use crate::tenancy::{
    ConnectionTarget, Shard, TenancyDescriptor, TenancyMode, TenancyResolver,
};
pub use crate::translate::{OrderBy, SelectQuery, SqlTranslator};

pub use tokio_util::sync::CancellationToken;
