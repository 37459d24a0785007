//! Database driver implementations.
//!
//! Each engine module provides a [`SyntaxProvider`] dialect and, behind a
//! feature flag, a [`Connection`] over its native client:
//!
//! - [`mssql`]: Microsoft SQL Server (feature `mssql`, Tiberius + bb8)
//! - [`postgres`]: PostgreSQL (feature `postgres`, tokio-postgres + deadpool)
//! - [`mysql`]: MySQL and MariaDB (feature `mysql`, SQLx)
//! - [`sqlite`]: SQLite (feature `sqlite`, rusqlite; on by default)
//! - [`oracle`], [`firebird`]: dialect only
//!
//! # Adding New Databases
//!
//! 1. Create a new module under `drivers/` with a `SyntaxProvider` dialect
//! 2. Add the provider to [`builtin_dispatch`]
//! 3. Optionally implement `Connection` behind a feature flag and route the
//!    engine in [`DriverConnector`]

pub mod firebird;
pub mod mssql;
pub mod mysql;
pub mod oracle;
pub mod postgres;
pub mod sqlite;

pub use firebird::FirebirdDialect;
pub use mssql::MssqlDialect;
pub use mysql::MysqlDialect;
pub use oracle::OracleDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::bulk::{CopyBulkCopier, StatementBulkCopier};
use crate::core::provider::{Engine, ProviderIdentity};
use crate::core::registry::{DispatchTable, ProviderConstructors};
use crate::core::traits::{Connection, SyntaxProvider};
use crate::database::ConnectionFactory;
use crate::error::{DataError, Result};
use crate::generator::DdlTableGenerator;
use crate::tenancy::ConnectionTarget;
use crate::translate::SqlTranslator;

/// How a provider bulk-loads rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BulkStrategy {
    Statements,
    Copy,
}

/// Constructors for a provider whose dialect is built by `dialect`.
fn constructors<S>(dialect: fn(ProviderIdentity) -> S, bulk: BulkStrategy) -> ProviderConstructors
where
    S: SyntaxProvider + 'static,
{
    let constructors = ProviderConstructors::new()
        .syntax(move |ctx| Ok(dialect(ctx.provider().clone())))
        .translator(|ctx| Ok(SqlTranslator::new(ctx.get_service::<dyn SyntaxProvider>()?)))
        .table_generator(|ctx| Ok(DdlTableGenerator::new(ctx.provider().clone())));

    match bulk {
        BulkStrategy::Statements => constructors.bulk_copier(|ctx| {
            Ok(StatementBulkCopier::new(
                ctx.get_service::<dyn SyntaxProvider>()?,
            ))
        }),
        BulkStrategy::Copy => constructors.bulk_copier(|ctx| {
            Ok(CopyBulkCopier::new(ctx.get_service::<dyn SyntaxProvider>()?))
        }),
    }
}

/// Dispatch table for every built-in provider.
///
/// Close relatives share one constructor set: `Oracle`/`OracleManaged` and
/// `MySql`/`MariaDb`.
pub fn builtin_dispatch() -> DispatchTable {
    let oracle = constructors(OracleDialect::new, BulkStrategy::Statements);
    let mysql = constructors(MysqlDialect::new, BulkStrategy::Statements);

    DispatchTable::new()
        .with(
            ProviderIdentity::mssql(),
            constructors(MssqlDialect::new, BulkStrategy::Statements),
        )
        .with(ProviderIdentity::oracle(), oracle.clone())
        .with(ProviderIdentity::oracle_managed(), oracle)
        .with(ProviderIdentity::mysql(), mysql.clone())
        .with(ProviderIdentity::mariadb(), mysql)
        .with(
            ProviderIdentity::sqlite(),
            constructors(SqliteDialect::new, BulkStrategy::Statements),
        )
        .with(
            ProviderIdentity::postgresql(),
            constructors(PostgresDialect::new, BulkStrategy::Copy),
        )
        .with(
            ProviderIdentity::firebird(),
            constructors(FirebirdDialect::new, BulkStrategy::Statements),
        )
}

/// [`ConnectionFactory`] over the compiled-in drivers.
///
/// Pools are cached per connection string. Every `connect` checks out its own
/// session, except in-memory SQLite, where all callers share one serialized
/// connection per connection string so the database stays visible across
/// facades. SQLite files get a fresh connection per `connect`.
#[derive(Default)]
pub struct DriverConnector {
    #[cfg(feature = "sqlite")]
    sqlite: std::sync::Mutex<HashMap<String, Arc<sqlite::SqliteConnection>>>,
    #[cfg(feature = "postgres")]
    postgres: tokio::sync::Mutex<HashMap<String, deadpool_postgres::Pool>>,
    #[cfg(feature = "mssql")]
    mssql: tokio::sync::Mutex<HashMap<String, bb8::Pool<mssql::TiberiusConnectionManager>>>,
    #[cfg(feature = "mysql")]
    mysql: tokio::sync::Mutex<HashMap<String, sqlx::MySqlPool>>,
}

impl DriverConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engines with a compiled-in connection driver.
    pub fn engines() -> Vec<Engine> {
        let mut engines = Vec::new();
        #[cfg(feature = "mssql")]
        engines.push(Engine::MsSql);
        #[cfg(feature = "mysql")]
        engines.push(Engine::MySql);
        #[cfg(feature = "sqlite")]
        engines.push(Engine::Sqlite);
        #[cfg(feature = "postgres")]
        engines.push(Engine::PostgreSql);
        engines
    }

    #[cfg(feature = "sqlite")]
    fn connect_sqlite(&self, target: &ConnectionTarget) -> Result<Arc<dyn Connection>> {
        if !sqlite::SqliteConnection::is_in_memory(target) {
            return Ok(Arc::new(sqlite::SqliteConnection::open(target)?));
        }
        let mut cache = self
            .sqlite
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(conn) = cache.get(target.connection_string()) {
            debug!("Reusing in-memory SQLite connection for {}", target.masked());
            return Ok(conn.clone());
        }
        let conn = Arc::new(sqlite::SqliteConnection::open(target)?);
        cache.insert(target.connection_string().to_string(), conn.clone());
        Ok(conn)
    }

    #[cfg(feature = "postgres")]
    async fn connect_postgres(&self, target: &ConnectionTarget) -> Result<Arc<dyn Connection>> {
        let pool = {
            let mut cache = self.postgres.lock().await;
            match cache.get(target.connection_string()) {
                Some(pool) => pool.clone(),
                None => {
                    let pool = postgres::PgConnection::pool(target)?;
                    cache.insert(target.connection_string().to_string(), pool.clone());
                    pool
                }
            }
        };
        let conn = postgres::PgConnection::checkout(&pool, target.provider().clone()).await?;
        Ok(Arc::new(conn))
    }

    #[cfg(feature = "mssql")]
    async fn connect_mssql(&self, target: &ConnectionTarget) -> Result<Arc<dyn Connection>> {
        let pool = {
            let mut cache = self.mssql.lock().await;
            match cache.get(target.connection_string()) {
                Some(pool) => pool.clone(),
                None => {
                    let pool = mssql::MssqlConnection::pool(target).await?;
                    cache.insert(target.connection_string().to_string(), pool.clone());
                    pool
                }
            }
        };
        let conn = mssql::MssqlConnection::checkout(&pool, target.provider().clone()).await?;
        Ok(Arc::new(conn))
    }

    #[cfg(feature = "mysql")]
    async fn connect_mysql(&self, target: &ConnectionTarget) -> Result<Arc<dyn Connection>> {
        let pool = {
            let mut cache = self.mysql.lock().await;
            match cache.get(target.connection_string()) {
                Some(pool) => pool.clone(),
                None => {
                    let pool = mysql::MysqlConnection::pool(target).await?;
                    cache.insert(target.connection_string().to_string(), pool.clone());
                    pool
                }
            }
        };
        let conn = mysql::MysqlConnection::checkout(&pool, target.provider().clone()).await?;
        Ok(Arc::new(conn))
    }
}

#[async_trait]
impl ConnectionFactory for DriverConnector {
    async fn connect(&self, target: &ConnectionTarget) -> Result<Arc<dyn Connection>> {
        debug!("Connecting to {}", target);
        match target.provider().engine() {
            #[cfg(feature = "sqlite")]
            Engine::Sqlite => self.connect_sqlite(target),
            #[cfg(feature = "postgres")]
            Engine::PostgreSql => self.connect_postgres(target).await,
            #[cfg(feature = "mssql")]
            Engine::MsSql => self.connect_mssql(target).await,
            #[cfg(feature = "mysql")]
            Engine::MySql => self.connect_mysql(target).await,
            _ => Err(DataError::unsupported(target.provider(), "connection")),
        }
    }
}
