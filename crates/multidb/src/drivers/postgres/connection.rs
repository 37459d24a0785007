//! PostgreSQL connection over a deadpool-postgres pool.
//!
//! Each [`PgConnection`] holds one checked-out client for its lifetime, so
//! transactions and COPY run on the same backend session.

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::SinkExt;
use tokio_postgres::{Config as PgConfig, CopyInSink, NoTls};
use tracing::{debug, info};

use crate::core::provider::ProviderIdentity;
use crate::core::traits::Connection;
use crate::error::{DataError, Result};
use crate::tenancy::ConnectionTarget;

/// Default maximum pool size per connection string.
const DEFAULT_POOL_SIZE: usize = 8;

/// One pooled PostgreSQL session.
pub struct PgConnection {
    provider: ProviderIdentity,
    client: Object,
    batch_lock: tokio::sync::Mutex<()>,
}

impl PgConnection {
    /// Build a pool for `target` (libpq key/value or URL connection string).
    pub fn pool(target: &ConnectionTarget) -> Result<Pool> {
        let pg_config: PgConfig = target.connection_string().parse().map_err(|e| {
            DataError::connection(target.provider(), format!("invalid connection string: {}", e))
        })?;

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(DEFAULT_POOL_SIZE)
            .build()
            .map_err(|e| DataError::connection(target.provider(), e))?;

        info!(
            "Created PostgreSQL pool for {} (pool_size={})",
            target.masked(),
            DEFAULT_POOL_SIZE
        );
        Ok(pool)
    }

    /// Check a session out of `pool`.
    pub async fn checkout(pool: &Pool, provider: ProviderIdentity) -> Result<Self> {
        let client = pool
            .get()
            .await
            .map_err(|e| DataError::connection(&provider, e))?;
        Ok(Self {
            provider,
            client,
            batch_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn execution_error(&self, context: &str, sql: &str, e: tokio_postgres::Error) -> DataError {
        DataError::execution(&self.provider, format!("{} {}", context, sql), e)
    }
}

#[async_trait]
impl Connection for PgConnection {
    fn provider(&self) -> &ProviderIdentity {
        &self.provider
    }

    fn batch_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.batch_lock
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        self.client
            .execute(sql, &[])
            .await
            .map_err(|e| self.execution_error("executing", sql, e))
    }

    async fn query_count(&self, sql: &str) -> Result<i64> {
        let row = self
            .client
            .query_one(sql, &[])
            .await
            .map_err(|e| self.execution_error("querying", sql, e))?;
        row.try_get::<_, i64>(0)
            .map_err(|e| self.execution_error("reading count from", sql, e))
    }

    async fn begin(&self) -> Result<()> {
        self.client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| self.execution_error("executing", "BEGIN", e))
    }

    async fn commit(&self) -> Result<()> {
        self.client
            .batch_execute("COMMIT")
            .await
            .map_err(|e| self.execution_error("executing", "COMMIT", e))
    }

    async fn rollback(&self) -> Result<()> {
        self.client
            .batch_execute("ROLLBACK")
            .await
            .map_err(|e| self.execution_error("executing", "ROLLBACK", e))
    }

    fn supports_copy(&self) -> bool {
        true
    }

    async fn copy_in(&self, statement: &str, data: Bytes) -> Result<u64> {
        let len = data.len();
        let sink: CopyInSink<Bytes> = self
            .client
            .copy_in(statement)
            .await
            .map_err(|e| self.execution_error("starting", statement, e))?;

        tokio::pin!(sink);
        sink.send(data)
            .await
            .map_err(|e| self.execution_error("sending data for", statement, e))?;
        let rows = sink
            .finish()
            .await
            .map_err(|e| self.execution_error("finishing", statement, e))?;

        debug!("{}: COPY sent {} bytes, {} rows", self.provider, len, rows);
        Ok(rows)
    }
}
