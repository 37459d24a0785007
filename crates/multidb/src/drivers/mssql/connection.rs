//! MSSQL connection over Tiberius with bb8 pooling.
//!
//! A Tiberius request dropped before completion leaves unread response
//! tokens on the stream. The session is then marked interrupted: later calls
//! fail fast and bb8 discards the client instead of pooling it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use tiberius::{Client, Config};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::info;

use crate::core::provider::ProviderIdentity;
use crate::core::traits::Connection;
use crate::error::{DataError, Result};
use crate::tenancy::ConnectionTarget;

/// Maximum TDS packet size (32767 bytes, ~32KB).
const TDS_MAX_PACKET_SIZE: u32 = 32767;

/// Connection acquisition timeout from pool (30 seconds).
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle connection timeout (5 minutes).
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default maximum pool size per connection string.
const DEFAULT_POOL_SIZE: u32 = 8;

/// Connection manager for bb8 pool with Tiberius.
#[derive(Clone)]
pub struct TiberiusConnectionManager {
    config: Config,
}

impl TiberiusConnectionManager {
    /// Parse an ADO.NET connection string (`Server=tcp:host,1433;Database=...`).
    pub fn from_ado(conn: &str) -> std::result::Result<Self, tiberius::error::Error> {
        let mut config = Config::from_ado_string(conn)?;
        config.packet_size(TDS_MAX_PACKET_SIZE);
        Ok(Self { config })
    }
}

/// A Tiberius client and the flag set when a request on it was abandoned.
pub struct TdsClient {
    client: Client<Compat<TcpStream>>,
    interrupted: Arc<AtomicBool>,
}

/// Marks a session interrupted unless the request it guards completes.
struct PendingRequest<'a>(Option<&'a AtomicBool>);

impl<'a> PendingRequest<'a> {
    fn start(flag: &'a AtomicBool) -> Self {
        Self(Some(flag))
    }

    fn complete(mut self) {
        self.0 = None;
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        if let Some(flag) = self.0 {
            flag.store(true, Ordering::Release);
        }
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = TdsClient;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let tcp = TcpStream::connect(self.config.get_addr())
            .await
            .map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            })?;
        tcp.set_nodelay(true).ok();
        let client = Client::connect(self.config.clone(), tcp.compat_write()).await?;
        Ok(TdsClient {
            client,
            interrupted: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.client.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.interrupted.load(Ordering::Acquire)
    }
}

type PooledClient = PooledConnection<'static, TiberiusConnectionManager>;

/// One pooled SQL Server session.
///
/// Tiberius needs `&mut` access, so the client sits behind an async mutex.
pub struct MssqlConnection {
    provider: ProviderIdentity,
    client: Mutex<PooledClient>,
    interrupted: Arc<AtomicBool>,
    batch_lock: Mutex<()>,
}

impl MssqlConnection {
    /// Build a pool for `target`.
    pub async fn pool(target: &ConnectionTarget) -> Result<Pool<TiberiusConnectionManager>> {
        let manager = TiberiusConnectionManager::from_ado(target.connection_string()).map_err(
            |e| DataError::connection(target.provider(), format!("invalid connection string: {}", e)),
        )?;
        let pool = Pool::builder()
            .max_size(DEFAULT_POOL_SIZE)
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| DataError::connection(target.provider(), e))?;

        info!(
            "Created MSSQL pool for {} (pool_size={})",
            target.masked(),
            DEFAULT_POOL_SIZE
        );
        Ok(pool)
    }

    /// Check a session out of `pool`.
    pub async fn checkout(
        pool: &Pool<TiberiusConnectionManager>,
        provider: ProviderIdentity,
    ) -> Result<Self> {
        let client = pool
            .get_owned()
            .await
            .map_err(|e| DataError::connection(&provider, e))?;
        let interrupted = client.interrupted.clone();
        Ok(Self {
            provider,
            client: Mutex::new(client),
            interrupted,
            batch_lock: Mutex::new(()),
        })
    }

    /// Lock the client, refusing a session left mid-request.
    async fn client(&self) -> Result<MutexGuard<'_, PooledClient>> {
        let client = self.client.lock().await;
        ensure_usable(&self.interrupted, &self.provider)?;
        Ok(client)
    }

    async fn simple(&self, sql: &str) -> Result<()> {
        let mut client = self.client().await?;
        let pending = PendingRequest::start(&self.interrupted);
        let result = match client.client.simple_query(sql).await {
            Ok(stream) => stream.into_results().await.map(|_| ()),
            Err(e) => Err(e),
        };
        pending.complete();
        result.map_err(|e| DataError::execution(&self.provider, format!("executing {}", sql), e))
    }
}

fn ensure_usable(interrupted: &AtomicBool, provider: &ProviderIdentity) -> Result<()> {
    if interrupted.load(Ordering::Acquire) {
        return Err(DataError::connection(
            provider,
            "session was interrupted mid-request and can no longer be used",
        ));
    }
    Ok(())
}

#[async_trait]
impl Connection for MssqlConnection {
    fn provider(&self) -> &ProviderIdentity {
        &self.provider
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let mut client = self.client().await?;
        let pending = PendingRequest::start(&self.interrupted);
        let result = client.client.execute(sql, &[]).await;
        pending.complete();
        let result = result
            .map_err(|e| DataError::execution(&self.provider, format!("executing {}", sql), e))?;
        Ok(result.total())
    }

    async fn query_count(&self, sql: &str) -> Result<i64> {
        let mut client = self.client().await?;
        let pending = PendingRequest::start(&self.interrupted);
        let row = match client.client.simple_query(sql).await {
            Ok(stream) => stream.into_row().await,
            Err(e) => Err(e),
        };
        pending.complete();
        let row = row
            .map_err(|e| DataError::execution(&self.provider, format!("querying {}", sql), e))?;
        let count = row
            .and_then(|r| r.get::<i32, _>(0))
            .map(i64::from)
            .unwrap_or(0);
        Ok(count)
    }

    fn batch_lock(&self) -> &Mutex<()> {
        &self.batch_lock
    }

    // Transaction control must not go through sp_executesql
    async fn begin(&self) -> Result<()> {
        self.simple("BEGIN TRANSACTION").await
    }

    async fn commit(&self) -> Result<()> {
        self.simple("COMMIT TRANSACTION").await
    }

    async fn rollback(&self) -> Result<()> {
        self.simple("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await
    }
}
