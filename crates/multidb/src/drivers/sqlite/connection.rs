//! rusqlite-backed connection.
//!
//! rusqlite is synchronous; statements run inline under a mutex, which also
//! serializes every caller sharing the connection. Writers on separate
//! connections to one file wait for each other up to [`BUSY_TIMEOUT`].

use std::io;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection as RawConnection;
use tracing::debug;

use crate::core::provider::ProviderIdentity;
use crate::core::traits::Connection;
use crate::error::{DataError, Result};
use crate::tenancy::ConnectionTarget;

const POISONED_CONNECTION_MESSAGE: &str = "sqlite connection state was poisoned";

/// How long a statement waits for another connection's write lock.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// A single SQLite database connection.
pub struct SqliteConnection {
    provider: ProviderIdentity,
    connection: Mutex<RawConnection>,
    batch_lock: tokio::sync::Mutex<()>,
}

impl SqliteConnection {
    /// Open the database named by `target`.
    ///
    /// Accepts `:memory:`, a file path, or an ADO-style string with a
    /// `Data Source=` entry.
    pub fn open(target: &ConnectionTarget) -> Result<Self> {
        let path = database_path(target.connection_string());
        let opened = if path == ":memory:" {
            RawConnection::open_in_memory()
        } else {
            RawConnection::open(&path).and_then(|conn| {
                conn.busy_timeout(BUSY_TIMEOUT)?;
                Ok(conn)
            })
        };
        let connection = opened.map_err(|e| {
            DataError::connection(target.provider(), format!("opening {}: {}", path, e))
        })?;
        debug!("Opened SQLite database {}", path);

        Ok(Self {
            provider: target.provider().clone(),
            connection: Mutex::new(connection),
            batch_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Whether `target` names a private in-memory database.
    pub fn is_in_memory(target: &ConnectionTarget) -> bool {
        database_path(target.connection_string()) == ":memory:"
    }

    fn lock_connection(&self, sql: &str) -> Result<MutexGuard<'_, RawConnection>> {
        self.connection.lock().map_err(|_| {
            DataError::execution(
                &self.provider,
                format!("executing {}", sql),
                io::Error::other(POISONED_CONNECTION_MESSAGE),
            )
        })
    }
}

/// Extract the database path from a connection string.
fn database_path(conn: &str) -> String {
    let conn = conn.trim();
    conn.split(';')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| {
            let key = key.trim();
            key.eq_ignore_ascii_case("data source") || key.eq_ignore_ascii_case("datasource")
        })
        .map(|(_, value)| value.trim().to_string())
        .unwrap_or_else(|| conn.to_string())
}

#[async_trait]
impl Connection for SqliteConnection {
    fn provider(&self) -> &ProviderIdentity {
        &self.provider
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let connection = self.lock_connection(sql)?;
        connection
            .execute(sql, [])
            .map(|n| n as u64)
            .map_err(|e| DataError::execution(&self.provider, format!("executing {}", sql), e))
    }

    async fn query_count(&self, sql: &str) -> Result<i64> {
        let connection = self.lock_connection(sql)?;
        connection
            .query_row(sql, [], |row| row.get::<_, i64>(0))
            .map_err(|e| DataError::execution(&self.provider, format!("querying {}", sql), e))
    }

    // Take the write lock up front so the busy timeout applies to it
    async fn begin(&self) -> Result<()> {
        self.execute("BEGIN IMMEDIATE").await.map(|_| ())
    }

    fn batch_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.batch_lock
    }
}
