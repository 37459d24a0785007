//! Bulk-copy engine.
//!
//! A [`BulkCopySession`] is opened by a provider's
//! [`BulkCopier`](crate::core::BulkCopier) and moves rows from a
//! [`RowSource`] into one destination table in fixed-size batches:
//!
//! - column mappings select and order source values per destination column
//! - batches are flushed in source order, each of `batch_size` rows except the last
//! - without a caller transaction, every batch commits on its own (all or nothing)
//!   while holding the connection's [`batch_lock`](Connection::batch_lock)
//! - inside a caller transaction, every batch runs under a savepoint and a
//!   failed or cancelled batch rolls back to it
//! - the async path races each in-flight batch against a [`CancellationToken`]
//!   and rolls the batch back when cancelled
//!
//! Cancelling drops the in-flight statement. Drivers differ in what that
//! leaves behind: SQLite statements finish before the first yield,
//! tokio-postgres and SQLx resynchronize the session on next use, and a
//! Tiberius session is marked broken and discarded by its pool (the server
//! then rolls back whatever was open on it).
//!
//! The session releases its loader exactly once, on [`release`](BulkCopySession::release)
//! or on drop.

mod copier;
mod loader;

pub use copier::{CopyBulkCopier, StatementBulkCopier};
pub use loader::{CopyLoader, StatementLoader};

use std::sync::Arc;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::provider::ProviderIdentity;
use crate::core::traits::{BulkLoader, Connection, LoadTarget, RowSource, SyntaxProvider};
use crate::core::value::Row;
use crate::error::{DataError, Result};

/// Savepoint guarding each batch written inside a caller transaction.
const BATCH_SAVEPOINT: &str = "multidb_batch";

/// Source index → destination column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub source_index: usize,
    pub destination: String,
}

enum BatchOutcome {
    Written(u64),
    Cancelled,
    Failed(DataError),
}

/// One bulk copy into one destination table.
pub struct BulkCopySession<'c> {
    provider: ProviderIdentity,
    syntax: Arc<dyn SyntaxProvider>,
    table: String,
    batch_size: usize,
    mappings: Vec<ColumnMapping>,
    connection: &'c dyn Connection,
    /// The caller owns a transaction; batches use savepoints instead of
    /// beginning and committing.
    external_tx: bool,
    loader: Box<dyn BulkLoader>,
    released: bool,
    rows_written: u64,
    batches_flushed: u64,
}

impl<'c> BulkCopySession<'c> {
    pub(crate) fn new(
        syntax: Arc<dyn SyntaxProvider>,
        table: impl Into<String>,
        batch_size: usize,
        connection: &'c dyn Connection,
        external_tx: bool,
        loader: Box<dyn BulkLoader>,
    ) -> Self {
        Self {
            provider: syntax.provider().clone(),
            syntax,
            table: table.into(),
            batch_size,
            mappings: Vec::new(),
            connection,
            external_tx,
            loader,
            released: false,
            rows_written: 0,
            batches_flushed: 0,
        }
    }

    pub fn provider(&self) -> &ProviderIdentity {
        &self.provider
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn mappings(&self) -> &[ColumnMapping] {
        &self.mappings
    }

    /// Rows written by committed (or caller-transaction) batches so far.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn batches_flushed(&self) -> u64 {
        self.batches_flushed
    }

    /// Map source value `source_index` to destination column `destination`.
    ///
    /// Destination names are compared case-insensitively; mapping one twice
    /// fails with `DuplicateMapping`.
    pub fn add_column_mapping(
        &mut self,
        source_index: usize,
        destination: impl Into<String>,
    ) -> Result<()> {
        let destination = destination.into();
        if self
            .mappings
            .iter()
            .any(|m| m.destination.eq_ignore_ascii_case(&destination))
        {
            return Err(DataError::DuplicateMapping {
                provider: self.provider.to_string(),
                table: self.table.clone(),
                column: destination,
            });
        }
        self.mappings.push(ColumnMapping {
            source_index,
            destination,
        });
        Ok(())
    }

    /// Write every row from `source`, blocking the calling thread.
    ///
    /// Inside a multi-thread Tokio runtime this blocks in place; outside any
    /// runtime it drives a private current-thread runtime. A current-thread
    /// runtime cannot be blocked, so that case fails with `Runtime`.
    pub fn write_rows<S: RowSource>(&mut self, source: S) -> Result<u64> {
        match Handle::try_current() {
            Ok(handle) => match handle.runtime_flavor() {
                RuntimeFlavor::CurrentThread => Err(DataError::Runtime(
                    "write_rows would block a current-thread runtime; use write_rows_async"
                        .to_string(),
                )),
                _ => tokio::task::block_in_place(|| handle.block_on(self.write_all(source, None))),
            },
            Err(_) => {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                runtime.block_on(self.write_all(source, None))
            }
        }
    }

    /// Write every row from `source`, stopping when `cancel` fires.
    ///
    /// A batch in flight when the token fires is rolled back (to its
    /// savepoint inside a caller transaction) and `Cancelled` reports the
    /// rows written before it.
    pub async fn write_rows_async<S: RowSource>(
        &mut self,
        source: S,
        cancel: CancellationToken,
    ) -> Result<u64> {
        self.write_all(source, Some(&cancel)).await
    }

    async fn write_all<S: RowSource>(
        &mut self,
        mut source: S,
        cancel: Option<&CancellationToken>,
    ) -> Result<u64> {
        if self.mappings.is_empty() {
            return Err(DataError::bulk_copy(
                &self.provider,
                self.table.clone(),
                "no column mappings configured",
            ));
        }

        let columns: Vec<String> = self
            .mappings
            .iter()
            .map(|m| m.destination.clone())
            .collect();
        let mut batch: Vec<Row> = Vec::with_capacity(self.batch_size);
        let mut written = 0u64;

        loop {
            if cancel.is_some_and(|t| t.is_cancelled()) {
                return Err(self.cancelled());
            }
            let Some(row) = source.next_row()? else {
                break;
            };
            batch.push(self.project(row)?);
            if batch.len() == self.batch_size {
                written += self.flush(&columns, &batch, cancel).await?;
                batch.clear();
            }
        }

        if !batch.is_empty() {
            written += self.flush(&columns, &batch, cancel).await?;
        }

        info!(
            "{}: bulk copied {} rows into {} ({} batches so far)",
            self.provider, written, self.table, self.batches_flushed
        );
        Ok(written)
    }

    fn project(&self, row: Row) -> Result<Row> {
        self.mappings
            .iter()
            .map(|m| {
                row.get(m.source_index).cloned().ok_or_else(|| {
                    DataError::bulk_copy(
                        &self.provider,
                        self.table.clone(),
                        format!(
                            "source index {} (mapped to '{}') is outside a row of {} values",
                            m.source_index,
                            m.destination,
                            row.len()
                        ),
                    )
                })
            })
            .collect()
    }

    async fn flush(
        &mut self,
        columns: &[String],
        rows: &[Row],
        cancel: Option<&CancellationToken>,
    ) -> Result<u64> {
        let connection = self.connection;

        // Held until this batch commits or rolls back
        let _turn = if self.external_tx {
            None
        } else {
            Some(connection.batch_lock().lock().await)
        };
        self.start_batch().await?;

        let outcome = {
            let target = LoadTarget {
                table: &self.table,
                columns,
            };
            let load = self.loader.load(connection, &target, rows);
            match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => BatchOutcome::Cancelled,
                    result = load => match result {
                        Ok(n) => BatchOutcome::Written(n),
                        Err(e) => BatchOutcome::Failed(e),
                    },
                },
                None => match load.await {
                    Ok(n) => BatchOutcome::Written(n),
                    Err(e) => BatchOutcome::Failed(e),
                },
            }
        };

        match outcome {
            BatchOutcome::Written(n) => {
                // A token that fired during the write still wins before commit
                if cancel.is_some_and(|t| t.is_cancelled()) {
                    self.undo_batch().await;
                    return Err(self.cancelled());
                }
                if let Err(e) = self.finish_batch().await {
                    self.undo_batch().await;
                    return Err(e);
                }
                self.rows_written += n;
                self.batches_flushed += 1;
                debug!(
                    "{}: flushed batch {} ({} rows) into {}",
                    self.provider, self.batches_flushed, n, self.table
                );
                Ok(n)
            }
            BatchOutcome::Cancelled => {
                self.undo_batch().await;
                Err(self.cancelled())
            }
            BatchOutcome::Failed(e) => {
                self.undo_batch().await;
                Err(e)
            }
        }
    }

    async fn start_batch(&self) -> Result<()> {
        if self.external_tx {
            let sql = self.syntax.savepoint_sql(BATCH_SAVEPOINT);
            self.connection.execute(&sql).await.map(|_| ())
        } else {
            self.connection.begin().await
        }
    }

    async fn finish_batch(&self) -> Result<()> {
        if !self.external_tx {
            return self.connection.commit().await;
        }
        match self.syntax.release_savepoint_sql(BATCH_SAVEPOINT) {
            Some(sql) => self.connection.execute(&sql).await.map(|_| ()),
            None => Ok(()),
        }
    }

    /// Roll the current batch back, logging rather than returning failures.
    async fn undo_batch(&self) {
        let result = if self.external_tx {
            let sql = self.syntax.rollback_to_savepoint_sql(BATCH_SAVEPOINT);
            match self.connection.execute(&sql).await {
                Ok(_) => match self.syntax.release_savepoint_sql(BATCH_SAVEPOINT) {
                    Some(sql) => self.connection.execute(&sql).await.map(|_| ()),
                    None => Ok(()),
                },
                Err(e) => Err(e),
            }
        } else {
            self.connection.rollback().await
        };
        if let Err(e) = result {
            warn!(
                "{}: rollback of batch into {} failed: {}",
                self.provider, self.table, e
            );
        }
    }

    fn cancelled(&self) -> DataError {
        DataError::Cancelled {
            provider: self.provider.to_string(),
            table: self.table.clone(),
            rows_written: self.rows_written,
        }
    }

    fn release_loader(&mut self) {
        if !self.released {
            self.released = true;
            self.loader.release();
            debug!(
                "{}: released bulk copy session for {} ({} rows, {} batches)",
                self.provider, self.table, self.rows_written, self.batches_flushed
            );
        }
    }

    /// Release the provider loader.
    pub fn release(mut self) {
        self.release_loader();
    }
}

impl Drop for BulkCopySession<'_> {
    fn drop(&mut self) {
        self.release_loader();
    }
}

impl std::fmt::Debug for BulkCopySession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkCopySession")
            .field("provider", &self.provider)
            .field("table", &self.table)
            .field("batch_size", &self.batch_size)
            .field("mappings", &self.mappings)
            .field("external_tx", &self.external_tx)
            .field("rows_written", &self.rows_written)
            .field("batches_flushed", &self.batches_flushed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::{BulkCopier, Transaction};
    use crate::core::value::SqlValue;
    use crate::drivers::{MssqlDialect, PostgresDialect, SqliteDialect};
    use crate::testing::FakeConnection;
    use std::sync::Arc;

    fn movie_rows() -> Vec<Row> {
        vec![
            vec![SqlValue::from("Alien"), SqlValue::I32(1979)],
            vec![SqlValue::from("Heat"), SqlValue::I32(1995)],
            vec![SqlValue::from("Up"), SqlValue::I32(2009)],
        ]
    }

    fn sqlite_copier() -> StatementBulkCopier {
        StatementBulkCopier::new(Arc::new(SqliteDialect::default()))
    }

    fn open_movies<'c>(
        copier: &dyn BulkCopier,
        conn: &'c FakeConnection,
        batch_size: usize,
    ) -> BulkCopySession<'c> {
        let mut session = copier.open_session(conn, None, "Movies", batch_size).unwrap();
        session.add_column_mapping(0, "Name").unwrap();
        session.add_column_mapping(1, "Year").unwrap();
        session
    }

    #[tokio::test]
    async fn test_batches_of_two_and_one() {
        let conn = FakeConnection::new(ProviderIdentity::sqlite());
        let copier = sqlite_copier();
        let mut session = open_movies(&copier, &conn, 2);

        let written = session
            .write_rows_async(movie_rows().into_iter(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(written, 3);
        assert_eq!(session.batches_flushed(), 2);
        let inserts = conn.committed_inserts();
        assert_eq!(inserts.len(), 2);
        assert_eq!(
            inserts[0],
            "INSERT INTO \"Movies\" (\"Name\", \"Year\") VALUES ('Alien', 1979), ('Heat', 1995)"
        );
        assert_eq!(
            inserts[1],
            "INSERT INTO \"Movies\" (\"Name\", \"Year\") VALUES ('Up', 2009)"
        );
        assert_eq!(conn.commits(), 2);
    }

    #[test]
    fn test_write_rows_outside_runtime() {
        let conn = FakeConnection::new(ProviderIdentity::sqlite());
        let copier = sqlite_copier();
        let mut session = open_movies(&copier, &conn, 2);

        assert_eq!(session.write_rows(movie_rows().into_iter()).unwrap(), 3);
        assert_eq!(conn.committed_inserts().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_write_rows_inside_multi_thread_runtime() {
        let conn = FakeConnection::new(ProviderIdentity::sqlite());
        let copier = sqlite_copier();
        let mut session = open_movies(&copier, &conn, 10);

        assert_eq!(session.write_rows(movie_rows().into_iter()).unwrap(), 3);
        assert_eq!(conn.committed_inserts().len(), 1);
    }

    #[tokio::test]
    async fn test_write_rows_on_current_thread_runtime_is_rejected() {
        let conn = FakeConnection::new(ProviderIdentity::sqlite());
        let copier = sqlite_copier();
        let mut session = open_movies(&copier, &conn, 2);

        let err = session.write_rows(movie_rows().into_iter()).unwrap_err();
        assert!(matches!(err, DataError::Runtime(_)));
        assert!(conn.statements().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_after_two_batches_keeps_exactly_two() {
        let conn = FakeConnection::new(ProviderIdentity::sqlite()).stall_on_insert(3);
        let stalled = conn.stalled();
        let copier = sqlite_copier();
        let mut session = open_movies(&copier, &conn, 1);
        let token = CancellationToken::new();

        let writer = session.write_rows_async(movie_rows().into_iter(), token.clone());
        let canceller = async {
            stalled.notified().await;
            token.cancel();
        };
        let (result, ()) = tokio::join!(writer, canceller);

        match result.unwrap_err() {
            DataError::Cancelled {
                provider,
                table,
                rows_written,
            } => {
                assert_eq!(provider, "Sqlite");
                assert_eq!(table, "Movies");
                assert_eq!(rows_written, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(conn.committed_inserts().len(), 2);
        assert_eq!(conn.rollbacks(), 1);
        assert_eq!(session.batches_flushed(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_writes_nothing() {
        let conn = FakeConnection::new(ProviderIdentity::sqlite());
        let copier = sqlite_copier();
        let mut session = open_movies(&copier, &conn, 2);
        let token = CancellationToken::new();
        token.cancel();

        let err = session
            .write_rows_async(movie_rows().into_iter(), token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(conn.statements().is_empty());
    }

    #[tokio::test]
    async fn test_failed_batch_is_rolled_back() {
        let conn = FakeConnection::new(ProviderIdentity::sqlite()).fail_on_insert(2);
        let copier = sqlite_copier();
        let mut session = open_movies(&copier, &conn, 2);

        let err = session
            .write_rows_async(movie_rows().into_iter(), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DataError::Execution { .. }));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(conn.committed_inserts().len(), 1);
        assert_eq!(conn.rollbacks(), 1);
        assert_eq!(session.rows_written(), 2);
    }

    #[tokio::test]
    async fn test_caller_transaction_owns_commit() {
        let conn = FakeConnection::new(ProviderIdentity::sqlite());
        let copier = sqlite_copier();
        let tx = Transaction::begin(&conn).await.unwrap();
        {
            let mut session = copier.open_session(&conn, Some(&tx), "Movies", 2).unwrap();
            session.add_column_mapping(0, "Name").unwrap();
            session
                .write_rows_async(movie_rows().into_iter(), CancellationToken::new())
                .await
                .unwrap();
        }
        assert!(conn.committed_inserts().is_empty());
        assert_eq!(conn.commits(), 0);

        tx.commit().await.unwrap();
        assert_eq!(conn.committed_inserts().len(), 2);
        assert_eq!(conn.commits(), 1);
    }

    #[tokio::test]
    async fn test_failed_chunk_rolls_back_to_batch_savepoint() {
        // 600 rows exceed SQLite's 500-row INSERT, so the batch takes two statements
        let conn = FakeConnection::new(ProviderIdentity::sqlite()).fail_on_insert(2);
        let copier = sqlite_copier();
        let rows: Vec<Row> = (0..600).map(|i| vec![SqlValue::I32(i)]).collect();
        let tx = Transaction::begin(&conn).await.unwrap();
        {
            let mut session = copier.open_session(&conn, Some(&tx), "Movies", 1000).unwrap();
            session.add_column_mapping(0, "Year").unwrap();
            let err = session
                .write_rows_async(rows.into_iter(), CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, DataError::Execution { .. }));
            assert_eq!(session.rows_written(), 0);
        }
        tx.commit().await.unwrap();

        assert!(conn.committed_inserts().is_empty());
        let control: Vec<String> = conn
            .statements()
            .into_iter()
            .filter(|s| !s.starts_with("INSERT"))
            .collect();
        assert_eq!(
            control,
            vec![
                "BEGIN",
                "SAVEPOINT multidb_batch",
                "ROLLBACK TO SAVEPOINT multidb_batch",
                "RELEASE SAVEPOINT multidb_batch",
                "COMMIT",
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_batch_inside_caller_transaction_is_undone() {
        let conn = FakeConnection::new(ProviderIdentity::mssql()).stall_on_insert(2);
        let stalled = conn.stalled();
        let copier = StatementBulkCopier::new(Arc::new(MssqlDialect::default()));
        let token = CancellationToken::new();
        let tx = Transaction::begin(&conn).await.unwrap();
        {
            let mut session = copier.open_session(&conn, Some(&tx), "Movies", 2).unwrap();
            session.add_column_mapping(0, "Name").unwrap();
            session.add_column_mapping(1, "Year").unwrap();

            let writer = session.write_rows_async(movie_rows().into_iter(), token.clone());
            let canceller = async {
                stalled.notified().await;
                token.cancel();
            };
            let (result, ()) = tokio::join!(writer, canceller);
            assert!(result.unwrap_err().is_cancelled());
            assert_eq!(session.rows_written(), 2);
        }
        tx.commit().await.unwrap();

        assert_eq!(conn.committed_inserts().len(), 1);
        let statements = conn.statements();
        assert!(statements.contains(&"SAVE TRANSACTION multidb_batch".to_string()));
        assert!(statements.contains(&"ROLLBACK TRANSACTION multidb_batch".to_string()));
        assert_eq!(conn.rollbacks(), 0);
    }

    #[tokio::test]
    async fn test_write_rows_async_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}

        let conn = FakeConnection::new(ProviderIdentity::sqlite());
        let copier = sqlite_copier();
        let mut session = open_movies(&copier, &conn, 2);
        let future = session.write_rows_async(movie_rows().into_iter(), CancellationToken::new());
        assert_send(&future);
        assert_eq!(future.await.unwrap(), 3);
    }

    #[test]
    fn test_duplicate_mapping_is_rejected() {
        let conn = FakeConnection::new(ProviderIdentity::sqlite());
        let copier = sqlite_copier();
        let mut session = copier.open_session(&conn, None, "Movies", 2).unwrap();
        session.add_column_mapping(0, "Name").unwrap();

        let err = session.add_column_mapping(1, "NAME").unwrap_err();
        match err {
            DataError::DuplicateMapping { table, column, .. } => {
                assert_eq!(table, "Movies");
                assert_eq!(column, "NAME");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_no_mappings_and_bad_index() {
        let conn = FakeConnection::new(ProviderIdentity::sqlite());
        let copier = sqlite_copier();

        let mut session = copier.open_session(&conn, None, "Movies", 2).unwrap();
        let err = session
            .write_rows_async(movie_rows().into_iter(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::BulkCopy { .. }));

        let mut session = copier.open_session(&conn, None, "Movies", 2).unwrap();
        session.add_column_mapping(5, "Name").unwrap();
        let err = session
            .write_rows_async(movie_rows().into_iter(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("source index 5"));
    }

    #[test]
    fn test_open_session_checks_arguments() {
        let conn = FakeConnection::new(ProviderIdentity::mssql());
        let copier = sqlite_copier();
        assert!(matches!(
            copier.open_session(&conn, None, "Movies", 2).unwrap_err(),
            DataError::ProviderMismatch { .. }
        ));

        let mssql = StatementBulkCopier::new(Arc::new(MssqlDialect::default()));
        assert!(matches!(
            mssql.open_session(&conn, None, "Movies", 0).unwrap_err(),
            DataError::Config(_)
        ));
    }

    #[tokio::test]
    async fn test_copy_copier_falls_back_without_copy_support() {
        let conn = FakeConnection::new(ProviderIdentity::postgresql());
        let copier = CopyBulkCopier::new(Arc::new(PostgresDialect::default()));
        let mut session = copier.open_session(&conn, None, "public.movies", 5).unwrap();
        session.add_column_mapping(1, "year").unwrap();

        session
            .write_rows_async(movie_rows().into_iter(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            conn.committed_inserts(),
            vec!["INSERT INTO \"public\".\"movies\" (\"year\") VALUES (1979), (1995), (2009)"]
        );
    }
}
