//! Bulk copiers: the per-provider capability that opens sessions.

use std::sync::Arc;

use tracing::debug;

use crate::core::provider::ProviderIdentity;
use crate::core::traits::{BulkCopier, BulkLoader, Connection, SyntaxProvider, Transaction};
use crate::error::{DataError, Result};

use super::loader::{CopyLoader, StatementLoader};
use super::BulkCopySession;

const CAPABILITY: &str = "bulk copier";

/// Check session arguments and pick the connection batches run on.
fn session_connection<'c>(
    provider: &ProviderIdentity,
    connection: &'c dyn Connection,
    transaction: Option<&'c Transaction<'c>>,
    table: &str,
    batch_size: usize,
) -> Result<&'c dyn Connection> {
    if batch_size == 0 {
        return Err(DataError::Config(format!(
            "bulk copy into {} on {}: batch size must be greater than zero",
            table, provider
        )));
    }
    if table.trim().is_empty() {
        return Err(DataError::Config(format!(
            "bulk copy on {}: destination table name is empty",
            provider
        )));
    }

    let connection = transaction.map_or(connection, |tx| tx.connection());
    if connection.provider() != provider {
        return Err(DataError::ProviderMismatch {
            capability: CAPABILITY,
            expected: provider.to_string(),
            actual: connection.provider().to_string(),
        });
    }
    Ok(connection)
}

/// Bulk copier writing batches as multi-row INSERT statements.
pub struct StatementBulkCopier {
    syntax: Arc<dyn SyntaxProvider>,
}

impl StatementBulkCopier {
    pub fn new(syntax: Arc<dyn SyntaxProvider>) -> Self {
        Self { syntax }
    }
}

impl BulkCopier for StatementBulkCopier {
    fn provider(&self) -> &ProviderIdentity {
        self.syntax.provider()
    }

    fn open_session<'c>(
        &self,
        connection: &'c dyn Connection,
        transaction: Option<&'c Transaction<'c>>,
        table: &str,
        batch_size: usize,
    ) -> Result<BulkCopySession<'c>> {
        let connection =
            session_connection(self.provider(), connection, transaction, table, batch_size)?;
        debug!(
            "{}: opening statement bulk copy into {} (batch size {})",
            self.provider(),
            table,
            batch_size
        );
        Ok(BulkCopySession::new(
            self.syntax.clone(),
            table,
            batch_size,
            connection,
            transaction.is_some(),
            Box::new(StatementLoader::new(self.syntax.clone())),
        ))
    }
}

/// Bulk copier using `COPY ... FROM STDIN` where the connection supports it.
pub struct CopyBulkCopier {
    syntax: Arc<dyn SyntaxProvider>,
}

impl CopyBulkCopier {
    pub fn new(syntax: Arc<dyn SyntaxProvider>) -> Self {
        Self { syntax }
    }
}

impl BulkCopier for CopyBulkCopier {
    fn provider(&self) -> &ProviderIdentity {
        self.syntax.provider()
    }

    fn open_session<'c>(
        &self,
        connection: &'c dyn Connection,
        transaction: Option<&'c Transaction<'c>>,
        table: &str,
        batch_size: usize,
    ) -> Result<BulkCopySession<'c>> {
        let connection =
            session_connection(self.provider(), connection, transaction, table, batch_size)?;
        let loader: Box<dyn BulkLoader> = if connection.supports_copy() {
            Box::new(CopyLoader::new(self.syntax.clone()))
        } else {
            debug!(
                "{}: connection has no COPY support, falling back to INSERT statements",
                self.provider()
            );
            Box::new(StatementLoader::new(self.syntax.clone()))
        };
        Ok(BulkCopySession::new(
            self.syntax.clone(),
            table,
            batch_size,
            connection,
            transaction.is_some(),
            loader,
        ))
    }
}
